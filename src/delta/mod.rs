// Delta codec: line diff, patch application, payload compression and the
// coder that combines them into chain links.

pub mod bdiff;
pub mod coder;
pub mod mpatch;
pub mod zlib;

pub use bdiff::{Hunk, diff};
pub use coder::DeltaCoder;
pub use mpatch::patch;
