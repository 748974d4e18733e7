// Tuning parameters for archives and remote storage.
//
// Defaults are part of the on-disk behaviour: archives written with other
// chain or block limits are still readable, but produce different layouts.

use std::time::Duration;

/// Longest delta chain before a full copy is stored again.
pub const MAX_CHAIN_LENGTH: usize = 16;

/// Block count that triggers partition compression.
pub const MAX_BLOCKS: usize = 4;

/// Each block must be at least this many times smaller than the next older one.
pub const REPARTITION_MULTIPLE: u64 = 2;

/// Default join-all timeout for remote requests (one hour).
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Largest block a remote top key may describe (8 MiB).
pub const MAX_REMOTE_BLOCK_LENGTH: u64 = 8 * 1024 * 1024;

/// Largest number of blocks a remote top key may describe.
pub const MAX_REMOTE_BLOCK_COUNT: usize = 4;

/// Archive layout configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// Chains at least this long get a full reinsert on the next update.
    pub max_chain_length: usize,
    /// Target block count after compression.
    pub max_blocks: usize,
    /// Size ratio enforced between neighbouring blocks.
    pub repartition_multiple: u64,
}

impl ArchiveConfig {
    /// Keeps every update as a delta for longer and merges blocks less often.
    pub const fn long_chains() -> Self {
        Self {
            max_chain_length: 64,
            max_blocks: 8,
            repartition_multiple: REPARTITION_MULTIPLE,
        }
    }

    /// Always stores full copies.
    pub const fn no_deltas() -> Self {
        Self {
            max_chain_length: 1,
            max_blocks: MAX_BLOCKS,
            repartition_multiple: REPARTITION_MULTIPLE,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_chain_length: MAX_CHAIN_LENGTH,
            max_blocks: MAX_BLOCKS,
            repartition_multiple: REPARTITION_MULTIPLE,
        }
    }
}

/// Remote backend limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteConfig {
    /// How long `write`/`read` wait for all outstanding requests.
    pub timeout: Duration,
    /// Top keys describing a larger block are rejected.
    pub max_block_length: u64,
    /// Top keys describing more blocks are rejected.
    pub max_block_count: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REMOTE_TIMEOUT,
            max_block_length: MAX_REMOTE_BLOCK_LENGTH,
            max_block_count: MAX_REMOTE_BLOCK_COUNT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ArchiveConfig::default();
        assert_eq!(c.max_chain_length, 16);
        assert_eq!(c.max_blocks, 4);
        assert_eq!(c.repartition_multiple, 2);

        let r = RemoteConfig::default();
        assert_eq!(r.timeout, Duration::from_secs(3600));
        assert_eq!(r.max_block_length, 8 * 1024 * 1024);
        assert_eq!(r.max_block_count, 4);
    }

    #[test]
    fn presets() {
        assert_eq!(ArchiveConfig::no_deltas().max_chain_length, 1);
        assert!(ArchiveConfig::long_chains().max_chain_length > MAX_CHAIN_LENGTH);
    }
}
