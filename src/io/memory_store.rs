// In-process `ContentStore`, for tests and for staging archives before they
// are pushed somewhere real.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::io::remote::ContentStore;
use crate::io::topkey::ContentKey;

/// Fixed extra bytes carried by every key this store hands out.
const KEY_EXTRA: [u8; 5] = [0x00, 0x02, 0x00, 0x01, 0x00];

/// Content store held in memory.
///
/// Block keys are derived from the data (routing key = SHA-256 of the data,
/// crypto key = SHA-256 of routing key and data), so storing equal blocks
/// twice yields the same key. Top keys published under an insert URI are
/// readable under `KSK@<hex SHA-256 of the insert URI>`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: Mutex<HashMap<ContentKey, Vec<u8>>>,
    top_keys: Mutex<HashMap<String, Vec<u8>>>,
    delay: Duration,
    block_puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation sleeps for `delay` first.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Number of `put_block` calls so far.
    pub fn block_puts(&self) -> usize {
        self.block_puts.load(Ordering::Relaxed)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Request URI a top key inserted under `insert_uri` is published at.
    pub fn request_uri_for(insert_uri: &str) -> String {
        format!("KSK@{}", hex::encode(Sha256::digest(insert_uri.as_bytes())))
    }

    /// Key `data` is stored under.
    pub fn key_for(data: &[u8]) -> ContentKey {
        let routing = Sha256::digest(data);
        let mut hasher = Sha256::new();
        hasher.update(routing);
        hasher.update(data);
        let crypto = hasher.finalize();

        let mut bytes = [0u8; ContentKey::LEN];
        bytes[..5].copy_from_slice(&KEY_EXTRA);
        bytes[5..37].copy_from_slice(&routing);
        bytes[37..].copy_from_slice(&crypto);
        ContentKey::new(bytes)
    }

    fn pause(&self) {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }
}

impl ContentStore for MemoryStore {
    fn put_block(&self, data: &[u8]) -> Result<ContentKey> {
        self.pause();
        self.block_puts.fetch_add(1, Ordering::Relaxed);
        let key = Self::key_for(data);
        self.blocks.lock().entry(key.clone()).or_insert_with(|| data.to_vec());
        Ok(key)
    }

    fn get_block(&self, key: &ContentKey, max_len: u64) -> Result<Vec<u8>> {
        self.pause();
        let blocks = self.blocks.lock();
        let data = blocks.get(key).ok_or_else(|| Error::NotFound(key.to_uri()))?;
        if data.len() as u64 > max_len {
            return Err(Error::corrupt(format!(
                "block {key} is {} bytes, more than the {max_len} allowed",
                data.len()
            )));
        }
        Ok(data.clone())
    }

    fn put_top_key(&self, insert_uri: &str, data: &[u8]) -> Result<String> {
        self.pause();
        let request_uri = Self::request_uri_for(insert_uri);
        self.top_keys.lock().insert(request_uri.clone(), data.to_vec());
        Ok(request_uri)
    }

    fn get_top_key(&self, request_uri: &str) -> Result<Vec<u8>> {
        self.pause();
        self.top_keys
            .lock()
            .get(request_uri)
            .cloned()
            .ok_or_else(|| Error::NotFound(request_uri.to_string()))
    }
}
