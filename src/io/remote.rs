// Archives on a remote content-addressed store.
//
// Each block's binary representation is stored as one content-keyed blob;
// a top key listing the root objects and block keys is then published under
// the insert URI. Reading fetches the top key from the request URI, sanity
// checks it, then fetches every block concurrently.
//
// Block keys are remembered by the SHA-1 of the block's bytes, so blocks an
// earlier version already stored are never inserted again.

use std::collections::HashMap;
use std::sync::Arc;

use crate::archive::{Archive, ArchiveData, ArchiveIo, ArchiveResolver, ExternalRefs, Reference, RootObject};
use crate::block::Block;
use crate::config::RemoteConfig;
use crate::digest::LinkDigest;
use crate::error::{Error, Result};
use crate::io::runner::{Request, RequestRunner};
use crate::io::topkey::{BlockDescription, ContentKey, TopKey};
use crate::io::LinkSink;
use crate::link::{HistoryLinkMap, binary};

/// A content-addressed blob store with signed top-level keys.
pub trait ContentStore: Send + Sync {
    /// Store `data`, returning the key it can be fetched from.
    fn put_block(&self, data: &[u8]) -> Result<ContentKey>;

    /// Fetch a block. Fails if it is longer than `max_len`.
    fn get_block(&self, key: &ContentKey, max_len: u64) -> Result<Vec<u8>>;

    /// Publish a top key under `insert_uri`, returning the URI readers fetch
    /// it from.
    fn put_top_key(&self, insert_uri: &str, data: &[u8]) -> Result<String>;

    fn get_top_key(&self, request_uri: &str) -> Result<Vec<u8>>;
}

/// [`ArchiveIo`] over a [`ContentStore`].
pub struct RemoteIo {
    store: Arc<dyn ContentStore>,
    config: RemoteConfig,
    insert_uri: Option<String>,
    request_uri: Option<String>,
    sink: Option<Box<dyn LinkSink>>,
    block_keys: HashMap<LinkDigest, ContentKey>,
}

impl RemoteIo {
    pub fn new(store: Arc<dyn ContentStore>, config: RemoteConfig) -> Self {
        Self {
            store,
            config,
            insert_uri: None,
            request_uri: None,
            sink: None,
            block_keys: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Where the next `write` publishes its top key.
    pub fn set_insert_uri(&mut self, uri: impl Into<String>) {
        self.insert_uri = Some(uri.into());
    }

    /// Where the next `read` fetches its top key. Set by a successful write.
    pub fn set_request_uri(&mut self, uri: impl Into<String>) {
        self.request_uri = Some(uri.into());
    }

    pub fn request_uri(&self) -> Option<&str> {
        self.request_uri.as_deref()
    }

    /// Copy every link read into `sink` as well, e.g. a local link cache.
    pub fn set_link_sink(&mut self, sink: Option<Box<dyn LinkSink>>) {
        self.sink = sink;
    }

    /// Keys of blocks stored or fetched so far, by block digest.
    pub fn block_keys(&self) -> &HashMap<LinkDigest, ContentKey> {
        &self.block_keys
    }

    /// Key of a block already in the store, so writing it is skipped.
    pub fn remember_block_key(&mut self, block_digest: LinkDigest, key: ContentKey) {
        self.block_keys.insert(block_digest, key);
    }

    /// Refuse top keys a well-behaved writer would not produce.
    fn check_limits(&self, blocks: &[BlockDescription]) -> Result<()> {
        if blocks.len() > self.config.max_block_count {
            return Err(Error::corrupt(format!(
                "{} blocks, at most {} allowed",
                blocks.len(),
                self.config.max_block_count
            )));
        }
        if let Some(b) = blocks.iter().find(|b| b.length() > self.config.max_block_length) {
            return Err(Error::corrupt(format!(
                "block of {} bytes, at most {} allowed",
                b.length(),
                self.config.max_block_length
            )));
        }
        Ok(())
    }

    fn runner(&self) -> RequestRunner {
        RequestRunner::new(self.config.timeout)
    }
}

impl ArchiveIo for RemoteIo {
    fn write(&mut self, links: &HistoryLinkMap, blocks: &[Block], root_objects: &[RootObject]) -> Result<()> {
        let insert_uri = self
            .insert_uri
            .clone()
            .ok_or_else(|| Error::invariant("remote insert URI not set"))?;
        if blocks.len() > self.config.max_block_count {
            return Err(Error::invariant(format!(
                "{} blocks, the remote store takes at most {}",
                blocks.len(),
                self.config.max_block_count
            )));
        }

        let runner = self.runner();
        let mut pending: Vec<(usize, LinkDigest, u64, Request<ContentKey>)> = Vec::new();
        let mut keys: Vec<Option<ContentKey>> = vec![None; blocks.len()];
        let mut lengths = Vec::with_capacity(blocks.len());

        for (index, block) in blocks.iter().enumerate() {
            let rep = links.binary_rep(block)?;
            let length = rep.len() as u64;
            if length > self.config.max_block_length {
                return Err(Error::invariant(format!(
                    "block {index} is {length} bytes, the remote store takes at most {}",
                    self.config.max_block_length
                )));
            }
            lengths.push(length);
            let block_digest = LinkDigest::of(&rep);
            if let Some(key) = self.block_keys.get(&block_digest) {
                log::debug!("remote: block {index} already stored");
                keys[index] = Some(key.clone());
                continue;
            }
            let store = Arc::clone(&self.store);
            let request = runner.submit(format!("put block {index}"), move |token| {
                token.check("put block")?;
                store.put_block(&rep)
            })?;
            pending.push((index, block_digest, length, request));
        }
        runner.wait_all()?;

        for (index, block_digest, length, request) in pending {
            let key = request.take_result()?;
            log::debug!("remote: stored block {index} ({length} bytes) at {key}");
            self.block_keys.insert(block_digest, key.clone());
            keys[index] = Some(key);
        }

        let descriptions = keys
            .into_iter()
            .zip(lengths)
            .map(|(key, length)| {
                let key = key.ok_or_else(|| Error::invariant("block key missing after insert"))?;
                BlockDescription::new(length, vec![key])
            })
            .collect::<Result<Vec<_>>>()?;
        let top = TopKey::new(root_objects.to_vec(), descriptions)?;
        self.check_limits(top.blocks())?;
        let top_bytes = top.to_bytes()?;

        let store = Arc::clone(&self.store);
        let runner = self.runner();
        let publish = runner.submit("put top key", move |_| store.put_top_key(&insert_uri, &top_bytes))?;
        runner.wait_all()?;
        let request_uri = publish.take_result()?;
        log::info!("remote: published archive at {request_uri}");
        self.request_uri = Some(request_uri);
        Ok(())
    }

    fn read(&mut self, links: &mut HistoryLinkMap) -> Result<ArchiveData> {
        let request_uri = self
            .request_uri
            .clone()
            .ok_or_else(|| Error::invariant("remote request URI not set"))?;

        let store = Arc::clone(&self.store);
        let runner = self.runner();
        let uri = request_uri.clone();
        let fetch = runner.submit("get top key", move |_| store.get_top_key(&uri))?;
        runner.wait_all()?;
        let top_bytes = fetch.take_result()?;
        if top_bytes.len() > TopKey::MAX_LENGTH {
            return Err(Error::corrupt(format!("top key at {request_uri} is {} bytes", top_bytes.len())));
        }
        let top = TopKey::from_bytes(&top_bytes)?;
        self.check_limits(top.blocks())?;

        let runner = self.runner();
        let requests = top
            .blocks()
            .iter()
            .enumerate()
            .map(|(index, desc)| {
                let store = Arc::clone(&self.store);
                let key = desc.primary_key().clone();
                let length = desc.length();
                runner.submit(format!("get block {index}"), move |token| {
                    token.check("get block")?;
                    store.get_block(&key, length)
                })
            })
            .collect::<Result<Vec<_>>>()?;
        runner.wait_all()?;

        let mut blocks = Vec::with_capacity(requests.len());
        for (desc, request) in top.blocks().iter().zip(&requests) {
            let bytes = request.take_result()?;
            if bytes.len() as u64 != desc.length() {
                return Err(Error::corrupt(format!(
                    "{} is {} bytes, top key says {}",
                    request.name(),
                    bytes.len(),
                    desc.length()
                )));
            }
            let parsed = binary::read_all(&bytes)?;
            if let Some(sink) = &self.sink {
                for link in &parsed {
                    sink.write_link(link)?;
                }
            }
            let block: Block = parsed.iter().map(|l| l.digest()).collect();
            links.add_links(parsed);
            self.block_keys.insert(LinkDigest::of(&bytes), desc.primary_key().clone());
            blocks.push(block);
        }
        log::debug!("remote: read {} blocks from {request_uri}", blocks.len());
        Ok(ArchiveData::new(blocks, top.root_objects().to_vec()))
    }
}

impl ArchiveResolver for RemoteIo {
    /// Load the remote version `reference` names. The current request URI is
    /// left unchanged.
    fn resolve(&mut self, reference: &Reference) -> Result<Archive> {
        if reference.kind != ExternalRefs::KIND_REMOTE {
            return Err(Error::NotFound(format!("remote store can't resolve {reference}")));
        }
        let saved = self.request_uri.replace(reference.key.clone());
        let loaded = Archive::load(self);
        self.request_uri = saved;
        loaded
    }
}
