use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use bridgewatch::{
    store::InMemoryStore, AdapterError, Chain, ChainAdapter, Message, Store, StoreError, Timestamp,
};

/// Builds a message whose fields are derived from its position.
pub fn message(chain: Chain, watermark: u64, sub_index: u64) -> Message {
    Message {
        chain,
        watermark,
        sub_index,
        timestamp: Timestamp::from_secs(1_650_000_000 + watermark),
        source_transaction_id: format!("0x{watermark:x}{sub_index:02x}"),
        emitter: format!("{:064x}", sub_index + 1),
        sequence: (watermark * 100 + sub_index).to_string(),
    }
}

/// A scripted chain: messages are placed at fixed watermarks and failures can be injected.
#[derive(Debug)]
pub struct MockAdapter {
    chain: Chain,
    batch_size: u64,
    initial: Option<u64>,
    finalized: AtomicU64,
    messages: BTreeMap<u64, Vec<Message>>,
    /// Number of upcoming `messages_in_range` calls that fail.
    pub fetch_failures: AtomicU32,
    /// Makes `finalized_watermark` fail with a configuration error.
    pub misconfigured: AtomicBool,
    /// Every range requested, in order.
    pub ranges: Mutex<Vec<(u64, u64)>>,
}

impl MockAdapter {
    pub fn new(chain: Chain, finalized: u64) -> Self {
        Self {
            chain,
            batch_size: 100,
            initial: None,
            finalized: AtomicU64::new(finalized),
            messages: BTreeMap::new(),
            fetch_failures: AtomicU32::new(0),
            misconfigured: AtomicBool::new(false),
            ranges: Mutex::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_initial(mut self, initial: u64) -> Self {
        self.initial = Some(initial);
        self
    }

    /// Places `count` messages at `watermark`.
    pub fn with_messages(mut self, watermark: u64, count: u64) -> Self {
        let chain = self.chain;
        self.messages
            .entry(watermark)
            .or_default()
            .extend((0..count).map(|i| message(chain, watermark, i)));
        self
    }

    pub fn set_finalized(&self, finalized: u64) {
        self.finalized.store(finalized, Ordering::SeqCst);
    }

    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.ranges.lock().unwrap().clone()
    }

    /// Every scripted message up to and including `to`.
    pub fn expected(&self, to: u64) -> Vec<Message> {
        self.messages.range(..=to).flat_map(|(_, messages)| messages.clone()).collect()
    }
}

#[async_trait]
impl ChainAdapter for MockAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    fn max_batch_size(&self) -> u64 {
        self.batch_size
    }

    fn initial_watermark(&self) -> Option<u64> {
        self.initial
    }

    async fn finalized_watermark(&self) -> Result<u64, AdapterError> {
        if self.misconfigured.load(Ordering::SeqCst) {
            return Err(AdapterError::Configuration(format!("no endpoint for {}", self.chain)))
        }
        Ok(self.finalized.load(Ordering::SeqCst))
    }

    async fn messages_in_range(&self, from: u64, to: u64) -> Result<Vec<Message>, AdapterError> {
        self.ranges.lock().unwrap().push((from, to));

        let failures = self.fetch_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.fetch_failures.store(failures - 1, Ordering::SeqCst);
            return Err(AdapterError::Fetch("connection reset".to_string()))
        }

        if to < from {
            return Ok(Vec::new())
        }
        Ok(self.messages.range(from..=to).flat_map(|(_, messages)| messages.clone()).collect())
    }
}

/// An [`InMemoryStore`] whose merges can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    /// Number of upcoming merges that fail before touching the inner store.
    pub merge_failures: AtomicU32,
    /// Merges that reached the inner store.
    pub merges: AtomicU32,
}

#[async_trait]
impl Store for FlakyStore {
    async fn last_observed(&self, chain: Chain) -> Result<Option<Message>, StoreError> {
        self.inner.last_observed(chain).await
    }

    async fn merge(&self, chain: Chain, messages: Vec<Message>) -> Result<(), StoreError> {
        let failures = self.merge_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.merge_failures.store(failures - 1, Ordering::SeqCst);
            return Err(StoreError::Write("backend unavailable".to_string()))
        }

        self.merges.fetch_add(1, Ordering::SeqCst);
        self.inner.merge(chain, messages).await
    }
}
