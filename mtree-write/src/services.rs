//! Collaborators a write runs against.

use mtree_catalog::{
    Catalog, DictionaryEncoder, LockService, MemCatalog, MemDictionary, MemLockService,
    PartPublisher,
};
use mtree_storage::{
    AtomicBlockIdAllocator, BlockIdAllocator, MemPager, PartReader, PartStore, PartWriter,
};
use mtree_transaction::CommitSink;
use mtree_types::WriteSettings;
use std::sync::Arc;

/// Handles to every external service the write path calls, plus the
/// settings of the write.
#[derive(Clone)]
pub struct WriteServices {
    pub catalog: Arc<dyn Catalog>,
    pub publisher: Arc<dyn PartPublisher>,
    pub commit_sink: Arc<dyn CommitSink>,
    pub locks: Arc<dyn LockService>,
    pub writer: Arc<dyn PartWriter>,
    pub reader: Arc<dyn PartReader>,
    pub block_ids: Arc<dyn BlockIdAllocator>,
    pub encoder: Option<Arc<dyn DictionaryEncoder>>,
    pub settings: WriteSettings,
}

impl WriteServices {
    /// Wire the in-memory implementations together.
    pub fn in_memory(
        catalog: Arc<MemCatalog>,
        store: PartStore<MemPager>,
        locks: MemLockService,
        settings: WriteSettings,
    ) -> Self {
        let store = Arc::new(store);
        Self {
            catalog: Arc::clone(&catalog) as Arc<dyn Catalog>,
            publisher: Arc::clone(&catalog) as Arc<dyn PartPublisher>,
            commit_sink: catalog as Arc<dyn CommitSink>,
            locks: Arc::new(locks),
            writer: Arc::clone(&store) as Arc<dyn PartWriter>,
            reader: store as Arc<dyn PartReader>,
            block_ids: Arc::new(AtomicBlockIdAllocator::default()),
            encoder: Some(Arc::new(MemDictionary::new())),
            settings,
        }
    }

    pub fn with_settings(mut self, settings: WriteSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn PartWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_block_ids(mut self, block_ids: Arc<dyn BlockIdAllocator>) -> Self {
        self.block_ids = block_ids;
        self
    }
}
