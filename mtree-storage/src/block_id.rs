//! Block id sequence shared by every sub-batch of a write.

use mtree_types::BlockId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of monotonic block ids.
///
/// Implementations must be safe to call from the part-dump worker pool; they
/// are the only mutable state shared across sub-batches of one write.
pub trait BlockIdAllocator: Send + Sync {
    fn next_block_id(&self) -> BlockId;
}

/// Process-wide atomic sequence.
#[derive(Debug)]
pub struct AtomicBlockIdAllocator {
    next: AtomicU64,
}

impl AtomicBlockIdAllocator {
    pub fn new(start: BlockId) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl Default for AtomicBlockIdAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl BlockIdAllocator for AtomicBlockIdAllocator {
    fn next_block_id(&self) -> BlockId {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn ids_are_unique_across_threads() {
        let allocator = AtomicBlockIdAllocator::default();
        let ids: Vec<BlockId> = (0..1000)
            .into_par_iter()
            .map(|_| allocator.next_block_id())
            .collect();
        let distinct: FxHashSet<BlockId> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), 1000);
        assert_eq!(allocator.next_block_id(), 1001);
    }
}
