//! Blob storage behind part files.
//!
//! A pager hands out a fresh key for every blob it stores; blobs are never
//! overwritten. Reads return `bytes::Bytes` so the parquet reader decodes a
//! part straight from pager memory.

use bytes::Bytes;
use mtree_result::Result;

pub mod mem_pager;
pub use mem_pager::MemPager;

/// Opaque address of a blob, only meaningful to the pager that issued it.
pub type PhysicalKey = u64;

pub trait Pager: Send + Sync + 'static {
    /// Store `blob` under a newly allocated key.
    fn put(&self, blob: Bytes) -> Result<PhysicalKey>;

    /// Blob at `key`, or `None` if it was never written or has been freed.
    fn get(&self, key: PhysicalKey) -> Result<Option<Bytes>>;

    /// Free `keys`, returning how many held a blob. Unknown keys are ignored.
    fn free_many(&self, keys: &[PhysicalKey]) -> Result<usize>;

    /// Keys currently holding a blob, ascending.
    fn keys(&self) -> Result<Vec<PhysicalKey>>;
}
