//! Part storage for the merge-tree write path.
//!
//! Parts are stored as Apache Parquet files held in memory and written as a
//! single blob each through the [`pager::Pager`] abstraction. The pager owns
//! persistence; this crate only knows how to encode a sub-batch, where its
//! blob lives, and which of its rows were written as delete markers.
//!
//! - [`pager`]: blob storage trait and the in-memory [`pager::MemPager`]
//! - [`codec`]: Parquet encoding of part blobs
//! - [`part_store`]: the [`PartWriter`] / [`PartReader`] seams and the
//!   pager-backed [`PartStore`]
//! - [`block_id`]: the shared block id sequence

pub mod block_id;
pub mod codec;
pub mod pager;
pub mod part_store;

pub use block_id::{AtomicBlockIdAllocator, BlockIdAllocator};
pub use codec::PartWriterConfig;
pub use pager::{MemPager, Pager, PhysicalKey};
pub use part_store::{
    BatchWithPartition, PartReader, PartStore, PartWriter, TempPartContext, delete_flags,
    delete_marker_bitmap,
};
