//! Data model shared by the merge-tree write path crates.
//!
//! These types live in `mtree-types` so storage, transaction, catalog and the
//! write engine can agree on them without depending on one another.
//!
//! - [`PartInfo`] / [`Part`]: immutable units of written rows, keyed by
//!   partition, bucket, block and transaction
//! - [`DeleteBitmap`] / [`LocalDeleteBitmap`]: positional row deletions,
//!   referenced by [`PartInfo`] rather than embedded in the part
//! - [`DedupScope`] / [`LockRequest`]: lock granularity of an upsert
//! - [`TableMetadata`]: the table definition the write path consumes
//! - [`WriteSettings`]: tunables of a write

pub mod ids;
pub mod part;
pub mod scope;
pub mod settings;
pub mod table;

pub use ids::{BlockId, BucketNumber, TableId, Timestamp, TxnId, UNBUCKETED};
pub use part::{DeleteBitmap, DeleteBitmapKind, LocalDeleteBitmap, Part, PartInfo, PartState};
pub use scope::{DedupScope, LockRequest};
pub use settings::WriteSettings;
pub use table::{ClusterByDefinition, DELETE_FLAG_COLUMN_NAME, TableMetadata, VersionMode};
