//! Identifiers shared across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a table.
///
/// A thin wrapper around `u64` so table ids are never confused with block or
/// transaction ids, which share the same representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(pub u64);

impl From<u64> for TableId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TableId> for u64 {
    fn from(id: TableId) -> Self {
        id.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction identifier. Allocated from the same monotonic sequence as
/// [`Timestamp`], so a transaction id is also its start timestamp.
pub type TxnId = u64;

/// Logical timestamp used for snapshot reads of the catalog.
pub type Timestamp = u64;

/// Identifier of a written block, unique per allocator.
pub type BlockId = u64;

/// Bucket number of a part; [`UNBUCKETED`] when the table has no cluster key.
pub type BucketNumber = i64;

/// Bucket number carried by parts of tables without a cluster key.
pub const UNBUCKETED: BucketNumber = -1;
