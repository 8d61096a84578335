use std::{fmt, io};
use thiserror::Error;

/// Unified error type for the merge-tree write path.
///
/// Every fallible operation in the workspace returns this enum. The variants
/// mirror the failure taxonomy of an ingest: validation failures that reject a
/// batch before anything is persisted, lock and storage failures that abort a
/// write, and the insertion-label conflict that callers convert into a
/// successful no-op.
///
/// # Error Handling Strategy
///
/// Errors propagate upward with `?`. Only the write stream's suffix step
/// inspects variants, to turn [`Error::InsertionLabelExists`] into a soft
/// conflict. Everything else aborts the transaction and surfaces unchanged.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during file or disk operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow library error during columnar data operations.
    ///
    /// Raised while filtering, slicing, casting, or row-encoding batches. A
    /// schema mismatch between an incoming batch and the table definition
    /// usually lands here.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid user input or API parameter.
    ///
    /// Covers requests that can never succeed as issued, such as writing to
    /// the staging area of a table that declares no unique key, or naming a
    /// column the batch does not carry.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// Storage key or entity not found.
    #[error("Storage key not found")]
    NotFound,

    /// Catalog metadata error.
    #[error("{0}")]
    CatalogError(String),

    /// The summed byte length of the string unique-key columns of one row
    /// exceeded the configured limit. The whole batch is rejected.
    #[error("The size of unique string keys out of limit: {size} bytes exceeds {limit}")]
    UniqueKeyStringSizeExceeded { size: usize, limit: usize },

    /// A single insert batch touched more partitions than allowed.
    #[error("Too many partitions for single insert block: {count} (limit {limit})")]
    TooManyPartitions { count: usize, limit: usize },

    /// Distributed locks for the dedup scope were not obtained in time.
    ///
    /// # Recovery
    ///
    /// Nothing was committed. The caller must retry the whole write.
    #[error("Failed to acquire lock for txn {txn_id}")]
    LockAcquireFailed { txn_id: u64 },

    /// An equivalent insertion label was already committed.
    ///
    /// The write stream treats this as an idempotent success; it never
    /// reaches callers of `BlockOutputStream::write_suffix`.
    #[error("Insertion label {0} already exists")]
    InsertionLabelExists(String),

    /// Persisting a temporary part failed.
    #[error("Failed to write temporary part: {0}")]
    StorageWrite(String),

    /// The target table no longer exists at commit time.
    #[error("Table {0} has been dropped")]
    TableDropped(String),

    /// The bucket-scope downgrade loop did not settle within the retry cap.
    #[error("Dedup scope did not stabilize after {attempts} attempts")]
    DedupScopeUnstable { attempts: usize },

    /// Transaction state or binding error.
    ///
    /// Raised for invalid state transitions (committing an aborted
    /// transaction) and for transactions that cannot be committed from this
    /// process, such as a forwarded worker transaction without an RPC endpoint.
    #[error("{0}")]
    TransactionContextError(String),

    /// Internal error indicating a bug or unexpected state.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage write error from any displayable error.
    ///
    /// # Examples
    ///
    /// ```
    /// use mtree_result::Error;
    ///
    /// let err = Error::storage_write("disk full");
    /// assert!(matches!(err, Error::StorageWrite(msg) if msg == "disk full"));
    /// ```
    #[inline]
    pub fn storage_write<E: fmt::Display>(err: E) -> Self {
        Error::StorageWrite(err.to_string())
    }

    /// Create an internal error from any displayable error.
    #[inline]
    pub fn internal<E: fmt::Display>(err: E) -> Self {
        Error::Internal(err.to_string())
    }

    /// Whether this error is the idempotent insertion-label conflict.
    #[inline]
    pub fn is_soft_conflict(&self) -> bool {
        matches!(self, Error::InsertionLabelExists(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_conflict_is_soft() {
        assert!(Error::InsertionLabelExists("l1".into()).is_soft_conflict());
        assert!(!Error::LockAcquireFailed { txn_id: 7 }.is_soft_conflict());
    }

    #[test]
    fn messages_carry_context() {
        let err = Error::UniqueKeyStringSizeExceeded {
            size: 12,
            limit: 8,
        };
        assert!(err.to_string().contains("12 bytes exceeds 8"));
        assert_eq!(
            Error::TableDropped("db.t".into()).to_string(),
            "Table db.t has been dropped"
        );
    }
}
