//! Transactions of the merge-tree write path.
//!
//! # Key Concepts
//!
//! - **[`TxnIdManager`]**: allocates transaction ids and catalog read
//!   timestamps from one monotonic sequence and tracks commit status
//! - **[`TransactionKind`]**: server- or worker-initiated, resolved once when
//!   a write starts; decides whether a plain insert commits eagerly
//! - **[`WriteTransaction`]**: the transaction a write is bound to; its only
//!   transitions are pending → committed and pending → aborted
//! - **[`CommitSink`]**: the seam that applies a commit atomically
//! - **[`CommitOutcome`]**: a label conflict is the `SoftConflict` outcome,
//!   not an error
pub mod kind;
pub mod mvcc;
pub mod transaction;

pub use kind::{PlainCommitMode, TransactionKind, WorkerSource};
pub use mvcc::{TXN_ID_MIN, TXN_ID_NONE, TxnIdManager, TxnStatus};
pub use transaction::{CommitOutcome, CommitRequest, CommitSink, WriteTransaction};
