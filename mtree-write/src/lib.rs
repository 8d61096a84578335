//! Ingest path of the merge-tree engine.
//!
//! A [`BlockOutputStream`] receives record batches for one table under one
//! transaction. Each batch flows through:
//!
//! 1. [`PartBuilder`]: in-batch unique-key dedup, partition and bucket
//!    split, optional dictionary encoding, then one temporary part per
//!    sub-batch.
//! 2. [`TransactionCommitter`]: on suffix, commits the accumulated parts by
//!    plain insert, staged insert, or locked upsert.
//! 3. For upserts, [`DedupCoordinator`] takes the locks chosen by
//!    [`LockScopeResolver`], reads the existing parts inside the scope, and
//!    derives the delete bitmaps that keep one row alive per unique key.
//!
//! Collaborators (catalog, locks, storage, dictionary) are reached through the
//! traits bundled in [`WriteServices`].

pub mod batch_dedup;
pub mod committer;
pub mod dedup;
pub mod output_stream;
pub mod part_builder;
pub mod partition;
pub mod scope;
pub mod services;
pub mod unique_key;

pub use batch_dedup::{FilterInfo, dedup_with_unique_key, filter_batch};
pub use committer::{CommitProtocol, CommitResult, TransactionCommitter};
pub use dedup::{DedupCoordinator, DedupOutcome};
pub use output_stream::{BlockOutputStream, WriteState};
pub use part_builder::PartBuilder;
pub use partition::{ALL_PARTITION_ID, PartitionBlock, split_by_bucket, split_by_partition};
pub use scope::LockScopeResolver;
pub use services::WriteServices;
pub use unique_key::KeyEncoder;
