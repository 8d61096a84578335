//! Error types and result definitions for the merge-tree write path.
//!
//! This crate provides the unified error type ([`Error`]) and result alias
//! ([`Result<T>`]) used by every `mtree-*` crate, so errors cross crate
//! boundaries with `?` and no conversion glue.
//!
//! # Error Categories
//!
//! - **Validation** ([`Error::InvalidArgumentError`], [`Error::UniqueKeyStringSizeExceeded`],
//!   [`Error::TooManyPartitions`]): the batch is rejected before any part is written
//! - **Locking** ([`Error::LockAcquireFailed`], [`Error::DedupScopeUnstable`])
//! - **Storage** ([`Error::StorageWrite`], [`Error::Io`], [`Error::Arrow`])
//! - **Catalog** ([`Error::TableDropped`], [`Error::CatalogError`], [`Error::NotFound`])
//! - **Transaction** ([`Error::InsertionLabelExists`], [`Error::TransactionContextError`])
//! - **Internal errors** ([`Error::Internal`]): bugs or unexpected states

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;
