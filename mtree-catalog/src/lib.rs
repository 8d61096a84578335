//! Collaborators the write path consumes, as traits, plus in-memory
//! implementations for tests and embedding.
//!
//! | Seam | In-memory implementation |
//! |---|---|
//! | [`Catalog`], [`PartPublisher`], [`CommitSink`](mtree_transaction::CommitSink) | [`MemCatalog`] |
//! | [`LockService`] | [`MemLockService`] |
//! | [`DictionaryEncoder`] | [`MemDictionary`] |
//!
//! [`MemCatalog`] is an arena of parts keyed by [`PartInfo`](mtree_types::PartInfo).
//! Delete bitmaps are stored beside the arena and refer to parts by key, each
//! stamped with the timestamp it became visible at, so any snapshot can be
//! reconstructed.

pub mod dictionary;
pub mod lock;
pub mod mem_catalog;
pub mod traits;

pub use dictionary::MemDictionary;
pub use lock::{LockHolder, LockId, LockService, MemLockService};
pub use mem_catalog::MemCatalog;
pub use traits::{Catalog, DictionaryEncoder, PartPublisher};
