//! # Storage Module
//!
//! Durable state for the engine, on sled's embedded key-value store.
//!
//! ```text
//! db.rs : VaultDb: named trees, atomic multi-tree commits, snapshot loading
//! ```
//!
//! The engine never reads from disk on the hot path. It keeps all state in
//! memory and writes through to [`VaultDb`] inside each commit, before the
//! in-memory state is swapped. On startup the stored snapshots are loaded
//! once and cross-checked against a full replay of the event journal.
//!
//! Bincode is used for everything on disk; JSON is only for the API.

pub mod db;

pub use db::{Snapshot, VaultDb};

/// Errors raised by the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transaction aborted: {0}")]
    Transaction(String),

    #[error("stored state is corrupted: {0}")]
    Corrupted(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
