// src/store/mod.rs
//! Document store abstraction used by the persistence gateway.
//!
//! Collections are addressed by name. Keyed upserts never overwrite: a second
//! write under an existing key reports `AlreadyPresent` and changes nothing.

pub mod jsonl;
pub mod memory;

use serde_json::Value;

use crate::ingest::error::StoreError;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

pub const ARTICLES: &str = "articles";
pub const REJECTED: &str = "rejected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    AlreadyPresent,
}

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Whether `upsert_by_key` is atomic per key. When it is not, the gateway
    /// serializes writes for the same key itself.
    fn atomic_upsert(&self) -> bool {
        true
    }

    /// Insert `document` under `key` unless the key already exists.
    async fn upsert_by_key(
        &self,
        collection: &str,
        key: &str,
        document: Value,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Unconditional append.
    async fn insert(&self, collection: &str, document: Value) -> Result<(), StoreError>;

    async fn count(&self, collection: &str) -> Result<usize, StoreError>;
}
