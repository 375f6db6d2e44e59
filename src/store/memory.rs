// src/store/memory.rs
use std::collections::HashMap;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ingest::error::StoreError;
use crate::ingest::types::{Article, RejectedItem};
use crate::store::{DocumentStore, UpsertOutcome, ARTICLES, REJECTED};

#[derive(Debug, Default)]
struct Collection {
    keys: HashMap<String, usize>,
    docs: Vec<Value>,
}

/// In-process store. Upserts are atomic under one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .get(collection)
            .map(|c| c.docs.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, collection: &str, key: &str) -> Option<Value> {
        let guard = self.collections.lock();
        let c = guard.get(collection)?;
        c.keys.get(key).and_then(|i| c.docs.get(*i)).cloned()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map_or(0, |c| c.docs.len())
    }

    pub fn articles(&self) -> Vec<Article> {
        decode_all(self.documents(ARTICLES))
    }

    pub fn rejections(&self) -> Vec<RejectedItem> {
        decode_all(self.documents(REJECTED))
    }
}

fn decode_all<T: DeserializeOwned>(docs: Vec<Value>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|d| serde_json::from_value(d).ok())
        .collect()
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert_by_key(
        &self,
        collection: &str,
        key: &str,
        document: Value,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut guard = self.collections.lock();
        let c = guard.entry(collection.to_string()).or_default();
        if c.keys.contains_key(key) {
            return Ok(UpsertOutcome::AlreadyPresent);
        }
        c.keys.insert(key.to_string(), c.docs.len());
        c.docs.push(document);
        Ok(UpsertOutcome::Inserted)
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<(), StoreError> {
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .docs
            .push(document);
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        Ok(self.len(collection))
    }
}
