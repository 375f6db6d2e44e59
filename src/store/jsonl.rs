// src/store/jsonl.rs
//! Append-only JSON-lines store: one `<collection>.jsonl` file per collection
//! inside a directory. Keyed documents carry their key in a `_key` field so the
//! index can be rebuilt when the store is reopened.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::ingest::error::StoreError;
use crate::store::{DocumentStore, UpsertOutcome};

const KEY_FIELD: &str = "_key";

#[derive(Debug, Default)]
struct Index {
    keys: HashMap<String, HashSet<String>>,
    counts: HashMap<String, usize>,
}

#[derive(Debug)]
pub struct JsonlStore {
    dir: PathBuf,
    index: Arc<Mutex<Index>>,
}

impl JsonlStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(classify)?;

        let mut index = Index::default();
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(classify)?;
        while let Some(entry) = entries.next_entry().await.map_err(classify)? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(collection) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                continue;
            };
            let content = tokio::fs::read_to_string(&path).await.map_err(classify)?;
            let mut count = 0usize;
            let keys = index.keys.entry(collection.clone()).or_default();
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                count += 1;
                match serde_json::from_str::<Value>(line) {
                    Ok(doc) => {
                        if let Some(k) = doc.get(KEY_FIELD).and_then(Value::as_str) {
                            keys.insert(k.to_string());
                        }
                    }
                    Err(e) => {
                        tracing::warn!(target: "ingest", error = ?e, file = %path.display(), "skipping unreadable line");
                    }
                }
            }
            index.counts.insert(collection, count);
        }

        tracing::info!(target: "ingest", dir = %dir.display(), collections = index.counts.len(), "jsonl store opened");
        Ok(Self {
            dir,
            index: Arc::new(Mutex::new(index)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.jsonl"))
    }

    /// Run `write` on its own task with the index locked.
    ///
    /// A caller that stops waiting (store timeout) does not cancel the write:
    /// the line and the index update land together or not at all, and a retry
    /// queues behind them on the same lock.
    async fn detached<T, F, Fut>(&self, write: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(OwnedMutexGuard<Index>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let index = Arc::clone(&self.index);
        tokio::spawn(async move { write(index.lock_owned().await).await })
            .await
            .map_err(|e| StoreError::Permanent(format!("store write task failed: {e}")))?
    }
}

async fn append(path: &Path, doc: &Value) -> Result<(), StoreError> {
    let mut line = serde_json::to_string(doc).map_err(|e| StoreError::Permanent(e.to_string()))?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(classify)?;
    file.write_all(line.as_bytes()).await.map_err(classify)?;
    file.flush().await.map_err(classify)?;
    Ok(())
}

fn classify(e: std::io::Error) -> StoreError {
    match e.kind() {
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            StoreError::Transient(e.to_string())
        }
        _ => StoreError::Permanent(e.to_string()),
    }
}

#[async_trait::async_trait]
impl DocumentStore for JsonlStore {
    async fn upsert_by_key(
        &self,
        collection: &str,
        key: &str,
        document: Value,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut doc = document;
        match doc.as_object_mut() {
            Some(obj) => {
                obj.insert(KEY_FIELD.to_string(), Value::String(key.to_string()));
            }
            None => {
                return Err(StoreError::Permanent(
                    "keyed documents must be JSON objects".into(),
                ))
            }
        }

        let path = self.path_for(collection);
        let collection = collection.to_string();
        let key = key.to_string();
        self.detached(move |mut index| async move {
            if index
                .keys
                .get(&collection)
                .is_some_and(|keys| keys.contains(&key))
            {
                return Ok(UpsertOutcome::AlreadyPresent);
            }
            append(&path, &doc).await?;
            index.keys.entry(collection.clone()).or_default().insert(key);
            *index.counts.entry(collection).or_default() += 1;
            Ok(UpsertOutcome::Inserted)
        })
        .await
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<(), StoreError> {
        let path = self.path_for(collection);
        let collection = collection.to_string();
        self.detached(move |mut index| async move {
            append(&path, &document).await?;
            *index.counts.entry(collection).or_default() += 1;
            Ok(())
        })
        .await
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        Ok(self
            .index
            .lock()
            .await
            .counts
            .get(collection)
            .copied()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn keys_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let s = JsonlStore::open(dir.path()).await.unwrap();
            assert_eq!(
                s.upsert_by_key("articles", "abc", json!({"title": "t"})).await.unwrap(),
                UpsertOutcome::Inserted
            );
            s.insert("rejected", json!({"reason": "too_short"})).await.unwrap();
        }
        let s = JsonlStore::open(dir.path()).await.unwrap();
        assert_eq!(
            s.upsert_by_key("articles", "abc", json!({"title": "t2"})).await.unwrap(),
            UpsertOutcome::AlreadyPresent
        );
        assert_eq!(s.count("articles").await.unwrap(), 1);
        assert_eq!(s.count("rejected").await.unwrap(), 1);

        let raw = std::fs::read_to_string(dir.path().join("articles.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert!(raw.contains(r#""_key":"abc""#));
    }

    #[tokio::test]
    async fn write_outlives_a_caller_that_gave_up() {
        let dir = tempfile::tempdir().unwrap();
        let s = JsonlStore::open(dir.path()).await.unwrap();

        // Polled once, then dropped: the write has been handed off already.
        let abandoned = tokio::time::timeout(
            std::time::Duration::ZERO,
            s.upsert_by_key("articles", "abc", json!({"title": "t"})),
        )
        .await;
        assert!(abandoned.is_err());

        assert_eq!(
            s.upsert_by_key("articles", "abc", json!({"title": "t"})).await.unwrap(),
            UpsertOutcome::AlreadyPresent
        );
        assert_eq!(s.count("articles").await.unwrap(), 1);
        let raw = std::fs::read_to_string(dir.path().join("articles.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 1);
    }

    #[tokio::test]
    async fn non_object_keyed_document_is_permanent_error() {
        let dir = tempfile::tempdir().unwrap();
        let s = JsonlStore::open(dir.path()).await.unwrap();
        let err = s.upsert_by_key("articles", "k", json!([1, 2])).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
