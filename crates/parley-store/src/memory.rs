use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::locks::KeyLocks;
use crate::record::{shallow_merge, Record, Store};

use async_trait::async_trait;

/// In-memory store backend — the reference implementation.
///
/// Insertion order is tracked with a parallel key list next to the map,
/// so `get_all` and `find` return records in the order they were created.
pub struct MemoryStore<T: Record> {
    inner: RwLock<Inner<T>>,
    locks: KeyLocks,
}

struct Inner<T> {
    records: HashMap<String, T>,
    order: Vec<String>,
}

impl<T: Record> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                order: Vec::new(),
            }),
            locks: KeyLocks::new(),
        }
    }
}

impl<T: Record> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> Store<T> for MemoryStore<T> {
    async fn get(&self, id: &str) -> Result<Option<T>> {
        let inner = self.inner.read().expect("store poisoned");
        Ok(inner.records.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<T>> {
        let inner = self.inner.read().expect("store poisoned");
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect())
    }

    async fn find(&self, predicate: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync)) -> Result<Vec<T>> {
        let inner = self.inner.read().expect("store poisoned");
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .filter(|r| predicate(r))
            .collect())
    }

    async fn create(&self, record: T) -> Result<T> {
        let mut inner = self.inner.write().expect("store poisoned");
        let id = record.id().to_string();
        if inner.records.contains_key(&id) {
            return Err(StoreError::Duplicate(id));
        }
        inner.order.push(id.clone());
        inner.records.insert(id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, patch: serde_json::Value) -> Result<T> {
        let mut inner = self.inner.write().expect("store poisoned");
        let current = inner
            .records
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let merged = shallow_merge(current, &patch)?;
        inner.records.insert(id.to_string(), merged.clone());
        Ok(merged)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().expect("store poisoned");
        let removed = inner.records.remove(id).is_some();
        if removed {
            inner.order.retain(|k| k != id);
        }
        Ok(removed)
    }

    async fn size(&self) -> Result<usize> {
        let inner = self.inner.read().expect("store poisoned");
        Ok(inner.records.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().expect("store poisoned");
        inner.records.clear();
        inner.order.clear();
        Ok(())
    }

    fn locks(&self) -> &KeyLocks {
        &self.locks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Note {
        id: String,
        body: String,
    }

    impl Record for Note {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn note(id: &str, body: &str) -> Note {
        Note {
            id: id.into(),
            body: body.into(),
        }
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let store = MemoryStore::new();
        store.create(note("a", "first")).await.unwrap();
        let got = store.get("a").await.unwrap().unwrap();
        assert_eq!(got.body, "first");
        assert_eq!(store.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = MemoryStore::new();
        store.create(note("a", "x")).await.unwrap();
        assert!(matches!(
            store.create(note("a", "y")).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn get_all_preserves_insertion_order() {
        let store = MemoryStore::new();
        for id in ["c", "a", "b"] {
            store.create(note(id, id)).await.unwrap();
        }
        let ids: Vec<String> = store
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn update_merges_and_missing_id_fails() {
        let store = MemoryStore::new();
        store.create(note("a", "old")).await.unwrap();
        let updated = store
            .update("a", serde_json::json!({"body": "new"}))
            .await
            .unwrap();
        assert_eq!(updated.body, "new");
        assert!(matches!(
            store.update("zzz", serde_json::json!({})).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_from_order_too() {
        let store = MemoryStore::new();
        store.create(note("a", "x")).await.unwrap();
        store.create(note("b", "y")).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        let ids: Vec<String> = store
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["b"]);
    }
}
