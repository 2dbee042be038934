use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Result, StoreError};
use crate::locks::KeyLocks;

/// A storable domain record: serde-round-trippable with a stable string id.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    fn id(&self) -> &str;
}

/// Generic record store.
///
/// Two backends implement this contract: [`MemoryStore`](crate::MemoryStore)
/// (default, insertion-ordered) and [`SqliteStore`](crate::SqliteStore). The
/// public behavior is identical except that the SQLite backend may return
/// [`StoreError::Transient`], which callers retry.
#[async_trait]
pub trait Store<T: Record>: Send + Sync {
    /// Fetch a record by id.
    async fn get(&self, id: &str) -> Result<Option<T>>;

    /// All records, in insertion order.
    async fn get_all(&self) -> Result<Vec<T>>;

    /// Records matching `predicate`, in insertion order.
    async fn find(&self, predicate: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync)) -> Result<Vec<T>>;

    /// Insert a new record. Fails with [`StoreError::Duplicate`] when the id
    /// is already present.
    async fn create(&self, record: T) -> Result<T>;

    /// Shallow-merge `patch` into the stored record and return the result.
    ///
    /// Patch keys use the record's wire casing (camelCase); top-level keys
    /// replace wholesale — nested objects are not merged recursively.
    async fn update(&self, id: &str, patch: serde_json::Value) -> Result<T>;

    /// Remove a record. Returns whether anything was deleted.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn size(&self) -> Result<usize>;

    async fn clear(&self) -> Result<()>;

    /// Advisory per-key locks scoped to this store. Callers serialize
    /// compound read-modify-write sequences through these.
    fn locks(&self) -> &KeyLocks;
}

/// Shallow-merge a JSON object patch into a record.
///
/// Fails when the patch is not an object or when the merged document no
/// longer deserializes into `T` (e.g. a patch nulling a required field).
pub(crate) fn shallow_merge<T: Record>(current: &T, patch: &serde_json::Value) -> Result<T> {
    let patch_map = patch
        .as_object()
        .ok_or_else(|| StoreError::InvalidPatch("patch must be a JSON object".to_string()))?;

    let mut base = serde_json::to_value(current)?;
    let base_map = base
        .as_object_mut()
        .ok_or_else(|| StoreError::InvalidPatch("record is not a JSON object".to_string()))?;

    for (key, value) in patch_map {
        base_map.insert(key.clone(), value.clone());
    }

    serde_json::from_value(base)
        .map_err(|e| StoreError::InvalidPatch(format!("merged record invalid: {e}")))
}
