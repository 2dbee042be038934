use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;
use tracing::instrument;

use crate::error::{Result, StoreError};
use crate::locks::KeyLocks;
use crate::record::{shallow_merge, Record, Store};

/// SQLite-backed store.
///
/// One table per record type; rows hold the full record as JSON with
/// snake_case keys (the wire format stays camelCase — the mapping happens
/// here, at the persistence boundary). Wraps a shared connection in a
/// `Mutex`, which is sufficient for a single-node deployment; the lock is
/// never held across an await point.
pub struct SqliteStore<T: Record> {
    conn: Arc<Mutex<Connection>>,
    table: String,
    locks: KeyLocks,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> SqliteStore<T> {
    /// Open a store over `conn` using `table`. Creates the table if absent.
    ///
    /// Table names are interpolated into SQL, so only `[a-z0-9_]` is allowed.
    pub fn new(conn: Arc<Mutex<Connection>>, table: &str) -> Result<Self> {
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(StoreError::Database(format!(
                "invalid table name: {table}"
            )));
        }

        {
            let db = conn.lock().expect("sqlite connection poisoned");
            db.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id   TEXT PRIMARY KEY,
                    body TEXT NOT NULL
                );"
            ))?;
        }

        Ok(Self {
            conn,
            table: table.to_string(),
            locks: KeyLocks::new(),
            _marker: PhantomData,
        })
    }

    fn decode(&self, body: &str) -> Result<T> {
        let stored: serde_json::Value = serde_json::from_str(body)?;
        let wire = map_keys(stored, &snake_to_camel);
        Ok(serde_json::from_value(wire)?)
    }

    fn encode(&self, record: &T) -> Result<String> {
        let wire = serde_json::to_value(record)?;
        let stored = map_keys(wire, &camel_to_snake);
        Ok(serde_json::to_string(&stored)?)
    }
}

#[async_trait]
impl<T: Record> Store<T> for SqliteStore<T> {
    #[instrument(skip(self), fields(table = %self.table))]
    async fn get(&self, id: &str) -> Result<Option<T>> {
        let body: Option<String> = {
            let db = self.conn.lock().expect("sqlite connection poisoned");
            match db.query_row(
                &format!("SELECT body FROM {} WHERE id = ?1", self.table),
                rusqlite::params![id],
                |row| row.get(0),
            ) {
                Ok(b) => Some(b),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            }
        };
        body.map(|b| self.decode(&b)).transpose()
    }

    async fn get_all(&self) -> Result<Vec<T>> {
        let bodies: Vec<String> = {
            let db = self.conn.lock().expect("sqlite connection poisoned");
            let mut stmt =
                db.prepare(&format!("SELECT body FROM {} ORDER BY rowid", self.table))?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.filter_map(|r| r.ok()).collect()
        };
        bodies.iter().map(|b| self.decode(b)).collect()
    }

    async fn find(&self, predicate: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync)) -> Result<Vec<T>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|r| predicate(r))
            .collect())
    }

    #[instrument(skip(self, record), fields(table = %self.table))]
    async fn create(&self, record: T) -> Result<T> {
        let body = self.encode(&record)?;
        let db = self.conn.lock().expect("sqlite connection poisoned");
        let inserted = db.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (id, body) VALUES (?1, ?2)",
                self.table
            ),
            rusqlite::params![record.id(), body],
        )?;
        if inserted == 0 {
            return Err(StoreError::Duplicate(record.id().to_string()));
        }
        Ok(record)
    }

    async fn update(&self, id: &str, patch: serde_json::Value) -> Result<T> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let merged = shallow_merge(&current, &patch)?;
        let body = self.encode(&merged)?;

        let db = self.conn.lock().expect("sqlite connection poisoned");
        let changed = db.execute(
            &format!("UPDATE {} SET body = ?1 WHERE id = ?2", self.table),
            rusqlite::params![body, id],
        )?;
        if changed == 0 {
            // Deleted between read and write; treat as missing.
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(merged)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let db = self.conn.lock().expect("sqlite connection poisoned");
        let n = db.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.table),
            rusqlite::params![id],
        )?;
        Ok(n > 0)
    }

    async fn size(&self) -> Result<usize> {
        let db = self.conn.lock().expect("sqlite connection poisoned");
        let n: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    async fn clear(&self) -> Result<()> {
        let db = self.conn.lock().expect("sqlite connection poisoned");
        db.execute(&format!("DELETE FROM {}", self.table), [])?;
        Ok(())
    }

    fn locks(&self) -> &KeyLocks {
        &self.locks
    }
}

/// Apply `f` to every top-level object key.
///
/// Only top-level keys are record fields; nested objects (custom fields,
/// metadata) keep their caller-chosen keys untouched.
fn map_keys(value: serde_json::Value, f: &dyn Fn(&str) -> String) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter().map(|(k, v)| (f(&k), v)).collect(),
        ),
        other => other,
    }
}

fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}
