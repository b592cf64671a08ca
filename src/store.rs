//! Document store interface and the in-memory implementation.
//!
//! The store is a tree of JSON values addressed by slash-separated paths,
//! mirroring the Realtime Database model: writing `null` deletes a node and
//! empty objects disappear. Read-modify-write sequences go through
//! [`transact`], which pairs a versioned read with a conditional write.

use async_trait::async_trait;
use dashmap::DashMap;
use ring::digest::{digest, SHA256};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempts made by [`transact`] before reporting contention
pub const MAX_CAS_ATTEMPTS: usize = 8;

/// Longest key the remote store accepts, in bytes
pub const MAX_KEY_LEN: usize = 768;

/// Opaque content version returned by a versioned read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(pub String);

/// Outcome of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Committed,
    /// The node changed since the version was read
    Stale,
}

/// Range condition applied to the ordered child field
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    EqualTo(Value),
    StartAt(Value),
}

/// Ordered child query (`orderBy` + optional filter + `limitToFirst`)
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub order_by: String,
    pub filter: Option<Filter>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn order_by(field: &str) -> Self {
        Self {
            order_by: field.to_string(),
            filter: None,
            limit: None,
        }
    }

    pub fn equal_to(mut self, value: impl Into<Value>) -> Self {
        self.filter = Some(Filter::EqualTo(value.into()));
        self
    }

    pub fn start_at(mut self, value: impl Into<Value>) -> Self {
        self.filter = Some(Filter::StartAt(value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("remote store request failed: {0}")]
    Remote(String),

    #[error("unexpected document shape at {path}: {source}")]
    Decode {
        path: String,
        source: serde_json::Error,
    },

    #[error("too many concurrent updates")]
    Contention,

    #[error("invalid key in path {0:?}")]
    InvalidPath(String),
}

/// Whether `key` names exactly one child node.
///
/// Rejects the separator, the characters the remote store reserves, dot
/// segments and control characters.
pub fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key
            .chars()
            .any(|c| c.is_control() || matches!(c, '/' | '.' | '#' | '$' | '[' | ']' | '?'))
}

/// Hierarchical document store
#[async_trait]
pub trait Database: Send + Sync {
    /// Read the node at `path` (`None` when absent)
    async fn get(&self, path: &str) -> Result<Option<Value>, DbError>;

    /// Replace the node at `path`
    async fn set(&self, path: &str, value: Value) -> Result<(), DbError>;

    /// Merge the given children into the node at `path`
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), DbError>;

    /// Remove the node at `path` and everything below it
    async fn delete(&self, path: &str) -> Result<(), DbError>;

    /// Children of `path` ordered by a child field, filtered and limited
    async fn query(&self, path: &str, query: &Query) -> Result<Vec<(String, Value)>, DbError>;

    /// Read the node together with its current version
    async fn get_versioned(&self, path: &str) -> Result<(Option<Value>, Version), DbError>;

    /// Write only if the node still has `expected` version
    async fn set_if(
        &self,
        path: &str,
        value: Value,
        expected: &Version,
    ) -> Result<CasOutcome, DbError>;
}

// === Typed helpers ===

/// Read and decode a document
pub async fn read<T: DeserializeOwned>(db: &dyn Database, path: &str) -> Result<Option<T>, DbError> {
    db.get(path).await?.map(|v| decode(path, v)).transpose()
}

/// Encode and write a document
pub async fn write<T: Serialize>(db: &dyn Database, path: &str, value: &T) -> Result<(), DbError> {
    db.set(path, encode(path, value)?).await
}

/// Run a query and decode every child, keeping the store order
pub async fn query_as<T: DeserializeOwned>(
    db: &dyn Database,
    path: &str,
    query: &Query,
) -> Result<Vec<(String, T)>, DbError> {
    db.query(path, query)
        .await?
        .into_iter()
        .map(|(key, v)| decode(path, v).map(|doc| (key, doc)))
        .collect()
}

/// Read all children of a collection
pub async fn read_children<T: DeserializeOwned>(
    db: &dyn Database,
    path: &str,
) -> Result<Vec<(String, T)>, DbError> {
    let children = match db.get(path).await? {
        Some(Value::Object(map)) => map,
        _ => return Ok(vec![]),
    };
    children
        .into_iter()
        .map(|(key, v)| decode(path, v).map(|doc| (key, doc)))
        .collect()
}

/// Atomic read-modify-write of one node.
///
/// `apply` receives the current document and returns the replacement
/// (`None` deletes). On a stale version the read is repeated, up to
/// [`MAX_CAS_ATTEMPTS`] times. Errors returned by `apply` abort without writing.
pub async fn transact<T, E, F>(db: &dyn Database, path: &str, mut apply: F) -> Result<Option<T>, E>
where
    T: Serialize + DeserializeOwned + Send,
    E: From<DbError>,
    F: FnMut(Option<T>) -> Result<Option<T>, E> + Send,
{
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let (current, version) = db.get_versioned(path).await?;
        let current = current.map(|v| decode(path, v)).transpose()?;
        let next = apply(current)?;
        let value = match &next {
            Some(doc) => encode(path, doc)?,
            None => Value::Null,
        };
        match db.set_if(path, value, &version).await? {
            CasOutcome::Committed => return Ok(next),
            CasOutcome::Stale => debug!(path, attempt, "Conditional write lost, retrying"),
        }
    }
    warn!(path, "Conditional write abandoned after repeated contention");
    Err(DbError::Contention.into())
}

fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, DbError> {
    serde_json::from_value(value).map_err(|source| DbError::Decode {
        path: path.to_string(),
        source,
    })
}

fn encode<T: Serialize>(path: &str, value: &T) -> Result<Value, DbError> {
    serde_json::to_value(value).map_err(|source| DbError::Decode {
        path: path.to_string(),
        source,
    })
}

// === Ordering (Realtime Database orderByChild semantics) ===

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(false)) => 1,
        Some(Value::Bool(true)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_) | Value::Object(_)) => 5,
    }
}

/// Compare two child values: null < false < true < numbers < strings < objects
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x.cmp(&y)
            } else {
                let x = x.as_f64().unwrap_or(0.0);
                let y = y.as_f64().unwrap_or(0.0);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Apply an ordered query to a set of children.
///
/// Shared by the in-memory store and the REST adapter (the REST API
/// returns query results as an unordered object).
pub fn apply_query(children: Map<String, Value>, query: &Query) -> Vec<(String, Value)> {
    let field = query.order_by.as_str();
    let mut matched: Vec<(String, Value)> = children
        .into_iter()
        .filter(|(_, child)| {
            let value = child.get(field);
            match &query.filter {
                None => true,
                Some(Filter::EqualTo(target)) => {
                    compare_values(value, Some(target)) == Ordering::Equal
                }
                Some(Filter::StartAt(target)) => {
                    compare_values(value, Some(target)) != Ordering::Less
                }
            }
        })
        .collect();

    matched.sort_by(|(ka, a), (kb, b)| {
        compare_values(a.get(field), b.get(field)).then_with(|| ka.cmp(kb))
    });

    if let Some(limit) = query.limit {
        matched.truncate(limit);
    }
    matched
}

// === Path helpers ===

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn node_at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(root, |node, key| node.get(*key))
        .filter(|v| !v.is_null())
}

/// Write `value` below `root`, pruning empty objects when deleting
fn put_at(root: &mut Value, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *root = value;
        return;
    };

    if !root.is_object() {
        if value.is_null() {
            return;
        }
        *root = Value::Object(Map::new());
    }
    let Value::Object(map) = root else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            map.remove(*head);
        } else {
            map.insert((*head).to_string(), value);
        }
    } else {
        let child = map.entry((*head).to_string()).or_insert(Value::Null);
        put_at(child, rest, value);
        if child.is_null() || child.as_object().is_some_and(Map::is_empty) {
            map.remove(*head);
        }
    }

    if map.is_empty() {
        *root = Value::Null;
    }
}

/// Content version: SHA-256 of the serialized node (`null` when absent)
pub fn content_version(value: Option<&Value>) -> Version {
    let bytes = serde_json::to_vec(value.unwrap_or(&Value::Null)).unwrap_or_default();
    Version(hex::encode(digest(&SHA256, &bytes).as_ref()))
}

/// Thread-safe in-memory document store.
///
/// Each top-level root lives in its own map entry, so writes to `users` and
/// `posts` never contend. Conditional writes hold the root entry lock
/// between the version check and the write.
#[derive(Clone, Default)]
pub struct MemoryStore {
    roots: Arc<DashMap<String, Value>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn write_path(&self, path: &str, value: Value) {
        let parts = segments(path);
        let Some((head, rest)) = parts.split_first() else {
            if value.is_null() {
                self.roots.clear();
            } else if let Value::Object(map) = value {
                self.roots.clear();
                for (k, v) in map {
                    self.roots.insert(k, v);
                }
            }
            return;
        };

        let mut entry = self.roots.entry((*head).to_string()).or_insert(Value::Null);
        put_at(entry.value_mut(), rest, value);
        let empty = entry.value().is_null();
        drop(entry);
        if empty {
            self.roots.remove_if(*head, |_, v| v.is_null());
        }
    }

    fn read_path(&self, path: &str) -> Option<Value> {
        let parts = segments(path);
        let Some((head, rest)) = parts.split_first() else {
            let map: Map<String, Value> = self
                .roots
                .iter()
                .filter(|e| !e.value().is_null())
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect();
            return (!map.is_empty()).then_some(Value::Object(map));
        };
        let root = self.roots.get(*head)?;
        node_at(root.value(), rest).cloned()
    }
}

#[async_trait]
impl Database for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, DbError> {
        Ok(self.read_path(path))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), DbError> {
        self.write_path(path, value);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), DbError> {
        let base = path.trim_end_matches('/');
        for (key, value) in fields {
            self.write_path(&format!("{base}/{key}"), value);
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), DbError> {
        self.write_path(path, Value::Null);
        Ok(())
    }

    async fn query(&self, path: &str, query: &Query) -> Result<Vec<(String, Value)>, DbError> {
        let children = match self.read_path(path) {
            Some(Value::Object(map)) => map,
            _ => return Ok(vec![]),
        };
        Ok(apply_query(children, query))
    }

    async fn get_versioned(&self, path: &str) -> Result<(Option<Value>, Version), DbError> {
        let current = self.read_path(path);
        let version = content_version(current.as_ref());
        Ok((current, version))
    }

    async fn set_if(
        &self,
        path: &str,
        value: Value,
        expected: &Version,
    ) -> Result<CasOutcome, DbError> {
        let parts = segments(path);
        let Some((head, rest)) = parts.split_first() else {
            return Err(DbError::Remote("conditional write on the root".to_string()));
        };

        let mut entry = self.roots.entry((*head).to_string()).or_insert(Value::Null);
        let current = content_version(node_at(entry.value(), rest));
        let outcome = if &current == expected {
            put_at(entry.value_mut(), rest, value);
            CasOutcome::Committed
        } else {
            CasOutcome::Stale
        };
        let empty = entry.value().is_null();
        drop(entry);
        if empty {
            self.roots.remove_if(*head, |_, v| v.is_null());
        }
        Ok(outcome)
    }
}
