//! Tree Store
//!
//! A path-addressed JSON tree in the style of a realtime document database.
//! Values live at slash-separated paths (`books/1/title`) and every write goes
//! through the same normalization, so both backends agree on what a tree
//! looks like:
//!
//! - writing `null` or an empty object deletes the node
//! - nested `null`s and empty objects are dropped, arrays become objects keyed by index
//! - a node whose last child is removed disappears with it
//!
//! # Backends
//!
//! - [`MemoryTree`]: in-process tree, for tests and throwaway deployments
//! - [`SqlTree`]: libsql-backed tree, one row per leaf
//!
//! # Usage
//!
//! ```rust,ignore
//! use bookshelf::tree::{MemoryTree, TreeStore};
//!
//! let tree = MemoryTree::new();
//! tree.set("books/1", serde_json::json!({ "title": "Dune" })).await?;
//! let key = tree.push("books", serde_json::json!({ "title": "Emma" })).await?;
//! ```

pub mod memory;
pub mod push_id;
pub mod sqlite;

pub use memory::MemoryTree;
pub use sqlite::SqlTree;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::TreeError;

pub type Result<T> = std::result::Result<T, TreeError>;

/// Maximum length of a single path segment, in bytes.
pub const MAX_KEY_BYTES: usize = 768;

const FORBIDDEN_KEY_CHARS: &[char] = &['.', '$', '#', '[', ']'];

#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Returns the value at `path`, or `None` when nothing is stored there.
    async fn get_value(&self, path: &str) -> Result<Option<Value>>;

    /// Replaces whatever is stored at `path`.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Shallow merge: each key of `partial` replaces the child at `path/key`.
    /// Keys may themselves be multi-segment paths.
    async fn update(&self, path: &str, partial: Map<String, Value>) -> Result<()>;

    async fn remove(&self, path: &str) -> Result<()>;

    /// Stores `value` under a fresh push key below `path` and returns the key.
    async fn push(&self, path: &str, value: Value) -> Result<String> {
        let key = push_id::generate();
        self.set(&join(path, &key), value).await?;
        Ok(key)
    }

    /// Atomically stores and returns `max(current, floor) + 1` for the counter at `path`.
    async fn next_sequence(&self, path: &str, floor: u64) -> Result<u64>;
}

/// Splits a path into validated segments. The empty path (or `/`) is the root.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(vec![]);
    }

    trimmed
        .split('/')
        .map(|segment| validate_key(path, segment).map(|_| segment))
        .collect()
}

/// Like [`split_path`] but rejects the root, which is never written directly.
pub fn split_writable_path(path: &str) -> Result<Vec<&str>> {
    let segments = split_path(path)?;
    if segments.is_empty() {
        return Err(TreeError::invalid_path(path, "cannot write to the root"));
    }
    Ok(segments)
}

fn validate_key(path: &str, key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(TreeError::invalid_path(path, "empty segment"));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(TreeError::invalid_path(
            path,
            format!("segment exceeds {} bytes", MAX_KEY_BYTES),
        ));
    }
    if let Some(c) = key
        .chars()
        .find(|c| FORBIDDEN_KEY_CHARS.contains(c) || c.is_control())
    {
        return Err(TreeError::invalid_path(
            path,
            format!("segment contains {:?}", c),
        ));
    }
    Ok(())
}

pub fn join(base: &str, key: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", base, key)
    }
}

/// Normalizes a value before it is written. Returns `None` when the value
/// amounts to a delete.
pub fn normalize(path: &str, value: Value) -> Result<Option<Value>> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map {
                validate_key(path, &key)?;
                if let Some(child) = normalize(path, child)? {
                    out.insert(key, child);
                }
            }
            Ok((!out.is_empty()).then_some(Value::Object(out)))
        }
        Value::Array(items) => {
            let mut out = Map::new();
            for (index, child) in items.into_iter().enumerate() {
                if let Some(child) = normalize(path, child)? {
                    out.insert(index.to_string(), child);
                }
            }
            Ok((!out.is_empty()).then_some(Value::Object(out)))
        }
        scalar => Ok(Some(scalar)),
    }
}
