//! Browse Pages
//!
//! Server-rendered pages over the book collection: an HTML table of every
//! entry and a plain form that appends new ones.
//!
//! The form path predates the JSON API. It pushes `{title, author}` under a
//! store-generated push key, without validation, timestamps or a sequential
//! id, so the collection ends up holding both key styles. The table shows
//! both.

mod handler;
mod routes;

pub use routes::routes;

use serde_json::{Map, Value};

use crate::error::TreeError;
use crate::store::BookStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub title: String,
    pub author: String,
}

fn display(record: &Map<String, Value>, field: &str) -> String {
    match record.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Every structured entry of the collection, whatever its key.
pub async fn entries(store: &BookStore) -> Result<Vec<Entry>, TreeError> {
    let Some(Value::Object(collection)) = store.tree().get_value(store.collection()).await? else {
        return Ok(vec![]);
    };

    Ok(collection
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Object(record) => Some(Entry {
                title: display(&record, "title"),
                author: display(&record, "author"),
                key,
            }),
            _ => None,
        })
        .collect())
}

/// Appends a form entry under a fresh push key. Blank fields are not stored.
pub async fn append(
    store: &BookStore,
    title: Option<String>,
    author: Option<String>,
) -> Result<String, TreeError> {
    let mut record = Map::new();
    for (field, value) in [("title", title), ("author", author)] {
        if let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            record.insert(field.to_string(), Value::String(value));
        }
    }

    let key = store.tree().push(store.collection(), Value::Object(record)).await?;
    tracing::info!(key = %key, collection = %store.collection(), "entry appended");
    Ok(key)
}
