//! Book Store
//!
//! Maps CRUD operations on books onto a [`TreeStore`] collection. Records are
//! stored at `{collection}/{id}` without their id; the id is attached again
//! from the key whenever a record is read back. Reads return the stored value
//! as it is, including fields this service never writes.
//!
//! # Id allocation
//!
//! The default [`IdStrategy::Scan`] reads the whole collection and picks
//! `max(numeric keys) + 1`. The read and the write are separate store calls,
//! so two concurrent creates can pick the same id and the later write
//! silently replaces the earlier record. [`IdStrategy::Counter`] closes that
//! gap with an atomic counter kept outside the collection.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{BookError, TreeError};
use crate::model::{Book, BookPatch, NewBook, is_falsy, key_to_id, parse_book_id};
use crate::tree::{TreeStore, join};

pub const DEFAULT_COLLECTION: &str = "books";

const SEQUENCES_ROOT: &str = "_sequences";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    #[default]
    Scan,
    Counter,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// ISO-8601 in UTC with microseconds, e.g. `2024-05-01T09:30:00.123456Z`.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Highest purely numeric key in a collection value, if any.
pub fn max_book_id(collection: Option<&Value>) -> Option<u64> {
    match collection {
        Some(Value::Object(entries)) => entries.keys().filter_map(|key| parse_book_id(key)).max(),
        _ => None,
    }
}

pub struct BookStore {
    tree: Arc<dyn TreeStore>,
    collection: String,
    ids: IdStrategy,
    clock: Arc<dyn Clock>,
}

impl BookStore {
    pub fn new(tree: Arc<dyn TreeStore>, collection: impl Into<String>) -> Self {
        Self {
            tree,
            collection: collection.into(),
            ids: IdStrategy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_id_strategy(mut self, ids: IdStrategy) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn tree(&self) -> &Arc<dyn TreeStore> {
        &self.tree
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn book_path(&self, id: u64) -> String {
        join(&self.collection, &id.to_string())
    }

    fn sequence_path(&self) -> String {
        join(SEQUENCES_ROOT, &self.collection)
    }

    /// Every structured entry of the collection. `None` when the collection
    /// is missing or is not an object at all.
    pub async fn list(&self) -> Result<Option<Vec<Book>>, BookError> {
        let Some(Value::Object(entries)) = self.tree.get_value(&self.collection).await? else {
            return Ok(None);
        };

        let books = entries
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::Object(record) => Some(Book::from_record(key_to_id(&key), record)),
                _ => None,
            })
            .collect();
        Ok(Some(books))
    }

    pub async fn show(&self, id: u64) -> Result<Book, BookError> {
        let record = self.find(id).await?;
        Ok(Book::from_record(id, record))
    }

    pub async fn create(&self, payload: &Value) -> Result<Book, BookError> {
        let input = NewBook::from_json(payload)?;
        let now = timestamp(self.clock.now());

        let existing = self.tree.get_value(&self.collection).await?;
        let id = self.next_id(existing.as_ref()).await?;

        let record = input.into_record(&now);
        self.tree
            .set(&self.book_path(id), Value::Object(record.clone()))
            .await?;

        tracing::info!(id, collection = %self.collection, "book created");
        Ok(Book::from_record(id, record))
    }

    /// Partial update. Existence is checked before the payload is validated.
    pub async fn update(&self, id: u64, payload: &Value) -> Result<Book, BookError> {
        self.find(id).await?;

        let patch = BookPatch::from_json(payload)?;
        let changes = patch.into_changes(&timestamp(self.clock.now()));
        self.tree.update(&self.book_path(id), changes).await?;

        let record = self.find(id).await?;
        tracing::info!(id, collection = %self.collection, "book updated");
        Ok(Book::from_record(id, record))
    }

    pub async fn destroy(&self, id: u64) -> Result<(), BookError> {
        self.find(id).await?;
        self.tree.remove(&self.book_path(id)).await?;
        tracing::info!(id, collection = %self.collection, "book deleted");
        Ok(())
    }

    /// Picks the id for a new book given the current collection value.
    pub async fn next_id(&self, collection: Option<&Value>) -> Result<u64, TreeError> {
        let highest = max_book_id(collection).unwrap_or(0);
        let id = match self.ids {
            IdStrategy::Scan => highest.saturating_add(1),
            IdStrategy::Counter => self.tree.next_sequence(&self.sequence_path(), highest).await?,
        };
        tracing::debug!(id, highest, strategy = ?self.ids, "allocated book id");
        Ok(id)
    }

    async fn find(&self, id: u64) -> Result<Map<String, Value>, BookError> {
        match self.tree.get_value(&self.book_path(id)).await? {
            Some(Value::Object(record)) if !record.is_empty() => Ok(record),
            Some(value) if !is_falsy(&value) => {
                tracing::warn!(id, "book key holds a non-object value");
                Err(BookError::NotFound)
            }
            _ => Err(BookError::NotFound),
        }
    }
}
