use std::sync::Arc;

use async_trait::async_trait;
use libsql::Connection;
use serde_json::{Map, Value};

use super::{Result, TreeStore, join, normalize, split_path, split_writable_path};
use crate::db::Database;
use crate::error::TreeError;

const SELECT_ALL: &str = "SELECT path, value FROM tree_nodes ORDER BY path";

const SELECT_SUBTREE: &str = r#"
    SELECT path, value FROM tree_nodes
    WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2
    ORDER BY path
"#;

const DELETE_SUBTREE: &str = r#"
    DELETE FROM tree_nodes
    WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2
"#;

const DELETE_NODE: &str = "DELETE FROM tree_nodes WHERE path = ?1";

const INSERT_NODE: &str = "INSERT INTO tree_nodes (path, value) VALUES (?1, ?2)";

/// Tree persisted in libsql, one row per leaf keyed by its full path.
pub struct SqlTree {
    db: Arc<Database>,
}

impl SqlTree {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn conn(&self) -> &Connection {
        self.db.connection()
    }

    async fn read(&self, path: &str) -> Result<Option<Value>> {
        let mut rows = if path.is_empty() {
            self.conn().query(SELECT_ALL, ()).await?
        } else {
            self.conn()
                .query(SELECT_SUBTREE, libsql::params![path, format!("{}/", path)])
                .await?
        };

        let mut root = Map::new();
        while let Some(row) = rows.next().await? {
            let node_path: String = row.get(0)?;
            let raw: String = row.get(1)?;
            let value: Value = serde_json::from_str(&raw)?;

            if node_path == path {
                return Ok(Some(value));
            }

            let relative = if path.is_empty() {
                node_path.as_str()
            } else {
                node_path
                    .get(path.len() + 1..)
                    .ok_or_else(|| TreeError::Corrupt(node_path.clone()))?
            };
            insert_leaf(&mut root, relative, value);
        }

        Ok((!root.is_empty()).then_some(Value::Object(root)))
    }

    /// Replaces the node at `segments`. Must run inside a transaction.
    async fn write(&self, segments: &[&str], value: Option<Value>) -> Result<()> {
        let path = segments.join("/");
        self.conn()
            .execute(DELETE_SUBTREE, libsql::params![path.as_str(), format!("{}/", path)])
            .await?;

        // a scalar stored at an ancestor would shadow the new node
        for depth in 1..segments.len() {
            let ancestor = segments[..depth].join("/");
            self.conn()
                .execute(DELETE_NODE, libsql::params![ancestor])
                .await?;
        }

        let Some(value) = value else {
            return Ok(());
        };

        let mut leaves = Vec::new();
        flatten(&path, value, &mut leaves);
        for (leaf_path, leaf) in leaves {
            let raw = serde_json::to_string(&leaf)?;
            self.conn()
                .execute(INSERT_NODE, libsql::params![leaf_path, raw])
                .await?;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<()> {
        self.conn().execute("BEGIN TRANSACTION", ()).await?;
        Ok(())
    }

    async fn finish<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.conn().execute("COMMIT", ()).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.conn().execute("ROLLBACK", ()).await {
                    tracing::error!(error = %rollback, "failed to roll back tree write");
                }
                Err(e)
            }
        }
    }
}

fn insert_leaf(root: &mut Map<String, Value>, relative: &str, value: Value) {
    let mut node = root;
    let mut segments = relative.split('/').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            node.insert(segment.to_string(), value);
            return;
        }
        let child = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        node = match child {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

fn flatten(path: &str, value: Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(&join(path, &key), child, out);
            }
        }
        leaf => out.push((path.to_string(), leaf)),
    }
}

#[async_trait]
impl TreeStore for SqlTree {
    async fn get_value(&self, path: &str) -> Result<Option<Value>> {
        let path = split_path(path)?.join("/");
        let _guard = self.db.lock().await;
        self.read(&path).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let segments = split_writable_path(path)?;
        let value = normalize(path, value)?;

        let _guard = self.db.lock().await;
        self.begin().await?;
        let result = self.write(&segments, value).await;
        self.finish(result).await
    }

    async fn update(&self, path: &str, partial: Map<String, Value>) -> Result<()> {
        split_writable_path(path)?;

        let mut writes = Vec::with_capacity(partial.len());
        for (key, value) in partial {
            let child_path = join(path, &key);
            let segments: Vec<String> = split_writable_path(&child_path)?
                .into_iter()
                .map(str::to_string)
                .collect();
            let value = normalize(&child_path, value)?;
            writes.push((segments, value));
        }

        let _guard = self.db.lock().await;
        self.begin().await?;
        let result = async {
            for (segments, value) in writes {
                let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
                self.write(&segments, value).await?;
            }
            Ok::<(), TreeError>(())
        }
        .await;
        self.finish(result).await
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let segments = split_writable_path(path)?;

        let _guard = self.db.lock().await;
        self.begin().await?;
        let result = self.write(&segments, None).await;
        self.finish(result).await
    }

    async fn next_sequence(&self, path: &str, floor: u64) -> Result<u64> {
        let segments = split_writable_path(path)?;
        let joined = segments.join("/");

        let _guard = self.db.lock().await;
        self.begin().await?;
        let result = async {
            let current = match self.read(&joined).await? {
                None => 0,
                Some(value) => value
                    .as_u64()
                    .ok_or_else(|| TreeError::Corrupt(joined.clone()))?,
            };
            let next = current.max(floor).saturating_add(1);
            self.write(&segments, Some(Value::from(next))).await?;
            Ok::<u64, TreeError>(next)
        }
        .await;
        self.finish(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open() -> (TempDir, SqlTree) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_local(dir.path().join("tree.db")).await.unwrap();
        (dir, SqlTree::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (_dir, tree) = open().await;
        tree.set("books/1", json!({ "title": "Dune", "author": "Herbert" }))
            .await
            .unwrap();

        assert_eq!(
            tree.get_value("books/1").await.unwrap(),
            Some(json!({ "title": "Dune", "author": "Herbert" }))
        );
        assert_eq!(
            tree.get_value("books/1/title").await.unwrap(),
            Some(json!("Dune"))
        );
        assert_eq!(tree.get_value("books/10").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prefix_does_not_match_siblings() {
        let (_dir, tree) = open().await;
        tree.set("books/1", json!({ "title": "Dune" })).await.unwrap();
        tree.set("books/10", json!({ "title": "Emma" })).await.unwrap();
        tree.set("books_archive/1", json!({ "title": "Old" })).await.unwrap();

        assert_eq!(
            tree.get_value("books/1").await.unwrap(),
            Some(json!({ "title": "Dune" }))
        );
        assert_eq!(
            tree.get_value("books").await.unwrap(),
            Some(json!({ "1": { "title": "Dune" }, "10": { "title": "Emma" } }))
        );
    }

    #[tokio::test]
    async fn test_push_keys_with_underscores_are_literal() {
        let (_dir, tree) = open().await;
        tree.set("a_c/x", json!(1)).await.unwrap();
        tree.set("abc/x", json!(2)).await.unwrap();

        assert_eq!(tree.get_value("a_c").await.unwrap(), Some(json!({ "x": 1 })));
    }

    #[tokio::test]
    async fn test_set_replaces_subtree_and_ancestor_scalars() {
        let (_dir, tree) = open().await;
        tree.set("books/1", json!({ "title": "Dune", "author": "Herbert" }))
            .await
            .unwrap();
        tree.set("books/1", json!({ "title": "Emma" })).await.unwrap();
        assert_eq!(
            tree.get_value("books/1").await.unwrap(),
            Some(json!({ "title": "Emma" }))
        );

        tree.set("books/2", json!("scalar")).await.unwrap();
        tree.set("books/2/title", json!("Persuasion")).await.unwrap();
        assert_eq!(
            tree.get_value("books/2").await.unwrap(),
            Some(json!({ "title": "Persuasion" }))
        );
    }

    #[tokio::test]
    async fn test_update_merges_shallowly() {
        let (_dir, tree) = open().await;
        tree.set(
            "books/1",
            json!({ "title": "Dune", "author": "Herbert", "published_at": "1965-08-01" }),
        )
        .await
        .unwrap();

        let partial = json!({ "title": "Dune Messiah", "updated_at": "2024-01-01T00:00:00.000000Z" });
        tree.update("books/1", partial.as_object().unwrap().clone())
            .await
            .unwrap();

        assert_eq!(
            tree.get_value("books/1").await.unwrap(),
            Some(json!({
                "title": "Dune Messiah",
                "author": "Herbert",
                "published_at": "1965-08-01",
                "updated_at": "2024-01-01T00:00:00.000000Z",
            }))
        );
    }

    #[tokio::test]
    async fn test_remove_and_root_read() {
        let (_dir, tree) = open().await;
        tree.set("books/1", json!({ "title": "Dune" })).await.unwrap();
        tree.set("books/2", json!({ "title": "Emma" })).await.unwrap();
        tree.remove("books/1").await.unwrap();

        assert_eq!(tree.get_value("books/1").await.unwrap(), None);
        assert_eq!(
            tree.get_value("").await.unwrap(),
            Some(json!({ "books": { "2": { "title": "Emma" } } }))
        );

        tree.remove("books/2").await.unwrap();
        assert_eq!(tree.get_value("books").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scalar_types_survive_storage() {
        let (_dir, tree) = open().await;
        tree.set("misc", json!({ "n": 3, "f": 1.5, "b": false, "s": "3" }))
            .await
            .unwrap();

        assert_eq!(
            tree.get_value("misc").await.unwrap(),
            Some(json!({ "n": 3, "f": 1.5, "b": false, "s": "3" }))
        );
    }

    #[tokio::test]
    async fn test_push_and_sequence() {
        let (_dir, tree) = open().await;
        let key = tree.push("books", json!({ "title": "Dune" })).await.unwrap();
        assert_eq!(
            tree.get_value(&format!("books/{}", key)).await.unwrap(),
            Some(json!({ "title": "Dune" }))
        );

        assert_eq!(tree.next_sequence("_sequences/books", 0).await.unwrap(), 1);
        assert_eq!(tree.next_sequence("_sequences/books", 5).await.unwrap(), 6);
        assert_eq!(tree.next_sequence("_sequences/books", 0).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let (_dir, tree) = open().await;
        tree.set("_sequences/books", json!("nope")).await.unwrap();
        assert!(tree.next_sequence("_sequences/books", 0).await.is_err());

        // connection is usable again after the rollback
        tree.set("books/1", json!({ "title": "Dune" })).await.unwrap();
        assert_eq!(
            tree.get_value("_sequences/books").await.unwrap(),
            Some(json!("nope"))
        );
    }
}
