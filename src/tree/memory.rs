use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{Result, TreeStore, join, normalize, split_path, split_writable_path};
use crate::error::TreeError;

/// In-process tree. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTree {
    root: RwLock<Map<String, Value>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(root: Value) -> Result<Self> {
        let root = match normalize("", root)? {
            Some(Value::Object(map)) => map,
            Some(_) => return Err(TreeError::invalid_path("", "root must be an object")),
            None => Map::new(),
        };
        Ok(Self {
            root: RwLock::new(root),
        })
    }

    pub async fn snapshot(&self) -> Value {
        Value::Object(self.root.read().await.clone())
    }
}

fn lookup<'a>(node: &'a Map<String, Value>, segments: &[&str]) -> Option<&'a Value> {
    let (head, rest) = segments.split_first()?;
    let child = node.get(*head)?;
    if rest.is_empty() {
        return Some(child);
    }
    match child {
        Value::Object(map) => lookup(map, rest),
        _ => None,
    }
}

fn write(node: &mut Map<String, Value>, segments: &[&str], value: Option<Value>) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        match value {
            Some(value) => {
                node.insert(head.to_string(), value);
            }
            None => {
                node.remove(*head);
            }
        }
        return;
    }

    if value.is_none() && !matches!(node.get(*head), Some(Value::Object(_))) {
        return;
    }

    let child = node
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        *child = Value::Object(Map::new());
    }
    let emptied = match child.as_object_mut() {
        Some(map) => {
            write(map, rest, value);
            map.is_empty()
        }
        None => false,
    };
    if emptied {
        node.remove(*head);
    }
}

#[async_trait]
impl TreeStore for MemoryTree {
    async fn get_value(&self, path: &str) -> Result<Option<Value>> {
        let segments = split_path(path)?;
        let root = self.root.read().await;
        if segments.is_empty() {
            return Ok((!root.is_empty()).then(|| Value::Object(root.clone())));
        }
        Ok(lookup(&root, &segments).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let segments = split_writable_path(path)?;
        let value = normalize(path, value)?;
        write(&mut *self.root.write().await, &segments, value);
        Ok(())
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

        let mut root = self.root.write().await;
        for (segments, value) in writes {
            let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
            write(&mut root, &segments, value);
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let segments = split_writable_path(path)?;
        write(&mut *self.root.write().await, &segments, None);
        Ok(())
    }

    async fn next_sequence(&self, path: &str, floor: u64) -> Result<u64> {
        let segments = split_writable_path(path)?;
        let mut root = self.root.write().await;

        let current = match lookup(&root, &segments) {
            None => 0,
            Some(value) => value
                .as_u64()
                .ok_or_else(|| TreeError::Corrupt(path.to_string()))?,
        };
        let next = current.max(floor).saturating_add(1);
        write(&mut root, &segments, Some(Value::from(next)));
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get() {
        let tree = MemoryTree::new();
        tree.set("books/1", json!({ "title": "Dune", "author": "Herbert" }))
            .await
            .unwrap();

        assert_eq!(
            tree.get_value("books/1/title").await.unwrap(),
            Some(json!("Dune"))
        );
        assert_eq!(
            tree.get_value("books").await.unwrap(),
            Some(json!({ "1": { "title": "Dune", "author": "Herbert" } }))
        );
        assert_eq!(tree.get_value("books/2").await.unwrap(), None);
        assert_eq!(tree.get_value("books/1/title/x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_overwrites_whole_node() {
        let tree = MemoryTree::new();
        tree.set("books/1", json!({ "title": "Dune", "author": "Herbert" }))
            .await
            .unwrap();
        tree.set("books/1", json!({ "title": "Emma" })).await.unwrap();

        assert_eq!(
            tree.get_value("books/1").await.unwrap(),
            Some(json!({ "title": "Emma" }))
        );
    }

    #[tokio::test]
    async fn test_set_below_scalar_replaces_it() {
        let tree = MemoryTree::new();
        tree.set("books/1", json!("scalar")).await.unwrap();
        tree.set("books/1/title", json!("Dune")).await.unwrap();

        assert_eq!(
            tree.get_value("books/1").await.unwrap(),
            Some(json!({ "title": "Dune" }))
        );
    }

    #[tokio::test]
    async fn test_update_merges_shallowly() {
        let tree = MemoryTree::new();
        tree.set(
            "books/1",
            json!({ "title": "Dune", "author": "Herbert", "meta": { "a": 1, "b": 2 } }),
        )
        .await
        .unwrap();

        let partial = json!({ "title": "Dune Messiah", "meta": { "a": 3 }, "author": null });
        tree.update("books/1", partial.as_object().unwrap().clone())
            .await
            .unwrap();

        assert_eq!(
            tree.get_value("books/1").await.unwrap(),
            Some(json!({ "title": "Dune Messiah", "meta": { "a": 3 } }))
        );
    }

    #[tokio::test]
    async fn test_update_accepts_nested_keys() {
        let tree = MemoryTree::new();
        let partial = json!({ "1/title": "Dune", "2/title": "Emma" });
        tree.update("books", partial.as_object().unwrap().clone())
            .await
            .unwrap();

        assert_eq!(
            tree.get_value("books").await.unwrap(),
            Some(json!({ "1": { "title": "Dune" }, "2": { "title": "Emma" } }))
        );
    }

    #[tokio::test]
    async fn test_remove_prunes_empty_parents() {
        let tree = MemoryTree::new();
        tree.set("books/1/title", json!("Dune")).await.unwrap();
        tree.remove("books/1/title").await.unwrap();

        assert_eq!(tree.get_value("books").await.unwrap(), None);
        assert_eq!(tree.get_value("").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_null_deletes() {
        let tree = MemoryTree::new();
        tree.set("books/1", json!({ "title": "Dune" })).await.unwrap();
        tree.set("books/2", json!({ "title": "Emma" })).await.unwrap();
        tree.set("books/1", Value::Null).await.unwrap();

        assert_eq!(
            tree.get_value("books").await.unwrap(),
            Some(json!({ "2": { "title": "Emma" } }))
        );
    }

    #[tokio::test]
    async fn test_push_uses_generated_keys() {
        let tree = MemoryTree::new();
        let first = tree.push("books", json!({ "title": "Dune" })).await.unwrap();
        let second = tree.push("books", json!({ "title": "Emma" })).await.unwrap();

        assert_ne!(first, second);
        assert!(first < second);
        assert_eq!(
            tree.get_value(&format!("books/{}/title", second)).await.unwrap(),
            Some(json!("Emma"))
        );
    }

    #[tokio::test]
    async fn test_next_sequence_respects_floor() {
        let tree = MemoryTree::new();
        assert_eq!(tree.next_sequence("_sequences/books", 0).await.unwrap(), 1);
        assert_eq!(tree.next_sequence("_sequences/books", 0).await.unwrap(), 2);
        assert_eq!(tree.next_sequence("_sequences/books", 10).await.unwrap(), 11);
        assert_eq!(tree.next_sequence("_sequences/books", 3).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_next_sequence_rejects_non_numeric_counter() {
        let tree = MemoryTree::new();
        tree.set("_sequences/books", json!("nope")).await.unwrap();
        assert!(matches!(
            tree.next_sequence("_sequences/books", 0).await,
            Err(TreeError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_root_writes_are_rejected() {
        let tree = MemoryTree::new();
        assert!(tree.set("", json!({ "a": 1 })).await.is_err());
        assert!(tree.remove("/").await.is_err());
    }

    #[tokio::test]
    async fn test_with_value_seeds_tree() {
        let tree = MemoryTree::with_value(json!({ "books": { "1": { "title": "Dune" }, "x": null } }))
            .unwrap();
        assert_eq!(
            tree.snapshot().await,
            json!({ "books": { "1": { "title": "Dune" } } })
        );
    }
}
