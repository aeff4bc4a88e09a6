//! In-process [`RemoteStore`] with the same key-path semantics as the real
//! database, plus failure injection for tests.

use super::RemoteStore;
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct MemoryStore {
    root: Mutex<Value>,
    failing_reads: Mutex<Vec<String>>,
    failing_writes: Mutex<Vec<String>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Value::Object(Map::new())),
            ..Default::default()
        }
    }

    /// Make every read at or below `prefix` fail with a 503.
    pub fn fail_reads_under(&self, prefix: &str) {
        self.failing_reads.lock().unwrap().push(prefix.to_string());
    }

    /// Make every write at or below `prefix` fail with a 503.
    pub fn fail_writes_under(&self, prefix: &str) {
        self.failing_writes.lock().unwrap().push(prefix.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_reads.lock().unwrap().clear();
        self.failing_writes.lock().unwrap().clear();
    }

    /// Successful `set` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn injected(list: &Mutex<Vec<String>>, path: &str) -> Option<Error> {
        let list = list.lock().unwrap();
        list.iter()
            .any(|p| path == p || path.starts_with(&format!("{p}/")))
            .then(|| Error::Remote {
                path: path.to_string(),
                status: 503,
                body: "injected failure".to_string(),
            })
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl RemoteStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        if let Some(e) = Self::injected(&self.failing_reads, path) {
            return Err(e);
        }
        let root = self.root.lock().unwrap();
        let mut node = &*root;
        for seg in segments(path) {
            match node.get(seg) {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok((!node.is_null()).then(|| node.clone()))
    }

    async fn set(&self, path: &str, value: &Value) -> Result<()> {
        if let Some(e) = Self::injected(&self.failing_writes, path) {
            return Err(e);
        }
        let mut root = self.root.lock().unwrap();
        let segs: Vec<&str> = segments(path).collect();
        let Some((last, parents)) = segs.split_last() else {
            *root = value.clone();
            self.writes.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        };

        let mut node = &mut *root;
        for seg in parents {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            node = node
                .as_object_mut()
                .unwrap()
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let obj = node.as_object_mut().unwrap();
        if value.is_null() {
            obj.remove(*last);
        } else {
            obj.insert(last.to_string(), value.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_then_get_nested() {
        let store = MemoryStore::new();
        store.set("a/b/c", &json!(1)).await.unwrap();
        assert_eq!(store.get("a/b/c").await.unwrap(), Some(json!(1)));
        assert_eq!(store.get("a").await.unwrap(), Some(json!({ "b": { "c": 1 } })));
        assert_eq!(store.get("a/x").await.unwrap(), None);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_null_deletes() {
        let store = MemoryStore::new();
        store.set("a/b", &json!("x")).await.unwrap();
        store.set("a/b", &Value::Null).await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_injected_failures_match_prefix_only() {
        let store = MemoryStore::new();
        store.fail_writes_under("articles/usa");
        assert!(store.set("articles/usa/1", &json!({})).await.is_err());
        assert!(store.set("articles/usab/1", &json!({})).await.is_ok());
        store.clear_failures();
        assert!(store.set("articles/usa/1", &json!({})).await.is_ok());
    }
}
