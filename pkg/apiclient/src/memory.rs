use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;
use uuid::Uuid;

use crate::client::{ApiService, EventType, WireEvent, WireObject};

/// In-memory [`ApiService`] implementation: mutex-guarded object maps plus a
/// per-kind broadcast fan-out of change events. Backs integration tests and
/// local development without a running API server.
#[derive(Default)]
pub struct MemoryApi {
    /// path -> key -> object
    objects: Mutex<HashMap<String, HashMap<String, serde_json::Value>>>,
    senders: Mutex<HashMap<String, broadcast::Sender<WireEvent>>>,
    mutations: AtomicU64,
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accepted writes (create/update/delete) so far.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    fn emit(&self, path: &str, event: WireEvent) {
        let senders = self.senders.lock().unwrap();
        if let Some(sender) = senders.get(path) {
            // Ignore errors if no receivers
            let _ = sender.send(event);
        }
    }
}

#[async_trait]
impl ApiService for MemoryApi {
    async fn list(&self, path: &str) -> anyhow::Result<Vec<WireObject>> {
        let objects = self.objects.lock().unwrap();
        let entries = objects
            .get(path)
            .map(|kind| {
                kind.iter()
                    .map(|(key, value)| WireObject {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(entries)
    }

    async fn watch(&self, path: &str) -> anyhow::Result<mpsc::Receiver<WireEvent>> {
        let mut rx = {
            let mut senders = self.senders.lock().unwrap();
            senders
                .entry(path.to_string())
                .or_insert_with(|| broadcast::channel(1024).0)
                .subscribe()
        };
        let (tx, out) = mpsc::channel(256);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Watch subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        Ok(out)
    }

    async fn create(&self, path: &str, mut value: serde_json::Value) -> anyhow::Result<String> {
        let key = Uuid::new_v4().to_string();
        if let Some(meta) = value.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.insert("uid".to_string(), serde_json::Value::String(key.clone()));
        }
        {
            let mut objects = self.objects.lock().unwrap();
            objects
                .entry(path.to_string())
                .or_default()
                .insert(key.clone(), value.clone());
        }
        self.mutations.fetch_add(1, Ordering::Relaxed);
        self.emit(
            path,
            WireEvent {
                event_type: EventType::Put,
                key: key.clone(),
                value: Some(value),
            },
        );
        Ok(key)
    }

    async fn update(
        &self,
        path: &str,
        key: &str,
        value: serde_json::Value,
    ) -> anyhow::Result<()> {
        {
            let mut objects = self.objects.lock().unwrap();
            objects
                .entry(path.to_string())
                .or_default()
                .insert(key.to_string(), value.clone());
        }
        self.mutations.fetch_add(1, Ordering::Relaxed);
        self.emit(
            path,
            WireEvent {
                event_type: EventType::Put,
                key: key.to_string(),
                value: Some(value),
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str, key: &str) -> anyhow::Result<()> {
        let removed = {
            let mut objects = self.objects.lock().unwrap();
            objects.get_mut(path).and_then(|kind| kind.remove(key))
        };
        if removed.is_none() {
            anyhow::bail!("delete {}/{}: not found", path, key);
        }
        self.mutations.fetch_add(1, Ordering::Relaxed);
        self.emit(
            path,
            WireEvent {
                event_type: EventType::Delete,
                key: key.to_string(),
                value: None,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_assigns_uid_and_lists() {
        let api = MemoryApi::new();
        let key = api
            .create("pods", json!({"metadata": {"name": "web-1"}}))
            .await
            .unwrap();

        let entries = api.list("pods").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, key);
        assert_eq!(entries[0].value["metadata"]["uid"], json!(key));
    }

    #[tokio::test]
    async fn test_watch_sees_mutations() {
        let api = MemoryApi::new();
        let mut rx = api.watch("pods").await.unwrap();

        let key = api
            .create("pods", json!({"metadata": {"name": "web-1"}}))
            .await
            .unwrap();
        api.delete("pods", &key).await.unwrap();

        let put = rx.recv().await.unwrap();
        assert_eq!(put.event_type, EventType::Put);
        assert_eq!(put.key, key);

        let del = rx.recv().await.unwrap();
        assert_eq!(del.event_type, EventType::Delete);
        assert_eq!(del.key, key);
    }

    #[tokio::test]
    async fn test_delete_missing_is_an_error() {
        let api = MemoryApi::new();
        assert!(api.delete("pods", "nope").await.is_err());
        assert_eq!(api.mutation_count(), 0);
    }
}
