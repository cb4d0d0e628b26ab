use std::sync::Arc;
use std::sync::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use pkg_apiclient::{ApiService, Resource};

use crate::reflector::{Delta, Reflector, ReflectorEvent};
use crate::store::Store;

/// Callbacks fired by an informer's delivery loop. They execute
/// synchronously inside that loop, so they must not block; enqueue work
/// instead of performing I/O.
pub struct EventHandler<R> {
    pub on_add: Box<dyn Fn(&R) + Send + Sync>,
    /// Arguments are (new, old).
    pub on_update: Box<dyn Fn(&R, &R) + Send + Sync>,
    pub on_delete: Box<dyn Fn(&R) + Send + Sync>,
}

/// Owns the Store and Reflector for one resource kind. Converts the delta
/// stream into Add/Update/Delete callbacks and exposes the cached objects
/// to controllers.
pub struct Informer<R: Resource> {
    api: Arc<dyn ApiService>,
    store: Store<R>,
    handlers: RwLock<Vec<EventHandler<R>>>,
    synced: watch::Sender<bool>,
}

impl<R: Resource> Informer<R> {
    pub fn new(api: Arc<dyn ApiService>) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            api,
            store: Store::new(),
            handlers: RwLock::new(Vec::new()),
            synced,
        }
    }

    /// Register a handler. Registration is additive only; there is no
    /// removal.
    pub fn add_event_handler(&self, handler: EventHandler<R>) {
        self.handlers.write().unwrap().push(handler);
    }

    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the initial List snapshot has fully drained into the
    /// store. `list()`/`get()` should not be trusted before this resolves.
    pub async fn await_sync(&self) {
        let mut rx = self.synced.subscribe();
        // An error means the informer stopped; callers observe that via the
        // stop signal, so it is not surfaced here.
        let _ = rx.wait_for(|synced| *synced).await;
    }

    pub fn get(&self, key: &str) -> Option<R> {
        self.store.get(key)
    }

    pub fn list(&self) -> Vec<R> {
        self.store.list()
    }

    /// Drive the reflector and the delivery loop until `stop` fires or the
    /// watch stream breaks. Blocks the calling task.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let (tx, mut rx) = mpsc::channel::<ReflectorEvent<R>>(256);
        let reflector = Reflector::new(Arc::clone(&self.api), tx);
        tokio::spawn(reflector.run(stop.clone()));

        let mut synced = false;
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    info!("{} informer stopping", R::KIND);
                    return;
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        // Reflector ended; restart is an operational concern.
                        info!("{} informer: delta stream closed", R::KIND);
                        return;
                    };
                    match event {
                        ReflectorEvent::Synced => {
                            synced = true;
                            self.synced.send_replace(true);
                            info!("{} informer synced ({} objects)", R::KIND, self.store.len());
                        }
                        ReflectorEvent::Delta(delta) => self.apply(delta, synced),
                    }
                }
            }
        }
    }

    /// Apply one delta to the store and, once synced, fire the registered
    /// handlers. List-phase deltas populate the store silently.
    fn apply(&self, delta: Delta<R>, synced: bool) {
        match delta {
            Delta::Put { key, value } => {
                let old = self.store.get(&key);
                self.store.insert(key, value.clone());
                if !synced {
                    return;
                }
                let handlers = self.handlers.read().unwrap();
                match old {
                    Some(old) => {
                        for handler in handlers.iter() {
                            (handler.on_update)(&value, &old);
                        }
                    }
                    None => {
                        for handler in handlers.iter() {
                            (handler.on_add)(&value);
                        }
                    }
                }
            }
            Delta::Delete { key } => {
                let Some(old) = self.store.remove(&key) else {
                    debug!("{} informer: delete for unknown key {}", R::KIND, key);
                    return;
                };
                if !synced {
                    return;
                }
                let handlers = self.handlers.read().unwrap();
                for handler in handlers.iter() {
                    (handler.on_delete)(&old);
                }
            }
        }
    }

    /// Create `obj` through the external API and patch the local store with
    /// the assigned key. The store is updated optimistically before the
    /// create is observed back on the watch stream.
    pub async fn create_item(&self, obj: &R) -> anyhow::Result<String> {
        let mut obj = obj.clone();
        let uid = self
            .api
            .create(R::PATH, serde_json::to_value(&obj)?)
            .await?;
        obj.set_uid(uid.clone());
        self.store.insert(uid.clone(), obj);
        Ok(uid)
    }

    /// Push an updated `obj` through the external API, then patch the local
    /// store optimistically.
    pub async fn update_item(&self, obj: &R) -> anyhow::Result<()> {
        let key = obj.uid().to_string();
        self.api
            .update(R::PATH, &key, serde_json::to_value(obj)?)
            .await?;
        self.store.insert(key, obj.clone());
        Ok(())
    }

    /// Delete through the external API, then drop the cached copy.
    pub async fn delete_item(&self, key: &str) -> anyhow::Result<()> {
        self.api.delete(R::PATH, key).await?;
        self.store.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_apiclient::{ApiService, MemoryApi};
    use pkg_types::meta::ObjectMeta;
    use pkg_types::pod::Pod;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::sleep;

    fn make_pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "default".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_sync_populates_store_without_callbacks() {
        let api = Arc::new(MemoryApi::new());
        let uid = api
            .create("pods", serde_json::to_value(make_pod("web-1")).unwrap())
            .await
            .unwrap();

        let informer = Arc::new(Informer::<Pod>::new(api.clone()));
        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let log = Arc::clone(&events);
            let add_log = Arc::clone(&events);
            let del_log = Arc::clone(&events);
            informer.add_event_handler(EventHandler {
                on_add: Box::new(move |pod: &Pod| {
                    add_log.lock().unwrap().push(format!("add {}", pod.metadata.name));
                }),
                on_update: Box::new(move |new: &Pod, _old: &Pod| {
                    log.lock().unwrap().push(format!("update {}", new.metadata.name));
                }),
                on_delete: Box::new(move |pod: &Pod| {
                    del_log.lock().unwrap().push(format!("delete {}", pod.metadata.name));
                }),
            });
        }

        let (_stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(Arc::clone(&informer).run(stop_rx));
        informer.await_sync().await;

        assert!(informer.get(&uid).is_some());
        // The listed object must not have fired a callback
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_deltas_fire_add_update_delete() {
        let api = Arc::new(MemoryApi::new());
        let informer = Arc::new(Informer::<Pod>::new(api.clone()));
        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let add_log = Arc::clone(&events);
            let update_log = Arc::clone(&events);
            let del_log = Arc::clone(&events);
            informer.add_event_handler(EventHandler {
                on_add: Box::new(move |pod: &Pod| {
                    add_log.lock().unwrap().push(format!("add {}", pod.metadata.name));
                }),
                on_update: Box::new(move |new: &Pod, old: &Pod| {
                    update_log
                        .lock()
                        .unwrap()
                        .push(format!("update {} was {}", new.metadata.name, old.metadata.name));
                }),
                on_delete: Box::new(move |pod: &Pod| {
                    del_log.lock().unwrap().push(format!("delete {}", pod.metadata.name));
                }),
            });
        }

        let (_stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(Arc::clone(&informer).run(stop_rx));
        informer.await_sync().await;

        let mut pod = make_pod("web-1");
        let uid = api
            .create("pods", serde_json::to_value(&pod).unwrap())
            .await
            .unwrap();
        pod.metadata.uid = uid.clone();
        pod.metadata.namespace = "prod".to_string();
        api.update("pods", &uid, serde_json::to_value(&pod).unwrap())
            .await
            .unwrap();
        api.delete("pods", &uid).await.unwrap();

        {
            let events = Arc::clone(&events);
            wait_until(move || events.lock().unwrap().len() == 3).await;
        }
        let events = events.lock().unwrap();
        assert_eq!(events[0], "add web-1");
        assert_eq!(events[1], "update web-1 was web-1");
        assert_eq!(events[2], "delete web-1");
    }

    #[tokio::test]
    async fn test_create_item_patches_store_optimistically() {
        let api = Arc::new(MemoryApi::new());
        let informer = Arc::new(Informer::<Pod>::new(api.clone()));
        let (_stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(Arc::clone(&informer).run(stop_rx));
        informer.await_sync().await;

        let uid = informer.create_item(&make_pod("web-1")).await.unwrap();
        // Visible immediately, before the watch round-trip
        let cached = informer.get(&uid).unwrap();
        assert_eq!(cached.metadata.uid, uid);
    }
}
