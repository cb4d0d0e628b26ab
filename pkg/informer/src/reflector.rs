use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use pkg_apiclient::{ApiService, EventType, Resource};

/// A change notification for one cached object.
#[derive(Debug, Clone)]
pub enum Delta<R> {
    Put { key: String, value: R },
    Delete { key: String },
}

/// What the reflector emits to its informer: deltas, plus a single `Synced`
/// marker once the initial List snapshot has been fully replayed.
#[derive(Debug, Clone)]
pub enum ReflectorEvent<R> {
    Delta(Delta<R>),
    Synced,
}

/// Performs an initial full List against the external API, then an
/// indefinite incremental Watch, emitting a uniform stream of deltas.
///
/// The watch subscription is opened before the List so no change falls into
/// the gap between the two; events that race the snapshot simply buffer in
/// the channel and replay after `Synced` (reconciliation is level-triggered,
/// so the duplicate Put is harmless).
pub struct Reflector<R: Resource> {
    api: Arc<dyn ApiService>,
    tx: mpsc::Sender<ReflectorEvent<R>>,
}

impl<R: Resource> Reflector<R> {
    pub fn new(api: Arc<dyn ApiService>, tx: mpsc::Sender<ReflectorEvent<R>>) -> Self {
        Self { api, tx }
    }

    /// List and watch until the stop signal fires or the watch stream
    /// breaks. Restarting a broken watch is an external operational
    /// concern, not handled here.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut events = match self.api.watch(R::PATH).await {
            Ok(rx) => rx,
            Err(e) => {
                error!("{} reflector: watch failed: {}", R::KIND, e);
                return;
            }
        };

        let objects = match self.api.list(R::PATH).await {
            Ok(objects) => objects,
            Err(e) => {
                error!("{} reflector: initial list failed: {}", R::KIND, e);
                return;
            }
        };

        // Replay the snapshot as synthetic Put deltas.
        for entry in objects {
            match serde_json::from_value::<R>(entry.value) {
                Ok(value) => {
                    let delta = Delta::Put {
                        key: entry.key,
                        value,
                    };
                    if self.tx.send(ReflectorEvent::Delta(delta)).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!("{} reflector: dropping undecodable object: {}", R::KIND, e),
            }
        }
        if self.tx.send(ReflectorEvent::Synced).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                _ = stop.changed() => {
                    info!("{} reflector stopping", R::KIND);
                    return;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        warn!("{} reflector: watch stream ended", R::KIND);
                        return;
                    };
                    let delta = match event.event_type {
                        EventType::Put => {
                            let Some(value) = event.value else {
                                warn!("{} reflector: dropping Put without a value", R::KIND);
                                continue;
                            };
                            match serde_json::from_value::<R>(value) {
                                Ok(value) => Delta::Put { key: event.key, value },
                                Err(e) => {
                                    // Decode errors drop the single delta; the stream continues.
                                    warn!("{} reflector: dropping undecodable delta: {}", R::KIND, e);
                                    continue;
                                }
                            }
                        }
                        EventType::Delete => Delta::Delete { key: event.key },
                    };
                    if self.tx.send(ReflectorEvent::Delta(delta)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
