use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Type of event in a watch stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Put,
    Delete,
}

/// A single change notification from the API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub key: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// One entry of a full List snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireObject {
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

/// The external API contract the reconciliation engine is a client of:
/// a snapshot List, a live Watch feed, and last-write-wins mutations.
/// No compare-and-swap is available.
#[async_trait]
pub trait ApiService: Send + Sync {
    /// Snapshot of all objects of a kind.
    async fn list(&self, path: &str) -> anyhow::Result<Vec<WireObject>>;

    /// Live change feed for a kind. The receiver yields events until the
    /// stream breaks; it is not restarted internally.
    async fn watch(&self, path: &str) -> anyhow::Result<mpsc::Receiver<WireEvent>>;

    /// Create an object; the server assigns and returns its key.
    async fn create(&self, path: &str, value: serde_json::Value) -> anyhow::Result<String>;

    async fn update(&self, path: &str, key: &str, value: serde_json::Value)
        -> anyhow::Result<()>;

    async fn delete(&self, path: &str, key: &str) -> anyhow::Result<()>;
}

/// HTTP+JSON implementation of [`ApiService`] against the API server's
/// `/api/v1` surface. The watch feed is consumed as an SSE stream.
pub struct HttpApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpApi {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn collection_url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    fn object_url(&self, path: &str, key: &str) -> String {
        format!("{}/api/v1/{}/{}", self.base_url, path, key)
    }
}

#[async_trait]
impl ApiService for HttpApi {
    async fn list(&self, path: &str) -> anyhow::Result<Vec<WireObject>> {
        let resp = self
            .client
            .get(self.collection_url(path))
            .send()
            .await?
            .error_for_status()?;
        let objects: Vec<WireObject> = resp.json().await?;
        Ok(objects)
    }

    async fn watch(&self, path: &str) -> anyhow::Result<mpsc::Receiver<WireEvent>> {
        let url = format!("{}/api/v1/watch/{}", self.base_url, path);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        info!("Watch subscription opened: {}", url);

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut buf = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("Watch stream read error: {}", e);
                        break;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));
                // SSE frames: one `data: {json}` line per event, blank-line
                // separated. Comment lines (keep-alives) are skipped.
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    match serde_json::from_str::<WireEvent>(data.trim()) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("Dropping malformed watch event: {}", e),
                    }
                }
            }
            // Sender drops here; the subscriber sees the stream end.
        });
        Ok(rx)
    }

    async fn create(&self, path: &str, value: serde_json::Value) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(self.collection_url(path))
            .json(&value)
            .send()
            .await?
            .error_for_status()?;
        let created: CreateResponse = resp.json().await?;
        Ok(created.id)
    }

    async fn update(
        &self,
        path: &str,
        key: &str,
        value: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.client
            .put(self.object_url(path, key))
            .json(&value)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete(&self, path: &str, key: &str) -> anyhow::Result<()> {
        self.client
            .delete(self.object_url(path, key))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
