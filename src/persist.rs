//! Persistence collaborator — the HTTP service that confirms mutations.
//!
//! DESIGN
//! ======
//! The engine only ever sees this trait: every mutation endpoint is
//! idempotent from the caller's perspective and returns one server-issued,
//! lexicographically ordered timestamp string. The production
//! implementation posts JSON to the editor API; tests swap in a recording
//! fake with scripted responses.

use async_trait::async_trait;
use serde::Deserialize;

use crate::model::{Node, Room, Timestamp};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("persistence request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The service rejected the mutation with a human-readable message.
    #[error("{0}")]
    Rejected(String),
    #[error("malformed persistence response: {0}")]
    Decode(String),
}

/// Contract consumed by the mutation dispatcher.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn update_node(&self, node_id: &str, node: &Node) -> Result<Timestamp, PersistError>;
    async fn add_node(&self, node_id: &str, node: &Node) -> Result<Timestamp, PersistError>;
    async fn delete_node(&self, node_id: &str) -> Result<Timestamp, PersistError>;
    async fn add_edge(&self, in_node_id: &str, out_node_id: &str) -> Result<Timestamp, PersistError>;
    async fn delete_edge(&self, in_node_id: &str, out_node_id: &str) -> Result<Timestamp, PersistError>;
    async fn upsert_room(&self, room_id: &str, room: &Room) -> Result<Timestamp, PersistError>;
}

// =============================================================================
// HTTP IMPLEMENTATION
// =============================================================================

/// Shape of every confirmation response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Confirmation {
    updated_at: String,
}

/// Error body the service sends on rejection. `error_message` is the
/// user-facing variant, `error` the developer one.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Persistence over the editor's HTTP API.
pub struct HttpPersistence {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPersistence {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into().trim_end_matches('/').to_owned() }
    }

    async fn call(
        &self,
        method: reqwest::Method,
        path: &str,
        body: serde_json::Value,
    ) -> Result<Timestamp, PersistError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .request(method, &url)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body: ErrorBody = response
                .json()
                .await
                .unwrap_or(ErrorBody { error: None, error_message: None });
            let message = body
                .error_message
                .or(body.error)
                .unwrap_or_else(|| format!("persistence call to {path} failed with {status}"));
            return Err(PersistError::Rejected(message));
        }

        let confirmation: Confirmation = response
            .json()
            .await
            .map_err(|e| PersistError::Decode(e.to_string()))?;
        Ok(Timestamp(confirmation.updated_at))
    }
}

#[async_trait]
impl Persistence for HttpPersistence {
    async fn update_node(&self, node_id: &str, node: &Node) -> Result<Timestamp, PersistError> {
        let body = serde_json::json!({ "nodeId": node_id, "node": node });
        self.call(reqwest::Method::POST, "/api/node", body).await
    }

    async fn add_node(&self, node_id: &str, node: &Node) -> Result<Timestamp, PersistError> {
        let body = serde_json::json!({ "nodeId": node_id, "node": node });
        self.call(reqwest::Method::POST, "/api/node/add", body).await
    }

    async fn delete_node(&self, node_id: &str) -> Result<Timestamp, PersistError> {
        let body = serde_json::json!({ "nodeId": node_id });
        self.call(reqwest::Method::POST, "/api/node/delete", body).await
    }

    async fn add_edge(&self, in_node_id: &str, out_node_id: &str) -> Result<Timestamp, PersistError> {
        let body = serde_json::json!({ "inNodeId": in_node_id, "outNodeId": out_node_id });
        self.call(reqwest::Method::PUT, "/api/neighbor", body).await
    }

    async fn delete_edge(&self, in_node_id: &str, out_node_id: &str) -> Result<Timestamp, PersistError> {
        let body = serde_json::json!({ "inNodeId": in_node_id, "outNodeId": out_node_id });
        self.call(reqwest::Method::DELETE, "/api/neighbor", body).await
    }

    async fn upsert_room(&self, room_id: &str, room: &Room) -> Result<Timestamp, PersistError> {
        let body = serde_json::json!({ "roomId": room_id, "newRoom": room });
        self.call(reqwest::Method::POST, "/api/room/upsert", body).await
    }
}

// =============================================================================
// TEST FAKE
// =============================================================================
