//! Remote store client.
//!
//! ### Contract
//!
//! - `POST /{entity}s` creates, `PUT /{entity}s/{id}` updates,
//!   `DELETE /{entity}s/{id}` deletes
//! - `GET /presentations/{id}` reads one presentation for reconciliation
//! - `GET /projects/{id}` reads a project with its presentation trees
//! - **Authentication**: `Authorization: Bearer <token>` on every request
//! - Any non-2xx answer is reported as `REMOTE_REJECTED` and counts as a
//!   sync failure

use reqwest::{Method, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use offdeck_core::{AppConfig, EntityKind, Error};

use crate::fetch::endpoint;

/// Remote copy of a presentation, used for conflict detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBlock {
    pub id: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub payload: Value,
    pub last_modified: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSlide {
    pub id: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub payload: Value,
    pub last_modified: i64,
    #[serde(default)]
    pub blocks: Vec<RemoteBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePresentation {
    #[serde(flatten)]
    pub document: RemoteDocument,
    #[serde(default)]
    pub slides: Vec<RemoteSlide>,
}

/// A project with every presentation tree it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProject {
    pub id: String,
    #[serde(default)]
    pub presentations: Vec<RemotePresentation>,
}

/// Authoritative remote store.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create(&self, kind: EntityKind, id: &str, body: &Value) -> Result<(), Error>;

    async fn update(&self, kind: EntityKind, id: &str, body: &Value) -> Result<(), Error>;

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), Error>;

    /// Fetch one presentation. `None` when the remote has no such record.
    ///
    /// Served by `GET /presentations/{id}`, a read endpoint beside the
    /// project-level contract (`GET /projects/{id}`). Reconciliation needs
    /// only the presentation row, not its project tree. Implementations that
    /// can only serve projects may look the presentation up in its project.
    async fn fetch_presentation(&self, id: &str) -> Result<Option<RemoteDocument>, Error>;

    async fn fetch_project(&self, id: &str) -> Result<RemoteProject, Error>;
}

/// Remote store over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpRemoteStore {
    /// Build a client from configuration.
    ///
    /// Fails if `api_token` is not configured.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let token = config.require_api_token().map_err(|e| Error::InvalidInput(e.to_string()))?;

        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, base_url: config.api_base_url.clone(), token: token.to_string() })
    }

    async fn send(&self, method: Method, segments: &[&str], body: Option<&Value>) -> Result<reqwest::Response, Error> {
        let url = endpoint(&self.base_url, segments)?;
        tracing::debug!(%method, %url, "remote request");

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(|e| Error::Network(e.to_string()))
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let mut message = response.text().await.unwrap_or_default();
        message.truncate(512);
        Err(Error::RemoteRejected { status: status.as_u16(), message })
    }
}

#[async_trait::async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create(&self, kind: EntityKind, _id: &str, body: &Value) -> Result<(), Error> {
        let response = self.send(Method::POST, &[kind.collection()], Some(body)).await?;
        Self::expect_success(response).await.map(|_| ())
    }

    async fn update(&self, kind: EntityKind, id: &str, body: &Value) -> Result<(), Error> {
        let response = self.send(Method::PUT, &[kind.collection(), id], Some(body)).await?;
        Self::expect_success(response).await.map(|_| ())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), Error> {
        let response = self.send(Method::DELETE, &[kind.collection(), id], None).await?;
        Self::expect_success(response).await.map(|_| ())
    }

    async fn fetch_presentation(&self, id: &str) -> Result<Option<RemoteDocument>, Error> {
        let response = self.send(Method::GET, &[EntityKind::Presentation.collection(), id], None).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::expect_success(response).await?;
        let document = response
            .json::<RemoteDocument>()
            .await
            .map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Some(document))
    }

    async fn fetch_project(&self, id: &str) -> Result<RemoteProject, Error> {
        let response = self.send(Method::GET, &["projects", id], None).await?;
        let response = Self::expect_success(response).await?;
        response
            .json::<RemoteProject>()
            .await
            .map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_config_requires_token() {
        let config = AppConfig::default();
        assert!(matches!(HttpRemoteStore::from_config(&config), Err(Error::InvalidInput(_))));

        let config = AppConfig { api_token: Some("t0ken".into()), ..Default::default() };
        assert!(HttpRemoteStore::from_config(&config).is_ok());
    }

    #[test]
    fn test_presentation_lookup_path() {
        let url = endpoint("https://app.test/api", &[EntityKind::Presentation.collection(), "p1"]).unwrap();
        assert_eq!(url.as_str(), "https://app.test/api/presentations/p1");
    }

    #[test]
    fn test_project_deserialize() {
        let raw = json!({
            "id": "proj-1",
            "presentations": [{
                "id": "p1",
                "projectId": "proj-1",
                "payload": {"title": "Kickoff"},
                "lastModified": 1700000000000i64,
                "slides": [{
                    "id": "s1",
                    "position": 0,
                    "payload": {},
                    "lastModified": 1700000000000i64,
                    "blocks": [{"id": "b1", "lastModified": 1700000000000i64}]
                }]
            }]
        });

        let project: RemoteProject = serde_json::from_value(raw).unwrap();
        let presentation = &project.presentations[0];
        assert_eq!(presentation.document.project_id.as_deref(), Some("proj-1"));
        assert_eq!(presentation.slides[0].blocks[0].id, "b1");
        assert_eq!(presentation.slides[0].blocks[0].payload, Value::Null);
    }

    #[test]
    fn test_document_defaults() {
        let doc: RemoteDocument = serde_json::from_value(json!({"id": "p1", "lastModified": 5})).unwrap();
        assert_eq!(doc.last_modified, 5);
        assert!(doc.project_id.is_none());
    }
}
