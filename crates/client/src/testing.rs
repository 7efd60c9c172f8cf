//! In-process fakes for the remote store and the network.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use reqwest::Url;
use serde_json::Value;

use offdeck_core::{EntityKind, Error};

use crate::fetch::{FetchResponse, Network};
use crate::remote::{RemoteDocument, RemoteProject, RemoteStore};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RemoteCall {
    Create(EntityKind, String, Value),
    Update(EntityKind, String, Value),
    Delete(EntityKind, String),
}

impl RemoteCall {
    pub(crate) fn entity_id(&self) -> &str {
        match self {
            RemoteCall::Create(_, id, _) | RemoteCall::Update(_, id, _) | RemoteCall::Delete(_, id) => id,
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeRemote {
    pub calls: Mutex<Vec<RemoteCall>>,
    pub failing: Mutex<HashSet<String>>,
    pub offline: AtomicBool,
    pub documents: Mutex<HashMap<String, RemoteDocument>>,
    pub projects: Mutex<HashMap<String, RemoteProject>>,
}

impl FakeRemote {
    pub(crate) fn fail_entity(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub(crate) fn heal_entity(&self, id: &str) {
        self.failing.lock().unwrap().remove(id);
    }

    pub(crate) fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn put_document(&self, id: &str, payload: Value, last_modified: i64) {
        self.documents
            .lock()
            .unwrap()
            .insert(id.to_string(), RemoteDocument { id: id.to_string(), project_id: None, payload, last_modified });
    }

    fn check(&self, id: &str) -> Result<(), Error> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("connection refused".into()));
        }
        if self.failing.lock().unwrap().contains(id) {
            return Err(Error::RemoteRejected { status: 500, message: "boom".into() });
        }
        Ok(())
    }

    fn record_document(&self, kind: EntityKind, id: &str, body: &Value) {
        if kind != EntityKind::Presentation {
            return;
        }
        let last_modified = body.get("lastModified").and_then(Value::as_i64).unwrap_or_default();
        let payload = body.get("payload").cloned().unwrap_or(Value::Null);
        self.put_document(id, payload, last_modified);
    }
}

#[async_trait::async_trait]
impl RemoteStore for FakeRemote {
    async fn create(&self, kind: EntityKind, id: &str, body: &Value) -> Result<(), Error> {
        self.check(id)?;
        self.calls.lock().unwrap().push(RemoteCall::Create(kind, id.to_string(), body.clone()));
        self.record_document(kind, id, body);
        Ok(())
    }

    async fn update(&self, kind: EntityKind, id: &str, body: &Value) -> Result<(), Error> {
        self.check(id)?;
        self.calls.lock().unwrap().push(RemoteCall::Update(kind, id.to_string(), body.clone()));
        self.record_document(kind, id, body);
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), Error> {
        self.check(id)?;
        self.calls.lock().unwrap().push(RemoteCall::Delete(kind, id.to_string()));
        self.documents.lock().unwrap().remove(id);
        Ok(())
    }

    async fn fetch_presentation(&self, id: &str) -> Result<Option<RemoteDocument>, Error> {
        self.check(id)?;
        Ok(self.documents.lock().unwrap().get(id).cloned())
    }

    async fn fetch_project(&self, id: &str) -> Result<RemoteProject, Error> {
        self.check(id)?;
        self.projects
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::RemoteRejected { status: 404, message: format!("project {id}") })
    }
}

/// Network that serves canned responses and can be switched off.
pub(crate) struct FakeNetwork {
    pub online: AtomicBool,
    pub routes: Mutex<HashMap<String, (u16, Option<String>, Vec<u8>)>>,
    pub hits: Mutex<Vec<String>>,
}

impl Default for FakeNetwork {
    fn default() -> Self {
        Self { online: AtomicBool::new(true), routes: Mutex::default(), hits: Mutex::default() }
    }
}

impl FakeNetwork {
    pub(crate) fn route(&self, url: &str, status: u16, content_type: &str, body: &[u8]) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, Some(content_type.to_string()), body.to_vec()));
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub(crate) fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().iter().filter(|hit| hit.as_str() == url).count()
    }
}

#[async_trait::async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, Error> {
        self.hits.lock().unwrap().push(url.to_string());
        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::Network("offline".into()));
        }
        let (status, content_type, body) = self
            .routes
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .unwrap_or((404, Some("text/plain".into()), b"not found".to_vec()));
        Ok(FetchResponse {
            url: url.clone(),
            final_url: url.clone(),
            status,
            content_type,
            headers: Vec::new(),
            bytes: Bytes::from(body),
            fetch_ms: 1,
        })
    }
}

/// Toggle a trigger that makes every write to `sync_meta` abort, so the
/// bookkeeping step at the end of a pass fails while the queue stays usable.
pub(crate) async fn set_sync_meta_writable(path: &std::path::Path, writable: bool) {
    let conn = tokio_rusqlite::Connection::open(path).await.unwrap();
    let sql = if writable {
        "DROP TRIGGER IF EXISTS sync_meta_readonly;"
    } else {
        "CREATE TRIGGER sync_meta_readonly BEFORE INSERT ON sync_meta
         BEGIN SELECT RAISE(ABORT, 'sync_meta is read-only'); END;"
    };
    conn.call(move |conn| conn.execute_batch(sql)).await.unwrap();
    conn.close().await.unwrap();
}
