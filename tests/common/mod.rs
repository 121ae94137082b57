use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

use watchkeeper::config::{Config, WatchedResource};
use watchkeeper::models::{AuditEvent, EventType};
use watchkeeper::store::Store;
use watchkeeper::transform::transform_watch_event;
use watchkeeper::watchers::{Notification, SourceError, WatchSource, WatcherManager};

/// In-process watch source driven by the tests instead of a cluster.
pub struct ChannelSource {
    senders: Mutex<HashMap<String, mpsc::Sender<Notification>>>,
    crds: Mutex<Vec<WatchedResource>>,
}

impl ChannelSource {
    pub fn new(crds: Vec<WatchedResource>) -> Self {
        ChannelSource {
            senders: Mutex::new(HashMap::new()),
            crds: Mutex::new(crds),
        }
    }

    /// Deliver a notification on the subscription for `group/version/kind`.
    pub async fn push(
        &self,
        group: &str,
        version: &str,
        kind: &str,
        event_type: EventType,
        object: Value,
    ) {
        let key = subscription_key(group, version, kind);
        let sender = self
            .senders
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| panic!("no subscription for {key}"));
        sender
            .send(Notification { event_type, object })
            .await
            .expect("subscription receiver dropped");
    }

    pub fn is_subscribed(&self, group: &str, version: &str, kind: &str) -> bool {
        self.senders
            .lock()
            .unwrap()
            .contains_key(&subscription_key(group, version, kind))
    }
}

#[async_trait]
impl WatchSource for ChannelSource {
    async fn subscribe(
        &self,
        resource: &WatchedResource,
    ) -> Result<mpsc::Receiver<Notification>, SourceError> {
        let (tx, rx) = mpsc::channel(64);
        let key = subscription_key(&resource.group, &resource.version, &resource.kind);
        self.senders.lock().unwrap().insert(key, tx);
        Ok(rx)
    }

    async fn list_crds(&self) -> Result<Vec<WatchedResource>, SourceError> {
        Ok(self.crds.lock().unwrap().clone())
    }
}

fn subscription_key(group: &str, version: &str, kind: &str) -> String {
    format!("{group}/{version}/{kind}")
}

/// A running test server with its own temporary store directory.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub store: Arc<Store>,
    pub source: Arc<ChannelSource>,
    pub manager: Arc<WatcherManager>,
    _dir: TempDir,
}

/// Spawn a test app with the default configuration and no pre-installed
/// custom resource definitions.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(Config::default(), Vec::new()).await
}

pub async fn spawn_app_with(config: Config, crds: Vec<WatchedResource>) -> TestApp {
    let dir = tempfile::tempdir().expect("failed to create temp store dir");
    let store =
        Arc::new(Store::open(dir.path(), config.retention_days).expect("failed to open store"));

    let source = Arc::new(ChannelSource::new(crds));
    let manager = Arc::new(WatcherManager::new(source.clone(), store.clone(), &config));
    manager.start().await.expect("failed to start watchers");

    let app = watchkeeper::build_app(store.clone(), config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });

    TestApp {
        addr,
        client: Client::new(),
        store,
        source,
        manager,
        _dir: dir,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// GET a path, return (body, status).
    pub async fn get(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// GET a path, return the raw response for header assertions.
    pub async fn get_raw(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("request failed")
    }

    /// Transform and store an object directly, bypassing the watch pipeline.
    pub fn ingest(&self, event_type: EventType, object: &Value) -> AuditEvent {
        let event = transform_watch_event(object, event_type, None).expect("transform failed");
        self.store.store_event(&event, object).expect("store failed");
        event
    }

    /// Like `ingest`, but pins the record's timestamp for deterministic
    /// time-window assertions.
    pub fn ingest_at(
        &self,
        event_type: EventType,
        object: &Value,
        ts: DateTime<Utc>,
    ) -> AuditEvent {
        let mut event = transform_watch_event(object, event_type, None).expect("transform failed");
        event.timestamp = ts;
        self.store.store_event(&event, object).expect("store failed");
        event
    }
}

/// Poll until `check` passes; panics after a few seconds.
pub async fn settle<F: Fn() -> bool>(check: F, what: &str) {
    for _ in 0..150 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

// ── Object builders ─────────────────────────────────────────────

pub fn pod(namespace: &str, name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": Uuid::new_v4().to_string(),
            "resourceVersion": "12345",
            "generation": 1,
            "annotations": { "app.kubernetes.io/managed-by": "test" },
            "managedFields": [{ "manager": "kubelet" }]
        },
        "spec": { "containers": [{ "name": "main", "image": "busybox" }] },
        "status": { "phase": "Running" }
    })
}

/// A cluster-native Event object referencing another object.
pub fn cluster_event(
    namespace: &str,
    name: &str,
    involved_kind: &str,
    involved_namespace: &str,
    involved_name: &str,
) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Event",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": Uuid::new_v4().to_string()
        },
        "involvedObject": {
            "kind": involved_kind,
            "namespace": involved_namespace,
            "name": involved_name,
            "uid": Uuid::new_v4().to_string()
        },
        "reason": "Scheduled",
        "message": "Successfully assigned pod"
    })
}

/// A CustomResourceDefinition payload with one served version.
pub fn crd(group: &str, kind: &str, plural: &str, version: &str) -> Value {
    json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {
            "name": format!("{plural}.{group}"),
            "uid": Uuid::new_v4().to_string()
        },
        "spec": {
            "group": group,
            "names": { "kind": kind, "plural": plural },
            "scope": "Namespaced",
            "versions": [
                { "name": version, "served": true, "storage": true },
                { "name": "v1alpha1", "served": false, "storage": false }
            ]
        }
    })
}
