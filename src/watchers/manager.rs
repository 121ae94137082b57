//! Registration and lifetime of the per-resource watch subscriptions.

use std::sync::{Arc, Mutex};

use dashmap::DashSet;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{Config, WatchedResource};
use crate::models::EventType;
use crate::store::Store;
use crate::transform::transform_watch_event;
use crate::watchers::{crd_to_resources, Notification, SourceError, WatchSource};

/// The definition type itself, watched for hot registration of new types.
fn crd_descriptor() -> WatchedResource {
    WatchedResource::new(
        "apiextensions.k8s.io",
        "v1",
        "CustomResourceDefinition",
        "customresourcedefinitions",
        false,
    )
}

/// Owns every active watch subscription and routes notifications into the
/// transform + store pipeline.
pub struct WatcherManager {
    source: Arc<dyn WatchSource>,
    store: Arc<Store>,
    resources: Vec<WatchedResource>,
    discover_crds: bool,
    registered: DashSet<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl WatcherManager {
    pub fn new(source: Arc<dyn WatchSource>, store: Arc<Store>, config: &Config) -> Self {
        let (shutdown, _) = watch::channel(false);
        WatcherManager {
            source,
            store,
            resources: config.resources.clone(),
            discover_crds: config.discover_crds,
            registered: DashSet::new(),
            tasks: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    /// Register all configured watchers, then run discovery if enabled.
    ///
    /// A configured watcher that fails to register aborts startup: the
    /// operator asked for it. A discovered custom type that fails is logged
    /// and skipped.
    pub async fn start(self: &Arc<Self>) -> Result<(), SourceError> {
        for resource in self.resources.clone() {
            self.add_watcher(&resource).await?;
        }

        if self.discover_crds {
            match self.source.list_crds().await {
                Ok(descriptors) => {
                    for descriptor in descriptors {
                        if self.is_configured(&descriptor.group, &descriptor.kind) {
                            continue;
                        }
                        if let Err(e) = self.add_watcher(&descriptor).await {
                            tracing::warn!(
                                "Failed to watch custom resource {}/{} {}: {e}",
                                descriptor.group,
                                descriptor.version,
                                descriptor.kind
                            );
                        }
                    }
                }
                Err(e) => tracing::warn!("Custom resource discovery failed: {e}"),
            }

            if let Err(e) = self.watch_crd_changes().await {
                tracing::warn!("Failed to watch for new custom resource definitions: {e}");
            }
        }

        Ok(())
    }

    /// Signal every delivery task to stop. Safe to call more than once.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            task.abort();
        }
    }

    /// Subscribe to one resource type and spawn its delivery task. Already
    /// registered group/version/kind triples are a no-op.
    async fn add_watcher(&self, resource: &WatchedResource) -> Result<(), SourceError> {
        let key = registration_key(resource);
        if !self.registered.insert(key.clone()) {
            return Ok(());
        }

        let rx = match self.source.subscribe(resource).await {
            Ok(rx) => rx,
            Err(e) => {
                self.registered.remove(&key);
                return Err(e);
            }
        };

        let store = self.store.clone();
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(deliver(rx, store, resource.clone(), shutdown));
        self.tasks.lock().unwrap().push(handle);

        tracing::info!(
            "Watching {}/{} ({})",
            resource.group,
            resource.version,
            resource.kind
        );
        Ok(())
    }

    fn is_configured(&self, group: &str, kind: &str) -> bool {
        self.resources
            .iter()
            .any(|r| r.group == group && r.kind == kind)
    }

    /// Subscribe to the definition type so resource types created after
    /// startup get watchers without a restart.
    async fn watch_crd_changes(self: &Arc<Self>) -> Result<(), SourceError> {
        let mut rx = self.source.subscribe(&crd_descriptor()).await?;
        let manager = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        let Some(notification) = maybe else { break };
                        if notification.event_type != EventType::Added {
                            continue;
                        }
                        manager.register_new_crd(&notification.object).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);

        Ok(())
    }

    async fn register_new_crd(&self, crd: &Value) {
        for descriptor in crd_to_resources(crd) {
            if self.is_configured(&descriptor.group, &descriptor.kind) {
                continue;
            }
            if let Err(e) = self.add_watcher(&descriptor).await {
                tracing::warn!(
                    "Failed to watch new custom resource {}/{} {}: {e}",
                    descriptor.group,
                    descriptor.version,
                    descriptor.kind
                );
            }
        }
    }
}

fn registration_key(resource: &WatchedResource) -> String {
    format!("{}/{}/{}", resource.group, resource.version, resource.kind)
}

/// Delivery loop for one subscription. Transform or store failures are
/// logged per event; nothing here crashes or blocks the source.
async fn deliver(
    mut rx: mpsc::Receiver<Notification>,
    store: Arc<Store>,
    resource: WatchedResource,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            maybe = rx.recv() => {
                match maybe {
                    Some(notification) => handle_notification(&store, &resource, notification),
                    None => break,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Delivery task for {} stopped", resource.plural);
}

fn handle_notification(store: &Store, resource: &WatchedResource, notification: Notification) {
    let object = normalize_payload(notification.event_type, notification.object, &resource.kind);

    let event = match transform_watch_event(&object, notification.event_type, Some(&resource.plural))
    {
        Ok(event) => event,
        Err(e) => {
            tracing::error!("Failed to transform {} notification: {e}", resource.plural);
            return;
        }
    };

    if let Err(e) = store.store_event(&event, &object) {
        tracing::error!(
            "Failed to store {} event for {}/{}: {e}",
            event.verb,
            event.namespace,
            event.resource_name
        );
    }
}

/// Unwrap a final-state-unknown delete. The wrapper carries the last-known
/// object when the source still has it; otherwise a minimal record
/// (namespace, name, kind) is built from the `ns/name` key and the
/// subscription's descriptor so the deletion is recorded at all.
fn normalize_payload(event_type: EventType, object: Value, kind: &str) -> Value {
    if event_type != EventType::Deleted {
        return object;
    }
    let Some(map) = object.as_object() else {
        return object;
    };
    if map.contains_key("kind") || map.contains_key("metadata") {
        return object;
    }

    if let Some(inner) = map.get("object").filter(|v| v.is_object()) {
        return inner.clone();
    }
    if let Some(key) = map.get("key").and_then(Value::as_str) {
        let (namespace, name) = key.split_once('/').unwrap_or(("", key));
        return json!({
            "kind": kind,
            "metadata": { "namespace": namespace, "name": name }
        });
    }
    object
}
