//! Cluster-backed watch source over the kube client.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::{pin_mut, TryStreamExt};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ApiResource, DynamicObject, ListParams};
use kube::core::GroupVersionKind;
use kube::runtime::watcher;
use tokio::sync::mpsc;

use crate::config::WatchedResource;
use crate::models::EventType;
use crate::watchers::{crd_to_resources, Notification, SourceError, WatchSource};

/// Capacity of each subscription channel. The watch stream pauses while a
/// slow consumer catches up rather than buffering without bound.
const CHANNEL_CAPACITY: usize = 256;

/// Pause after a watch stream error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub struct KubeWatchSource {
    client: kube::Client,
}

impl KubeWatchSource {
    /// Connect using the ambient kubeconfig or in-cluster environment.
    pub async fn connect() -> Result<Self, SourceError> {
        let client = kube::Client::try_default()
            .await
            .map_err(|e| SourceError::Client(e.to_string()))?;
        Ok(KubeWatchSource { client })
    }
}

#[async_trait]
impl WatchSource for KubeWatchSource {
    async fn subscribe(
        &self,
        resource: &WatchedResource,
    ) -> Result<mpsc::Receiver<Notification>, SourceError> {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let api_resource = ApiResource::from_gvk_with_plural(&gvk, &resource.plural);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &api_resource);

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let label = format!("{}/{}", resource.plural, resource.version);
        tokio::spawn(run_watch(api, tx, label));
        Ok(rx)
    }

    async fn list_crds(&self) -> Result<Vec<WatchedResource>, SourceError> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| SourceError::Client(e.to_string()))?;

        let mut resources = Vec::new();
        for crd in list.items {
            let value =
                serde_json::to_value(&crd).map_err(|e| SourceError::Client(e.to_string()))?;
            resources.extend(crd_to_resources(&value));
        }
        Ok(resources)
    }
}

/// Drive one watch stream, classifying applies into Added or Modified by
/// tracking which uids this subscription has already seen (the informer
/// cache analog). Stops when the subscriber drops its receiver.
async fn run_watch(api: Api<DynamicObject>, tx: mpsc::Sender<Notification>, label: String) {
    let mut seen: HashSet<String> = HashSet::new();
    let stream = watcher(api, watcher::Config::default());
    pin_mut!(stream);

    loop {
        match stream.try_next().await {
            Ok(Some(event)) => {
                let notification = match event {
                    watcher::Event::Init | watcher::Event::InitDone => continue,
                    watcher::Event::InitApply(obj) | watcher::Event::Apply(obj) => {
                        let uid = obj.metadata.uid.clone().unwrap_or_default();
                        let event_type = if seen.insert(uid) {
                            EventType::Added
                        } else {
                            EventType::Modified
                        };
                        match object_payload(&obj, &label) {
                            Some(object) => Notification { event_type, object },
                            None => continue,
                        }
                    }
                    watcher::Event::Delete(obj) => {
                        if let Some(uid) = &obj.metadata.uid {
                            seen.remove(uid);
                        }
                        match object_payload(&obj, &label) {
                            Some(object) => Notification {
                                event_type: EventType::Deleted,
                                object,
                            },
                            None => continue,
                        }
                    }
                };

                if tx.send(notification).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                tracing::warn!("Watch stream for {label} ended");
                return;
            }
            Err(e) => {
                // The watcher re-establishes the watch itself; surface the
                // error and keep polling.
                tracing::warn!("Watch stream error for {label}: {e}");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

fn object_payload(obj: &DynamicObject, label: &str) -> Option<serde_json::Value> {
    match serde_json::to_value(obj) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Dropping unserializable {label} object: {e}");
            None
        }
    }
}
