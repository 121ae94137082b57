use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Watch server configuration, loaded from a YAML document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub resources: Vec<WatchedResource>,
    #[serde(rename = "discoverCRDs")]
    pub discover_crds: bool,
    pub storage_path: PathBuf,
    pub retention_days: i64,
    pub server_port: u16,
    pub max_query_limit: usize,
}

/// One Kubernetes resource type to watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedResource {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    #[serde(default)]
    pub namespaced: bool,
}

impl WatchedResource {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        WatchedResource {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

impl Config {
    /// Load configuration from `path`, falling back to the built-in default
    /// when the file does not exist. Environment overrides (`BADGER_PATH`,
    /// `SERVER_PORT`) are applied last.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut config = if Path::new(path).exists() {
            let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
            let parsed: Config =
                serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
                    path: path.to_string(),
                    source,
                })?;
            tracing::info!("Loaded configuration from {path}");
            parsed.or_defaults()
        } else {
            tracing::info!("Config file {path} not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Zero or empty values in an explicit config file fall back to the
    /// defaults, so a partial document stays usable.
    fn or_defaults(mut self) -> Self {
        if self.retention_days <= 0 {
            self.retention_days = 14;
        }
        if self.server_port == 0 {
            self.server_port = 8080;
        }
        if self.max_query_limit == 0 {
            self.max_query_limit = 1000;
        }
        if self.storage_path.as_os_str().is_empty() {
            self.storage_path = PathBuf::from("/data/watch-events");
        }
        self
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("BADGER_PATH") {
            if !path.is_empty() {
                self.storage_path = PathBuf::from(path);
            }
        }
        if let Ok(port) = std::env::var("SERVER_PORT") {
            match port.parse() {
                Ok(parsed) => self.server_port = parsed,
                Err(e) => tracing::warn!("Ignoring invalid SERVER_PORT '{port}': {e}"),
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            discover_crds: true,
            storage_path: PathBuf::from("/data/watch-events"),
            retention_days: 14,
            server_port: 8080,
            max_query_limit: 1000,
            resources: default_resources(),
        }
    }
}

/// The common resource types watched when no config file is present.
fn default_resources() -> Vec<WatchedResource> {
    vec![
        WatchedResource::new("", "v1", "Pod", "pods", true),
        WatchedResource::new("", "v1", "Node", "nodes", false),
        WatchedResource::new("", "v1", "Service", "services", true),
        WatchedResource::new("", "v1", "ConfigMap", "configmaps", true),
        WatchedResource::new("", "v1", "Secret", "secrets", true),
        WatchedResource::new("", "v1", "PersistentVolumeClaim", "persistentvolumeclaims", true),
        WatchedResource::new("", "v1", "PersistentVolume", "persistentvolumes", false),
        WatchedResource::new("", "v1", "Event", "events", true),
        WatchedResource::new("", "v1", "Namespace", "namespaces", false),
        WatchedResource::new("apps", "v1", "Deployment", "deployments", true),
        WatchedResource::new("apps", "v1", "ReplicaSet", "replicasets", true),
        WatchedResource::new("apps", "v1", "StatefulSet", "statefulsets", true),
        WatchedResource::new("apps", "v1", "DaemonSet", "daemonsets", true),
        WatchedResource::new("batch", "v1", "Job", "jobs", true),
        WatchedResource::new("batch", "v1", "CronJob", "cronjobs", true),
        WatchedResource::new("networking.k8s.io", "v1", "Ingress", "ingresses", true),
        WatchedResource::new("networking.k8s.io", "v1", "NetworkPolicy", "networkpolicies", true),
    ]
}
