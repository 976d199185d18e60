use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for the job engine client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub gateway_address: String,
    pub plaintext: bool,
    pub cloud_region: Option<String>,
    pub cloud_cluster_id: Option<String>,
    pub cloud_client_id: Option<String>,
    pub cloud_client_secret: Option<String>,
    /// Size of the pool executing job handlers
    pub worker_threads: usize,
    pub max_jobs_active: usize,
    pub tenant_ids: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_address: "localhost:26500".to_string(),
            plaintext: true,
            cloud_region: None,
            cloud_cluster_id: None,
            cloud_client_id: None,
            cloud_client_secret: None,
            worker_threads: 1,
            max_jobs_active: 1,
            tenant_ids: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// A client id switches the client to cloud mode
    pub fn is_cloud(&self) -> bool {
        self.cloud_client_id.as_deref().map_or(false, |id| !id.trim().is_empty())
    }

    /// Returns the list of problems, empty when the configuration can be used
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.is_cloud() {
            let missing = |value: &Option<String>| value.as_deref().map_or(true, |v| v.trim().is_empty());
            if missing(&self.cloud_region) {
                errors.push("Missing region;".to_string());
            }
            if missing(&self.cloud_cluster_id) {
                errors.push("Missing clusterId;".to_string());
            }
            if missing(&self.cloud_client_id) {
                errors.push("Missing clientId;".to_string());
            }
            if missing(&self.cloud_client_secret) {
                errors.push("Missing clientSecret;".to_string());
            }
        }
        if self.worker_threads == 0 {
            errors.push("Worker threads must be at least 1;".to_string());
        }
        errors
    }

    /// Printable configuration, the secret is masked
    pub fn log_configuration(&self) -> String {
        if self.is_cloud() {
            let secret = self
                .cloud_client_secret
                .as_deref()
                .map(|s| format!("{}****", s.chars().take(3).collect::<String>()))
                .unwrap_or_default();
            format!(
                "Cloud ClientId[{}] ClientSecret[{}] ClusterId[{}] Region[{}] Threads[{}] MaxJobsActive[{}]",
                self.cloud_client_id.as_deref().unwrap_or_default(),
                secret,
                self.cloud_cluster_id.as_deref().unwrap_or_default(),
                self.cloud_region.as_deref().unwrap_or_default(),
                self.worker_threads,
                self.max_jobs_active
            )
        } else {
            format!(
                "Direct Address[{}] Plaintext[{}] Threads[{}] MaxJobsActive[{}]",
                self.gateway_address, self.plaintext, self.worker_threads, self.max_jobs_active
            )
        }
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub client: ClientConfig,
    /// Directory scanned for runner archives
    pub upload_path: Option<PathBuf>,
    /// Archive file extensions, comma separated
    pub archive_extension: String,
    /// Reload every archive even when it did not change
    pub force_refresh: bool,
    /// Start the runners shipped with the runtime
    pub start_framework_runners: bool,
    pub close_timeout_secs: u64,
    pub close_poll_interval_ms: u64,
    pub health_check_interval_secs: u64,
    pub event_buffer_size: usize,
    /// Secrets offered to connectors, the environment is looked up after them
    #[serde(skip_serializing)]
    pub secrets: HashMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            upload_path: None,
            archive_extension: "jar,so,dylib,dll".to_string(),
            force_refresh: false,
            start_framework_runners: true,
            close_timeout_secs: 60,
            close_poll_interval_ms: 100,
            health_check_interval_secs: 30,
            event_buffer_size: 1000,
            secrets: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with the `RELAY_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(address) = var("RELAY_GATEWAY_ADDRESS") {
            config.client.gateway_address = address;
        }
        if let Some(plaintext) = var("RELAY_PLAINTEXT").and_then(|v| v.parse().ok()) {
            config.client.plaintext = plaintext;
        }
        config.client.cloud_region = var("RELAY_CLOUD_REGION");
        config.client.cloud_cluster_id = var("RELAY_CLOUD_CLUSTER_ID");
        config.client.cloud_client_id = var("RELAY_CLOUD_CLIENT_ID");
        config.client.cloud_client_secret = var("RELAY_CLOUD_CLIENT_SECRET");
        if let Some(threads) = var("RELAY_WORKER_THREADS").and_then(|v| v.parse().ok()) {
            config.client.worker_threads = threads;
        }
        if let Some(max) = var("RELAY_MAX_JOBS_ACTIVE").and_then(|v| v.parse().ok()) {
            config.client.max_jobs_active = max;
        }
        if let Some(tenants) = var("RELAY_TENANT_IDS") {
            config.client.tenant_ids = tenants.split(',').map(|t| t.trim().to_string()).collect();
        }
        config.upload_path = var("RELAY_UPLOAD_PATH").map(PathBuf::from);
        if let Some(extension) = var("RELAY_ARCHIVE_EXTENSION") {
            config.archive_extension = extension;
        }
        if let Some(force) = var("RELAY_FORCE_REFRESH").and_then(|v| v.parse().ok()) {
            config.force_refresh = force;
        }
        if let Some(start) = var("RELAY_START_FRAMEWORK_RUNNERS").and_then(|v| v.parse().ok()) {
            config.start_framework_runners = start;
        }
        config
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn close_poll_interval(&self) -> Duration {
        Duration::from_millis(self.close_poll_interval_ms.max(1))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_address_needs_nothing() {
        assert!(ClientConfig::default().validate().is_empty());
    }

    #[test]
    fn cloud_requires_every_field() {
        let config = ClientConfig {
            cloud_client_id: Some("client".to_string()),
            cloud_region: Some("bru-2".to_string()),
            ..ClientConfig::default()
        };
        assert_eq!(
            config.validate(),
            vec!["Missing clusterId;".to_string(), "Missing clientSecret;".to_string()]
        );
    }

    #[test]
    fn secret_is_masked() {
        let config = ClientConfig {
            cloud_client_id: Some("client".to_string()),
            cloud_client_secret: Some("supersecret".to_string()),
            ..ClientConfig::default()
        };
        let line = config.log_configuration();
        assert!(line.contains("ClientSecret[sup****]"));
        assert!(!line.contains("supersecret"));
    }
}
