use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::NsPlaneError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    pub store: StoreConfig,
    pub reconciler: ReconcilerConfig,
    pub security: SecurityConfig,
    pub clusters: Vec<ManagedClusterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub data_dir: PathBuf,
    /// Log names are `<topic_prefix>.<resource>`
    pub topic_prefix: String,
    /// Bound on the wait between append and observed apply
    pub write_timeout_ms: u64,
    /// Bound on the startup replay
    pub init_timeout_ms: u64,
    /// Long-poll wait of the apply loop when the log is idle
    pub poll_interval_ms: u64,
    pub max_poll_records: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub interval_ms: u64,
    pub initial_delay_ms: u64,
    /// Per-call bound on broker admin requests
    pub admin_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Members of this group get the admin role
    pub admin_group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedClusterConfig {
    pub name: String,
    #[serde(default)]
    pub bootstrap_servers: String,
    /// Whether this cluster participates in reconciliation
    #[serde(default)]
    pub manage_acls: bool,
    /// Whether reconciliation may delete unsynced bindings
    #[serde(default = "default_true")]
    pub drop_unsynced_acls: bool,
    /// Restrict the actual-state comparison to managed principals plus the wildcard
    #[serde(default = "default_true")]
    pub managed_users_only: bool,
    /// Overrides `reconciler.admin_timeout_ms` for this cluster
    #[serde(default)]
    pub admin_timeout_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            data_dir: PathBuf::from("./data/nsplane"),
            topic_prefix: "ns4kafka".to_string(),
            write_timeout_ms: 10_000,
            init_timeout_ms: 60_000,
            poll_interval_ms: 200,
            max_poll_records: 500,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            initial_delay_ms: 0,
            admin_timeout_ms: 10_000,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            admin_group: "_".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            store: StoreConfig::default(),
            reconciler: ReconcilerConfig::default(),
            security: SecurityConfig::default(),
            clusters: Vec::new(),
        }
    }
}

impl ManagedClusterConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bootstrap_servers: String::new(),
            manage_acls: true,
            drop_unsynced_acls: true,
            managed_users_only: true,
            admin_timeout_ms: None,
        }
    }

    pub fn admin_timeout(&self, reconciler: &ReconcilerConfig) -> Duration {
        Duration::from_millis(self.admin_timeout_ms.unwrap_or(reconciler.admin_timeout_ms))
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(NsPlaneError::InvalidConfig(
                "clusters.name cannot be empty".to_string(),
            ));
        }

        if self.admin_timeout_ms == Some(0) {
            return Err(NsPlaneError::InvalidConfig(format!(
                "clusters.{}.admin_timeout_ms must be greater than 0",
                self.name
            )));
        }

        Ok(())
    }
}

impl StoreConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn log_name(&self, resource: &str) -> String {
        format!("{}.{}", self.topic_prefix, resource)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.topic_prefix.trim().is_empty() {
            return Err(NsPlaneError::InvalidConfig(
                "store.topic_prefix cannot be empty".to_string(),
            ));
        }

        if self.write_timeout_ms == 0 {
            return Err(NsPlaneError::InvalidConfig(
                "store.write_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.init_timeout_ms == 0 {
            return Err(NsPlaneError::InvalidConfig(
                "store.init_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(NsPlaneError::InvalidConfig(
                "store.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.max_poll_records == 0 {
            return Err(NsPlaneError::InvalidConfig(
                "store.max_poll_records must be greater than 0".to_string(),
            ));
        }

        if self.backend == StoreBackend::File && self.data_dir.as_os_str().is_empty() {
            return Err(NsPlaneError::InvalidConfig(
                "store.data_dir cannot be empty with the file backend".to_string(),
            ));
        }

        Ok(())
    }
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.interval_ms == 0 {
            return Err(NsPlaneError::InvalidConfig(
                "reconciler.interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.admin_timeout_ms == 0 {
            return Err(NsPlaneError::InvalidConfig(
                "reconciler.admin_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl SecurityConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.admin_group.trim().is_empty() {
            return Err(NsPlaneError::InvalidConfig(
                "security.admin_group cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| NsPlaneError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Loads the TOML file and layers `NSPLANE__SECTION__FIELD` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::new(
                &path.to_string_lossy(),
                config::FileFormat::Toml,
            ))
            .add_source(
                config::Environment::with_prefix("NSPLANE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| NsPlaneError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| NsPlaneError::Config(e.to_string()))
    }

    pub fn cluster(&self, name: &str) -> Option<&ManagedClusterConfig> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.store.validate()?;
        self.reconciler.validate()?;
        self.security.validate()?;

        let mut seen = HashSet::new();
        for cluster in &self.clusters {
            cluster.validate()?;
            if !seen.insert(cluster.name.as_str()) {
                return Err(NsPlaneError::InvalidConfig(format!(
                    "clusters.{} is declared more than once",
                    cluster.name
                )));
            }
        }

        Ok(())
    }
}
