//! Operator configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Operator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    /// Namespace of the VerticaDB to reconcile
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Name of the VerticaDB to reconcile
    #[serde(default = "default_vdb_name")]
    pub vdb_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Delay before a round that asked to be requeued runs again
    #[serde(default = "default_requeue_interval")]
    pub requeue_interval_secs: u64,

    /// Deadline for one reconcile round
    #[serde(default = "default_pass_timeout")]
    pub pass_timeout_secs: u64,

    /// Restart nodes that lost quorum and went read-only
    #[serde(default = "default_restart_read_only")]
    pub restart_read_only: bool,
}

fn default_namespace() -> String {
    std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

fn default_vdb_name() -> String {
    "verticadb".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_requeue_interval() -> u64 {
    10
}

fn default_pass_timeout() -> u64 {
    1800
}

fn default_restart_read_only() -> bool {
    true
}

impl OperatorConfig {
    /// Load configuration from environment and an optional config file
    pub fn load() -> Result<Self> {
        let file = std::env::var("VDB_OPERATOR_CONFIG").ok();
        Self::load_from(file.as_deref())
    }

    pub fn load_from(file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("VDB_OPERATOR"))
            .build()
            .context("failed to read operator configuration")?;

        config
            .try_deserialize()
            .context("invalid operator configuration")
    }

    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }
}
