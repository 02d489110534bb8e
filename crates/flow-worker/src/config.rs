//! Configuration for the worker server

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{defaults, env};

/// Worker server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Directory for task payloads and materialized results
    pub cache_dir: PathBuf,
    /// Explicit path to the evaluator binary; discovered on PATH if unset
    pub evaluator_bin: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: defaults::HOST.to_string(),
            port: defaults::PORT,
            cache_dir: std::env::temp_dir().join("flowmill-worker"),
            evaluator_bin: None,
        }
    }
}

impl WorkerConfig {
    /// Build a config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var(env::HOST) {
            config.host = host;
        }
        if let Some(port) = std::env::var(env::PORT).ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        if let Ok(dir) = std::env::var(env::CACHE_DIR) {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(bin) = std::env::var(env::EVALUATOR_BIN) {
            config.evaluator_bin = Some(PathBuf::from(bin));
        }
        config
    }

    /// Socket address string for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
