//! Worker-wide constants

/// Default configuration values
pub mod defaults {
    /// Bind host for the worker server
    pub const HOST: &str = "127.0.0.1";
    /// Bind port for the worker server
    pub const PORT: u16 = 63316;
    /// Name of the external evaluator binary looked up on PATH
    pub const EVALUATOR_BIN: &str = "flowmill-evaluator";
}

/// Polling and monitoring cadence
pub mod timeouts {
    /// Client poll interval against /status
    pub const POLL_INTERVAL_MS: u64 = 250;
    /// Server-side registry poll while streaming frames
    pub const STREAM_POLL_MS: u64 = 50;
    /// Child-process monitor interval
    pub const MONITOR_INTERVAL_MS: u64 = 100;
}

/// Environment variable names read by the worker binary
pub mod env {
    pub const HOST: &str = "FLOWMILL_WORKER_HOST";
    pub const PORT: &str = "FLOWMILL_WORKER_PORT";
    pub const CACHE_DIR: &str = "FLOWMILL_WORKER_CACHE_DIR";
    pub const EVALUATOR_BIN: &str = "FLOWMILL_WORKER_EVALUATOR";
}
