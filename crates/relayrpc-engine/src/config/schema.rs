use std::time::Duration;

use serde::Deserialize;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub version: u32,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub gateway: GatewaySection,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(EngineError::Config(format!(
                "unsupported config version: {}",
                self.version
            )));
        }

        self.engine.validate()?;
        self.gateway.validate()?;

        Ok(())
    }
}

/// One day; caps every engine duration.
const MAX_DURATION_MS: u64 = 86_400_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Ingestion queue capacity; producers wait when it is full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Handler worker count (caps concurrent handler execution).
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_job_queue_capacity")]
    pub job_queue_capacity: usize,

    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Pending-call TTL; must not be shorter than the call timeout.
    #[serde(default = "default_pending_ttl_ms")]
    pub pending_ttl_ms: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Emit `"jsonrpc": "2.0"` on every outbound envelope.
    #[serde(default)]
    pub jsonrpc_compat: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            job_queue_capacity: default_job_queue_capacity(),
            call_timeout_ms: default_call_timeout_ms(),
            pending_ttl_ms: default_pending_ttl_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            jsonrpc_compat: false,
        }
    }
}

impl EngineSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=1_000_000).contains(&self.queue_capacity) {
            return Err(EngineError::Config(
                "engine.queue_capacity must be between 1 and 1000000".into(),
            ));
        }
        if !(1..=4096).contains(&self.workers) {
            return Err(EngineError::Config(
                "engine.workers must be between 1 and 4096".into(),
            ));
        }
        if self.job_queue_capacity == 0 {
            return Err(EngineError::Config(
                "engine.job_queue_capacity must be at least 1".into(),
            ));
        }
        if !(1..=MAX_DURATION_MS).contains(&self.call_timeout_ms) {
            return Err(EngineError::Config(format!(
                "engine.call_timeout_ms must be between 1 and {MAX_DURATION_MS}"
            )));
        }
        if self.pending_ttl_ms > MAX_DURATION_MS {
            return Err(EngineError::Config(format!(
                "engine.pending_ttl_ms must be at most {MAX_DURATION_MS}"
            )));
        }
        if self.pending_ttl_ms < self.call_timeout_ms {
            return Err(EngineError::Config(
                "engine.pending_ttl_ms must not be shorter than call_timeout_ms".into(),
            ));
        }
        if !(10..=60000).contains(&self.sweep_interval_ms) {
            return Err(EngineError::Config(
                "engine.sweep_interval_ms must be between 10 and 60000".into(),
            ));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_millis(self.pending_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn default_queue_capacity() -> usize {
    2000
}
fn default_workers() -> usize {
    64
}
fn default_job_queue_capacity() -> usize {
    1024
}
fn default_call_timeout_ms() -> u64 {
    10000
}
fn default_pending_ttl_ms() -> u64 {
    11000
}
fn default_sweep_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        if !(5000..=120000).contains(&self.ping_interval_ms) {
            return Err(EngineError::Config(
                "gateway.ping_interval_ms must be between 5000 and 120000".into(),
            ));
        }
        if !(10000..=600000).contains(&self.idle_timeout_ms) {
            return Err(EngineError::Config(
                "gateway.idle_timeout_ms must be between 10000 and 600000".into(),
            ));
        }
        if self.idle_timeout_ms <= self.ping_interval_ms {
            return Err(EngineError::Config(
                "gateway.idle_timeout_ms must be greater than ping_interval_ms".into(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(EngineError::Config(
                "gateway.max_frame_bytes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_ping_interval_ms() -> u64 {
    20000
}
fn default_idle_timeout_ms() -> u64 {
    60000
}
fn default_max_frame_bytes() -> usize {
    65536
}
