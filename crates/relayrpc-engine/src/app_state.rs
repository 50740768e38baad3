//! Shared application state for the gateway.
//!
//! One registry for the whole process; every connection gets its own engine
//! built on top of it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dispatch::MethodRegistry;
use crate::services;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: Config,
    registry: Arc<MethodRegistry>,
    shutdown: CancellationToken,
}

impl AppState {
    /// State with the built-in methods registered.
    pub fn new(cfg: Config) -> Self {
        let registry = MethodRegistry::new();
        services::register_builtin(&registry);
        Self::with_registry(cfg, Arc::new(registry))
    }

    pub fn with_registry(cfg: Config, registry: Arc<MethodRegistry>) -> Self {
        tracing::info!(methods = ?registry.methods(), "registry ready");
        Self {
            inner: Arc::new(AppStateInner {
                cfg,
                registry,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn cfg(&self) -> &Config {
        &self.inner.cfg
    }

    pub fn registry(&self) -> Arc<MethodRegistry> {
        Arc::clone(&self.inner.registry)
    }

    /// Parent token for every per-connection engine.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }
}
