//! Config loader (strict parsing).

pub mod schema;

use std::fs;

use crate::error::{EngineError, Result};

pub use schema::{Config, EngineSection, GatewaySection};

pub fn load_from_file(path: &str) -> Result<Config> {
    let s = fs::read_to_string(path)
        .map_err(|e| EngineError::Config(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<Config> {
    let cfg: Config = serde_yaml::from_str(s)
        .map_err(|e| EngineError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
