//! Broker config loader (strict parsing).

pub mod schema;

use std::fs;

use gtproxy_core::error::{ProxyError, Result};

pub use schema::{BrokerConfig, BrokerSection, ExtensionsSection, Fallback};

pub fn load_from_file(path: &str) -> Result<BrokerConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| ProxyError::Internal(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<BrokerConfig> {
    let cfg: BrokerConfig = serde_yaml::from_str(s)
        .map_err(|e| ProxyError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
