use std::time::Duration;

use serde::Deserialize;

use gtproxy_core::error::{ProxyError, Result};
use gtproxy_core::protocol::DecodeMode;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    pub version: u32,

    #[serde(default)]
    pub broker: BrokerSection,

    #[serde(default)]
    pub extensions: ExtensionsSection,
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(ProxyError::UnsupportedVersion);
        }

        self.broker.validate()?;
        self.extensions.validate()?;

        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            version: 1,
            broker: BrokerSection::default(),
            extensions: ExtensionsSection::default(),
        }
    }
}

/// Directive applied on behalf of a chain holder that timed out or vanished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    #[default]
    Pass,
    Cancel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Upper bound for a single extension to answer a blocking delivery.
    #[serde(default = "default_chain_timeout_ms")]
    pub chain_timeout_ms: u64,

    #[serde(default)]
    pub on_timeout: Fallback,

    #[serde(default)]
    pub on_disconnect: Fallback,

    #[serde(default)]
    pub decode_mode: DecodeMode,

    /// Capacity of each extension's outbound queue.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    #[serde(default = "default_fire_and_forget_ttl_ms")]
    pub fire_and_forget_ttl_ms: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            chain_timeout_ms: default_chain_timeout_ms(),
            on_timeout: Fallback::default(),
            on_disconnect: Fallback::default(),
            decode_mode: DecodeMode::default(),
            outbound_queue: default_outbound_queue(),
            fire_and_forget_ttl_ms: default_fire_and_forget_ttl_ms(),
        }
    }
}

impl BrokerSection {
    pub fn validate(&self) -> Result<()> {
        if !(10..=600_000).contains(&self.chain_timeout_ms) {
            return Err(ProxyError::BadRequest(
                "broker.chain_timeout_ms must be between 10 and 600000".into(),
            ));
        }
        if !(1..=65_536).contains(&self.outbound_queue) {
            return Err(ProxyError::BadRequest(
                "broker.outbound_queue must be between 1 and 65536".into(),
            ));
        }
        if self.fire_and_forget_ttl_ms < self.chain_timeout_ms {
            return Err(ProxyError::BadRequest(
                "broker.fire_and_forget_ttl_ms must not be less than chain_timeout_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn chain_timeout(&self) -> Duration {
        Duration::from_millis(self.chain_timeout_ms)
    }

    pub fn fire_and_forget_ttl(&self) -> Duration {
        Duration::from_millis(self.fire_and_forget_ttl_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionsSection {
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

impl Default for ExtensionsSection {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl ExtensionsSection {
    pub fn validate(&self) -> Result<()> {
        if !(5000..=120000).contains(&self.ping_interval_ms) {
            return Err(ProxyError::BadRequest(
                "extensions.ping_interval_ms must be between 5000 and 120000".into(),
            ));
        }
        if !(10000..=600000).contains(&self.idle_timeout_ms) {
            return Err(ProxyError::BadRequest(
                "extensions.idle_timeout_ms must be between 10000 and 600000".into(),
            ));
        }
        if self.idle_timeout_ms <= self.ping_interval_ms {
            return Err(ProxyError::BadRequest(
                "extensions.idle_timeout_ms must be greater than ping_interval_ms".into(),
            ));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ProxyError::BadRequest(
                "extensions.handshake_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "127.0.0.1:6712".into()
}
fn default_chain_timeout_ms() -> u64 {
    5000
}
fn default_outbound_queue() -> usize {
    1024
}
fn default_fire_and_forget_ttl_ms() -> u64 {
    30000
}
fn default_ping_interval_ms() -> u64 {
    20000
}
fn default_idle_timeout_ms() -> u64 {
    60000
}
fn default_handshake_timeout_ms() -> u64 {
    5000
}
