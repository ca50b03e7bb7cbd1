//! Shared application state for the broker endpoint.

use std::sync::Arc;

use crate::broker::{Broker, Injected};
use crate::config::BrokerConfig;
use crate::obs::BrokerMetrics;

#[derive(Clone)]
pub struct AppState {
    cfg: Arc<BrokerConfig>,
    broker: Arc<Broker>,
    metrics: Arc<BrokerMetrics>,
}

impl AppState {
    /// Build application state. Also returns the injection queue receiver,
    /// which the proxy's outbound path must drain.
    pub fn new(cfg: BrokerConfig) -> (Self, Injected) {
        let metrics = Arc::new(BrokerMetrics::default());
        let (broker, injected) = Broker::new(cfg.broker.clone(), Arc::clone(&metrics));
        let state = Self {
            cfg: Arc::new(cfg),
            broker: Arc::new(broker),
            metrics,
        };
        (state, injected)
    }

    pub fn cfg(&self) -> &BrokerConfig {
        &self.cfg
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn metrics(&self) -> &BrokerMetrics {
        &self.metrics
    }

    pub fn is_draining(&self) -> bool {
        self.metrics.is_draining()
    }

    pub fn set_draining(&self) {
        self.metrics.set_draining();
    }

    /// Point-in-time values rendered next to the counters.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("gtproxy_chains_active", self.broker.active_chains() as u64),
            ("gtproxy_extensions_registered", self.broker.extension_count() as u64),
            (
                "gtproxy_fire_and_forget_pending",
                self.broker.pending_fire_and_forget() as u64,
            ),
        ]
    }
}
