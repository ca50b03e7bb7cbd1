#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use gtproxy_broker::config::{self, Fallback};
use gtproxy_core::protocol::DecodeMode;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
broker:
  listen: "0.0.0.0:6712"
  chain_timeot_ms: 100 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "BAD_REQUEST");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.broker.listen, "127.0.0.1:6712");
    assert_eq!(cfg.broker.chain_timeout_ms, 5000);
    assert_eq!(cfg.broker.on_timeout, Fallback::Pass);
    assert_eq!(cfg.broker.on_disconnect, Fallback::Pass);
    assert_eq!(cfg.broker.decode_mode, DecodeMode::Relaxed);
    assert_eq!(cfg.extensions.ping_interval_ms, 20000);
}

#[test]
fn full_config_parses() {
    let ok = r#"
version: 1
broker:
  listen: "0.0.0.0:7000"
  chain_timeout_ms: 250
  on_timeout: cancel
  on_disconnect: pass
  decode_mode: strict
  outbound_queue: 64
  fire_and_forget_ttl_ms: 1000
extensions:
  ping_interval_ms: 5000
  idle_timeout_ms: 15000
  handshake_timeout_ms: 2000
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.broker.on_timeout, Fallback::Cancel);
    assert_eq!(cfg.broker.decode_mode, DecodeMode::Strict);
    assert_eq!(cfg.broker.outbound_queue, 64);
    assert_eq!(cfg.broker.chain_timeout().as_millis(), 250);
    assert_eq!(cfg.extensions.handshake_timeout_ms, 2000);
}

#[test]
fn unsupported_version_is_rejected() {
    let err = config::load_from_str("version: 2\n").expect_err("must fail");
    assert_eq!(err.code().as_str(), "UNSUPPORTED_VERSION");
}

#[test]
fn out_of_range_values_are_rejected() {
    for bad in [
        "version: 1\nbroker:\n  chain_timeout_ms: 5\n",
        "version: 1\nbroker:\n  outbound_queue: 0\n",
        "version: 1\nbroker:\n  chain_timeout_ms: 5000\n  fire_and_forget_ttl_ms: 100\n",
        "version: 1\nextensions:\n  ping_interval_ms: 30000\n  idle_timeout_ms: 20000\n",
        "version: 1\nbroker:\n  on_timeout: retry\n",
    ] {
        let err = config::load_from_str(bad).expect_err(bad);
        assert_eq!(err.code().as_str(), "BAD_REQUEST", "{bad}");
    }
}
