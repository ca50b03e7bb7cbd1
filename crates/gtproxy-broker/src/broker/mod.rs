//! Broker: matches packets against interests and runs interception chains.
//!
//! Locking rules:
//! - Registry, chains and fire-and-forget correlations share one `Mutex`.
//! - The lock is never held across an `.await`; extension links are fed with
//!   `try_send` only.
//! - The only suspension point is `process` waiting on its chain's oneshot.

pub mod chain;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use gtproxy_core::error::{ProxyError, Result};
use gtproxy_core::protocol::frame::{ExtFrame, FrameOp};
use gtproxy_core::protocol::{Direction, NetPacket};

use crate::config::{BrokerSection, Fallback};
use crate::obs::BrokerMetrics;
use crate::registry::{Client, Extension, ExtensionId, ExtensionRegistry};

pub use chain::{Chain, Directive, Step};

/// A packet in flight between the broker and its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPacket {
    pub packet_id: u64,
    pub bytes: Bytes,
    pub direction: Direction,
    /// Opaque transport flags, carried through unchanged.
    pub flags: u32,
    /// Extensions that handled the packet.
    pub hit_count: u32,
}

/// How a processed packet leaves the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// No blocking interest matched; send the original packet.
    Passthrough,
    /// Send this (possibly modified) packet.
    Forward(PendingPacket),
    /// Do not send anything.
    Cancelled(PendingPacket),
}

impl ChainOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainOutcome::Passthrough => "passthrough",
            ChainOutcome::Forward(_) => "forward",
            ChainOutcome::Cancelled(_) => "cancelled",
        }
    }
}

/// An extension's answer to a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub packet_id: u64,
    /// Interest the answered delivery was made for; identifies the hop.
    pub interest_id: u32,
    pub directive: Directive,
}

impl Response {
    /// Build from a disposition frame. `Deliver` and `Push` are not answers.
    pub fn from_frame(frame: ExtFrame) -> Result<Self> {
        let directive = match frame.op {
            FrameOp::Forward => Directive::Forward {
                packet: frame.packet,
                direction: frame.direction,
            },
            FrameOp::Pass => Directive::Pass,
            FrameOp::Finish => Directive::Finish {
                packet: frame.packet,
                direction: frame.direction,
            },
            FrameOp::Cancel => Directive::Cancel,
            FrameOp::Deliver | FrameOp::Push => {
                return Err(ProxyError::BadRequest(format!(
                    "{} is not a disposition",
                    frame.op.as_str()
                )))
            }
        };
        Ok(Self {
            packet_id: frame.packet_id,
            interest_id: frame.interest_id,
            directive,
        })
    }
}

/// Receiving side of the injection queue: packets pushed by extensions or
/// returned by fire-and-forget subscribers, to be sent outside any chain.
pub type Injected = mpsc::Receiver<PendingPacket>;

struct ChainEntry {
    chain: Chain,
    done: Option<oneshot::Sender<ChainOutcome>>,
    started: Instant,
    hop_started: Instant,
}

struct FireAndForget {
    ext: ExtensionId,
    session: u64,
    interest_id: u32,
    direction: Direction,
    flags: u32,
    created: Instant,
}

#[derive(Default)]
struct BrokerState {
    registry: ExtensionRegistry,
    chains: HashMap<u64, ChainEntry>,
    fire_and_forget: HashMap<u64, FireAndForget>,
}

pub struct Broker {
    state: Mutex<BrokerState>,
    next_id: AtomicU64,
    cfg: BrokerSection,
    metrics: Arc<BrokerMetrics>,
    inject_tx: mpsc::Sender<PendingPacket>,
}

impl Broker {
    /// Build a broker and the receiving end of its injection queue.
    pub fn new(cfg: BrokerSection, metrics: Arc<BrokerMetrics>) -> (Self, Injected) {
        let (inject_tx, inject_rx) = mpsc::channel(cfg.outbound_queue);
        let broker = Self {
            state: Mutex::new(BrokerState::default()),
            next_id: AtomicU64::new(1),
            cfg,
            metrics,
            inject_tx,
        };
        (broker, inject_rx)
    }

    pub fn cfg(&self) -> &BrokerSection {
        &self.cfg
    }

    pub fn metrics(&self) -> &Arc<BrokerMetrics> {
        &self.metrics
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // --------------------
    // Registration
    // --------------------

    /// Register an extension and return its session token. Replacing a
    /// live registration releases everything the old session held.
    pub fn register(&self, ext: Extension) -> u64 {
        let mut st = self.lock();
        let id = Arc::clone(&ext.id);
        let (session, replaced) = st.registry.register(ext);
        match replaced {
            Some(old) => self.release(&mut st, &id, old.session),
            None => self.metrics.extensions_connected.inc(&[]),
        }
        session
    }

    /// Remove an extension whatever its session. Chains it holds continue
    /// with the disconnect fallback; its fire-and-forget correlations are
    /// dropped.
    pub fn unregister(&self, id: &str) {
        let mut st = self.lock();
        if let Some(entry) = st.registry.unregister(id) {
            self.metrics.extensions_connected.dec(&[]);
            self.release(&mut st, id, entry.session);
        }
    }

    /// Remove an extension only if `session` is still its registration.
    /// A session that was replaced by a newer one leaves it alone.
    pub fn unregister_session(&self, id: &str, session: u64) {
        let mut st = self.lock();
        if let Some(entry) = st.registry.unregister_session(id, session) {
            self.metrics.extensions_connected.dec(&[]);
            self.release(&mut st, id, entry.session);
        }
    }

    pub fn is_current(&self, id: &str, session: u64) -> bool {
        self.lock().registry.is_current(id, session)
    }

    pub fn extension_count(&self) -> usize {
        self.lock().registry.len()
    }

    pub fn active_chains(&self) -> usize {
        self.lock().chains.len()
    }

    pub fn pending_fire_and_forget(&self) -> usize {
        self.lock().fire_and_forget.len()
    }

    // --------------------
    // Packet path
    // --------------------

    /// Run one packet through the interested extensions.
    ///
    /// Returns once every blocking client has answered (or been skipped by a
    /// fallback). A packet that does not decode is reported as an error and
    /// must be dropped by the caller; nothing else is affected.
    pub async fn process(&self, bytes: Bytes, direction: Direction, flags: u32) -> Result<ChainOutcome> {
        let packet = match NetPacket::decode(&bytes, self.cfg.decode_mode) {
            Ok(p) => p,
            Err(e) => {
                let layer = e.layer().as_str();
                self.metrics.decode_errors.inc(&[("layer", layer)]);
                tracing::warn!(layer, len = bytes.len(), error = %e, "dropping undecodable packet");
                return Err(e.into());
            }
        };

        let (chain_id, mut done_rx) = {
            let mut st = self.lock();
            let clients = st.registry.matches(&packet, direction);
            let (blocking, observers): (Vec<Client>, Vec<Client>) =
                clients.into_iter().partition(|c| c.interest.is_blocking());

            for client in observers {
                self.notify(&mut st, &client, &bytes, direction, flags);
            }

            if blocking.is_empty() {
                return Ok(ChainOutcome::Passthrough);
            }

            let chain_id = self.next_id();
            let (done_tx, done_rx) = oneshot::channel();
            let mut chain = Chain::new(chain_id, bytes, packet, direction, flags);
            let step = chain.next_from(blocking);
            let now = Instant::now();
            st.chains.insert(
                chain_id,
                ChainEntry {
                    chain,
                    done: Some(done_tx),
                    started: now,
                    hop_started: now,
                },
            );
            self.metrics.chains_started.inc(&[]);
            tracing::debug!(chain = chain_id, packet_type = %packet_type(&st, chain_id), "chain started");
            self.drive(&mut st, chain_id, step);
            (chain_id, done_rx)
        };

        let hop_timeout = self.cfg.chain_timeout();
        loop {
            let hop_started = self.lock().chains.get(&chain_id).map(|e| e.hop_started);
            // None: already resolved, the outcome is waiting in the channel.
            let deadline = hop_started.unwrap_or_else(Instant::now) + hop_timeout;
            match tokio::time::timeout_at(deadline, &mut done_rx).await {
                Ok(Ok(outcome)) => return Ok(outcome),
                Ok(Err(_)) => {
                    return Err(ProxyError::Internal(format!(
                        "chain {chain_id} dropped without an outcome"
                    )))
                }
                Err(_) => self.expire_hop(chain_id, hop_timeout),
            }
        }
    }

    /// Apply the timeout fallback if the current hop really is overdue.
    fn expire_hop(&self, chain_id: u64, hop_timeout: Duration) {
        let mut st = self.lock();
        let Some(entry) = st.chains.get(&chain_id) else {
            return;
        };
        if entry.hop_started.elapsed() < hop_timeout {
            return;
        }
        let holder = entry
            .chain
            .holder()
            .map(|h| h.ext.to_string())
            .unwrap_or_default();
        tracing::error!(
            chain = chain_id,
            ext = %holder,
            timeout_ms = self.cfg.chain_timeout_ms,
            fallback = ?self.cfg.on_timeout,
            "chain holder timed out"
        );
        self.metrics.hop_timeouts.inc(&[]);
        self.apply(&mut st, chain_id, fallback_directive(self.cfg.on_timeout));
    }

    /// Accept an extension's answer to a delivery.
    pub fn respond(&self, ext: &str, resp: Response) -> Result<()> {
        let mut st = self.lock();

        if let Some(entry) = st.chains.get(&resp.packet_id) {
            let holder = entry.chain.holder();
            if !holder.is_some_and(|h| &*h.ext == ext) {
                self.metrics.rejected_directives.inc(&[("reason", "not_holder")]);
                return Err(ProxyError::NotChainHolder {
                    ext: ext.to_string(),
                    chain: resp.packet_id,
                });
            }
            // Same extension, earlier hop: the answer arrived after a fallback.
            if !holder.is_some_and(|h| h.interest.id == resp.interest_id) {
                self.metrics.rejected_directives.inc(&[("reason", "stale_hop")]);
                tracing::debug!(ext, chain = resp.packet_id, interest = resp.interest_id, "answer for an earlier hop");
                return Err(ProxyError::NotChainHolder {
                    ext: ext.to_string(),
                    chain: resp.packet_id,
                });
            }
            self.metrics.directives.inc(&[("op", resp.directive.as_str())]);
            tracing::debug!(ext, chain = resp.packet_id, op = resp.directive.as_str(), "directive");
            self.apply(&mut st, resp.packet_id, resp.directive);
            return Ok(());
        }

        if let Some(entry) = st.fire_and_forget.get(&resp.packet_id) {
            if &*entry.ext != ext || entry.interest_id != resp.interest_id {
                self.metrics.rejected_directives.inc(&[("reason", "not_holder")]);
                return Err(ProxyError::NotChainHolder {
                    ext: ext.to_string(),
                    chain: resp.packet_id,
                });
            }
            let Some(entry) = st.fire_and_forget.remove(&resp.packet_id) else {
                return Err(ProxyError::UnknownChain(resp.packet_id));
            };
            self.metrics.directives.inc(&[("op", resp.directive.as_str())]);
            match resp.directive {
                Directive::Forward { packet, direction } | Directive::Finish { packet, direction } => {
                    let direction = if direction == Direction::Unspecified {
                        entry.direction
                    } else {
                        direction
                    };
                    self.enqueue_injection(packet, direction, entry.flags, "fire_and_forget")?;
                }
                Directive::Pass | Directive::Cancel => {}
            }
            return Ok(());
        }

        self.metrics.rejected_directives.inc(&[("reason", "unknown_chain")]);
        Err(ProxyError::UnknownChain(resp.packet_id))
    }

    /// Push a packet into the outbound path outside any chain.
    pub fn inject(&self, bytes: Bytes, direction: Direction, flags: u32) -> Result<()> {
        if let Err(e) = NetPacket::decode(&bytes, self.cfg.decode_mode) {
            self.metrics.decode_errors.inc(&[("layer", e.layer().as_str())]);
            return Err(e.into());
        }
        self.enqueue_injection(bytes, direction, flags, "push")
    }

    fn enqueue_injection(&self, bytes: Bytes, direction: Direction, flags: u32, source: &str) -> Result<()> {
        let pending = PendingPacket {
            packet_id: self.next_id(),
            bytes,
            direction,
            flags,
            hit_count: 0,
        };
        self.inject_tx
            .try_send(pending)
            .map_err(|_| ProxyError::Internal("injection queue full or closed".into()))?;
        self.metrics.injected_packets.inc(&[("source", source)]);
        Ok(())
    }

    /// Housekeeping, run periodically by the endpoint:
    /// - fire-and-forget correlations older than the TTL are dropped;
    /// - chains whose caller went away are dropped;
    /// - overdue hops get the timeout fallback even with nobody awaiting.
    ///
    /// Returns how many entries were removed.
    pub fn sweep_expired(&self) -> usize {
        let ttl = self.cfg.fire_and_forget_ttl();
        let hop_timeout = self.cfg.chain_timeout();
        let mut st = self.lock();

        let before = st.fire_and_forget.len();
        st.fire_and_forget.retain(|_, f| f.created.elapsed() < ttl);
        let mut removed = before - st.fire_and_forget.len();
        if removed > 0 {
            tracing::debug!(removed, "expired fire-and-forget entries");
        }

        let abandoned: Vec<u64> = st
            .chains
            .iter()
            .filter(|(_, e)| e.done.as_ref().map_or(true, |d| d.is_closed()))
            .map(|(chain_id, _)| *chain_id)
            .collect();
        for chain_id in abandoned {
            st.chains.remove(&chain_id);
            tracing::warn!(chain = chain_id, "chain abandoned by its caller, dropped");
            self.metrics.chain_outcomes.inc(&[("outcome", "abandoned")]);
            removed += 1;
        }

        let overdue: Vec<u64> = st
            .chains
            .iter()
            .filter(|(_, e)| e.hop_started.elapsed() >= hop_timeout)
            .map(|(chain_id, _)| *chain_id)
            .collect();
        drop(st);
        for chain_id in overdue {
            self.expire_hop(chain_id, hop_timeout);
        }
        removed
    }

    // --------------------
    // Internals (lock held)
    // --------------------

    /// Release what one session of `id` held: its fire-and-forget
    /// correlations and the chain positions it occupies.
    fn release(&self, st: &mut BrokerState, id: &str, session: u64) {
        st.fire_and_forget
            .retain(|_, f| !(&*f.ext == id && f.session == session));

        let held: Vec<u64> = st
            .chains
            .iter()
            .filter(|(_, e)| {
                e.chain
                    .holder()
                    .is_some_and(|h| &*h.ext == id && h.session == session)
            })
            .map(|(chain_id, _)| *chain_id)
            .collect();
        for chain_id in held {
            tracing::warn!(ext = %id, session, chain = chain_id, "chain holder disconnected");
            self.metrics.disconnect_fallbacks.inc(&[]);
            let directive = fallback_directive(self.cfg.on_disconnect);
            self.apply(st, chain_id, directive);
        }
    }

    fn notify(&self, st: &mut BrokerState, client: &Client, bytes: &Bytes, direction: Direction, flags: u32) {
        let Some(link) = st.registry.link(&client.ext) else {
            return;
        };
        let packet_id = self.next_id();
        let frame = ExtFrame {
            op: FrameOp::Deliver,
            direction,
            packet_id,
            interest_id: client.interest.id,
            hit_count: 0,
            packet_flags: flags,
            packet: bytes.clone(),
        };
        if link.try_send(frame).is_err() {
            tracing::warn!(ext = %client.ext, "fire-and-forget delivery dropped, queue full or closed");
            return;
        }
        st.fire_and_forget.insert(
            packet_id,
            FireAndForget {
                ext: Arc::clone(&client.ext),
                session: client.session,
                interest_id: client.interest.id,
                direction,
                flags,
                created: Instant::now(),
            },
        );
        self.metrics.fire_and_forget_deliveries.inc(&[]);
    }

    fn apply(&self, st: &mut BrokerState, chain_id: u64, directive: Directive) {
        let mode = self.cfg.decode_mode;
        let BrokerState { registry, chains, .. } = &mut *st;
        let Some(entry) = chains.get_mut(&chain_id) else {
            return;
        };
        let step = entry.chain.advance(directive, registry, mode);
        self.drive(st, chain_id, step);
    }

    /// Carry a chain forward until it waits on a holder or ends.
    fn drive(&self, st: &mut BrokerState, chain_id: u64, mut step: Step) {
        loop {
            match step {
                Step::Dispatch(client) => {
                    let BrokerState { registry, chains, .. } = &mut *st;
                    let Some(entry) = chains.get_mut(&chain_id) else {
                        return;
                    };
                    let frame = ExtFrame {
                        op: FrameOp::Deliver,
                        direction: entry.chain.direction,
                        packet_id: chain_id,
                        interest_id: client.interest.id,
                        hit_count: entry.chain.hit_count,
                        packet_flags: entry.chain.flags,
                        packet: entry.chain.bytes.clone(),
                    };
                    let sent = registry
                        .link(&client.ext)
                        .is_some_and(|link| link.try_send(frame).is_ok());
                    if sent {
                        entry.hop_started = Instant::now();
                        return;
                    }
                    tracing::warn!(ext = %client.ext, chain = chain_id, "delivery failed, applying disconnect fallback");
                    self.metrics.disconnect_fallbacks.inc(&[]);
                    let directive = fallback_directive(self.cfg.on_disconnect);
                    step = entry.chain.advance(directive, registry, self.cfg.decode_mode);
                }
                Step::Finished | Step::Cancelled => {
                    let Some(mut entry) = st.chains.remove(&chain_id) else {
                        return;
                    };
                    let chain = &entry.chain;
                    let pending = PendingPacket {
                        packet_id: chain_id,
                        bytes: chain.bytes.clone(),
                        direction: chain.direction,
                        flags: chain.flags,
                        hit_count: chain.hit_count,
                    };
                    let outcome = match step {
                        Step::Cancelled => ChainOutcome::Cancelled(pending),
                        _ => ChainOutcome::Forward(pending),
                    };
                    self.metrics.chain_outcomes.inc(&[("outcome", outcome.as_str())]);
                    self.metrics.chain_duration.observe(&[], entry.started.elapsed());
                    tracing::debug!(chain = chain_id, outcome = outcome.as_str(), hits = chain.hit_count, "chain finished");
                    if let Some(done) = entry.done.take() {
                        let _ = done.send(outcome);
                    }
                    return;
                }
            }
        }
    }
}

fn fallback_directive(fallback: Fallback) -> Directive {
    match fallback {
        Fallback::Pass => Directive::Pass,
        Fallback::Cancel => Directive::Cancel,
    }
}

fn packet_type(st: &BrokerState, chain_id: u64) -> String {
    st.chains
        .get(&chain_id)
        .map(|e| match e.chain.packet.tank_type() {
            Some(t) => format!("{}/{}", e.chain.packet.ty, t),
            None => e.chain.packet.ty.to_string(),
        })
        .unwrap_or_default()
}
