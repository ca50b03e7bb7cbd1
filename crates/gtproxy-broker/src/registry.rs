//! Extension registry:
//! - `extension id -> (interests, outbound link)`
//! - `interest kind -> clients`, sorted by priority (desc), ties in
//!   registration order.
//!
//! Not synchronized on its own; the broker keeps it behind the same lock as
//! its chains so registration and matching never interleave.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use gtproxy_core::protocol::frame::ExtFrame;
use gtproxy_core::protocol::{Direction, NetPacket, NetType};

use crate::interest::{Interest, InterestKey, InterestKind, Subject};

/// Extension identity (the name sent in its handshake).
pub type ExtensionId = Arc<str>;

/// Outbound queue of one extension.
pub type ExtensionLink = mpsc::Sender<ExtFrame>;

/// One connected subscriber, as handed to `register`.
#[derive(Debug, Clone)]
pub struct Extension {
    pub id: ExtensionId,
    pub interests: Vec<Interest>,
    pub link: ExtensionLink,
}

/// One `(extension, interest)` pair inside a bucket.
#[derive(Debug, Clone)]
pub struct Client {
    pub ext: ExtensionId,
    pub interest: Arc<Interest>,
    /// Registration order, used to break priority ties.
    pub seq: u64,
    /// Registration that owns this client.
    pub session: u64,
}

impl Client {
    pub fn priority(&self) -> i32 {
        self.interest.priority
    }

    pub fn key(&self) -> InterestKey {
        self.interest.key()
    }
}

#[derive(Debug)]
pub struct ExtensionEntry {
    pub session: u64,
    pub interests: Vec<Arc<Interest>>,
    pub link: ExtensionLink,
}

#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    extensions: HashMap<ExtensionId, ExtensionEntry>,
    buckets: HashMap<InterestKind, Vec<Client>>,
    seq: u64,
    sessions: u64,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension and return its session token. A duplicate id
    /// replaces the previous registration (its clients are removed first)
    /// and the replaced entry is returned alongside.
    pub fn register(&mut self, ext: Extension) -> (u64, Option<ExtensionEntry>) {
        let replaced = self.extensions.remove(&ext.id);
        if replaced.is_some() {
            tracing::warn!(ext = %ext.id, "extension already registered, replacing");
            self.remove_clients(&ext.id);
        }
        self.sessions += 1;
        let session = self.sessions;

        let mut interests = Vec::with_capacity(ext.interests.len());
        for interest in ext.interests {
            let interest = Arc::new(interest);
            self.seq += 1;
            let client = Client {
                ext: Arc::clone(&ext.id),
                interest: Arc::clone(&interest),
                seq: self.seq,
                session,
            };
            let bucket = self.buckets.entry(interest.kind).or_default();
            // Sorted descending: insert after every client of equal or higher priority.
            let at = bucket.partition_point(|c| c.priority() >= interest.priority);
            bucket.insert(at, client);
            interests.push(interest);
        }

        tracing::debug!(ext = %ext.id, session, interests = interests.len(), "extension registered");
        self.extensions.insert(
            ext.id,
            ExtensionEntry {
                session,
                interests,
                link: ext.link,
            },
        );
        (session, replaced)
    }

    /// Remove an extension and all its clients. Unknown ids are a no-op.
    pub fn unregister(&mut self, id: &str) -> Option<ExtensionEntry> {
        let Some(entry) = self.extensions.remove(id) else {
            tracing::warn!(ext = %id, "unregister of unknown extension");
            return None;
        };
        self.remove_clients(id);
        tracing::debug!(ext = %id, "extension unregistered");
        Some(entry)
    }

    /// Like `unregister`, but only while `session` is still the current
    /// registration of `id`. A session that was replaced must not remove
    /// its successor.
    pub fn unregister_session(&mut self, id: &str, session: u64) -> Option<ExtensionEntry> {
        if !self.is_current(id, session) {
            tracing::debug!(ext = %id, session, "stale session, registration kept");
            return None;
        }
        self.unregister(id)
    }

    /// Whether `session` is the live registration of `id`.
    pub fn is_current(&self, id: &str, session: u64) -> bool {
        self.extensions.get(id).is_some_and(|e| e.session == session)
    }

    fn remove_clients(&mut self, id: &str) {
        self.buckets.retain(|_, bucket| {
            bucket.retain(|c| &*c.ext != id);
            !bucket.is_empty()
        });
    }

    /// Clients interested in `packet` travelling `direction`, in dispatch
    /// order: priority descending, then registration order.
    ///
    /// A tank packet is offered to both the `Net(TankPacket)` bucket and the
    /// bucket of its sub-type.
    pub fn matches(&self, packet: &NetPacket, direction: Direction) -> Vec<Client> {
        let by_net = self.buckets.get(&InterestKind::Net(packet.ty));
        let by_tank = match packet.tank_type() {
            Some(t) if packet.ty == NetType::TankPacket => self.buckets.get(&InterestKind::Tank(t)),
            _ => None,
        };

        let subject = Subject::new(packet);
        let mut out: Vec<Client> = by_net
            .into_iter()
            .chain(by_tank)
            .flatten()
            .filter(|c| c.interest.accepts(&subject, direction))
            .cloned()
            .collect();
        out.sort_by_key(|c| (Reverse(c.priority()), c.seq));
        out
    }

    pub fn get(&self, id: &str) -> Option<&ExtensionEntry> {
        self.extensions.get(id)
    }

    pub fn link(&self, id: &str) -> Option<&ExtensionLink> {
        self.extensions.get(id).map(|e| &e.link)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.extensions.contains_key(id)
    }

    /// Number of registered extensions.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn extensions(&self) -> Vec<ExtensionId> {
        self.extensions.keys().cloned().collect()
    }

    pub fn bucket_len(&self, kind: InterestKind) -> usize {
        self.buckets.get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Clients of one bucket in stored order.
    pub fn bucket(&self, kind: InterestKind) -> &[Client] {
        self.buckets.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}
