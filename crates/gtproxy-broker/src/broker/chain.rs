//! Chain state machine.
//!
//! A chain carries one blocking packet through every matching client, one
//! holder at a time. `advance` is a pure transition: it takes the holder's
//! directive and the current registry and says what happens next. Sending,
//! timers and completion live in the broker.

use std::collections::HashSet;

use bytes::Bytes;

use gtproxy_core::protocol::{DecodeMode, Direction, NetPacket};

use crate::interest::InterestKey;
use crate::registry::{Client, ExtensionId, ExtensionRegistry};

/// What a chain holder decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Continue with a replacement packet. A direction other than
    /// `Unspecified` also redirects the packet.
    Forward { packet: Bytes, direction: Direction },
    /// Continue with the current packet.
    Pass,
    /// Stop visiting clients and send this packet.
    Finish { packet: Bytes, direction: Direction },
    /// Drop the packet.
    Cancel,
}

impl Directive {
    pub fn forward(packet: impl Into<Bytes>) -> Self {
        Directive::Forward {
            packet: packet.into(),
            direction: Direction::Unspecified,
        }
    }

    pub fn finish(packet: impl Into<Bytes>) -> Self {
        Directive::Finish {
            packet: packet.into(),
            direction: Direction::Unspecified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Directive::Forward { .. } => "forward",
            Directive::Pass => "pass",
            Directive::Finish { .. } => "finish",
            Directive::Cancel => "cancel",
        }
    }
}

/// Result of one transition.
#[derive(Debug, Clone)]
pub enum Step {
    /// Deliver the current packet to this client; it is now the holder.
    Dispatch(Client),
    /// No client left: send the current packet.
    Finished,
    /// Drop the packet.
    Cancelled,
}

#[derive(Debug)]
pub struct Chain {
    pub id: u64,
    /// Current packet, encoded.
    pub bytes: Bytes,
    /// Current packet, decoded; matching runs against this shape.
    pub packet: NetPacket,
    pub direction: Direction,
    pub flags: u32,
    /// Directives applied so far (one per visited client).
    pub hit_count: u32,
    holder: Option<Client>,
    visited: HashSet<(ExtensionId, InterestKey)>,
}

impl Chain {
    pub fn new(id: u64, bytes: Bytes, packet: NetPacket, direction: Direction, flags: u32) -> Self {
        Self {
            id,
            bytes,
            packet,
            direction,
            flags,
            hit_count: 0,
            holder: None,
            visited: HashSet::new(),
        }
    }

    pub fn holder(&self) -> Option<&Client> {
        self.holder.as_ref()
    }

    pub fn visited(&self, client: &Client) -> bool {
        self.visited
            .contains(&(client.ext.clone(), client.key()))
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    /// Take the first candidate not yet visited and make it the holder.
    pub fn next_from(&mut self, candidates: impl IntoIterator<Item = Client>) -> Step {
        for client in candidates {
            if !client.interest.is_blocking() {
                continue;
            }
            if self.visited.insert((client.ext.clone(), client.key())) {
                self.holder = Some(client.clone());
                return Step::Dispatch(client);
            }
        }
        self.holder = None;
        Step::Finished
    }

    /// Swap in a replacement packet if it decodes. An undecodable one is
    /// logged and ignored together with its direction.
    fn replace(&mut self, packet: Bytes, direction: Direction, mode: DecodeMode, on_error: &str) {
        match NetPacket::decode(&packet, mode) {
            Ok(decoded) => {
                self.bytes = packet;
                self.packet = decoded;
                if direction != Direction::Unspecified {
                    self.direction = direction;
                }
            }
            Err(e) => {
                tracing::warn!(chain = self.id, layer = e.layer().as_str(), error = %e, "{on_error}");
            }
        }
    }

    /// Apply the holder's directive.
    ///
    /// A Forward or Finish replacement that does not decode leaves the
    /// current packet in place.
    ///
    /// Forward and Pass rebuild the candidate list from scratch against the
    /// (possibly replaced) packet, so a replacement of another kind reaches
    /// that kind's subscribers. Visited clients are never offered twice.
    pub fn advance(
        &mut self,
        directive: Directive,
        registry: &ExtensionRegistry,
        mode: DecodeMode,
    ) -> Step {
        self.hit_count = self.hit_count.saturating_add(1);
        match directive {
            Directive::Forward { packet, direction } => {
                self.replace(packet, direction, mode, "forwarded packet does not decode, treating as pass");
                self.next_from(registry.matches(&self.packet, self.direction))
            }
            Directive::Pass => self.next_from(registry.matches(&self.packet, self.direction)),
            Directive::Finish { packet, direction } => {
                self.replace(packet, direction, mode, "finished packet does not decode, keeping the current one");
                self.holder = None;
                Step::Finished
            }
            Directive::Cancel => {
                self.holder = None;
                Step::Cancelled
            }
        }
    }
}
