//! Interests: what an extension wants to see, and how urgently.
//!
//! Interests arrive as JSON in the capability response and are compiled once
//! at registration. Nothing here touches the network.

pub mod predicate;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use gtproxy_core::error::{ProxyError, Result};
use gtproxy_core::protocol::{Direction, NetType, TankType};

pub use predicate::{Clause, ColSelector, Field, Literal, Op, RowSelector, Subject, TankField};

/// Which packets an interest listens to.
///
/// `Net(TankPacket)` selects every tank packet; `Tank(t)` only sub-type `t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestKind {
    Net(NetType),
    Tank(TankType),
}

impl fmt::Display for InterestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterestKind::Net(t) => write!(f, "net:{t}"),
            InterestKind::Tank(t) => write!(f, "tank:{t}"),
        }
    }
}

/// Whether matching packets wait for the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingMode {
    /// The packet is held until the extension answers.
    #[default]
    Block,
    /// The extension gets a copy; the packet continues immediately.
    SendAndForget,
}

/// One declarative subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Interest {
    /// Correlation id chosen by the extension, echoed in deliveries.
    pub id: u32,
    pub kind: InterestKind,
    /// Higher runs first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub blocking: BlockingMode,
    #[serde(default)]
    pub direction: Direction,
    /// Clauses, all of which must hold.
    #[serde(default)]
    pub predicate: Vec<Clause>,
}

/// Hashable identity of an interest, used to remember who already saw a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterestKey {
    pub kind: InterestKind,
    pub priority: i32,
    pub blocking: BlockingMode,
    pub direction: Direction,
    pub id: u32,
}

impl Interest {
    pub fn new(id: u32, kind: InterestKind) -> Self {
        Self {
            id,
            kind,
            priority: 0,
            blocking: BlockingMode::Block,
            direction: Direction::Unspecified,
            predicate: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_blocking(mut self, blocking: BlockingMode) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_clause(mut self, clause: Clause) -> Self {
        self.predicate.push(clause);
        self
    }

    pub fn key(&self) -> InterestKey {
        InterestKey {
            kind: self.kind,
            priority: self.priority,
            blocking: self.blocking,
            direction: self.direction,
            id: self.id,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking == BlockingMode::Block
    }

    /// Direction filter plus every predicate clause.
    pub fn accepts(&self, subject: &Subject<'_>, direction: Direction) -> bool {
        self.direction.accepts(direction) && self.predicate.iter().all(|c| c.eval(subject))
    }

    /// Reject clause shapes that could never be true.
    pub fn validate(&self) -> Result<()> {
        for clause in &self.predicate {
            clause.validate().map_err(|msg| {
                ProxyError::BadRequest(format!("interest {}: {msg}", self.id))
            })?;
        }
        Ok(())
    }
}

/// Compile the `interests` array of a capability response.
pub fn compile_interests(raw: serde_json::Value) -> Result<Vec<Interest>> {
    let interests: Vec<Interest> = serde_json::from_value(raw)
        .map_err(|e| ProxyError::BadRequest(format!("invalid interests: {e}")))?;
    let mut ids = HashSet::with_capacity(interests.len());
    for interest in &interests {
        interest.validate()?;
        // The id names the hop in disposition frames, so it must be unique.
        if !ids.insert(interest.id) {
            return Err(ProxyError::BadRequest(format!(
                "duplicate interest id {}",
                interest.id
            )));
        }
    }
    Ok(interests)
}
