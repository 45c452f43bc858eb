//! Node identity, rounds and timer naming shared by every protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A node identifier, drawn from a finite ordered set of `n` identifiers.
///
/// Stored as a string so peers can be addressed uniformly whether the caller's
/// underlying identifiers are numeric or not; protocols that need an integer
/// (coordinator selection, RNG seeding) canonicalize through [`NodeId::as_index_seed`]
/// instead of parsing the string twice in two different ways.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A stable, deterministic `u64` derived from this id.
    ///
    /// If the id happens to parse as an integer that value is used directly (matching
    /// the reference implementation's `seed + int(node_id)`); otherwise it falls back
    /// to an FNV-1a hash of the id string so non-numeric ids still seed deterministically.
    pub fn as_index_seed(&self) -> u64 {
        if let Ok(n) = self.0.parse::<u64>() {
            return n;
        }
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in self.0.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A non-negative, monotonically advancing consensus round.
///
/// Round 0 is pre-initialization; a node never revisits a lower round within
/// one consensus instance.
pub type Round = u64;

/// Which logical timer a [`TimerName`] refers to.
///
/// Carried as structured data rather than encoded into a string, so the
/// multi-valued composition's instance index never needs parsing back out of
/// a timer name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// Partial-synchrony BBC's coordinator timer.
    Coord,
    /// Partial-synchrony BBC's AUX timer.
    Aux,
}

/// A fully-qualified timer name: role, owning node, and (for dBFT) the binary-consensus
/// instance index `k` it belongs to.
///
/// Re-arming a timer with the same name overrides the pending delay; there is no
/// explicit cancellation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerName {
    pub kind: TimerKind,
    pub node: NodeId,
    pub instance: Option<usize>,
}

impl TimerName {
    pub fn new(kind: TimerKind, node: NodeId) -> Self {
        Self {
            kind,
            node,
            instance: None,
        }
    }

    pub fn for_instance(kind: TimerKind, node: NodeId, instance: usize) -> Self {
        Self {
            kind,
            node,
            instance: Some(instance),
        }
    }
}

impl fmt::Display for TimerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.instance {
            Some(k) => write!(f, "{:?}-NODE-{}-K-{}", self.kind, self.node, k),
            None => write!(f, "{:?}-NODE-{}", self.kind, self.node),
        }
    }
}
