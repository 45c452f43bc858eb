//! Sender-deduplicating multisets indexed by `(round, value)`.
//!
//! A Byzantine peer may resend the same vote, or send contradictory votes for
//! different values; the counter treats each `(round, value)` pair as its own
//! set of distinct senders and never restricts the value domain.

use std::collections::{BTreeMap, BTreeSet};

use crate::ids::{NodeId, Round};

/// Distinct-sender counts for a single round, keyed by an arbitrary value type.
#[derive(Debug, Clone)]
pub struct QuorumCounter<V> {
    senders_by_value: BTreeMap<V, BTreeSet<NodeId>>,
}

impl<V> Default for QuorumCounter<V> {
    fn default() -> Self {
        Self {
            senders_by_value: BTreeMap::new(),
        }
    }
}

impl<V: Ord + Clone> QuorumCounter<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `sender` as having supported `value`. Idempotent: resending is a
    /// no-op. Returns the new distinct-sender count for `value`.
    pub fn record(&mut self, value: V, sender: NodeId) -> usize {
        let senders = self.senders_by_value.entry(value).or_default();
        senders.insert(sender);
        senders.len()
    }

    pub fn count(&self, value: &V) -> usize {
        self.senders_by_value.get(value).map_or(0, BTreeSet::len)
    }

    pub fn senders(&self, value: &V) -> BTreeSet<NodeId> {
        self.senders_by_value.get(value).cloned().unwrap_or_default()
    }
}

/// A [`QuorumCounter`] per round, for protocols (everything but Ben-Or's raw
/// vote tally) that only need the distinct-sender count per value.
#[derive(Debug, Clone, Default)]
pub struct RoundQuorum<V> {
    rounds: BTreeMap<Round, QuorumCounter<V>>,
}

impl<V: Ord + Clone> RoundQuorum<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, round: Round, value: V, sender: NodeId) -> usize {
        self.rounds.entry(round).or_default().record(value, sender)
    }

    pub fn count(&self, round: Round, value: &V) -> usize {
        self.rounds.get(&round).map_or(0, |c| c.count(value))
    }
}
