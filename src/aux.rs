//! AUX-message bookkeeping shared by [`crate::mmr`] and [`crate::psync`].
//!
//! Tracks, per round, each sender's most-recently-received value set and the
//! resulting per-value distinct-sender counts — equivalent to recomputing
//! `count_aux_values` from scratch on every AUX, but kept incrementally since
//! the two produce the same count.

use std::collections::BTreeMap;

use crate::ids::{NodeId, Round};

#[derive(Debug, Clone, Default)]
struct RoundAux {
    /// Most-recent value set received from each sender.
    latest: BTreeMap<NodeId, [bool; 2]>,
    /// First-insertion order of senders, matching the reference implementation's
    /// dict-of-senders iteration order.
    order: Vec<NodeId>,
    /// Distinct senders whose latest set currently includes `false`/`true`.
    senders_by_value: [std::collections::BTreeSet<NodeId>; 2],
}

/// Per-round AUX state: who last said what, and how many distinct senders currently
/// support each value.
#[derive(Debug, Clone, Default)]
pub struct AuxTracker {
    rounds: BTreeMap<Round, RoundAux>,
}

impl AuxTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `sender`'s AUX value set for `round`, superseding any earlier set
    /// from the same sender in the same round.
    pub fn record(&mut self, round: Round, sender: NodeId, values: std::collections::BTreeSet<bool>) {
        let set = [values.contains(&false), values.contains(&true)];
        let state = self.rounds.entry(round).or_default();

        if let Some(prev) = state.latest.get(&sender).copied() {
            for v in 0..2 {
                if prev[v] && !set[v] {
                    state.senders_by_value[v].remove(&sender);
                }
            }
        } else {
            state.order.push(sender.clone());
        }
        for v in 0..2 {
            if set[v] {
                state.senders_by_value[v].insert(sender.clone());
            }
        }
        state.latest.insert(sender, set);
    }

    /// Distinct senders whose latest AUX for `round` included `value`.
    pub fn count(&self, round: Round, value: bool) -> usize {
        self.rounds
            .get(&round)
            .map_or(0, |s| s.senders_by_value[value as usize].len())
    }

    /// Distinct senders that have sent any AUX for `round`.
    pub fn distinct_senders(&self, round: Round) -> usize {
        self.rounds.get(&round).map_or(0, |s| s.latest.len())
    }

    /// A received AUX with set `values` is valid iff every member has at least
    /// `n - f` distinct supporting senders (by their *current*, latest set) and
    /// lies in `bin_values[round]`.
    pub fn is_valid(
        &self,
        round: Round,
        values: &std::collections::BTreeSet<bool>,
        n: usize,
        f: usize,
        bin_values: &std::collections::BTreeSet<bool>,
    ) -> bool {
        values
            .iter()
            .all(|v| self.count(round, *v) >= n - f && bin_values.contains(v))
    }

    /// All AUX entries received for `round`, in first-insertion-by-sender order,
    /// each paired with that sender's latest value set. Used by PSync's AUX-timer
    /// handler, which must pick the earliest-arriving *still-valid* message rather
    /// than just the highest count.
    pub fn ordered_entries(&self, round: Round) -> Vec<(NodeId, std::collections::BTreeSet<bool>)> {
        let Some(state) = self.rounds.get(&round) else {
            return Vec::new();
        };
        state
            .order
            .iter()
            .map(|sender| {
                let set = state.latest[sender];
                let mut values = std::collections::BTreeSet::new();
                if set[0] {
                    values.insert(false);
                }
                if set[1] {
                    values.insert(true);
                }
                (sender.clone(), values)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn resend_from_same_sender_replaces_not_accumulates() {
        let mut aux = AuxTracker::new();
        let a = NodeId::new("a");
        aux.record(1, a.clone(), BTreeSet::from([true]));
        assert_eq!(aux.count(1, true), 1);
        aux.record(1, a, BTreeSet::from([false]));
        assert_eq!(aux.count(1, true), 0, "resend must supersede, not add to, the old set");
        assert_eq!(aux.count(1, false), 1);
    }

    #[test]
    fn ordered_entries_preserve_first_insertion_order() {
        let mut aux = AuxTracker::new();
        aux.record(1, NodeId::new("b"), BTreeSet::from([true]));
        aux.record(1, NodeId::new("a"), BTreeSet::from([false]));
        aux.record(1, NodeId::new("b"), BTreeSet::from([false, true]));
        let order: Vec<_> = aux.ordered_entries(1).into_iter().map(|(s, _)| s).collect();
        assert_eq!(order, vec![NodeId::new("b"), NodeId::new("a")]);
    }
}
