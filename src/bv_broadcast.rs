//! Binary Value Broadcast.
//!
//! A reusable sub-component: it delivers any binary value proposed by at
//! least one correct node, relays at most two distinct values per round, and
//! every correct node eventually delivers the same non-empty subset of
//! `{0, 1}`. It is driven by the host protocol (MMR BBC, PSync BBC, dBFT's
//! binary instances) rather than owning an [`Environment`](crate::env::Environment)
//! itself — like [`crate::brb::BrbCore`], it returns actions for the host to
//! translate into its own message type and broadcast.

use std::collections::{BTreeMap, BTreeSet};

use crate::ids::{NodeId, Round};
use crate::quorum::RoundQuorum;

/// An effect `BvBroadcast` wants the host protocol to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvAction {
    /// (Re-)broadcast `EST{round, value}` to every peer.
    BroadcastEst { round: Round, value: bool },
}

/// A value newly inserted into `bin_values[round]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BvDelivery {
    pub round: Round,
    pub value: bool,
    /// Whether this was the first value delivered in `round` (i.e. `bin_values[round]`
    /// was empty immediately before this insertion).
    pub is_first_in_round: bool,
}

/// Per-round EST counters and delivered binary-value sets.
#[derive(Debug, Clone)]
pub struct BvBroadcast {
    f: usize,
    received_est: RoundQuorum<bool>,
    broadcasted: BTreeSet<(Round, bool)>,
    bin_values: BTreeMap<Round, BTreeSet<bool>>,
}

impl BvBroadcast {
    pub fn new(f: usize) -> Self {
        Self {
            f,
            received_est: RoundQuorum::new(),
            broadcasted: BTreeSet::new(),
            bin_values: BTreeMap::new(),
        }
    }

    /// The binary values delivered so far for `round` (empty if none yet).
    pub fn bin_values(&self, round: Round) -> BTreeSet<bool> {
        self.bin_values.get(&round).cloned().unwrap_or_default()
    }

    /// `bv_broadcast(round, value)`: the local trigger to start (or amplify)
    /// broadcasting a value. Returns `None` if this `(round, value)` pair was
    /// already broadcast by this node.
    pub fn propose(&mut self, round: Round, value: bool) -> Option<BvAction> {
        if self.broadcasted.insert((round, value)) {
            Some(BvAction::BroadcastEst { round, value })
        } else {
            None
        }
    }

    /// Directly inserts `value` into `bin_values[round]` without going through the
    /// EST-counting threshold, for the multi-valued composition's fast-start path:
    /// invoking a binary instance with estimate 1 as if it had already been
    /// BV-delivered. The host is responsible for not fabricating deliveries a real
    /// run could not reach.
    pub fn force_deliver(&mut self, round: Round, value: bool) -> Option<BvDelivery> {
        let set = self.bin_values.entry(round).or_default();
        if set.insert(value) {
            Some(BvDelivery {
                round,
                value,
                is_first_in_round: set.len() == 1,
            })
        } else {
            None
        }
    }

    /// Handles receipt of `EST{round, value}` from `sender`. Returns an
    /// amplification action (if the `f+1` threshold was just crossed) and a
    /// delivery (if the `2f+1` threshold was just crossed and `value` is new
    /// to `bin_values[round]`).
    pub fn on_est(
        &mut self,
        round: Round,
        value: bool,
        sender: NodeId,
    ) -> (Option<BvAction>, Option<BvDelivery>) {
        let count = self.received_est.record(round, value, sender);

        let amplify = if count >= self.f + 1 {
            self.propose(round, value)
        } else {
            None
        };

        let delivery = if count >= 2 * self.f + 1 {
            let set = self.bin_values.entry(round).or_default();
            if set.insert(value) {
                Some(BvDelivery {
                    round,
                    value,
                    is_first_in_round: set.len() == 1,
                })
            } else {
                None
            }
        } else {
            None
        };

        (amplify, delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amplifies_at_f_plus_one_and_delivers_at_two_f_plus_one() {
        let f = 1;
        let mut bv = BvBroadcast::new(f);
        let senders: Vec<NodeId> = (0..4).map(|i| NodeId::new(i.to_string())).collect();

        let (amp, del) = bv.on_est(1, true, senders[0].clone());
        assert!(amp.is_none());
        assert!(del.is_none());

        let (amp, del) = bv.on_est(1, true, senders[1].clone());
        assert_eq!(amp, Some(BvAction::BroadcastEst { round: 1, value: true }));
        assert!(del.is_none());

        let (_amp, del) = bv.on_est(1, true, senders[2].clone());
        assert_eq!(
            del,
            Some(BvDelivery {
                round: 1,
                value: true,
                is_first_in_round: true
            })
        );
        assert_eq!(bv.bin_values(1), BTreeSet::from([true]));
    }

    #[test]
    fn duplicate_sender_does_not_inflate_count() {
        let mut bv = BvBroadcast::new(1);
        let a = NodeId::new("a");
        bv.on_est(1, true, a.clone());
        let (amp, _) = bv.on_est(1, true, a);
        assert!(amp.is_none(), "resend from the same sender must not re-cross f+1");
    }

    #[test]
    fn bin_values_holds_at_most_two_elements() {
        let mut bv = BvBroadcast::new(1);
        // 4 senders vote true, 4 vote false: both values cross 2f+1 = 3.
        for i in 0..4 {
            bv.on_est(1, true, NodeId::new(format!("t{i}")));
            bv.on_est(1, false, NodeId::new(format!("f{i}")));
        }
        assert_eq!(bv.bin_values(1), BTreeSet::from([true, false]));
    }
}
