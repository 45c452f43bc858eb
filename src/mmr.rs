//! Safe (asynchronous) Binary Byzantine Consensus, Mostéfaoui–Moniz–Raynal style.
//!
//! Built on top of [`BvBroadcast`](crate::bv_broadcast::BvBroadcast): a round's
//! `AUX{r, V}` message is broadcast whenever BV-Broadcast delivers a new value into
//! `bin_values[r]`, and the round-advance rule (the "common coin" of round parity)
//! is shared verbatim with the partial-synchrony variant in [`crate::psync`], which
//! only replaces *when* AUX is composed/consumed, not the decision arithmetic itself.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::aux::AuxTracker;
use crate::bv_broadcast::{BvAction, BvBroadcast};
use crate::env::{broadcast, Environment};
use crate::error::ConfigError;
use crate::ids::{NodeId, Round, TimerName};
use crate::node::ProtocolNode;

/// Round `r`'s deterministic common coin: its parity, expressed as a bit.
pub fn common_coin(round: Round) -> bool {
    round % 2 == 1
}

/// Applies the MMR decision rule to a validated AUX value set,
/// returning the next round's estimate and, if this crossing decides, the decided
/// value. Shared with [`crate::psync`]'s AUX-timer handler, which only differs in
/// *which* value set reaches this function.
pub fn decide_from_aux(round: Round, values: &BTreeSet<bool>) -> (bool, Option<bool>) {
    let b = common_coin(round);
    if values.len() == 1 {
        let w = *values.iter().next().expect("len == 1");
        (w, if w == b { Some(w) } else { None })
    } else {
        (b, None)
    }
}

/// An effect [`MmrCore`] wants the host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmrAction {
    BroadcastEst { round: Round, value: bool },
    BroadcastAux { round: Round, values: BTreeSet<bool> },
}

fn translate_bv(action: BvAction) -> MmrAction {
    match action {
        BvAction::BroadcastEst { round, value } => MmrAction::BroadcastEst { round, value },
    }
}

/// The reusable MMR state machine: round/estimate bookkeeping, BV-Broadcast driving
/// and the AUX-validity/common-coin decision rule, with no opinion on message
/// encoding. [`MmrNode`] below wraps this for standalone use.
#[derive(Debug)]
pub struct MmrCore {
    n: usize,
    f: usize,
    bv: BvBroadcast,
    aux: AuxTracker,
    round: Option<Round>,
    est: Option<bool>,
    decided_round: Option<Round>,
    decided: Option<bool>,
}

impl MmrCore {
    pub fn new(n: usize, f: usize) -> Self {
        Self {
            n,
            f,
            bv: BvBroadcast::new(f),
            aux: AuxTracker::new(),
            round: None,
            est: None,
            decided_round: None,
            decided: None,
        }
    }

    pub fn round(&self) -> Option<Round> {
        self.round
    }

    pub fn decided_value(&self) -> Option<bool> {
        self.decided
    }

    /// `INIT{v}`: `est <- v`, `r <- 1`, `BV_Broadcast(r, est)`.
    pub fn init(&mut self, value: bool) -> Vec<MmrAction> {
        self.est = Some(value);
        self.round = Some(1);
        self.bv.propose(1, value).map(translate_bv).into_iter().collect()
    }

    /// `EST{round, value}` received from `sender`: drives BV-Broadcast; a fresh
    /// delivery into `bin_values[round]` is re-broadcast as `AUX{round, bin_values[round]}`.
    pub fn on_est(&mut self, round: Round, value: bool, sender: NodeId) -> Vec<MmrAction> {
        let (amplify, delivery) = self.bv.on_est(round, value, sender);
        let mut actions: Vec<MmrAction> = amplify.map(translate_bv).into_iter().collect();
        if let Some(delivery) = delivery {
            actions.push(MmrAction::BroadcastAux {
                round: delivery.round,
                values: self.bv.bin_values(delivery.round),
            });
        }
        actions
    }

    /// `AUX{round, values}` received from `sender`. Ignored unless `round` is
    /// the current round.
    pub fn on_aux(&mut self, round: Round, values: BTreeSet<bool>, sender: NodeId) -> (Vec<MmrAction>, Option<bool>) {
        if self.round != Some(round) {
            trace!(round, current = ?self.round, "mmr: ignoring aux for non-current round");
            return (Vec::new(), None);
        }
        self.aux.record(round, sender, values.clone());

        let bin_values = self.bv.bin_values(round);
        if !self.aux.is_valid(round, &values, self.n, self.f, &bin_values) {
            return (Vec::new(), None);
        }

        let (next_est, decided_now) = decide_from_aux(round, &values);
        self.est = Some(next_est);

        let mut newly_decided = None;
        if let Some(value) = decided_now {
            if self.decided_round.is_none() {
                debug!(round, value, "mmr: decided");
                self.decided_round = Some(round);
                self.decided = Some(value);
                newly_decided = Some(value);
            }
        }

        let next_round = round + 1;
        self.round = Some(next_round);
        let actions = self.bv.propose(next_round, next_est).map(translate_bv).into_iter().collect();
        (actions, newly_decided)
    }
}

/// Messages exchanged by the standalone MMR node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MmrMessage {
    Est { round: Round, value: bool },
    Aux { round: Round, values: Vec<bool> },
    /// Local-only: delivered via [`Environment::send_local`], never sent over the network.
    Result { value: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmrCommand {
    Init(bool),
}

/// A standalone asynchronous safe binary consensus node.
#[derive(Debug)]
pub struct MmrNode {
    id: NodeId,
    peers: Vec<NodeId>,
    core: MmrCore,
}

impl MmrNode {
    pub fn new(id: NodeId, peers: Vec<NodeId>, f: usize) -> Result<Self, ConfigError> {
        let n = peers.len();
        if n < 3 * f + 1 {
            return Err(ConfigError::InsufficientNodes { n, f });
        }
        if !peers.contains(&id) {
            return Err(ConfigError::SelfNotInPeers { id: id.0 });
        }
        Ok(Self {
            id,
            peers,
            core: MmrCore::new(n, f),
        })
    }

    pub fn decided_value(&self) -> Option<bool> {
        self.core.decided_value()
    }
}

fn apply(actions: Vec<MmrAction>, peers: &[NodeId], env: &mut dyn Environment<MmrMessage>) {
    for action in actions {
        match action {
            MmrAction::BroadcastEst { round, value } => broadcast(env, peers, MmrMessage::Est { round, value }),
            MmrAction::BroadcastAux { round, values } => broadcast(
                env,
                peers,
                MmrMessage::Aux {
                    round,
                    values: values.into_iter().collect(),
                },
            ),
        }
    }
}

impl ProtocolNode for MmrNode {
    type Command = MmrCommand;
    type Message = MmrMessage;

    fn id(&self) -> &NodeId {
        &self.id
    }

    fn on_local(&mut self, command: Self::Command, env: &mut dyn Environment<Self::Message>) {
        let MmrCommand::Init(value) = command;
        debug!(node = %self.id, value, "mmr: local init");
        let actions = self.core.init(value);
        apply(actions, &self.peers, env);
    }

    fn on_message(&mut self, from: &NodeId, message: Self::Message, env: &mut dyn Environment<Self::Message>) {
        match message {
            MmrMessage::Est { round, value } => {
                let actions = self.core.on_est(round, value, from.clone());
                apply(actions, &self.peers, env);
            }
            MmrMessage::Aux { round, values } => {
                let (actions, decided) = self.core.on_aux(round, values.into_iter().collect(), from.clone());
                apply(actions, &self.peers, env);
                if let Some(value) = decided {
                    env.send_local(MmrMessage::Result { value });
                }
            }
            MmrMessage::Result { .. } => {
                warn!(node = %self.id, from = %from, "mmr: local-only Result received over the network, ignoring");
            }
        }
    }

    fn on_timer(&mut self, timer: &TimerName, _env: &mut dyn Environment<Self::Message>) {
        warn!(node = %self.id, ?timer, "mmr: unexpected timer fired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decides_when_unanimous_aux_matches_coin() {
        // Round 1's coin is 1 (odd). Four validated AUX{1,{1}} should decide 1.
        let mut core = MmrCore::new(4, 1);
        core.init(true);
        for i in 0..4 {
            core.on_est(1, true, NodeId::new(format!("n{i}")));
        }
        let mut decided = None;
        for i in 0..4 {
            let (_actions, d) = core.on_aux(1, BTreeSet::from([true]), NodeId::new(format!("n{i}")));
            decided = decided.or(d);
        }
        assert_eq!(decided, Some(true));
        assert_eq!(core.decided_value(), Some(true));
    }

    #[test]
    fn stale_round_aux_is_ignored() {
        let mut core = MmrCore::new(4, 1);
        core.init(false);
        let (actions, decided) = core.on_aux(7, BTreeSet::from([false]), NodeId::new("x"));
        assert!(actions.is_empty());
        assert!(decided.is_none());
    }

    #[test]
    fn decision_is_idempotent() {
        let mut core = MmrCore::new(4, 1);
        core.init(true);
        for i in 0..4 {
            core.on_est(1, true, NodeId::new(format!("n{i}")));
        }
        let mut first = None;
        for i in 0..4 {
            let (_a, d) = core.on_aux(1, BTreeSet::from([true]), NodeId::new(format!("n{i}")));
            if d.is_some() {
                first = d;
            }
        }
        assert_eq!(first, Some(true));
        // A further (replayed) AUX for the now-advanced round must not re-decide or panic.
        let (_actions, redecide) = core.on_aux(1, BTreeSet::from([true]), NodeId::new("n0"));
        assert!(redecide.is_none());
    }
}
