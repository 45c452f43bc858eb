//! Ben-Or randomized binary consensus.
//!
//! Termination is probabilistic: rounds converge immediately when all correct
//! nodes agree, otherwise a per-node coin (seeded deterministically from
//! `seed + node_id`) drives convergence in expected exponential rounds. The
//! quorum size used here is `n - f`, not the `n - f + 1` used by one variant
//! of the reference implementation this was adapted from — see
//! [`DESIGN.md`](../DESIGN.md) for the reasoning.

use std::collections::{BTreeMap, BTreeSet};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::env::{broadcast, Environment};
use crate::error::ConfigError;
use crate::ids::{NodeId, Round, TimerName};
use crate::node::ProtocolNode;

/// A round-1 proposal: either a binary value agreed on by more than `f`
/// voters, or the "doubt" sentinel when no such majority emerged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proposal {
    Value(bool),
    Doubt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BenOrMessage {
    Vote { round: Round, value: bool },
    Propose { round: Round, proposal: Proposal },
    /// Local-only result delivery.
    Result { value: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenOrCommand {
    Init(bool),
}

#[derive(Debug)]
pub struct BenOrNode {
    id: NodeId,
    peers: Vec<NodeId>,
    f: usize,
    rng: StdRng,

    pref: Option<bool>,
    round: Option<Round>,
    decided: Option<bool>,

    votes: BTreeMap<Round, BTreeMap<NodeId, bool>>,
    vote_quorum_reached: BTreeSet<Round>,
    proposals: BTreeMap<Round, BTreeMap<NodeId, Proposal>>,
    propose_quorum_reached: BTreeSet<Round>,
}

impl BenOrNode {
    pub fn new(id: NodeId, peers: Vec<NodeId>, f: usize, seed: u64) -> Result<Self, ConfigError> {
        let n = peers.len();
        if n < 3 * f + 1 {
            return Err(ConfigError::InsufficientNodes { n, f });
        }
        if !peers.contains(&id) {
            return Err(ConfigError::SelfNotInPeers { id: id.0 });
        }
        let node_seed = seed.wrapping_add(id.as_index_seed());
        Ok(Self {
            id,
            peers,
            f,
            rng: StdRng::seed_from_u64(node_seed),
            pref: None,
            round: None,
            decided: None,
            votes: BTreeMap::new(),
            vote_quorum_reached: BTreeSet::new(),
            proposals: BTreeMap::new(),
            propose_quorum_reached: BTreeSet::new(),
        })
    }

    pub fn decided_value(&self) -> Option<bool> {
        self.decided
    }

    fn quorum(&self) -> usize {
        self.peers.len() - self.f
    }

    fn send_vote(&mut self, round: Round, env: &mut dyn Environment<BenOrMessage>) {
        let value = self.pref.expect("pref must be set before voting");
        broadcast(env, &self.peers, BenOrMessage::Vote { round, value });
    }

    fn handle_vote(&mut self, round: Round, sender: NodeId, value: bool, env: &mut dyn Environment<BenOrMessage>) {
        self.votes.entry(round).or_default().insert(sender, value);
        if self.vote_quorum_reached.contains(&round) {
            return;
        }
        let votes = &self.votes[&round];
        if votes.len() < self.quorum() {
            return;
        }
        self.vote_quorum_reached.insert(round);

        let mut counts = [0usize; 2];
        for value in votes.values() {
            counts[*value as usize] += 1;
        }
        // Reachable strong-majority threshold for an n-f quorum: 2f+1 (equivalently
        // 2*count > n+f), not n/2+f, which a 3-vote quorum at n=3f+1 can never cross.
        let strong_majority = 2 * self.f + 1;
        let proposal = if counts[1] >= strong_majority {
            Proposal::Value(true)
        } else if counts[0] >= strong_majority {
            Proposal::Value(false)
        } else {
            Proposal::Doubt
        };

        trace!(node = %self.id, round, ?proposal, "ben-or: vote quorum reached");
        broadcast(env, &self.peers, BenOrMessage::Propose { round, proposal });
    }

    fn handle_propose(
        &mut self,
        round: Round,
        sender: NodeId,
        proposal: Proposal,
        env: &mut dyn Environment<BenOrMessage>,
    ) {
        self.proposals.entry(round).or_default().insert(sender, proposal);
        if self.propose_quorum_reached.contains(&round) {
            return;
        }
        let proposals = &self.proposals[&round];
        if proposals.len() < self.quorum() {
            return;
        }
        self.propose_quorum_reached.insert(round);

        let mut counts = [0usize; 2];
        for proposal in proposals.values() {
            if let Proposal::Value(v) = proposal {
                counts[*v as usize] += 1;
            }
        }

        let mut have_doubts = true;
        // Reachable strong-proposal threshold for an n-f quorum: 2f+1, not 3f
        // (per spec: "strong-proposal threshold > 3f ... equivalently >= 2f+1").
        let strong = 2 * self.f + 1;
        for (v, count) in counts.into_iter().enumerate() {
            if count >= self.f + 1 {
                have_doubts = false;
                let value = v != 0;
                self.pref = Some(value);
                if count >= strong {
                    if self.decided.is_none() {
                        debug!(node = %self.id, round, value, "ben-or: decided");
                        self.decided = Some(value);
                        env.send_local(BenOrMessage::Result { value });
                    }
                    return;
                }
            }
        }
        if have_doubts {
            self.pref = Some(self.rng.gen::<bool>());
        }

        let next_round = round + 1;
        self.round = Some(next_round);
        self.send_vote(next_round, env);
    }
}

impl ProtocolNode for BenOrNode {
    type Command = BenOrCommand;
    type Message = BenOrMessage;

    fn id(&self) -> &NodeId {
        &self.id
    }

    fn on_local(&mut self, command: Self::Command, env: &mut dyn Environment<Self::Message>) {
        let BenOrCommand::Init(value) = command;
        self.pref = Some(value);
        self.round = Some(0);
        debug!(node = %self.id, value, "ben-or: local init");
        self.send_vote(0, env);
    }

    fn on_message(&mut self, from: &NodeId, message: Self::Message, env: &mut dyn Environment<Self::Message>) {
        match message {
            BenOrMessage::Vote { round, value } => self.handle_vote(round, from.clone(), value, env),
            BenOrMessage::Propose { round, proposal } => self.handle_propose(round, from.clone(), proposal, env),
            BenOrMessage::Result { .. } => {
                tracing::warn!(node = %self.id, from = %from, "ben-or: local-only Result received over the network, ignoring");
            }
        }
    }

    fn on_timer(&mut self, timer: &TimerName, _env: &mut dyn Environment<Self::Message>) {
        tracing::warn!(node = %self.id, ?timer, "ben-or: unexpected timer fired");
    }
}
