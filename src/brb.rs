//! Bracha's Byzantine Reliable Broadcast.
//!
//! `BrbCore` is the reusable phase-counter state machine, keyed by the
//! payload `(value, origin)` being broadcast — a node may run many concurrent
//! broadcasts (one per origin), which is exactly how the multi-valued BFT
//! composition uses it. `BrbNode` is the thin, standalone
//! [`ProtocolNode`](crate::node::ProtocolNode) wrapper for running BRB on its
//! own, with its own `RB_INIT`/`RB_ECHO`/`RB_READY` message taxonomy.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::env::{broadcast, Environment};
use crate::error::ConfigError;
use crate::ids::NodeId;
use crate::node::ProtocolNode;

/// A payload being reliably broadcast: a value and the id of its originator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Payload<V> {
    pub value: V,
    pub origin: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Echo,
    Ready,
    Accept,
    Done,
}

#[derive(Debug, Default)]
struct PayloadState {
    phase: Option<Phase>,
    init_senders: BTreeSet<NodeId>,
    echo_senders: BTreeSet<NodeId>,
    ready_senders: BTreeSet<NodeId>,
}

impl PayloadState {
    fn phase(&self) -> Phase {
        self.phase.unwrap_or(Phase::Echo)
    }
}

/// An effect `BrbCore` wants the host to perform for a given payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrbAction {
    BroadcastEcho,
    BroadcastReady,
}

/// The phase-counter state machine behind Bracha reliable broadcast, with no
/// opinion on message encoding or delivery.
#[derive(Debug)]
pub struct BrbCore<V> {
    f: usize,
    payloads: BTreeMap<Payload<V>, PayloadState>,
}

impl<V: Ord + Clone + Debug> BrbCore<V> {
    pub fn new(f: usize) -> Self {
        Self {
            f,
            payloads: BTreeMap::new(),
        }
    }

    /// `RB_INIT{p}` received (any number of times, from any sender): the
    /// first one to arrive while still in phase ECHO triggers the ECHO relay.
    pub fn on_init(&mut self, payload: Payload<V>, sender: NodeId) -> Vec<BrbAction> {
        let state = self.payloads.entry(payload.clone()).or_default();
        state.init_senders.insert(sender);

        let mut actions = Vec::new();
        if state.phase() == Phase::Echo && !state.init_senders.is_empty() {
            state.phase = Some(Phase::Ready);
            actions.push(BrbAction::BroadcastEcho);
            trace!(?payload, "brb: init observed, relaying echo");
        }
        actions
    }

    /// `RB_ECHO{p}` received from `sender`.
    pub fn on_echo(&mut self, payload: Payload<V>, sender: NodeId) -> (Vec<BrbAction>, Option<Payload<V>>) {
        let state = self.payloads.entry(payload.clone()).or_default();
        state.echo_senders.insert(sender);
        let count = state.echo_senders.len();
        let phase = state.phase();

        let mut actions = Vec::new();
        if phase == Phase::Echo && count >= 2 * self.f + 1 {
            state.phase = Some(Phase::Ready);
            actions.push(BrbAction::BroadcastEcho);
        } else if phase == Phase::Ready && count >= 2 * self.f + 1 {
            state.phase = Some(Phase::Accept);
            actions.push(BrbAction::BroadcastReady);
        }
        (actions, None)
    }

    /// `RB_READY{p}` received from `sender`.
    pub fn on_ready(&mut self, payload: Payload<V>, sender: NodeId) -> (Vec<BrbAction>, Option<Payload<V>>) {
        let state = self.payloads.entry(payload.clone()).or_default();
        state.ready_senders.insert(sender);
        let count = state.ready_senders.len();
        let phase = state.phase();

        let mut actions = Vec::new();
        let mut delivered = None;
        match phase {
            Phase::Echo if count >= self.f + 1 => {
                state.phase = Some(Phase::Ready);
                actions.push(BrbAction::BroadcastEcho);
            }
            Phase::Ready if count >= self.f + 1 => {
                state.phase = Some(Phase::Accept);
                actions.push(BrbAction::BroadcastReady);
            }
            Phase::Accept if count >= 2 * self.f + 1 => {
                state.phase = Some(Phase::Done);
                debug!(?payload, "brb: delivered");
                delivered = Some(payload);
            }
            _ => {}
        }
        (actions, delivered)
    }
}

/// Messages exchanged by the standalone BRB node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrbMessage<V> {
    RbInit(Payload<V>),
    RbEcho(Payload<V>),
    RbReady(Payload<V>),
    /// Local-only: delivered via [`Environment::send_local`], never sent over the network.
    Delivered(Payload<V>),
}

/// Local commands accepted by the standalone BRB node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrbCommand<V> {
    Init(V),
}

/// A standalone reliable-broadcast node, broadcasting payloads it originates
/// and helping relay payloads originated by its peers.
#[derive(Debug)]
pub struct BrbNode<V> {
    id: NodeId,
    peers: Vec<NodeId>,
    core: BrbCore<V>,
    /// Payloads delivered so far, in delivery order.
    delivered: Vec<Payload<V>>,
}

impl<V: Ord + Clone + Debug> BrbNode<V> {
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
            core: BrbCore::new(f),
            delivered: Vec::new(),
        })
    }

    pub fn delivered(&self) -> &[Payload<V>] {
        &self.delivered
    }
}

impl<V: Ord + Clone + Debug + Send + Sync + 'static> ProtocolNode for BrbNode<V> {
    type Command = BrbCommand<V>;
    type Message = BrbMessage<V>;

    fn id(&self) -> &NodeId {
        &self.id
    }

    fn on_local(&mut self, command: Self::Command, env: &mut dyn Environment<Self::Message>) {
        let BrbCommand::Init(value) = command;
        let payload = Payload {
            value,
            origin: self.id.clone(),
        };
        debug!(node = %self.id, ?payload, "brb: local init");
        broadcast(env, &self.peers, BrbMessage::RbInit(payload));
    }

    fn on_message(&mut self, from: &NodeId, message: Self::Message, env: &mut dyn Environment<Self::Message>) {
        match message {
            BrbMessage::RbInit(payload) => {
                let actions = self.core.on_init(payload.clone(), from.clone());
                for action in actions {
                    apply(action, payload.clone(), &self.peers, env);
                }
            }
            BrbMessage::RbEcho(payload) => {
                let (actions, delivered) = self.core.on_echo(payload.clone(), from.clone());
                for action in actions {
                    apply(action, payload.clone(), &self.peers, env);
                }
                if let Some(payload) = delivered {
                    self.delivered.push(payload);
                }
            }
            BrbMessage::RbReady(payload) => {
                let (actions, delivered) = self.core.on_ready(payload.clone(), from.clone());
                for action in actions {
                    apply(action, payload.clone(), &self.peers, env);
                }
                if let Some(payload) = delivered {
                    env.send_local(BrbMessage::Delivered(payload.clone()));
                    self.delivered.push(payload);
                }
            }
            BrbMessage::Delivered(_) => {
                warn!(node = %self.id, from = %from, "brb: local-only Delivered message received over the network, ignoring");
            }
        }
    }

    fn on_timer(&mut self, timer: &crate::ids::TimerName, _env: &mut dyn Environment<Self::Message>) {
        warn!(node = %self.id, ?timer, "brb: unexpected timer fired");
    }
}

fn apply<V: Clone>(action: BrbAction, payload: Payload<V>, peers: &[NodeId], env: &mut dyn Environment<BrbMessage<V>>) {
    match action {
        BrbAction::BroadcastEcho => broadcast(env, peers, BrbMessage::RbEcho(payload)),
        BrbAction::BroadcastReady => broadcast(env, peers, BrbMessage::RbReady(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_never_regresses_on_stale_messages() {
        let mut core = BrbCore::<u64>::new(1);
        let payload = Payload {
            value: 7,
            origin: NodeId::new("origin"),
        };
        for i in 0..3 {
            core.on_ready(payload.clone(), NodeId::new(format!("n{i}")));
        }
        // A late INIT after ACCEPT must be a no-op, not a phase regression.
        let actions = core.on_init(payload.clone(), NodeId::new("late"));
        assert!(actions.is_empty());
    }

    #[test]
    fn delivers_after_two_f_plus_one_ready() {
        let mut core = BrbCore::<u64>::new(1);
        let payload = Payload {
            value: 1,
            origin: NodeId::new("origin"),
        };
        // Reach ACCEPT via f+1 READY.
        core.on_ready(payload.clone(), NodeId::new("a"));
        core.on_ready(payload.clone(), NodeId::new("b"));
        // 2f+1 READY delivers.
        core.on_ready(payload.clone(), NodeId::new("c"));
        let (_, delivered) = core.on_ready(payload.clone(), NodeId::new("d"));
        assert_eq!(delivered, Some(payload));
    }
}
