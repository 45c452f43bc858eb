//! Multi-valued BFT composition.
//!
//! Composes [`crate::brb::BrbCore`] (one reliable broadcast per origin, keyed by
//! `(value, origin)`) with *n* parallel [`crate::psync::PsyncCore`] instances, one
//! per origin `k`. A BRB delivery of origin `k`'s proposal fast-starts instance
//! `k` with a synthetic estimate of 1; once some instance decides 1, every
//! never-started instance is force-started with a genuine estimate of 0 so the
//! composition can complete without waiting on silent origins.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::brb::{BrbAction, BrbCore, Payload};
use crate::env::{broadcast, Environment};
use crate::error::ConfigError;
use crate::ids::{NodeId, Round, TimerName};
use crate::node::ProtocolNode;
use crate::psync::{PsyncAction, PsyncCore};

/// Messages exchanged by a dBFT node. Binary-consensus messages carry the
/// instance index `k` as structured data rather than encoding it into a
/// timer-name-style string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbftMessage<V> {
    RbInit(Payload<V>),
    RbEcho(Payload<V>),
    RbReady(Payload<V>),
    Est { k: usize, round: Round, value: bool },
    CoordValue { k: usize, round: Round, value: bool },
    Aux { k: usize, round: Round, values: Vec<bool> },
    /// Local-only: delivered via [`Environment::send_local`], never sent over the network.
    Result(V),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbftCommand<V> {
    Init(V),
}

/// A multi-valued BFT node: one [`BrbCore`] (per-origin reliable broadcast) plus
/// `n` parallel [`PsyncCore`] binary-consensus instances, one per origin.
#[derive(Debug)]
pub struct DbftNode<V> {
    id: NodeId,
    peers: Vec<NodeId>,
    /// Lexicographically-ordered peers: position `k` is instance `k`'s origin.
    ordered_peers: Vec<NodeId>,
    n: usize,

    brb: BrbCore<V>,
    instances: Vec<PsyncCore>,

    proposals: BTreeMap<usize, V>,
    bin_decisions: Vec<Option<bool>>,
    already_decided_one: bool,
    delivered: Option<V>,
}

impl<V: Ord + Clone + Debug> DbftNode<V> {
    pub fn new(id: NodeId, peers: Vec<NodeId>, f: usize) -> Result<Self, ConfigError> {
        let n = peers.len();
        if n < 3 * f + 1 {
            return Err(ConfigError::InsufficientNodes { n, f });
        }
        if !peers.contains(&id) {
            return Err(ConfigError::SelfNotInPeers { id: id.0 });
        }
        let mut ordered_peers = peers.clone();
        ordered_peers.sort();
        let instances = (0..n).map(|_| PsyncCore::new(id.clone(), peers.clone(), f)).collect();
        Ok(Self {
            id,
            peers,
            ordered_peers,
            n,
            brb: BrbCore::new(f),
            instances,
            proposals: BTreeMap::new(),
            bin_decisions: vec![None; n],
            already_decided_one: false,
            delivered: None,
        })
    }

    pub fn delivered_result(&self) -> Option<&V> {
        self.delivered.as_ref()
    }

    fn instance_of(&self, origin: &NodeId) -> usize {
        self.ordered_peers
            .iter()
            .position(|p| p == origin)
            .expect("origin must be a known peer")
    }

    fn maybe_deliver_result(&mut self, env: &mut dyn Environment<DbftMessage<V>>) {
        if self.delivered.is_some() {
            return;
        }
        if self.bin_decisions.iter().any(Option::is_none) {
            return;
        }
        let Some(k_star) = self.bin_decisions.iter().position(|d| *d == Some(true)) else {
            return;
        };
        if let Some(value) = self.proposals.get(&k_star) {
            debug!(node = %self.id, k_star, ?value, "dbft: delivering result");
            self.delivered = Some(value.clone());
            env.send_local(DbftMessage::Result(value.clone()));
        }
        // Else: proposals[k_star] hasn't arrived via BRB yet. BRB's totality
        // guarantees it eventually will, re-entering here through
        // handle_brb_delivery. No placeholder result is emitted in the meantime.
    }

    fn on_instance_decided(&mut self, k: usize, value: bool, env: &mut dyn Environment<DbftMessage<V>>) {
        if self.bin_decisions[k].is_some() {
            return;
        }
        debug!(node = %self.id, k, value, "dbft: instance decided");
        self.bin_decisions[k] = Some(value);

        if value && !self.already_decided_one {
            self.already_decided_one = true;
            for i in 0..self.n {
                if self.instances[i].round().is_none() {
                    let actions = self.instances[i].on_init(false);
                    self.apply_instance(i, actions, env);
                }
            }
        }
        self.maybe_deliver_result(env);
    }

    fn handle_brb_delivery(&mut self, payload: Payload<V>, env: &mut dyn Environment<DbftMessage<V>>) {
        let k = self.instance_of(&payload.origin);
        self.proposals.insert(k, payload.value);
        if !self.already_decided_one {
            let actions = self.instances[k].force_first_delivery(true);
            self.apply_instance(k, actions, env);
        }
        self.maybe_deliver_result(env);
    }

    fn apply_brb(&self, actions: Vec<BrbAction>, payload: &Payload<V>, env: &mut dyn Environment<DbftMessage<V>>)
    where
        V: Clone,
    {
        for action in actions {
            match action {
                BrbAction::BroadcastEcho => broadcast(env, &self.peers, DbftMessage::RbEcho(payload.clone())),
                BrbAction::BroadcastReady => broadcast(env, &self.peers, DbftMessage::RbReady(payload.clone())),
            }
        }
    }

    fn apply_instance(&self, k: usize, actions: Vec<PsyncAction>, env: &mut dyn Environment<DbftMessage<V>>) {
        for action in actions {
            match action {
                PsyncAction::BroadcastEst { round, value } => {
                    broadcast(env, &self.peers, DbftMessage::Est { k, round, value })
                }
                PsyncAction::BroadcastCoordValue { round, value } => {
                    broadcast(env, &self.peers, DbftMessage::CoordValue { k, round, value })
                }
                PsyncAction::BroadcastAux { round, values } => broadcast(
                    env,
                    &self.peers,
                    DbftMessage::Aux {
                        k,
                        round,
                        values: values.into_iter().collect(),
                    },
                ),
                PsyncAction::ArmCoordTimer { delay } => env.set_timer(
                    TimerName::for_instance(crate::ids::TimerKind::Coord, self.id.clone(), k),
                    delay,
                ),
                PsyncAction::ArmAuxTimer { delay } => env.set_timer(
                    TimerName::for_instance(crate::ids::TimerKind::Aux, self.id.clone(), k),
                    delay,
                ),
            }
        }
    }
}

impl<V: Ord + Clone + Debug + Send + Sync + 'static> ProtocolNode for DbftNode<V> {
    type Command = DbftCommand<V>;
    type Message = DbftMessage<V>;

    fn id(&self) -> &NodeId {
        &self.id
    }

    fn on_local(&mut self, command: Self::Command, env: &mut dyn Environment<Self::Message>) {
        let DbftCommand::Init(value) = command;
        let payload = Payload {
            value,
            origin: self.id.clone(),
        };
        debug!(node = %self.id, ?payload, "dbft: local init");
        broadcast(env, &self.peers, DbftMessage::RbInit(payload));
    }

    fn on_message(&mut self, from: &NodeId, message: Self::Message, env: &mut dyn Environment<Self::Message>) {
        match message {
            DbftMessage::RbInit(payload) => {
                let actions = self.brb.on_init(payload.clone(), from.clone());
                self.apply_brb(actions, &payload, env);
            }
            DbftMessage::RbEcho(payload) => {
                let (actions, _) = self.brb.on_echo(payload.clone(), from.clone());
                self.apply_brb(actions, &payload, env);
            }
            DbftMessage::RbReady(payload) => {
                let (actions, delivered) = self.brb.on_ready(payload.clone(), from.clone());
                self.apply_brb(actions, &payload, env);
                if let Some(payload) = delivered {
                    self.handle_brb_delivery(payload, env);
                }
            }
            DbftMessage::Est { k, round, value } => {
                let actions = self.instances[k].on_est(round, value, from.clone());
                self.apply_instance(k, actions, env);
            }
            DbftMessage::CoordValue { k, round, value } => {
                self.instances[k].on_coord_value(round, from.clone(), value);
            }
            DbftMessage::Aux { k, round, values } => {
                let actions = self.instances[k].on_aux(round, values.into_iter().collect(), from.clone());
                self.apply_instance(k, actions, env);
            }
            DbftMessage::Result(_) => {
                warn!(node = %self.id, from = %from, "dbft: local-only Result received over the network, ignoring");
            }
        }
    }

    fn on_timer(&mut self, timer: &TimerName, env: &mut dyn Environment<Self::Message>) {
        let Some(k) = timer.instance else {
            warn!(node = %self.id, ?timer, "dbft: timer with no instance index, ignoring");
            return;
        };
        match timer.kind {
            crate::ids::TimerKind::Coord => {
                let actions = self.instances[k].on_coord_timer_fire();
                self.apply_instance(k, actions, env);
            }
            crate::ids::TimerKind::Aux => {
                let (actions, decided) = self.instances[k].on_aux_timer_fire();
                self.apply_instance(k, actions, env);
                if let Some(value) = decided {
                    self.on_instance_decided(k, value, env);
                }
            }
        }
    }
}
