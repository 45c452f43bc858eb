/*!
An in-process, deterministic simulation harness for driving protocol nodes
without a real network or clock, just enough to exercise the end-to-end
scenarios under `tests/`.

[`InMemoryNetwork`] owns a queue of in-flight messages and armed timers across
a fixed set of same-protocol nodes. Stepping the simulation pops the
earliest-scheduled event (by model time) and feeds it to the addressed node;
message delivery ticks are jittered with a seeded RNG so channels are not
FIFO — handlers must tolerate reordering, not assume causal or FIFO delivery.
Timers fire in scheduled order and re-arming a name overwrites its pending
fire tick rather than scheduling a second fire.
*/

use std::collections::BTreeMap;
use std::fmt::Debug;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::env::Environment;
use crate::ids::{NodeId, TimerName};
use crate::node::ProtocolNode;

struct QueueEnv<'a, M> {
    messages: &'a mut Vec<(u64, NodeId, NodeId, M)>,
    timers: &'a mut BTreeMap<TimerName, u64>,
    local: &'a mut BTreeMap<NodeId, Vec<M>>,
    rng: &'a mut ChaCha8Rng,
    tick: u64,
    from: NodeId,
}

impl<M: Clone> Environment<M> for QueueEnv<'_, M> {
    fn send(&mut self, peer: &NodeId, msg: M) {
        let jitter = self.rng.gen_range(0..=2u64);
        let deliver_at = self.tick + 1 + jitter;
        self.messages.push((deliver_at, peer.clone(), self.from.clone(), msg));
    }

    fn send_local(&mut self, msg: M) {
        self.local.entry(self.from.clone()).or_default().push(msg);
    }

    fn set_timer(&mut self, name: TimerName, delay: u64) {
        self.timers.insert(name, self.tick + delay.max(1));
    }
}

/// A fixed set of nodes of one protocol, driven synchronously by popping one
/// scheduled event at a time.
pub struct InMemoryNetwork<N: ProtocolNode> {
    nodes: BTreeMap<NodeId, N>,
    messages: Vec<(u64, NodeId, NodeId, N::Message)>,
    timers: BTreeMap<TimerName, u64>,
    local_deliveries: BTreeMap<NodeId, Vec<N::Message>>,
    rng: ChaCha8Rng,
    tick: u64,
}

impl<N: ProtocolNode> InMemoryNetwork<N>
where
    N::Message: Clone + Debug,
{
    /// Creates an empty network seeded for reproducible message-delivery order.
    /// `ids` only seeds the local-delivery bookkeeping; nodes themselves are
    /// added with [`Self::add_node`].
    pub fn new(ids: Vec<NodeId>, seed: u64) -> Self {
        Self {
            nodes: BTreeMap::new(),
            messages: Vec::new(),
            timers: BTreeMap::new(),
            local_deliveries: ids.into_iter().map(|id| (id, Vec::new())).collect(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            tick: 0,
        }
    }

    pub fn add_node(&mut self, node: N) {
        self.local_deliveries.entry(node.id().clone()).or_default();
        self.nodes.insert(node.id().clone(), node);
    }

    /// Injects a local command into `id`'s node, as if from the application above it.
    pub fn local(&mut self, id: &NodeId, command: N::Command) {
        let Some(mut node) = self.nodes.remove(id) else {
            return;
        };
        let mut env = QueueEnv {
            messages: &mut self.messages,
            timers: &mut self.timers,
            local: &mut self.local_deliveries,
            rng: &mut self.rng,
            tick: self.tick,
            from: id.clone(),
        };
        node.on_local(command, &mut env);
        self.nodes.insert(id.clone(), node);
    }

    /// Schedules `msg` for delivery to `to` as if sent by `from`, without running
    /// any node's handler. Lets a test model a Byzantine sender that unicasts
    /// different payloads to different peers (equivocation) rather than honestly
    /// broadcasting the same message to everyone.
    pub fn inject_message(&mut self, from: NodeId, to: &NodeId, msg: N::Message) {
        let deliver_at = self.tick + 1 + self.rng.gen_range(0..=2u64);
        self.messages.push((deliver_at, to.clone(), from, msg));
    }

    /// Deliveries `id`'s node has sent to its own application so far, in order.
    pub fn local_deliveries(&self, id: &NodeId) -> &[N::Message] {
        self.local_deliveries.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pops and processes the single earliest-scheduled event (message or timer
    /// fire), preferring messages over timers on an exact tick tie. Returns
    /// `false` if there was nothing left to process.
    pub fn step(&mut self) -> bool {
        let earliest_message_tick = self.messages.iter().map(|(tick, ..)| *tick).min();
        let earliest_timer = self.timers.iter().map(|(name, tick)| (*tick, name.clone())).min();

        match (earliest_message_tick, earliest_timer) {
            (None, None) => false,
            (Some(mt), None) => {
                self.deliver_message(mt);
                true
            }
            (None, Some((tt, name))) => {
                self.fire_timer(name, tt);
                true
            }
            (Some(mt), Some((tt, name))) => {
                if mt <= tt {
                    self.deliver_message(mt);
                } else {
                    self.fire_timer(name, tt);
                }
                true
            }
        }
    }

    /// Repeatedly steps until the network is quiescent or `max_steps` is hit
    /// (a protocol that never terminates, e.g. Ben-Or under an unlucky coin,
    /// would otherwise loop forever). Returns the number of steps actually taken.
    pub fn run_until_quiescent(&mut self, max_steps: usize) -> usize {
        let mut steps = 0;
        while steps < max_steps {
            if !self.step() {
                break;
            }
            steps += 1;
        }
        steps
    }

    fn deliver_message(&mut self, tick: u64) {
        let candidates: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, (t, ..))| *t == tick)
            .map(|(i, _)| i)
            .collect();
        let choice = candidates[self.rng.gen_range(0..candidates.len())];
        let (_, to, from, msg) = self.messages.remove(choice);
        self.tick = self.tick.max(tick);

        let Some(mut node) = self.nodes.remove(&to) else {
            return;
        };
        {
            let mut env = QueueEnv {
                messages: &mut self.messages,
                timers: &mut self.timers,
                local: &mut self.local_deliveries,
                rng: &mut self.rng,
                tick: self.tick,
                from: to.clone(),
            };
            node.on_message(&from, msg, &mut env);
        }
        self.nodes.insert(to, node);
    }

    fn fire_timer(&mut self, name: TimerName, tick: u64) {
        self.timers.remove(&name);
        self.tick = self.tick.max(tick);
        let to = name.node.clone();

        let Some(mut node) = self.nodes.remove(&to) else {
            return;
        };
        {
            let mut env = QueueEnv {
                messages: &mut self.messages,
                timers: &mut self.timers,
                local: &mut self.local_deliveries,
                rng: &mut self.rng,
                tick: self.tick,
                from: to.clone(),
            };
            node.on_timer(&name, &mut env);
        }
        self.nodes.insert(to, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ben_or::{BenOrCommand, BenOrMessage, BenOrNode};

    #[test]
    fn drops_messages_for_nodes_not_in_the_network() {
        let ids: Vec<NodeId> = (0..4).map(|i| NodeId::new(i.to_string())).collect();
        let mut net: InMemoryNetwork<BenOrNode> = InMemoryNetwork::new(ids.clone(), 1);
        for id in &ids {
            net.add_node(BenOrNode::new(id.clone(), ids.clone(), 1, 42).unwrap());
        }
        net.local(&ids[0], BenOrCommand::Init(true));
        assert!(net.run_until_quiescent(1000) > 0);
        assert!(net
            .local_deliveries(&ids[0])
            .iter()
            .all(|m| matches!(m, BenOrMessage::Result { .. })));
    }
}
