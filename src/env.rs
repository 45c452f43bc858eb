//! The effect sink a node handler is given for the duration of one event.
//!
//! The core never touches a socket or a clock directly, it only describes
//! effects through this trait. An environment is borrowed for the duration of
//! a handler call and not retained.

use crate::ids::{NodeId, TimerName};

/// Capability set a protocol node uses to produce effects.
///
/// `send`/`broadcast` are best-effort: the environment may lose, duplicate or
/// reorder them, and handlers must not rely on any delivery guarantee beyond
/// what the quorum-threshold predicates already assume. `set_timer` arms (or
/// re-arms) a named timer; there is no cancellation, only re-arming with a new
/// delay.
pub trait Environment<M> {
    /// Unicasts `msg` to `peer`.
    fn send(&mut self, peer: &NodeId, msg: M);

    /// Delivers `msg` to the application above this node. Never sent over the
    /// network; `RESULT`-shaped messages are the only payloads protocols pass
    /// here.
    fn send_local(&mut self, msg: M);

    /// Arms `name` to fire after `delay` (model-time) units, overriding any
    /// previously pending arming of the same name.
    fn set_timer(&mut self, name: TimerName, delay: u64);
}

/// `broadcast(msg)` — send to every peer in `peers`, including this node
/// itself. Free function (not a trait method) since it
/// needs the caller's own peer list, which the environment does not own.
pub fn broadcast<M: Clone>(env: &mut dyn Environment<M>, peers: &[NodeId], msg: M) {
    for peer in peers {
        env.send(peer, msg.clone());
    }
}
