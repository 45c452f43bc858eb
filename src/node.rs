//! The common reactive-node contract every protocol implements.
//!
//! Every protocol in this crate reacts to the same three event kinds: a local
//! command injected by the client above the node, a network message delivered
//! from a peer, and a timer firing. Rather than dynamic dispatch on a `type`
//! tag, each event kind is an exhaustively-matched Rust enum and dispatch is a
//! trait method per kind.

use crate::env::Environment;
use crate::ids::{NodeId, TimerName};

/// A single reactive node: pure state, effects only through the given
/// [`Environment`]. Handlers are run-to-completion and never suspend
/// — a node's exclusive owner drives it one event at a time.
pub trait ProtocolNode {
    /// The local commands this node's client can inject (e.g. `INIT{value}`).
    type Command;
    /// The wire message type exchanged with peers, and also used for local
    /// deliveries via [`Environment::send_local`].
    type Message;

    fn id(&self) -> &NodeId;

    fn on_local(&mut self, command: Self::Command, env: &mut dyn Environment<Self::Message>);

    fn on_message(&mut self, from: &NodeId, message: Self::Message, env: &mut dyn Environment<Self::Message>);

    fn on_timer(&mut self, timer: &TimerName, env: &mut dyn Environment<Self::Message>);
}
