/*!
Byzantine-fault-tolerant agreement primitives, implemented as reactive nodes
over an abstract message-passing [`env::Environment`].

This crate is a study collection of the randomized and partial-synchrony BFT
consensus state machines and the reusable broadcast sub-protocols they compose
from: [Binary Value Broadcast](bv_broadcast), [Bracha's Byzantine Reliable
Broadcast](brb), [Ben-Or randomized binary consensus](ben_or),
[Mostéfaoui–Moniz–Raynal-style asynchronous binary consensus](mmr), its
[coordinator-based partial-synchrony variant](psync), and a
[multi-valued BFT composition](dbft) of BRB with *n* parallel binary-consensus
instances.

Every protocol node reacts to the same three event kinds — a local command, a
network message, or a timer firing — and produces effects only through the
[`Environment`](env::Environment) trait it is given for the duration of one
handler call. The crate does not itself deliver messages, schedule timers, or
serialize wire formats; an in-process simulator for exercising the protocols
synchronously lives under [`dev`], gated behind the `dev` feature.
*/

mod aux;

pub mod ben_or;
pub mod brb;
pub mod bv_broadcast;
pub mod dbft;
pub mod env;
pub mod error;
pub mod ids;
pub mod mmr;
pub mod node;
pub mod psync;
pub mod quorum;

#[cfg(feature = "dev")]
pub mod dev;

pub use env::Environment;
pub use error::ConfigError;
pub use ids::{NodeId, Round, TimerKind, TimerName};
pub use node::ProtocolNode;
