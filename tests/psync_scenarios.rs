//! Partial-synchrony BBC end-to-end scenario.

#![cfg(feature = "dev")]

use bft_lab::dev::InMemoryNetwork;
use bft_lab::ids::NodeId;
use bft_lab::psync::{PsyncCommand, PsyncMessage, PsyncNode};

fn ids(n: usize) -> Vec<NodeId> {
    (0..n).map(|i| NodeId::new(i.to_string())).collect()
}

/// n=4, f=1; round 1's coordinator crashes before sending COORD_VALUE.
/// AUX-TIMER must still fire (falling back to the plain `bin_values` set), the
/// round advances, a later round's coordinator is correct, and every correct
/// node decides the common input.
#[test]
fn s5_survives_a_crashed_round_one_coordinator() {
    let peers = ids(4);
    // Sorted peer order is ["0","1","2","3"]; round 1's coordinator is peers[0].
    let crashed_coordinator = &peers[0];
    let correct: Vec<NodeId> = peers.iter().filter(|id| *id != crashed_coordinator).cloned().collect();

    let mut net: InMemoryNetwork<PsyncNode> = InMemoryNetwork::new(peers.clone(), 13);
    for id in &correct {
        net.add_node(PsyncNode::new(id.clone(), peers.clone(), 1).unwrap());
    }
    for id in &correct {
        net.local(id, PsyncCommand::Init(true));
    }
    net.run_until_quiescent(200_000);

    let mut decisions = Vec::new();
    for id in &correct {
        if let Some(PsyncMessage::Result { value }) = net
            .local_deliveries(id)
            .iter()
            .find(|m| matches!(m, PsyncMessage::Result { .. }))
        {
            decisions.push(*value);
        }
    }
    assert_eq!(decisions.len(), correct.len(), "every correct node must eventually decide");
    assert!(decisions.iter().all(|v| *v), "the common input must be the decided value");
}
