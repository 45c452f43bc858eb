//! Ben-Or end-to-end agreement scenarios.

#![cfg(feature = "dev")]

use bft_lab::ben_or::{BenOrCommand, BenOrMessage, BenOrNode};
use bft_lab::dev::InMemoryNetwork;
use bft_lab::ids::NodeId;

fn ids(n: usize) -> Vec<NodeId> {
    (0..n).map(|i| NodeId::new(i.to_string())).collect()
}

fn decided_values(net: &InMemoryNetwork<BenOrNode>, ids: &[NodeId]) -> Vec<bool> {
    ids.iter()
        .filter_map(|id| {
            net.local_deliveries(id).iter().find_map(|m| match m {
                BenOrMessage::Result { value } => Some(*value),
                _ => None,
            })
        })
        .collect()
}

/// S1: n=4, f=1, all four propose 1 — everyone should decide 1, agreeing.
#[test]
fn s1_unanimous_input_decides_together() {
    let peers = ids(4);
    let mut net: InMemoryNetwork<BenOrNode> = InMemoryNetwork::new(peers.clone(), 1);
    for id in &peers {
        net.add_node(BenOrNode::new(id.clone(), peers.clone(), 1, 99).unwrap());
    }
    for id in &peers {
        net.local(id, BenOrCommand::Init(true));
    }
    net.run_until_quiescent(50_000);

    let decisions = decided_values(&net, &peers);
    assert_eq!(decisions.len(), 4, "all four correct nodes must decide");
    assert!(decisions.iter().all(|v| *v), "unanimous input must decide the unanimous value");
}

/// S2: n=4, f=1, two propose 0 and two propose 1 — every correct node must
/// still agree on a single decided value (agreement holds regardless of seed).
#[test]
fn s2_divergent_input_still_agrees() {
    let peers = ids(4);
    let mut net: InMemoryNetwork<BenOrNode> = InMemoryNetwork::new(peers.clone(), 7);
    for id in &peers {
        net.add_node(BenOrNode::new(id.clone(), peers.clone(), 1, 1234).unwrap());
    }
    net.local(&peers[0], BenOrCommand::Init(false));
    net.local(&peers[1], BenOrCommand::Init(false));
    net.local(&peers[2], BenOrCommand::Init(true));
    net.local(&peers[3], BenOrCommand::Init(true));
    net.run_until_quiescent(200_000);

    let decisions = decided_values(&net, &peers);
    assert!(!decisions.is_empty(), "at least some correct nodes should reach a decision");
    let first = decisions[0];
    assert!(decisions.iter().all(|v| *v == first), "agreement: all decisions must match");
}

/// Integrity: a correct node never emits more than one RESULT.
#[test]
fn integrity_result_delivered_at_most_once() {
    let peers = ids(4);
    let mut net: InMemoryNetwork<BenOrNode> = InMemoryNetwork::new(peers.clone(), 3);
    for id in &peers {
        net.add_node(BenOrNode::new(id.clone(), peers.clone(), 1, 55).unwrap());
    }
    for id in &peers {
        net.local(id, BenOrCommand::Init(true));
    }
    net.run_until_quiescent(50_000);

    for id in &peers {
        let results = net
            .local_deliveries(id)
            .iter()
            .filter(|m| matches!(m, BenOrMessage::Result { .. }))
            .count();
        assert!(results <= 1, "node {id} must not decide more than once");
    }
}
