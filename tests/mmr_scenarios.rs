//! MMR BBC end-to-end scenario.

#![cfg(feature = "dev")]

use bft_lab::dev::InMemoryNetwork;
use bft_lab::ids::NodeId;
use bft_lab::mmr::{MmrCommand, MmrMessage, MmrNode};

fn ids(n: usize) -> Vec<NodeId> {
    (0..n).map(|i| NodeId::new(i.to_string())).collect()
}

/// n=4, f=1; correct estimates [0,1,1]; the fourth node is Byzantine-silent.
/// All correct nodes must decide 1.
#[test]
fn s3_decides_majority_value_despite_silent_byzantine() {
    let peers = ids(4);
    let correct = &peers[..3];
    let mut net: InMemoryNetwork<MmrNode> = InMemoryNetwork::new(peers.clone(), 5);
    for id in correct {
        net.add_node(MmrNode::new(id.clone(), peers.clone(), 1).unwrap());
    }
    // peers[3] is never added: its messages are silently dropped by the network,
    // modeling a crashed node as a subset of Byzantine-silent behavior.

    net.local(&peers[0], MmrCommand::Init(false));
    net.local(&peers[1], MmrCommand::Init(true));
    net.local(&peers[2], MmrCommand::Init(true));
    net.run_until_quiescent(50_000);

    let mut decisions = Vec::new();
    for id in correct {
        if let Some(MmrMessage::Result { value }) = net
            .local_deliveries(id)
            .iter()
            .find(|m| matches!(m, MmrMessage::Result { .. }))
        {
            decisions.push(*value);
        }
    }
    assert_eq!(decisions.len(), 3, "all three correct nodes must decide");
    assert!(decisions.iter().all(|v| *v), "the 2-out-of-3 majority value 1 must be decided");
}

/// Boundary: n = 3f exactly (one shy of 3f+1) is rejected at construction, not
/// silently accepted and left to fail at runtime.
#[test]
fn rejects_insufficient_node_count_at_construction() {
    let peers = ids(3);
    let err = MmrNode::new(peers[0].clone(), peers, 1).unwrap_err();
    assert_eq!(
        err,
        bft_lab::ConfigError::InsufficientNodes { n: 3, f: 1 },
        "n=3f exactly with f=1 must fail construction, not run and hang"
    );
}
