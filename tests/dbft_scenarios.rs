//! Multi-valued BFT end-to-end scenario.

#![cfg(feature = "dev")]

use bft_lab::dbft::{DbftCommand, DbftMessage, DbftNode};
use bft_lab::dev::InMemoryNetwork;
use bft_lab::ids::NodeId;

fn ids(n: usize) -> Vec<NodeId> {
    (0..n).map(|i| NodeId::new(i.to_string())).collect()
}

/// n=4, f=1; proposals a, b, c from three correct nodes, silence from the
/// fourth. All correct nodes must deliver the same `RESULT{x}`, with `x` one of
/// the proposed values (the smallest-index instance that decided 1).
#[test]
fn s6_agrees_on_one_proposal_despite_one_silent_node() {
    let peers = ids(4);
    let correct = &peers[..3];

    let mut net: InMemoryNetwork<DbftNode<char>> = InMemoryNetwork::new(peers.clone(), 21);
    for id in correct {
        net.add_node(DbftNode::<char>::new(id.clone(), peers.clone(), 1).unwrap());
    }

    net.local(&peers[0], DbftCommand::Init('a'));
    net.local(&peers[1], DbftCommand::Init('b'));
    net.local(&peers[2], DbftCommand::Init('c'));
    // peers[3] never proposes and is never added to the network.

    net.run_until_quiescent(200_000);

    let mut decisions = Vec::new();
    for id in correct {
        if let Some(DbftMessage::Result(value)) = net
            .local_deliveries(id)
            .iter()
            .find(|m| matches!(m, DbftMessage::Result(_)))
        {
            decisions.push(*value);
        }
    }
    assert_eq!(decisions.len(), correct.len(), "every correct node must decide");
    let first = decisions[0];
    assert!(decisions.iter().all(|v| *v == first), "all correct nodes must agree on the same proposal");
    assert!(['a', 'b', 'c'].contains(&first));
}
