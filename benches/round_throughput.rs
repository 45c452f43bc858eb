use bft_lab::ben_or::{BenOrCommand, BenOrNode};
use bft_lab::brb::{BrbCommand, BrbNode};
use bft_lab::dev::InMemoryNetwork;
use bft_lab::ids::NodeId;
use criterion::{criterion_group, criterion_main, Criterion};

fn ids(n: usize) -> Vec<NodeId> {
    (0..n).map(|i| NodeId::new(i.to_string())).collect()
}

fn ben_or_unanimous_decision(c: &mut Criterion) {
    c.bench_function("ben_or_unanimous_4_nodes", |b| {
        b.iter(|| {
            let peers = ids(4);
            let mut net: InMemoryNetwork<BenOrNode> = InMemoryNetwork::new(peers.clone(), 1);
            for id in &peers {
                net.add_node(BenOrNode::new(id.clone(), peers.clone(), 1, 7).unwrap());
            }
            for id in &peers {
                net.local(id, BenOrCommand::Init(true));
            }
            net.run_until_quiescent(10_000)
        })
    });
}

fn brb_reliable_broadcast(c: &mut Criterion) {
    c.bench_function("brb_honest_broadcast_4_nodes", |b| {
        b.iter(|| {
            let peers = ids(4);
            let mut net: InMemoryNetwork<BrbNode<u64>> = InMemoryNetwork::new(peers.clone(), 1);
            for id in &peers {
                net.add_node(BrbNode::<u64>::new(id.clone(), peers.clone(), 1).unwrap());
            }
            net.local(&peers[0], BrbCommand::Init(42));
            net.run_until_quiescent(1_000)
        })
    });
}

criterion_group!(benches, ben_or_unanimous_decision, brb_reliable_broadcast);
criterion_main!(benches);
