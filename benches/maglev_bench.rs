//! Maglev balancer benchmarks
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use maglev_balance::{Balancer, BalanceStrategy, LoadStats, Node, NodeId, NodeManager, NodeStats};

fn build_manager(n: usize, weighted: bool) -> NodeManager {
    let mut m = NodeManager::new();
    for i in 0..n {
        let weight = weighted.then_some(10 + (i as u32 % 5) * 10);
        let mut node = Node::new(NodeId::Int(i as u64), weight);
        if weighted {
            node = node.with_slot_counting();
        }
        node = node.with_stats(NodeStats::Load(LoadStats::new(16)));
        m.push(node).unwrap();
    }
    m.ready_go();
    m
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("maglev_build");

    group.bench_function("build_unweighted_100_nodes_10007_slots", |b| {
        let nodes = build_manager(100, false);
        b.iter(|| {
            black_box(Balancer::new(
                clone_manager(&nodes),
                10007,
                BalanceStrategy::default(),
                false,
                16,
            ))
        })
    });

    group.bench_function("build_weighted_100_nodes_10007_slots", |b| {
        let nodes = build_manager(100, true);
        b.iter(|| {
            black_box(Balancer::new(
                clone_manager(&nodes),
                10007,
                BalanceStrategy::default(),
                false,
                16,
            ))
        })
    });
}

fn bench_pick(c: &mut Criterion) {
    let mut group = c.benchmark_group("maglev_pick");
    group.throughput(Throughput::Elements(1));

    let nodes = build_manager(100, false);
    let balancer = Balancer::new(nodes, 10007, BalanceStrategy::default(), false, 16);

    group.bench_function("pick_direct", |b| {
        let mut key = 0u64;
        b.iter(|| {
            key = key.wrapping_add(1);
            black_box(balancer.pick_direct(key))
        })
    });

    group.bench_function("pick_with_policy", |b| {
        let mut key = 0u64;
        b.iter(|| {
            key = key.wrapping_add(1);
            black_box(balancer.pick(key))
        })
    });
}

/// Benchmarks rebuild a manager per iteration since `NodeManager` isn't
/// `Clone`-cheap once populated; this reconstructs an identical sequence.
fn clone_manager(src: &NodeManager) -> NodeManager {
    let mut m = NodeManager::new();
    for n in src.iter() {
        let mut node = Node::new(n.id.clone(), n.weight);
        if n.weight.is_some() {
            node = node.with_slot_counting();
        }
        node = node.with_stats(NodeStats::Load(LoadStats::new(16)));
        m.push(node).unwrap();
    }
    m.ready_go();
    m
}

criterion_group!(benches, bench_build, bench_pick);
criterion_main!(benches);
