//! Routing performance benchmarks
//!
//! Benchmarks for the per-update hot paths:
//! - Q-learning updates and table merges
//! - PRoPHET aging and transitivity
//! - Replica budget splits
//!
//! Run with: cargo bench -p ferry-dtn

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::collections::{BTreeMap, BTreeSet};

use ferry_core::{HostAddress, MessageId};
use ferry_dtn::{CopyLedger, ProphetConfig, ProphetState};
use ferry_learning::{Action, ContextState, QLearningAgent, QLearningConfig, QTable};

// ============================================================================
// Fixtures
// ============================================================================

fn states(count: u32) -> Vec<ContextState> {
    (0..count)
        .map(|i| {
            let f = f64::from(i % 100) / 100.0;
            ContextState::new(f, 1.0 - f, i % 12, f / 2.0, f / 3.0)
        })
        .collect()
}

fn populated_table(count: u32) -> QTable {
    let mut agent = QLearningAgent::new(QLearningConfig::default(), 7);
    let all = states(count);
    for (i, state) in all.iter().enumerate() {
        let next = all[(i + 1) % all.len()];
        agent.update(*state, Action::ALL[i % 3], 0.5, &next, 0.0);
    }
    agent.table().clone()
}

// ============================================================================
// Q-Learning
// ============================================================================

fn bench_q_learning(c: &mut Criterion) {
    let mut group = c.benchmark_group("q_learning");

    let all = states(500);
    group.bench_function("update_500_states", |b| {
        let mut agent = QLearningAgent::new(QLearningConfig::default(), 1);
        b.iter(|| {
            for (i, state) in all.iter().enumerate() {
                agent.update(*state, Action::Forward, 1.0, &all[(i + 1) % all.len()], 0.0);
            }
        })
    });

    group.bench_function("choose_action", |b| {
        let mut agent = QLearningAgent::new(QLearningConfig::default(), 1);
        agent.sync_with(&populated_table(500));
        b.iter(|| {
            for state in &all {
                black_box(agent.choose_action(state));
            }
        })
    });

    let theirs = populated_table(1000);
    group.bench_function("merge_1000_states", |b| {
        b.iter(|| {
            let mut agent = QLearningAgent::new(QLearningConfig::default(), 2);
            agent.sync_with(black_box(&theirs));
            black_box(agent.table().len())
        })
    });

    group.finish();
}

// ============================================================================
// PRoPHET
// ============================================================================

fn bench_prophet_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("prophet");

    let peer_table: BTreeMap<HostAddress, f64> = (0..200)
        .map(|i| (HostAddress(i), f64::from(i) / 200.0))
        .collect();

    group.bench_function("encounter_and_transitive_200", |b| {
        b.iter(|| {
            let mut state = ProphetState::new(HostAddress(999), ProphetConfig::default());
            state.encounter(HostAddress(1), 0.0);
            state.transitive_update(HostAddress(1), black_box(&peer_table), 0.0);
            black_box(state.known_destinations())
        })
    });

    group.bench_function("aging_200", |b| {
        let mut state = ProphetState::new(HostAddress(999), ProphetConfig::default());
        state.encounter(HostAddress(1), 0.0);
        state.transitive_update(HostAddress(1), &peer_table, 0.0);
        let mut now = 0.0;
        b.iter(|| {
            now += 30.0;
            state.age_all(black_box(now));
        })
    });

    group.finish();
}

// ============================================================================
// Replica Budget
// ============================================================================

fn bench_copy_ledger(c: &mut Criterion) {
    let mut group = c.benchmark_group("copies");

    let ids: Vec<MessageId> = (0..1000).map(|i| MessageId::new(format!("M{i}"))).collect();
    let contacts_a: BTreeSet<HostAddress> = (0..50).map(HostAddress).collect();
    let contacts_b: BTreeSet<HostAddress> = (25..90).map(HostAddress).collect();

    group.bench_function("split_1000", |b| {
        b.iter(|| {
            let mut ledger = CopyLedger::new(16);
            for id in &ids {
                let remaining = ledger.register(id);
                let ceiling =
                    CopyLedger::adaptive_limit(remaining, 16, &contacts_a, &contacts_b, 100);
                black_box(ledger.forward_half(id, remaining, ceiling));
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_q_learning,
    bench_prophet_operations,
    bench_copy_ledger,
);

criterion_main!(benches);
