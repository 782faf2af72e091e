//! Determinism tests: the same root seed must reproduce the same run.
//!
//! The random streams are process-wide, so these tests are serialized.
//! Without real node processes attached the observable randomness is in
//! node firmware seeds and failure scheduling; both must be byte-for-byte
//! repeatable for a fixed root seed and must actually change when the seed
//! changes.

use otsim_runner::{
    Dispatcher, FailTime, GoRequest, NodeConfig, NopCallbackHandler, NopVisualizer, SimConfig,
};
use serial_test::serial;

/// Fingerprint of everything seed-dependent in a short headless run.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RunFingerprint {
    node_seeds: Vec<u32>,
    failed_at_end: Vec<bool>,
    events_processed: u64,
}

fn run_scenario(root_seed: u64) -> RunFingerprint {
    let config = SimConfig {
        listen_port: 0,
        radio_model: "Ideal".to_string(),
        speed: 1e9,
        random_seed: root_seed,
        ..Default::default()
    };
    let (mut dispatcher, _handle) = Dispatcher::new(
        config,
        Box::new(NopCallbackHandler),
        Box::new(NopVisualizer),
    )
    .expect("dispatcher starts");

    let mut ids = Vec::new();
    for i in 0..8 {
        let config = NodeConfig {
            fail_time: FailTime {
                fail_duration_us: 5_000_000,
                fail_interval_us: 60_000_000,
            },
            ..NodeConfig::at(100.0 + f64::from(i) * 50.0, 100.0)
        };
        ids.push(dispatcher.add_node(&config).expect("node created"));
    }

    // Ten simulated minutes in 10 s slices, so failure wakes are processed
    // throughout the run instead of the clock jumping straight to the end.
    for _ in 0..60 {
        dispatcher.drive(GoRequest {
            duration_us: 10_000_000,
            done: None,
        });
    }

    RunFingerprint {
        node_seeds: ids
            .iter()
            .map(|&id| dispatcher.node(id).unwrap().seed)
            .collect(),
        failed_at_end: ids
            .iter()
            .map(|&id| dispatcher.node(id).unwrap().is_failed())
            .collect(),
        events_processed: dispatcher.counters().events_processed,
    }
}

#[test]
#[serial]
fn same_seed_reproduces_the_run() {
    let first = run_scenario(12345);
    let second = run_scenario(12345);
    let third = run_scenario(12345);
    assert_eq!(first, second);
    assert_eq!(second, third);
}

#[test]
#[serial]
fn different_seeds_diverge() {
    let first = run_scenario(1);
    let second = run_scenario(2);
    // Node seeds come straight off the seeded stream; a collision across
    // eight draws of two different streams is not a thing.
    assert_ne!(first.node_seeds, second.node_seeds);
}

#[test]
#[serial]
fn failure_cycles_happened_at_all() {
    let fingerprint = run_scenario(99);
    // Each node cycles through failure/recovery wakes across the run; the
    // dispatcher must have processed a healthy number of them.
    assert!(
        fingerprint.events_processed >= 8,
        "only {} events processed",
        fingerprint.events_processed
    );
}
