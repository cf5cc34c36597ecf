// Property tests: arbitrary connect/disconnect sequences must leave the
// incremental counters equal to a from-scratch recount of the chain tail.

use proptest::prelude::*;

use vbwatch_core::{
    BitCounters, CapturingNotifier, MonitorConfig, Network, TipChange, BlockVersionRecord,
    VersionBitsMonitor, WarningState, VERSIONBITS_TOP_BITS,
};

#[derive(Debug, Clone)]
enum Op {
    Connect(u32),
    Disconnect,
}

fn version_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![
        Just(VERSIONBITS_TOP_BITS),
        Just(4u32),
        (25u8..29).prop_map(|bit| VERSIONBITS_TOP_BITS | (1 << bit)),
        (0u32..(1 << 29)).prop_map(|bits| VERSIONBITS_TOP_BITS | bits),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => version_strategy().prop_map(Op::Connect),
        1 => Just(Op::Disconnect),
    ]
}

fn monitor(window: usize, threshold: u32) -> VersionBitsMonitor {
    let config = MonitorConfig {
        window_size: window,
        threshold,
        ..MonitorConfig::for_network(Network::Regtest)
    };
    VersionBitsMonitor::with_notifier(config, CapturingNotifier::new()).unwrap()
}

fn expected_counters(monitor: &VersionBitsMonitor, chain: &[u32]) -> BitCounters {
    let window = monitor.config().window_size;
    let start = chain.len().saturating_sub(window);
    let mut counters = BitCounters::new();
    for version in &chain[start..] {
        counters.add(monitor.detector().unknown_bits(*version));
    }
    counters
}

proptest! {
    #[test]
    fn prop_counters_match_recount(
        window in 1usize..12,
        threshold_seed in 0u32..100,
        ops in prop::collection::vec(op_strategy(), 0..200),
    ) {
        let threshold = threshold_seed % window as u32 + 1;
        let monitor = monitor(window, threshold);
        let mut chain: Vec<u32> = Vec::new();

        for op in ops {
            match op {
                Op::Connect(version) => {
                    monitor.on_connect(chain.len() as u64, version);
                    chain.push(version);
                }
                Op::Disconnect => {
                    if let Some(version) = chain.pop() {
                        monitor.on_disconnect(chain.len() as u64, version, &chain);
                    }
                }
            }

            let expected = expected_counters(&monitor, &chain);
            prop_assert_eq!(monitor.counters(), expected.clone());
            prop_assert!(monitor.counters_consistent());
            prop_assert!(!monitor.needs_rebuild());
            prop_assert_eq!(monitor.window_len(), chain.len().min(window));
            prop_assert_eq!(monitor.warning_state(), WarningState::evaluate(&expected, threshold));
        }
    }

    #[test]
    fn prop_disconnect_reconnect_is_identity(
        window in 1usize..16,
        prefix in prop::collection::vec(version_strategy(), 1..80),
        depth_seed in 0usize..80,
    ) {
        let threshold = (window as u32 / 2).max(1);
        let monitor = monitor(window, threshold);
        for (height, version) in prefix.iter().enumerate() {
            monitor.on_connect(height as u64, *version);
        }
        let counters = monitor.counters();
        let state = monitor.warning_state();

        let depth = depth_seed % prefix.len() + 1;
        let fork = prefix.len() - depth;
        let mut chain = prefix.clone();
        let disconnected: Vec<_> = (fork..prefix.len())
            .rev()
            .map(|h| BlockVersionRecord::new(h as u64, prefix[h]))
            .collect();
        let connected: Vec<_> = (fork..prefix.len())
            .map(|h| BlockVersionRecord::new(h as u64, prefix[h]))
            .collect();

        // One block at a time...
        for record in &disconnected {
            chain.pop();
            monitor.on_disconnect(record.height, record.version, &chain);
        }
        for record in &connected {
            monitor.on_connect(record.height, record.version);
            chain.push(record.version);
        }
        prop_assert_eq!(monitor.counters(), counters.clone());
        prop_assert_eq!(monitor.warning_state(), state.clone());

        // ...and as a single tip change.
        let change = TipChange { disconnected, connected };
        monitor.apply_tip_change(&change, &chain);
        prop_assert_eq!(monitor.counters(), counters);
        prop_assert_eq!(monitor.warning_state(), state);
        prop_assert!(!monitor.needs_rebuild());
    }
}
