// Status queries served to operators. Each query pairs the chain height with
// the monitor's warning text under the chain read lock, and the combined
// report renders all three from a single snapshot.

use crate::chain::ActiveChain;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use vbwatch_core::{Network, StatusSnapshot, StatusSurface, VersionBitsMonitor};

/// General node status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub blocks: u64,
    pub errors: String,
}

/// Mining status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MiningInfo {
    pub blocks: u64,
    pub errors: String,
}

/// Network status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    pub network: Network,
    pub warnings: String,
}

/// Every surface plus the monitor details, taken at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub node: NodeInfo,
    pub mining: MiningInfo,
    pub network: NetworkInfo,
    pub monitor: StatusSnapshot,
}

#[derive(Clone)]
pub struct StatusService {
    chain: Arc<RwLock<ActiveChain>>,
    monitor: Arc<VersionBitsMonitor>,
}

impl StatusService {
    pub fn new(chain: Arc<RwLock<ActiveChain>>, monitor: Arc<VersionBitsMonitor>) -> Self {
        StatusService { chain, monitor }
    }

    fn read(&self) -> (u64, StatusSnapshot) {
        let chain = self.chain.read();
        (chain.height(), self.monitor.snapshot())
    }

    pub fn get_info(&self) -> NodeInfo {
        let (blocks, snapshot) = self.read();
        NodeInfo {
            blocks,
            errors: snapshot.text_for(StatusSurface::Node),
        }
    }

    pub fn get_mining_info(&self) -> MiningInfo {
        let (blocks, snapshot) = self.read();
        MiningInfo {
            blocks,
            errors: snapshot.text_for(StatusSurface::Mining),
        }
    }

    pub fn get_network_info(&self) -> NetworkInfo {
        let (_, snapshot) = self.read();
        NetworkInfo {
            network: self.monitor.config().network,
            warnings: snapshot.text_for(StatusSurface::Network),
        }
    }

    pub fn get_all(&self) -> StatusReport {
        let (blocks, snapshot) = self.read();
        StatusReport {
            node: NodeInfo {
                blocks,
                errors: snapshot.text_for(StatusSurface::Node),
            },
            mining: MiningInfo {
                blocks,
                errors: snapshot.text_for(StatusSurface::Mining),
            },
            network: NetworkInfo {
                network: self.monitor.config().network,
                warnings: snapshot.text_for(StatusSurface::Network),
            },
            monitor: snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::manager::ChainStateManager;
    use std::sync::Arc;
    use vbwatch_core::{CapturingNotifier, MonitorConfig, Network, VersionBitsMonitor, UNKNOWN_RULES_MINED};

    const SIGNAL_27: u32 = 0x2000_0000 | (1 << 27);

    fn regtest_manager() -> ChainStateManager {
        let config = MonitorConfig::for_network(Network::Regtest);
        let monitor = VersionBitsMonitor::with_notifier(config, CapturingNotifier::new()).unwrap();
        ChainStateManager::in_memory(Arc::new(monitor))
    }

    #[test]
    fn test_queries_start_clean() {
        let manager = regtest_manager();
        let status = manager.status_service();

        assert_eq!(status.get_info().blocks, 0);
        assert_eq!(status.get_info().errors, "");
        assert_eq!(status.get_mining_info().errors, "");
        assert_eq!(status.get_network_info().warnings, "");
        assert_eq!(status.get_network_info().network, Network::Regtest);
    }

    #[test]
    fn test_report_surfaces_agree() {
        let manager = regtest_manager();
        manager.mine(51, SIGNAL_27).unwrap();

        let report = manager.status_service().get_all();
        assert_eq!(report.node.blocks, 51);
        assert_eq!(report.node.errors, UNKNOWN_RULES_MINED);
        assert_eq!(report.mining.errors, report.node.errors);
        assert_eq!(report.network.warnings, report.node.errors);
        assert_eq!(report.monitor.strongest_signal(), Some((27, 51)));
    }

    #[test]
    fn test_activation_warning_reaches_every_query() {
        let manager = regtest_manager();
        manager.mine(51, SIGNAL_27).unwrap();
        manager
            .monitor()
            .set_activation_warning(Some("Warning: unknown new rules activated (versionbit 27)".into()));

        let expected = format!(
            "{}; Warning: unknown new rules activated (versionbit 27)",
            UNKNOWN_RULES_MINED
        );
        let status = manager.status_service();
        assert_eq!(status.get_info().errors, expected);
        assert_eq!(status.get_mining_info().errors, expected);
        assert_eq!(status.get_network_info().warnings, expected);
    }

    #[test]
    fn test_report_serializes_field_names() {
        let manager = regtest_manager();
        let json = serde_json::to_value(manager.status_service().get_all()).unwrap();

        assert_eq!(json["node"]["errors"], "");
        assert_eq!(json["mining"]["blocks"], 0);
        assert_eq!(json["network"]["network"], "regtest");
        assert_eq!(json["network"]["warnings"], "");
    }
}
