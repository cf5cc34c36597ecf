// Chain presets: warning window defaults and the deployment table that
// decides which version bits count as known.

use crate::version_bits::SignalBits;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A soft-fork deployment bound to one version bit. Only the bit matters
/// here; activation timing belongs to the deployment tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub name: String,
    pub bit: u8,
}

impl Deployment {
    fn new(name: &str, bit: u8) -> Self {
        Deployment {
            name: name.to_string(),
            bit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Main,
    Test,
    Regtest,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Main => "main",
            Network::Test => "test",
            Network::Regtest => "regtest",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Ok(Network::Main),
            "test" | "testnet" => Ok(Network::Test),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

/// Per-network defaults for the unknown-rules monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainParams {
    pub network: Network,
    /// Blocks inspected by the unknown-bits warning.
    pub warning_window: usize,
    /// Signaling blocks (per bit) needed to raise the warning.
    pub warning_threshold: u32,
    pub deployments: Vec<Deployment>,
}

const MAIN_WINDOW: usize = 2016;
const MAIN_THRESHOLD: u32 = 1916; // 95% of 2016

impl ChainParams {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Main => Self::main(),
            Network::Test => Self::test(),
            Network::Regtest => Self::regtest(),
        }
    }

    pub fn main() -> Self {
        ChainParams {
            network: Network::Main,
            warning_window: MAIN_WINDOW,
            warning_threshold: MAIN_THRESHOLD,
            deployments: vec![Deployment::new("csv", 0), Deployment::new("testdummy", 28)],
        }
    }

    pub fn test() -> Self {
        ChainParams {
            network: Network::Test,
            ..Self::main()
        }
    }

    pub fn regtest() -> Self {
        let mut deployments = vec![Deployment::new("csv", 0)];
        deployments.extend((1u8..=24).map(|bit| Deployment::new(&format!("bip135test{}", bit), bit)));
        deployments.push(Deployment::new("testdummy", 28));

        ChainParams {
            network: Network::Regtest,
            warning_window: 100,
            warning_threshold: 51,
            deployments,
        }
    }

    /// Bits reserved by the deployment table.
    pub fn known_bits(&self) -> SignalBits {
        SignalBits::from_bits(self.deployments.iter().map(|d| d.bit))
    }

    pub fn deployment(&self, name: &str) -> Option<&Deployment> {
        self.deployments.iter().find(|d| d.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_known_bits() {
        let params = ChainParams::main();
        let known = params.known_bits();

        assert!(known.contains(0));
        assert!(known.contains(28));
        assert!(!known.contains(27));
        assert_eq!(known.len(), 2);
    }

    #[test]
    fn test_regtest_leaves_high_bits_unassigned() {
        let params = ChainParams::regtest();
        let known = params.known_bits();

        assert_eq!(params.warning_window, 100);
        assert_eq!(params.warning_threshold, 51);
        for bit in 0..=24 {
            assert!(known.contains(bit), "bit {} should be known", bit);
        }
        for bit in 25..=27 {
            assert!(!known.contains(bit), "bit {} should be free", bit);
        }
        assert_eq!(params.deployment("bip135test7").map(|d| d.bit), Some(7));
        assert!(params.deployment("bip135test25").is_none());
    }

    #[test]
    fn test_network_parsing() {
        assert_eq!("mainnet".parse::<Network>(), Ok(Network::Main));
        assert_eq!("REGTEST".parse::<Network>(), Ok(Network::Regtest));
        assert!("signet".parse::<Network>().is_err());
    }
}
