// === Chain ===
pub mod block;
pub mod chain;
pub mod store;

// === Manager & Queries ===
pub mod manager;
pub mod status;

pub use block::BlockHeader;
pub use chain::{ActiveChain, ChainError};
pub use manager::ChainStateManager;
pub use status::{MiningInfo, NetworkInfo, NodeInfo, StatusReport, StatusService};
pub use store::{ChainStore, StoreError, BLOCKS_FILE};
