// === Signal Detection ===
pub mod version_bits;
pub mod signal_window;

// === Verdict & Surfaces ===
pub mod warning;
pub mod status;
pub mod notify;

// === Monitor ===
pub mod monitor;

// === Configuration ===
pub mod chain_params;
pub mod settings;

// === Re-exports for the chain manager and status handlers ===
pub use chain_params::{ChainParams, Deployment, Network};
pub use monitor::{NoHistory, TipChange, VersionBitsMonitor, VersionHistory};
pub use notify::{
    sanitize_message, CapturingNotifier, CommandNotifier, NotificationDispatcher, Notifier, NullNotifier,
};
pub use settings::{ConfigError, MonitorConfig, MonitorSettings, Threshold};
pub use signal_window::{BitCounters, SignalWindow, WindowError};
pub use status::{StatusSnapshot, StatusSurface, StatusTexts};
pub use version_bits::{BlockVersionRecord, SignalBits, UnknownBitDetector, VERSIONBITS_TOP_BITS};
pub use warning::{WarningState, UNKNOWN_RULES_MINED};
