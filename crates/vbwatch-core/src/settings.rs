// MONITOR CONFIGURATION
// Layered settings (chain preset -> TOML file -> VBWATCH_* environment)
// resolved into a validated MonitorConfig.
//
// SAFETY INVARIANTS:
// 1. A MonitorConfig that passed validate() has 0 < threshold <= window_size
// 2. The marker never overlaps the 29 signal bits
// 3. The monitor refuses to start on any other configuration

use crate::chain_params::{ChainParams, Network};
use crate::version_bits::{
    SignalBits, UnknownBitDetector, SIGNAL_BITS_MASK, VERSIONBITS_TOP_BITS, VERSIONBITS_TOP_MASK,
    VERSION_BITS_COUNT,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Placeholder replaced by the sanitized message in the notify command.
pub const NOTIFY_PLACEHOLDER: &str = "%s";

/// Upper bound on the window; anything larger is almost certainly a typo.
pub const MAX_WINDOW_SIZE: usize = 1 << 20;

pub const ENV_PREFIX: &str = "VBWATCH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("window_size must be greater than zero")]
    EmptyWindow,

    #[error("window_size {0} exceeds the maximum of {1}")]
    WindowTooLarge(usize, usize),

    #[error("threshold must be at least one block")]
    ZeroThreshold,

    #[error("threshold {threshold} exceeds window_size {window}")]
    ThresholdExceedsWindow { threshold: u32, window: usize },

    #[error("threshold fraction {0} must be in (0, 1]")]
    InvalidFraction(f64),

    #[error("top_bits {top_bits:#010x} has bits outside top_bits_mask {mask:#010x}")]
    MarkerOutsideMask { top_bits: u32, mask: u32 },

    #[error("top_bits_mask {0:#010x} must be non-zero and must not cover signal bits 0..=28")]
    InvalidMarkerMask(u32),

    #[error("known deployment bit {0} is outside 0..=28")]
    InvalidDeploymentBit(u8),

    #[error("notify_command '{0}' has no %s placeholder")]
    MissingPlaceholder(String),

    #[error("failed to load settings: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Signaling threshold, either an absolute block count or a fraction of
/// the window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Count(u32),
    Fraction(f64),
}

impl Threshold {
    /// Absolute block count for a window of `window` blocks. Fractions round
    /// up, except that products within float error of an integer snap to it
    /// (0.51 of 100 is 51, not 52).
    pub fn resolve(&self, window: usize) -> Result<u32, ConfigError> {
        let count = match *self {
            Threshold::Count(count) => count,
            Threshold::Fraction(fraction) => {
                if !fraction.is_finite() || fraction <= 0.0 || fraction > 1.0 {
                    return Err(ConfigError::InvalidFraction(fraction));
                }
                let exact = fraction * window as f64;
                let nearest = exact.round();
                let blocks = if (exact - nearest).abs() < 1e-9 { nearest } else { exact.ceil() };
                blocks as u32
            }
        };

        if count == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if count as usize > window {
            return Err(ConfigError::ThresholdExceedsWindow {
                threshold: count,
                window,
            });
        }
        Ok(count)
    }
}

/// Raw, partially specified settings as read from file and environment.
/// Unset fields fall back to the network preset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub network: Option<Network>,
    pub window_size: Option<usize>,
    pub threshold: Option<Threshold>,
    pub top_bits: Option<u32>,
    pub top_bits_mask: Option<u32>,
    pub known_deployment_bits: Option<Vec<u8>>,
    pub notify_command: Option<String>,
}

impl MonitorSettings {
    /// Read settings from an optional TOML file, then overlay `VBWATCH_*`
    /// environment variables (e.g. `VBWATCH_WINDOW_SIZE=144`,
    /// `VBWATCH_KNOWN_DEPLOYMENT_BITS=0,28`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("known_deployment_bits"),
        );

        let settings = builder.build()?.try_deserialize::<MonitorSettings>()?;
        Ok(settings)
    }

    /// Settings whose fields take priority over `self`.
    pub fn overlay(mut self, other: MonitorSettings) -> Self {
        if other.network.is_some() {
            self.network = other.network;
        }
        if other.window_size.is_some() {
            self.window_size = other.window_size;
        }
        if other.threshold.is_some() {
            self.threshold = other.threshold;
        }
        if other.top_bits.is_some() {
            self.top_bits = other.top_bits;
        }
        if other.top_bits_mask.is_some() {
            self.top_bits_mask = other.top_bits_mask;
        }
        if other.known_deployment_bits.is_some() {
            self.known_deployment_bits = other.known_deployment_bits;
        }
        if other.notify_command.is_some() {
            self.notify_command = other.notify_command;
        }
        self
    }
}

/// Validated monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorConfig {
    pub network: Network,
    pub window_size: usize,
    pub threshold: u32,
    pub top_bits: u32,
    pub top_bits_mask: u32,
    pub known_bits: SignalBits,
    pub notify_command: Option<String>,
}

impl MonitorConfig {
    /// Preset for a network with no notify command.
    pub fn for_network(network: Network) -> Self {
        let params = ChainParams::for_network(network);
        MonitorConfig {
            network,
            window_size: params.warning_window,
            threshold: params.warning_threshold,
            top_bits: VERSIONBITS_TOP_BITS,
            top_bits_mask: VERSIONBITS_TOP_MASK,
            known_bits: params.known_bits(),
            notify_command: None,
        }
    }

    /// Resolve raw settings against the chosen network preset and validate.
    pub fn from_settings(settings: &MonitorSettings) -> Result<Self, ConfigError> {
        let network = settings.network.unwrap_or(Network::Main);
        let preset = Self::for_network(network);

        let window_size = settings.window_size.unwrap_or(preset.window_size);
        if window_size == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::WindowTooLarge(window_size, MAX_WINDOW_SIZE));
        }
        let threshold = settings
            .threshold
            .unwrap_or(Threshold::Count(preset.threshold))
            .resolve(window_size)?;

        let known_bits = match &settings.known_deployment_bits {
            Some(bits) => {
                if let Some(bad) = bits.iter().find(|bit| **bit >= VERSION_BITS_COUNT) {
                    return Err(ConfigError::InvalidDeploymentBit(*bad));
                }
                SignalBits::from_bits(bits.iter().copied())
            }
            None => preset.known_bits,
        };

        let notify_command = settings
            .notify_command
            .as_ref()
            .map(|cmd| cmd.trim().to_string())
            .filter(|cmd| !cmd.is_empty());

        let config = MonitorConfig {
            network,
            window_size,
            threshold,
            top_bits: settings.top_bits.unwrap_or(preset.top_bits),
            top_bits_mask: settings.top_bits_mask.unwrap_or(preset.top_bits_mask),
            known_bits,
            notify_command,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if self.window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::WindowTooLarge(self.window_size, MAX_WINDOW_SIZE));
        }
        Threshold::Count(self.threshold).resolve(self.window_size)?;

        if self.top_bits_mask == 0 || self.top_bits_mask & SIGNAL_BITS_MASK != 0 {
            return Err(ConfigError::InvalidMarkerMask(self.top_bits_mask));
        }
        if self.top_bits & !self.top_bits_mask != 0 {
            return Err(ConfigError::MarkerOutsideMask {
                top_bits: self.top_bits,
                mask: self.top_bits_mask,
            });
        }
        if let Some(cmd) = &self.notify_command {
            if !cmd.contains(NOTIFY_PLACEHOLDER) {
                return Err(ConfigError::MissingPlaceholder(cmd.clone()));
            }
        }
        Ok(())
    }

    pub fn detector(&self) -> UnknownBitDetector {
        UnknownBitDetector::new(self.top_bits, self.top_bits_mask, self.known_bits)
    }
}
