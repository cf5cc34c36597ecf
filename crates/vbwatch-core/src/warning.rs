// VERSION BITS: WARNING STATE MACHINE
// Level-sensitive verdict over the signal window counters
//
// SAFETY INVARIANTS:
// 1. The verdict is a pure function of (counters, threshold)
// 2. Warned iff some unknown bit count >= threshold
// 3. Ties resolve to the lowest bit index

use crate::signal_window::BitCounters;
use serde::Serialize;

/// Status text raised while unknown bits are being mined above threshold.
pub const UNKNOWN_RULES_MINED: &str =
    "Warning: Unknown block versions being mined! It's possible unknown rules are in effect";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WarningState {
    Clear,
    Warned { bit: u8, message: &'static str },
}

/// Discriminant of [`WarningState`], used for edge detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Clear,
    Warned,
}

impl WarningState {
    /// Derive the verdict from the current counters.
    pub fn evaluate(counters: &BitCounters, threshold: u32) -> Self {
        match counters.max() {
            Some((bit, count)) if count >= threshold => WarningState::Warned {
                bit,
                message: UNKNOWN_RULES_MINED,
            },
            _ => WarningState::Clear,
        }
    }

    pub fn kind(&self) -> VerdictKind {
        match self {
            WarningState::Clear => VerdictKind::Clear,
            WarningState::Warned { .. } => VerdictKind::Warned,
        }
    }

    pub fn is_warned(&self) -> bool {
        self.kind() == VerdictKind::Warned
    }

    /// Message to surface; empty when clear.
    pub fn message(&self) -> &'static str {
        match self {
            WarningState::Clear => "",
            WarningState::Warned { message, .. } => message,
        }
    }

    pub fn bit(&self) -> Option<u8> {
        match self {
            WarningState::Clear => None,
            WarningState::Warned { bit, .. } => Some(*bit),
        }
    }
}

impl Default for WarningState {
    fn default() -> Self {
        WarningState::Clear
    }
}
