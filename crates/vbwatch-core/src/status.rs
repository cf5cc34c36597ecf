// Status surfaces: every read path renders the same snapshot, so the node,
// mining and network views can never disagree about the warning.

use crate::signal_window::BitCounters;
use crate::warning::WarningState;
use serde::Serialize;

/// Joins the mined warning and the externally supplied activation warning.
pub const WARNING_SEPARATOR: &str = "; ";

/// Independent read paths that expose the warning text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSurface {
    /// General node status (`errors`).
    Node,
    /// Mining status (`errors`).
    Mining,
    /// Network status (`warnings`).
    Network,
}

impl StatusSurface {
    pub const ALL: [StatusSurface; 3] = [StatusSurface::Node, StatusSurface::Mining, StatusSurface::Network];

    /// Name of the field carrying the warning text on this surface.
    pub fn field_name(&self) -> &'static str {
        match self {
            StatusSurface::Node | StatusSurface::Mining => "errors",
            StatusSurface::Network => "warnings",
        }
    }
}

/// Point-in-time copy of the monitor state, taken under one read lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: WarningState,
    pub activation_warning: Option<String>,
    pub tip_height: Option<u64>,
    pub window_len: usize,
    pub window_size: usize,
    pub threshold: u32,
    pub counters: BitCounters,
}

impl StatusSnapshot {
    /// Combined warning text; empty when nothing is raised.
    pub fn warning_text(&self) -> String {
        let parts: Vec<&str> = [Some(self.state.message()), self.activation_warning.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect();
        parts.join(WARNING_SEPARATOR)
    }

    pub fn text_for(&self, _surface: StatusSurface) -> String {
        self.warning_text()
    }

    /// Strongest unknown-bit signal in the window.
    pub fn strongest_signal(&self) -> Option<(u8, u32)> {
        self.counters.max()
    }

    pub fn texts(&self) -> StatusTexts {
        StatusTexts {
            node: self.text_for(StatusSurface::Node),
            mining: self.text_for(StatusSurface::Mining),
            network: self.text_for(StatusSurface::Network),
        }
    }
}

/// The three surface texts rendered from a single snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusTexts {
    pub node: String,
    pub mining: String,
    pub network: String,
}

impl StatusTexts {
    pub fn is_consistent(&self) -> bool {
        self.node == self.mining && self.mining == self.network
    }
}
