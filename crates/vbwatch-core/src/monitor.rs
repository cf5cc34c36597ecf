// VERSION BITS MONITOR
// Owns the signal window, verdict, alert edge and activation warning behind
// one read-write lock. Driven by the chain-state manager, read by status
// handlers.
//
// SAFETY INVARIANTS:
// 1. Every update (single block or full tip switch) holds the write lock for
//    its whole duration; readers never see partial counters
// 2. The verdict is recomputed after every update from the counters alone
// 3. Alerts are delivered after the lock is released and never block
// 4. Desynchronized input never panics; it latches needs_rebuild instead

use crate::notify::{AlertEdge, NotificationDispatcher, Notifier, PendingAlert};
use crate::settings::{ConfigError, MonitorConfig};
use crate::signal_window::{BitCounters, SignalWindow, WindowEntry};
use crate::status::{StatusSnapshot, StatusSurface};
use crate::version_bits::{BlockVersionRecord, UnknownBitDetector};
use crate::warning::WarningState;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Height -> version lookup over the active chain, used to refill the
/// window when its tip is disconnected.
pub trait VersionHistory {
    fn version_at(&self, height: u64) -> Option<u32>;
}

/// History that knows nothing; disconnects then shrink the window.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHistory;

impl VersionHistory for NoHistory {
    fn version_at(&self, _height: u64) -> Option<u32> {
        None
    }
}

impl VersionHistory for BTreeMap<u64, u32> {
    fn version_at(&self, height: u64) -> Option<u32> {
        self.get(&height).copied()
    }
}

impl VersionHistory for HashMap<u64, u32> {
    fn version_at(&self, height: u64) -> Option<u32> {
        self.get(&height).copied()
    }
}

/// Versions indexed by height, starting at genesis.
impl VersionHistory for [u32] {
    fn version_at(&self, height: u64) -> Option<u32> {
        usize::try_from(height).ok().and_then(|h| self.get(h).copied())
    }
}

impl VersionHistory for Vec<u32> {
    fn version_at(&self, height: u64) -> Option<u32> {
        self.as_slice().version_at(height)
    }
}

/// One switch of the active tip: blocks to disconnect (tip first), then
/// blocks to connect (lowest height first).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TipChange {
    pub disconnected: Vec<BlockVersionRecord>,
    pub connected: Vec<BlockVersionRecord>,
}

impl TipChange {
    pub fn extend(connected: Vec<BlockVersionRecord>) -> Self {
        TipChange {
            disconnected: Vec::new(),
            connected,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.disconnected.is_empty() && self.connected.is_empty()
    }
}

struct MonitorState {
    window: SignalWindow,
    verdict: WarningState,
    edge: AlertEdge,
    activation_warning: Option<String>,
    needs_rebuild: bool,
}

pub struct VersionBitsMonitor {
    config: MonitorConfig,
    detector: UnknownBitDetector,
    state: RwLock<MonitorState>,
    dispatcher: NotificationDispatcher,
}

impl VersionBitsMonitor {
    /// Monitor wired to the configured notify command (or none).
    pub fn new(config: MonitorConfig) -> Result<Self, ConfigError> {
        let dispatcher = NotificationDispatcher::from_command(config.notify_command.as_deref());
        Self::with_dispatcher(config, dispatcher)
    }

    pub fn with_notifier(config: MonitorConfig, notifier: Arc<dyn Notifier>) -> Result<Self, ConfigError> {
        Self::with_dispatcher(config, NotificationDispatcher::new(notifier))
    }

    fn with_dispatcher(config: MonitorConfig, dispatcher: NotificationDispatcher) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "Version bits monitor: network={} window={} threshold={} known_bits={:?}",
            config.network,
            config.window_size,
            config.threshold,
            config.known_bits.iter().collect::<Vec<_>>()
        );

        Ok(VersionBitsMonitor {
            detector: config.detector(),
            state: RwLock::new(MonitorState {
                window: SignalWindow::new(config.window_size),
                verdict: WarningState::Clear,
                edge: AlertEdge::new(),
                activation_warning: None,
                needs_rebuild: false,
            }),
            dispatcher,
            config,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn detector(&self) -> &UnknownBitDetector {
        &self.detector
    }

    /// A block was connected to the active tip.
    pub fn on_connect(&self, height: u64, version: u32) -> WarningState {
        let record = BlockVersionRecord::new(height, version);
        self.update("connect", |state, detector| {
            connect_locked(state, detector, record);
        })
    }

    /// The active tip was disconnected.
    pub fn on_disconnect(&self, height: u64, version: u32, history: &dyn VersionHistory) -> WarningState {
        let record = BlockVersionRecord::new(height, version);
        self.update("disconnect", |state, detector| {
            disconnect_locked(state, detector, record, history);
        })
    }

    /// Apply a whole reorg as one step.
    pub fn apply_tip_change(&self, change: &TipChange, history: &dyn VersionHistory) -> WarningState {
        self.update("tip change", |state, detector| {
            for record in &change.disconnected {
                disconnect_locked(state, detector, *record, history);
            }
            for record in &change.connected {
                connect_locked(state, detector, *record);
            }
            debug!(
                "Applied tip change: -{} +{} blocks",
                change.disconnected.len(),
                change.connected.len()
            );
        })
    }

    /// Replace the window with the tail of the loaded chain (oldest first).
    /// Used at cold start and after desynchronization.
    pub fn rebuild<I>(&self, records: I) -> WarningState
    where
        I: IntoIterator<Item = BlockVersionRecord>,
    {
        let capacity = self.config.window_size;
        self.update("rebuild", |state, detector| {
            let records: Vec<BlockVersionRecord> = records.into_iter().collect();
            let skip = records.len().saturating_sub(capacity);
            let entries = records
                .into_iter()
                .skip(skip)
                .map(|record| WindowEntry::new(record, detector.unknown_bits(record.version)));

            match state.window.rebuild(entries) {
                Ok(()) => state.needs_rebuild = false,
                Err(e) => {
                    error!("Signal window rebuild failed: {}", e);
                    state.needs_rebuild = true;
                }
            }
        })
    }

    /// Set or clear the warning produced by the external activation tracker.
    pub fn set_activation_warning(&self, warning: Option<String>) {
        let mut state = self.state.write();
        if state.activation_warning != warning {
            match &warning {
                Some(text) => warn!("{}", text),
                None => info!("Activation warning cleared"),
            }
            state.activation_warning = warning;
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let state = self.state.read();
        StatusSnapshot {
            state: state.verdict.clone(),
            activation_warning: state.activation_warning.clone(),
            tip_height: state.window.tip().map(|record| record.height),
            window_len: state.window.len(),
            window_size: self.config.window_size,
            threshold: self.config.threshold,
            counters: state.window.counters().clone(),
        }
    }

    pub fn status_text(&self, surface: StatusSurface) -> String {
        self.snapshot().text_for(surface)
    }

    pub fn warning_state(&self) -> WarningState {
        self.state.read().verdict.clone()
    }

    pub fn counters(&self) -> BitCounters {
        self.state.read().window.counters().clone()
    }

    pub fn tip_height(&self) -> Option<u64> {
        self.state.read().window.tip().map(|record| record.height)
    }

    pub fn window_len(&self) -> usize {
        self.state.read().window.len()
    }

    /// Oldest-first copy of the window contents.
    pub fn window_records(&self) -> Vec<BlockVersionRecord> {
        self.state.read().window.entries().map(|entry| entry.record).collect()
    }

    /// Set when an update could not be applied; the owner should call
    /// [`VersionBitsMonitor::rebuild`] from its chain.
    pub fn needs_rebuild(&self) -> bool {
        self.state.read().needs_rebuild
    }

    /// True when the incremental counters match a full recount.
    pub fn counters_consistent(&self) -> bool {
        let state = self.state.read();
        state.window.counters() == &state.window.recount()
    }

    fn update<F>(&self, what: &str, apply: F) -> WarningState
    where
        F: FnOnce(&mut MonitorState, &UnknownBitDetector),
    {
        let (verdict, alert) = {
            let mut state = self.state.write();
            apply(&mut *state, &self.detector);

            let verdict = WarningState::evaluate(state.window.counters(), self.config.threshold);
            if verdict != state.verdict {
                log_transition(what, &state.verdict, &verdict, state.window.counters());
            }
            let alert: Option<PendingAlert> = state.edge.observe(&verdict);
            state.verdict = verdict.clone();
            (verdict, alert)
        };

        if let Some(alert) = alert {
            self.dispatcher.dispatch(&alert);
        }
        verdict
    }
}

fn connect_locked(state: &mut MonitorState, detector: &UnknownBitDetector, record: BlockVersionRecord) {
    let entry = WindowEntry::new(record, detector.unknown_bits(record.version));
    if let Err(e) = state.window.connect(entry) {
        error!("Signal window rejected connect: {}", e);
        state.needs_rebuild = true;
    }
}

fn disconnect_locked(
    state: &mut MonitorState,
    detector: &UnknownBitDetector,
    record: BlockVersionRecord,
    history: &dyn VersionHistory,
) {
    let restore = match state.window.restore_height() {
        Some(height) => match history.version_at(height) {
            Some(version) => Some(WindowEntry::new(
                BlockVersionRecord::new(height, version),
                detector.unknown_bits(version),
            )),
            None => {
                warn!("Block {} needed to refill the signal window is unavailable", height);
                state.needs_rebuild = true;
                None
            }
        },
        None => None,
    };

    if let Err(e) = state.window.disconnect(record.height, record.version, restore) {
        error!("Signal window rejected disconnect: {}", e);
        state.needs_rebuild = true;
    }
}

fn log_transition(what: &str, before: &WarningState, after: &WarningState, counters: &BitCounters) {
    match after {
        WarningState::Warned { bit, message } => {
            let count = counters.get(*bit);
            if before.is_warned() {
                debug!("Strongest unknown bit is now {} ({} blocks) after {}", bit, count, what);
            } else {
                warn!("{} (bit {} signaled by {} blocks)", message, bit, count);
            }
        }
        WarningState::Clear => info!("Unknown version bits warning cleared after {}", what),
    }
}
