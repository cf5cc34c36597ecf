// CHAIN STATE MANAGER
// Owns the active chain and drives the version bits monitor on every
// connect, disconnect and tip switch. Persists headers after each local
// change; syncing from the store only reads it.
//
// SAFETY INVARIANTS:
// 1. Lock order is always chain -> monitor; the monitor is only driven while
//    the chain write lock is held, so readers pairing the two never see a
//    height from one update and a warning from another
// 2. A tip switch reaches the monitor as one TipChange, never as separate
//    disconnects and connects
// 3. Blocks are validated before any state is touched
// 4. A latched needs_rebuild is resolved from the chain inside the same
//    write section that latched it
// 5. Sync paths never write the store

use crate::block::BlockHeader;
use crate::chain::{ActiveChain, ChainError};
use crate::status::StatusService;
use crate::store::ChainStore;
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use vbwatch_core::{BlockVersionRecord, TipChange, VersionBitsMonitor, WarningState};

pub struct ChainStateManager {
    chain: Arc<RwLock<ActiveChain>>,
    monitor: Arc<VersionBitsMonitor>,
    store: Option<ChainStore>,
}

impl ChainStateManager {
    /// Load the chain from `datadir` (creating genesis on first use) and
    /// rebuild the monitor from its tail.
    pub fn open(datadir: &Path, monitor: Arc<VersionBitsMonitor>) -> Result<Self, ChainError> {
        let store = ChainStore::open(datadir, monitor.config().network)?;
        let headers = store.load()?;
        let fresh = headers.is_empty();
        let chain = ActiveChain::from_headers(headers)?;
        if fresh {
            store.save(chain.headers())?;
            info!("[ChainState] Created new chain at {}", store.path().display());
        }

        let manager = ChainStateManager {
            chain: Arc::new(RwLock::new(chain)),
            monitor,
            store: Some(store),
        };
        manager.rebuild_monitor();
        Ok(manager)
    }

    /// Manager with no backing store, starting from genesis.
    pub fn in_memory(monitor: Arc<VersionBitsMonitor>) -> Self {
        let manager = ChainStateManager {
            chain: Arc::new(RwLock::new(ActiveChain::new())),
            monitor,
            store: None,
        };
        manager.rebuild_monitor();
        manager
    }

    pub fn monitor(&self) -> &Arc<VersionBitsMonitor> {
        &self.monitor
    }

    pub fn status_service(&self) -> StatusService {
        StatusService::new(self.chain.clone(), self.monitor.clone())
    }

    pub fn height(&self) -> u64 {
        self.chain.read().height()
    }

    pub fn tip(&self) -> BlockHeader {
        self.chain.read().tip().clone()
    }

    pub fn headers(&self) -> Vec<BlockHeader> {
        self.chain.read().headers().to_vec()
    }

    /// Mine `count` blocks with the given version on top of the tip.
    pub fn mine(&self, count: usize, version: u32) -> Result<WarningState, ChainError> {
        let mut state = self.monitor.warning_state();
        for _ in 0..count {
            let header = BlockHeader::child(&self.tip(), version, Utc::now().timestamp(), 0);
            state = self.connect_block(header)?;
        }
        info!(
            "[ChainState] Mined {} blocks with version {:#010x}, tip now {}",
            count,
            version,
            self.height()
        );
        Ok(state)
    }

    /// Validate and connect one block on top of the active tip.
    pub fn connect_block(&self, header: BlockHeader) -> Result<WarningState, ChainError> {
        let state = {
            let mut chain = self.chain.write();
            let (height, version) = (header.height, header.version);
            chain.push(header)?;
            let state = self.monitor.on_connect(height, version);
            self.resolve_rebuild(&chain).unwrap_or(state)
        };
        self.persist()?;
        Ok(state)
    }

    /// Disconnect the active tip. Genesis cannot be disconnected.
    pub fn disconnect_tip(&self) -> Result<BlockHeader, ChainError> {
        let removed = {
            let mut chain = self.chain.write();
            let removed = chain.pop()?;
            self.monitor.on_disconnect(removed.height, removed.version, &*chain);
            self.resolve_rebuild(&chain);
            removed
        };
        debug!("[ChainState] Disconnected block {} ({})", removed.height, removed.short_hash());
        self.persist()?;
        Ok(removed)
    }

    /// Build `count` blocks on top of the active block at `fork_height`
    /// without connecting them. Nonces differ from every active block so the
    /// branch never collides with the chain it replaces.
    pub fn build_branch(&self, fork_height: u64, count: usize, version: u32) -> Result<Vec<BlockHeader>, ChainError> {
        let chain = self.chain.read();
        let mut parent = chain
            .get(fork_height)
            .cloned()
            .ok_or(ChainError::ForkBeyondTip {
                fork: fork_height,
                tip: chain.height(),
            })?;
        let salt = chain.headers().iter().map(|h| h.nonce).max().unwrap_or(0) + 1;

        let mut branch = Vec::with_capacity(count);
        for _ in 0..count {
            let header = BlockHeader::child(&parent, version, Utc::now().timestamp(), salt);
            parent = header.clone();
            branch.push(header);
        }
        Ok(branch)
    }

    /// Switch to `branch` if it makes a longer chain than the active one.
    pub fn reorganize(&self, branch: Vec<BlockHeader>) -> Result<WarningState, ChainError> {
        let first = branch.first().ok_or(ChainError::EmptyBranch)?;
        let fork = first.height.checked_sub(1).ok_or(ChainError::GenesisMismatch)?;
        let state = self.switch_to(fork, branch, true)?;
        self.persist()?;
        Ok(state)
    }

    /// Align with headers written by another process. The stored chain is
    /// authoritative, so it may also be shorter than ours. Rolling back and
    /// switching branches are both one tip change. Nothing is written back.
    pub fn sync_from(&self, headers: &[BlockHeader]) -> Result<Option<WarningState>, ChainError> {
        let stored_tip = match headers.last() {
            Some(tip) => tip,
            None => return Ok(None),
        };
        let fork = {
            let chain = self.chain.read();
            if chain.tip().hash == stored_tip.hash {
                return Ok(None);
            }
            chain.fork_point(headers).ok_or(ChainError::GenesisMismatch)?
        };

        let branch: Vec<BlockHeader> = headers.iter().filter(|h| h.height > fork).cloned().collect();
        self.switch_to(fork, branch, false).map(Some)
    }

    /// Reload headers from the store and align with them.
    pub fn sync_from_store(&self) -> Result<Option<WarningState>, ChainError> {
        match &self.store {
            Some(store) => {
                let headers = store.load()?;
                self.sync_from(&headers)
            }
            None => Ok(None),
        }
    }

    /// Replace everything above `fork` with `branch` (possibly empty) as one
    /// tip change.
    fn switch_to(&self, fork: u64, branch: Vec<BlockHeader>, require_better: bool) -> Result<WarningState, ChainError> {
        if require_better && branch.is_empty() {
            return Err(ChainError::EmptyBranch);
        }

        let state = {
            let mut chain = self.chain.write();
            let active_tip = chain.height();
            if fork > active_tip {
                return Err(ChainError::ForkBeyondTip { fork, tip: active_tip });
            }
            let branch_tip = fork + branch.len() as u64;
            if require_better && branch_tip <= active_tip {
                return Err(ChainError::NotBetter { branch_tip, active_tip });
            }

            let mut parent = chain.get(fork).cloned().ok_or(ChainError::ForkBeyondTip { fork, tip: active_tip })?;
            for header in &branch {
                ActiveChain::check_link(&parent, header)?;
                parent = header.clone();
            }

            let change = TipChange {
                disconnected: chain.headers()[(fork + 1) as usize..]
                    .iter()
                    .rev()
                    .map(|h| BlockVersionRecord::new(h.height, h.version))
                    .collect(),
                connected: branch.iter().map(|h| BlockVersionRecord::new(h.height, h.version)).collect(),
            };

            // The window refills from blocks of the chain being left, so the
            // monitor sees it before the headers are swapped.
            let state = self.monitor.apply_tip_change(&change, &*chain);
            while chain.height() > fork {
                chain.pop()?;
            }
            for header in branch {
                chain.push(header)?;
            }

            info!(
                "[ChainState] Reorganized at fork {}: -{} +{} blocks, tip now {}",
                fork,
                change.disconnected.len(),
                change.connected.len(),
                chain.height()
            );
            self.resolve_rebuild(&chain).unwrap_or(state)
        };
        Ok(state)
    }

    /// Called with the chain write lock held. Returns the rebuilt verdict
    /// when the monitor had latched needs_rebuild.
    fn resolve_rebuild(&self, chain: &ActiveChain) -> Option<WarningState> {
        if !self.monitor.needs_rebuild() {
            return None;
        }
        warn!("[ChainState] Version bits monitor out of sync, rebuilding from the active chain");
        Some(self.rebuild_from(chain))
    }

    fn rebuild_monitor(&self) {
        let chain = self.chain.read();
        self.rebuild_from(&chain);
    }

    fn rebuild_from(&self, chain: &ActiveChain) -> WarningState {
        let records = chain.tail_records(self.monitor.config().window_size);
        let state = self.monitor.rebuild(records);
        debug!("[ChainState] Monitor rebuilt at height {}: {:?}", chain.height(), state.kind());
        state
    }

    /// Write the active chain to the store, if any.
    pub fn persist(&self) -> Result<(), ChainError> {
        if let Some(store) = &self.store {
            store.save(self.chain.read().headers())?;
        }
        Ok(())
    }
}
