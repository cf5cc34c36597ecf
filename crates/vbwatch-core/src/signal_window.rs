// VERSION BITS: SIGNAL WINDOW
// Sliding view over the last N blocks of the active chain with per-bit counts
//
// SAFETY INVARIANTS:
// 1. len(window) <= capacity at all times
// 2. counters[b] == number of entries whose unknown mask contains b
// 3. Every entry subtracts exactly the mask it added (stored alongside it)
// 4. A rejected update leaves the window untouched
// 5. Counters never go negative; an underflow is clamped and logged

use crate::version_bits::{BlockVersionRecord, SignalBits, VERSION_BITS_COUNT};
use log::{debug, error};
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("Block {height} does not extend window tip {tip}")]
    NonContiguous { height: u64, tip: u64 },

    #[error("Disconnected block {height} ({version:#010x}) is not the window tip {tip:?}")]
    TipMismatch {
        height: u64,
        version: u32,
        tip: Option<BlockVersionRecord>,
    },

    #[error("Restored block {height} does not sit directly before the window (expected {expected:?})")]
    BadRestore { height: u64, expected: Option<u64> },
}

/// Per-bit count of unknown-bit signals inside the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BitCounters([u32; VERSION_BITS_COUNT as usize]);

impl BitCounters {
    pub fn new() -> Self {
        BitCounters([0; VERSION_BITS_COUNT as usize])
    }

    pub fn get(&self, bit: u8) -> u32 {
        self.0.get(bit as usize).copied().unwrap_or(0)
    }

    pub fn add(&mut self, bits: SignalBits) {
        for bit in bits.iter() {
            self.0[bit as usize] += 1;
        }
    }

    /// Subtract one for each bit. Returns the bits that would have gone
    /// negative; those stay at zero.
    pub fn remove(&mut self, bits: SignalBits) -> SignalBits {
        let mut clamped = Vec::new();
        for bit in bits.iter() {
            let slot = &mut self.0[bit as usize];
            match slot.checked_sub(1) {
                Some(next) => *slot = next,
                None => clamped.push(bit),
            }
        }
        SignalBits::from_bits(clamped)
    }

    /// Highest count and the lowest bit reaching it, or `None` when every
    /// counter is zero.
    pub fn max(&self) -> Option<(u8, u32)> {
        let mut best: Option<(u8, u32)> = None;
        for (bit, count) in self.iter() {
            match best {
                Some((_, top)) if count <= top => {}
                _ => best = Some((bit, count)),
            }
        }
        best
    }

    /// Non-zero counters in ascending bit order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u32)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(bit, count)| (bit as u8, *count))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|count| *count == 0)
    }
}

impl Default for BitCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A window member together with the unknown bits it contributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowEntry {
    pub record: BlockVersionRecord,
    pub unknown: SignalBits,
}

impl WindowEntry {
    pub fn new(record: BlockVersionRecord, unknown: SignalBits) -> Self {
        WindowEntry { record, unknown }
    }
}

/// FIFO of the most recent `capacity` blocks.
#[derive(Debug, Clone)]
pub struct SignalWindow {
    capacity: usize,
    entries: VecDeque<WindowEntry>,
    counters: BitCounters,
}

impl SignalWindow {
    pub fn new(capacity: usize) -> Self {
        SignalWindow {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            counters: BitCounters::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn counters(&self) -> &BitCounters {
        &self.counters
    }

    pub fn tip(&self) -> Option<BlockVersionRecord> {
        self.entries.back().map(|entry| entry.record)
    }

    pub fn front(&self) -> Option<BlockVersionRecord> {
        self.entries.front().map(|entry| entry.record)
    }

    pub fn entries(&self) -> impl Iterator<Item = &WindowEntry> {
        self.entries.iter()
    }

    /// Height of the block that must come back into the window when the tip
    /// is disconnected. `None` while the window is not full (it already holds
    /// everything back to genesis) or when the front is genesis.
    pub fn restore_height(&self) -> Option<u64> {
        if !self.is_full() {
            return None;
        }
        self.entries.front().and_then(|entry| entry.record.height.checked_sub(1))
    }

    /// Append a newly connected block, evicting the oldest when full.
    pub fn connect(&mut self, entry: WindowEntry) -> Result<Option<WindowEntry>, WindowError> {
        if let Some(tip) = self.tip() {
            if entry.record.height != tip.height + 1 {
                return Err(WindowError::NonContiguous {
                    height: entry.record.height,
                    tip: tip.height,
                });
            }
        }

        self.entries.push_back(entry);
        self.counters.add(entry.unknown);

        let evicted = if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        if let Some(old) = evicted {
            self.subtract(old);
        }
        Ok(evicted)
    }

    /// Remove the tip block. `restore` is the block just before the window
    /// front (see [`SignalWindow::restore_height`]); pass `None` if it is
    /// unavailable, which leaves the window one entry short.
    pub fn disconnect(
        &mut self,
        height: u64,
        version: u32,
        restore: Option<WindowEntry>,
    ) -> Result<WindowEntry, WindowError> {
        let tip = self.tip();
        match tip {
            Some(record) if record.height == height && record.version == version => {}
            _ => {
                return Err(WindowError::TipMismatch {
                    height,
                    version,
                    tip,
                })
            }
        }

        let expected = self.restore_height();
        if let Some(entry) = restore {
            if Some(entry.record.height) != expected {
                return Err(WindowError::BadRestore {
                    height: entry.record.height,
                    expected,
                });
            }
        }

        let removed = match self.entries.pop_back() {
            Some(entry) => entry,
            None => {
                return Err(WindowError::TipMismatch {
                    height,
                    version,
                    tip: None,
                })
            }
        };
        self.subtract(removed);

        if let Some(entry) = restore {
            self.entries.push_front(entry);
            self.counters.add(entry.unknown);
        }
        Ok(removed)
    }

    /// Replace the whole window with the given blocks (oldest first); only
    /// the last `capacity` of them are kept.
    pub fn rebuild<I>(&mut self, entries: I) -> Result<(), WindowError>
    where
        I: IntoIterator<Item = WindowEntry>,
    {
        self.clear();
        for entry in entries {
            if let Err(e) = self.connect(entry) {
                self.clear();
                return Err(e);
            }
        }
        debug!(
            "Signal window rebuilt with {} blocks (tip {:?})",
            self.entries.len(),
            self.tip().map(|record| record.height)
        );
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.counters = BitCounters::new();
    }

    /// Counts recomputed from scratch, for consistency checks.
    pub fn recount(&self) -> BitCounters {
        let mut counters = BitCounters::new();
        for entry in &self.entries {
            counters.add(entry.unknown);
        }
        counters
    }

    fn subtract(&mut self, entry: WindowEntry) {
        let clamped = self.counters.remove(entry.unknown);
        if !clamped.is_empty() {
            error!(
                "Signal counter underflow at block {} for bits {:?}; clamped to zero",
                entry.record.height,
                clamped.iter().collect::<Vec<_>>()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(height: u64, bits: &[u8]) -> WindowEntry {
        let unknown = SignalBits::from_bits(bits.iter().copied());
        WindowEntry::new(
            BlockVersionRecord::new(height, 0x2000_0000 | unknown.mask()),
            unknown,
        )
    }

    fn fill(window: &mut SignalWindow, from: u64, to: u64, bits: &[u8]) {
        for height in from..to {
            window.connect(entry(height, bits)).unwrap();
        }
    }

    #[test]
    fn test_connect_counts_and_evicts() {
        let mut window = SignalWindow::new(3);
        fill(&mut window, 0, 3, &[27]);
        assert_eq!(window.counters().get(27), 3);

        let evicted = window.connect(entry(3, &[])).unwrap();
        assert_eq!(evicted.map(|e| e.record.height), Some(0));
        assert_eq!(window.counters().get(27), 2);
        assert_eq!(window.len(), 3);
        assert_eq!(window.front().map(|r| r.height), Some(1));
    }

    #[test]
    fn test_non_contiguous_connect_rejected() {
        let mut window = SignalWindow::new(3);
        fill(&mut window, 10, 12, &[4]);

        let err = window.connect(entry(14, &[4])).unwrap_err();
        assert_eq!(err, WindowError::NonContiguous { height: 14, tip: 11 });
        assert_eq!(window.counters().get(4), 2);
    }

    #[test]
    fn test_disconnect_restores_evicted_block() {
        let mut window = SignalWindow::new(3);
        fill(&mut window, 0, 1, &[9]);
        fill(&mut window, 1, 4, &[]);
        assert_eq!(window.counters().get(9), 0);
        assert_eq!(window.restore_height(), Some(0));

        let tip = window.tip().unwrap();
        window
            .disconnect(tip.height, tip.version, Some(entry(0, &[9])))
            .unwrap();

        assert_eq!(window.counters().get(9), 1);
        assert_eq!(window.front().map(|r| r.height), Some(0));
        assert_eq!(window.tip().map(|r| r.height), Some(2));
    }

    #[test]
    fn test_disconnect_young_chain_needs_no_restore() {
        let mut window = SignalWindow::new(5);
        fill(&mut window, 0, 3, &[1]);
        assert_eq!(window.restore_height(), None);

        let tip = window.tip().unwrap();
        window.disconnect(tip.height, tip.version, None).unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window.counters().get(1), 2);
    }

    #[test]
    fn test_disconnect_wrong_tip_rejected() {
        let mut window = SignalWindow::new(3);
        fill(&mut window, 0, 3, &[2]);

        assert!(matches!(
            window.disconnect(1, 0x2000_0004, None),
            Err(WindowError::TipMismatch { .. })
        ));
        assert!(matches!(
            window.disconnect(2, 0x2000_0000, None),
            Err(WindowError::TipMismatch { .. })
        ));
        assert_eq!(window.len(), 3);
        assert_eq!(window.counters().get(2), 3);
    }

    #[test]
    fn test_bad_restore_rejected_without_mutation() {
        let mut window = SignalWindow::new(2);
        fill(&mut window, 5, 7, &[3]);

        let err = window
            .disconnect(6, 0x2000_0008, Some(entry(2, &[3])))
            .unwrap_err();
        assert_eq!(err, WindowError::BadRestore { height: 2, expected: Some(4) });
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_underflow_is_clamped() {
        let mut counters = BitCounters::new();
        counters.add(SignalBits::from_bits([7]));

        let clamped = counters.remove(SignalBits::from_bits([7, 8]));
        assert_eq!(clamped.iter().collect::<Vec<_>>(), vec![8]);
        assert_eq!(counters.get(7), 0);
        assert_eq!(counters.get(8), 0);
    }

    #[test]
    fn test_max_prefers_lowest_bit_on_tie() {
        let mut counters = BitCounters::new();
        counters.add(SignalBits::from_bits([20, 6]));
        counters.add(SignalBits::from_bits([20, 6]));
        counters.add(SignalBits::from_bits([3]));

        assert_eq!(counters.max(), Some((6, 2)));
        assert_eq!(BitCounters::new().max(), None);
    }

    #[test]
    fn test_rebuild_keeps_last_capacity_blocks() {
        let mut window = SignalWindow::new(4);
        let entries: Vec<_> = (0..10u64)
            .map(|h| entry(h, if h % 2 == 0 { &[11] } else { &[] }))
            .collect();

        window.rebuild(entries).unwrap();
        assert_eq!(window.len(), 4);
        assert_eq!(window.front().map(|r| r.height), Some(6));
        assert_eq!(window.counters().get(11), 2);
        assert_eq!(window.counters(), &window.recount());
    }
}
