// ACTIVE CHAIN
// Height-indexed headers of the current best chain
//
// SAFETY INVARIANTS:
// 1. headers[i].height == i
// 2. headers[i].prev_hash == headers[i - 1].hash
// 3. Genesis is never removed

use crate::block::BlockHeader;
use crate::store::StoreError;
use thiserror::Error;
use vbwatch_core::{BlockVersionRecord, VersionHistory};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Block {height} does not connect: expected parent {expected}, got {actual}")]
    UnknownParent {
        height: u64,
        expected: String,
        actual: String,
    },

    #[error("Block height {actual} does not follow parent height (expected {expected})")]
    BadHeight { expected: u64, actual: u64 },

    #[error("Block {0} hash does not match its contents")]
    BadHash(u64),

    #[error("Genesis block mismatch")]
    GenesisMismatch,

    #[error("Cannot disconnect the genesis block")]
    CannotDisconnectGenesis,

    #[error("Branch ending at height {branch_tip} does not beat the active tip {active_tip}")]
    NotBetter { branch_tip: u64, active_tip: u64 },

    #[error("Fork height {fork} is above the active tip {tip}")]
    ForkBeyondTip { fork: u64, tip: u64 },

    #[error("Empty branch")]
    EmptyBranch,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct ActiveChain {
    headers: Vec<BlockHeader>,
}

impl ActiveChain {
    pub fn new() -> Self {
        ActiveChain {
            headers: vec![BlockHeader::genesis()],
        }
    }

    /// Build from stored headers, checking every link.
    pub fn from_headers(headers: Vec<BlockHeader>) -> Result<Self, ChainError> {
        let mut chain = ActiveChain::new();
        let mut iter = headers.into_iter();
        match iter.next() {
            Some(genesis) if genesis == chain.headers[0] => {}
            Some(_) => return Err(ChainError::GenesisMismatch),
            None => return Ok(chain),
        }
        for header in iter {
            chain.push(header)?;
        }
        Ok(chain)
    }

    pub fn tip(&self) -> &BlockHeader {
        // Genesis is never removed, so there is always a tip.
        &self.headers[self.headers.len() - 1]
    }

    pub fn height(&self) -> u64 {
        self.tip().height
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn get(&self, height: u64) -> Option<&BlockHeader> {
        usize::try_from(height).ok().and_then(|h| self.headers.get(h))
    }

    pub fn headers(&self) -> &[BlockHeader] {
        &self.headers
    }

    /// Check that `header` extends `parent`.
    pub fn check_link(parent: &BlockHeader, header: &BlockHeader) -> Result<(), ChainError> {
        if header.height != parent.height + 1 {
            return Err(ChainError::BadHeight {
                expected: parent.height + 1,
                actual: header.height,
            });
        }
        if header.prev_hash != parent.hash {
            return Err(ChainError::UnknownParent {
                height: header.height,
                expected: parent.hash.clone(),
                actual: header.prev_hash.clone(),
            });
        }
        if !header.verify_hash() {
            return Err(ChainError::BadHash(header.height));
        }
        Ok(())
    }

    pub fn push(&mut self, header: BlockHeader) -> Result<(), ChainError> {
        Self::check_link(self.tip(), &header)?;
        self.headers.push(header);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<BlockHeader, ChainError> {
        if self.headers.len() <= 1 {
            return Err(ChainError::CannotDisconnectGenesis);
        }
        self.headers.pop().ok_or(ChainError::CannotDisconnectGenesis)
    }

    /// Highest height at which `other` agrees with this chain, comparing
    /// hashes. `other` must start at genesis.
    pub fn fork_point(&self, other: &[BlockHeader]) -> Option<u64> {
        self.headers
            .iter()
            .zip(other.iter())
            .take_while(|(a, b)| a.hash == b.hash)
            .last()
            .map(|(a, _)| a.height)
    }

    /// The last `count` blocks as version records, oldest first.
    pub fn tail_records(&self, count: usize) -> Vec<BlockVersionRecord> {
        let start = self.headers.len().saturating_sub(count);
        self.headers[start..]
            .iter()
            .map(|h| BlockVersionRecord::new(h.height, h.version))
            .collect()
    }
}

impl Default for ActiveChain {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionHistory for ActiveChain {
    fn version_at(&self, height: u64) -> Option<u32> {
        self.get(height).map(|header| header.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extend(chain: &mut ActiveChain, count: usize, version: u32, nonce: u64) {
        for _ in 0..count {
            let header = BlockHeader::child(chain.tip(), version, 0, nonce);
            chain.push(header).unwrap();
        }
    }

    #[test]
    fn test_new_chain_has_genesis() {
        let chain = ActiveChain::new();
        assert_eq!(chain.height(), 0);
        assert!(chain.tip().is_genesis());
    }

    #[test]
    fn test_push_rejects_bad_links() {
        let mut chain = ActiveChain::new();
        extend(&mut chain, 2, 0x2000_0000, 0);

        let orphan = BlockHeader::child(&BlockHeader::genesis(), 0x2000_0000, 0, 99);
        assert!(matches!(chain.push(orphan), Err(ChainError::BadHeight { .. })));

        let mut forged = BlockHeader::child(chain.tip(), 0x2000_0000, 0, 0);
        forged.version = 0x2800_0000;
        assert!(matches!(chain.push(forged), Err(ChainError::BadHash(3))));
    }

    #[test]
    fn test_pop_keeps_genesis() {
        let mut chain = ActiveChain::new();
        extend(&mut chain, 1, 0x2000_0000, 0);

        chain.pop().unwrap();
        assert!(matches!(chain.pop(), Err(ChainError::CannotDisconnectGenesis)));
    }

    #[test]
    fn test_fork_point_and_history() {
        let mut chain = ActiveChain::new();
        extend(&mut chain, 5, 0x2000_0000, 0);

        let mut other = chain.clone();
        other.pop().unwrap();
        other.pop().unwrap();
        extend(&mut other, 3, 0x2800_0000, 1);

        assert_eq!(chain.fork_point(other.headers()), Some(3));
        assert_eq!(chain.version_at(2), Some(0x2000_0000));
        assert_eq!(other.version_at(4), Some(0x2800_0000));
        assert_eq!(chain.version_at(99), None);
    }

    #[test]
    fn test_from_headers_round_trip() {
        let mut chain = ActiveChain::new();
        extend(&mut chain, 4, 0x2000_0000, 0);

        let rebuilt = ActiveChain::from_headers(chain.headers().to_vec()).unwrap();
        assert_eq!(rebuilt.headers(), chain.headers());
        assert_eq!(rebuilt.tail_records(2).len(), 2);
        assert_eq!(rebuilt.tail_records(2)[0].height, 3);
    }
}
