use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Version of the genesis block (pre version-bits numeric version).
pub const GENESIS_VERSION: u32 = 1;

/// Genesis timestamp shared by every network (Jan 1 2014).
pub const GENESIS_TIME: i64 = 1_388_534_400;

const NULL_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Header fields the monitor and the chain manager care about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
    pub prev_hash: String,
    pub version: u32,
    pub time: i64,
    pub nonce: u64,
}

impl BlockHeader {
    pub fn genesis() -> Self {
        Self::build(0, NULL_HASH.to_string(), GENESIS_VERSION, GENESIS_TIME, 0)
    }

    /// Child of `parent` with the given version.
    pub fn child(parent: &BlockHeader, version: u32, time: i64, nonce: u64) -> Self {
        let time = time.max(parent.time + 1);
        Self::build(parent.height + 1, parent.hash.clone(), version, time, nonce)
    }

    fn build(height: u64, prev_hash: String, version: u32, time: i64, nonce: u64) -> Self {
        let mut header = BlockHeader {
            height,
            hash: String::new(),
            prev_hash,
            version,
            time,
            nonce,
        };
        header.hash = header.compute_hash();
        header
    }

    /// SHA-256 over the committed fields, hex encoded.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.version.to_le_bytes());
        hasher.update(self.time.to_le_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify_hash(&self) -> bool {
        self.compute_hash() == self.hash
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0 && self.prev_hash == NULL_HASH
    }

    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(16)]
    }
}
