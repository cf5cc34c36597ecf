// JSON block store. Headers are the only persisted state: the monitor is
// rebuilt from them at every start.

use crate::block::BlockHeader;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use vbwatch_core::Network;

pub const BLOCKS_FILE: &str = "blocks.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt block store {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Block store belongs to network {found}, expected {expected}")]
    NetworkMismatch { expected: Network, found: Network },
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredChain {
    network: Network,
    headers: Vec<BlockHeader>,
}

#[derive(Debug, Clone)]
pub struct ChainStore {
    path: PathBuf,
    network: Network,
}

impl ChainStore {
    /// Store inside `datadir`, creating the directory if needed.
    pub fn open(datadir: &Path, network: Network) -> Result<Self, StoreError> {
        fs::create_dir_all(datadir).map_err(|source| StoreError::Io {
            path: datadir.to_path_buf(),
            source,
        })?;
        Ok(ChainStore {
            path: datadir.join(BLOCKS_FILE),
            network,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored headers, or an empty list when nothing has been written yet.
    pub fn load(&self) -> Result<Vec<BlockHeader>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No block store at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let stored: StoredChain = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        if stored.network != self.network {
            return Err(StoreError::NetworkMismatch {
                expected: self.network,
                found: stored.network,
            });
        }
        info!("Loaded {} headers from {}", stored.headers.len(), self.path.display());
        Ok(stored.headers)
    }

    /// Write all headers, replacing the file atomically.
    pub fn save(&self, headers: &[BlockHeader]) -> Result<(), StoreError> {
        let stored = StoredChain {
            network: self.network,
            headers: headers.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&stored).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!("Saved {} headers to {}", headers.len(), self.path.display());
        Ok(())
    }
}
