use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::params::{PowParams, GENESIS_DATA};
use crate::pow::{PowError, ProofOfWork};
use crate::storage::StorageError;

/// A ledger entry.
///
/// Field order is the record layout on disk (bincode, fixed-width little-endian):
///   timestamp (i64) · data (u64 len + bytes) · prev_hash (u64 len + bytes)
///   · hash (u64 len + bytes) · nonce (i64)
///
/// Do not reorder fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Seconds since the Unix epoch when mining started
    pub timestamp: i64,
    /// Opaque caller payload
    pub data: Vec<u8>,
    /// Hash of the predecessor; empty only for genesis
    pub prev_hash: Vec<u8>,
    /// SHA-256 digest found by proof-of-work
    pub hash: Vec<u8>,
    pub nonce: i64,
}

impl Block {
    /// Mine a new block on top of `prev_hash`, stamped with the current time
    pub fn create(data: impl Into<Vec<u8>>, prev_hash: Vec<u8>, params: &PowParams) -> Result<Self, PowError> {
        Self::create_at(data, prev_hash, unix_now(), params)
    }

    /// Mine a new block with an explicit timestamp
    pub fn create_at(
        data: impl Into<Vec<u8>>,
        prev_hash: Vec<u8>,
        timestamp: i64,
        params: &PowParams,
    ) -> Result<Self, PowError> {
        let mut block = Block {
            timestamp,
            data: data.into(),
            prev_hash,
            hash: Vec::new(),
            nonce: 0,
        };
        let (nonce, hash) = ProofOfWork::new(&block, params).run()?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// Mine the first block of a chain
    pub fn create_genesis(params: &PowParams) -> Result<Self, PowError> {
        Self::create(GENESIS_DATA, Vec::new(), params)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        record_options().serialize(self).map_err(|e| StorageError::SerializeError(e.to_string()))
    }

    /// Decode a stored record. The whole buffer must be consumed.
    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        record_options().deserialize(bytes).map_err(|e| StorageError::SerializeError(e.to_string()))
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(&self.hash)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block [{}] prev=[{}] nonce={} ts={}",
            self.hash_hex(),
            hex::encode(&self.prev_hash),
            self.nonce,
            self.timestamp,
        )
    }
}

/// Fixed-width little-endian integers, no trailing bytes
fn record_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

fn unix_now() -> i64 {
    unix_seconds(SystemTime::now())
}

/// Signed seconds relative to the Unix epoch
fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}
