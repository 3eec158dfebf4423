//! SHA-256 proof-of-work for powchain blocks.
//!
//! A block is admitted when
//!
//!   SHA256(prev_hash ‖ data ‖ hex(timestamp) ‖ hex(target_bits) ‖ hex(nonce))
//!
//! read as a big-endian 256-bit unsigned integer is strictly below
//! `2^(256 - target_bits)`. The search starts at nonce 0 and walks upward
//! one step at a time on the calling thread.
//!
//! The preimage layout is part of the on-disk format: every stored block was
//! mined against it, so changing it invalidates the whole chain.

use num_bigint::BigUint;
use num_traits::One;
use sha2::{Digest, Sha256};

use crate::core::params::PowParams;
use crate::core::types::Block;

/// Receives every mining attempt, solved or not
pub trait MiningObserver {
    fn on_attempt(&mut self, nonce: i64, hash: &[u8; 32], solved: bool);
}

/// Logs attempts through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl MiningObserver for TracingObserver {
    fn on_attempt(&mut self, nonce: i64, hash: &[u8; 32], solved: bool) {
        if solved {
            tracing::debug!("⛏️  [{}] --> ok (nonce={})", hex::encode(hash), nonce);
        } else {
            tracing::trace!("⛏️  [{}] -- xx", hex::encode(hash));
        }
    }
}

/// Proof-of-work over a single block
pub struct ProofOfWork<'a> {
    block: &'a Block,
    target_bits: u32,
    max_nonce: i64,
    target: BigUint,
}

impl<'a> ProofOfWork<'a> {
    pub fn new(block: &'a Block, params: &PowParams) -> Self {
        ProofOfWork {
            block,
            target_bits: params.target_bits(),
            max_nonce: params.max_nonce(),
            target: target_for_bits(params.target_bits()),
        }
    }

    /// Hash preimage for `nonce`
    pub fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let timestamp = int_to_hex(self.block.timestamp);
        let bits = int_to_hex(i64::from(self.target_bits));
        let nonce = int_to_hex(nonce);

        let mut data = Vec::with_capacity(
            self.block.prev_hash.len() + self.block.data.len() + timestamp.len() + bits.len() + nonce.len(),
        );
        data.extend_from_slice(&self.block.prev_hash);
        data.extend_from_slice(&self.block.data);
        data.extend_from_slice(&timestamp);
        data.extend_from_slice(&bits);
        data.extend_from_slice(&nonce);
        data
    }

    /// Search for a nonce, logging attempts via `tracing`
    pub fn run(&self) -> Result<(i64, Vec<u8>), PowError> {
        self.run_with(&mut TracingObserver)
    }

    /// Search for a nonce, reporting each attempt to `observer`
    pub fn run_with<O: MiningObserver + ?Sized>(&self, observer: &mut O) -> Result<(i64, Vec<u8>), PowError> {
        let mut nonce: i64 = 0;
        while nonce < self.max_nonce {
            let hash = sha256(&self.prepare_data(nonce));
            let solved = self.meets_target(&hash);
            observer.on_attempt(nonce, &hash, solved);
            if solved {
                return Ok((nonce, hash.to_vec()));
            }
            nonce += 1;
        }
        Err(PowError::Exhausted { attempts: self.max_nonce })
    }

    /// Recompute the hash for the block's own nonce and check it against the target
    pub fn validate(&self) -> bool {
        let hash = sha256(&self.prepare_data(self.block.nonce));
        self.meets_target(&hash)
    }

    /// Check that the stored hash is the digest of the block's content and nonce
    pub fn hash_matches(&self) -> bool {
        sha256(&self.prepare_data(self.block.nonce))[..] == self.block.hash[..]
    }

    fn meets_target(&self, hash: &[u8; 32]) -> bool {
        BigUint::from_bytes_be(hash) < self.target
    }
}

/// `2^(256 - target_bits)`
pub fn target_for_bits(target_bits: u32) -> BigUint {
    BigUint::one() << 256usize.saturating_sub(target_bits as usize)
}

/// Lowercase, unpadded hex of a signed integer; negatives get a leading '-'
pub fn int_to_hex(value: i64) -> Vec<u8> {
    if value < 0 {
        format!("-{:x}", value.unsigned_abs()).into_bytes()
    } else {
        format!("{:x}", value).into_bytes()
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);
    hash
}

#[derive(Debug, PartialEq, Eq)]
pub enum PowError {
    /// No nonce in `[0, attempts)` produced a hash below the target
    Exhausted { attempts: i64 },
}

impl std::fmt::Display for PowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowError::Exhausted { attempts } => {
                write!(f, "no solution found within {} nonces", attempts)
            }
        }
    }
}

impl std::error::Error for PowError {}
