//! powchain parameters.
//! Defaults live here; callers override them through `ChainConfig` and `PowParams`.

use std::path::{Path, PathBuf};

/// Default directory for the sled database
pub const DEFAULT_DATA_DIR: &str = "powchain_data";

/// Default difficulty: the block hash must be below 2^(256 - bits).
///
///   4  bits = ~16 hashes
///   8  bits = ~256 hashes
///   16 bits = ~65K hashes
///
/// Chosen for fast demonstration, not security.
pub const DEFAULT_TARGET_BITS: u32 = 4;

/// Largest accepted difficulty. 256 would make the target 2^0 = 1,
/// leaving only the all-zero hash as a solution.
pub const MAX_TARGET_BITS: u32 = 255;

/// Default upper bound (exclusive) on the nonce search
pub const DEFAULT_MAX_NONCE: i64 = i64::MAX;

/// Payload of the genesis block
pub const GENESIS_DATA: &str = "Genesis Block";

/// Proof-of-work settings shared by mining and validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowParams {
    target_bits: u32,
    max_nonce: i64,
}

impl PowParams {
    pub fn new(target_bits: u32) -> Result<Self, ConfigError> {
        if target_bits > MAX_TARGET_BITS {
            return Err(ConfigError::InvalidTargetBits(target_bits));
        }
        Ok(PowParams { target_bits, max_nonce: DEFAULT_MAX_NONCE })
    }

    /// Limit the nonce search to `[0, max_nonce)`
    pub fn with_max_nonce(mut self, max_nonce: i64) -> Self {
        self.max_nonce = max_nonce.max(0);
        self
    }

    pub fn target_bits(&self) -> u32 { self.target_bits }

    pub fn max_nonce(&self) -> i64 { self.max_nonce }
}

impl Default for PowParams {
    fn default() -> Self {
        PowParams { target_bits: DEFAULT_TARGET_BITS, max_nonce: DEFAULT_MAX_NONCE }
    }
}

/// Everything needed to open a chain
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub data_dir: PathBuf,
    pub pow: PowParams,
}

impl ChainConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        ChainConfig { data_dir: data_dir.as_ref().to_path_buf(), pow: PowParams::default() }
    }

    pub fn with_pow(mut self, pow: PowParams) -> Self {
        self.pow = pow;
        self
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    InvalidTargetBits(u32),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidTargetBits(bits) => {
                write!(f, "target bits must be at most {}, got {}", MAX_TARGET_BITS, bits)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
