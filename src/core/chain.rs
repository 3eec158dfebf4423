use crate::core::params::*;
use crate::core::types::Block;
use crate::pow::{PowError, ProofOfWork};
use crate::storage::{Storage, StorageError, TipUpdate};

// ─── Blockchain ─────────────────────────────────────────────────────

/// Persisted append-only chain.
///
/// `add_block` mines outside any store transaction, then writes the block and
/// the new tip in a single sled transaction that first re-checks the tip. A
/// writer that lost the race re-mines on the new tip, so two handles sharing
/// one store never fork the chain.
pub struct Blockchain {
    storage: Storage,
    params: PowParams,
    /// Cached copy of the persisted tip
    tip: Vec<u8>,
}

impl std::fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blockchain")
            .field("tip", &hex::encode(&self.tip))
            .field("target_bits", &self.params.target_bits())
            .finish()
    }
}

impl Blockchain {
    /// Open the chain at `config.data_dir`, mining a genesis block if the store is empty
    pub fn open(config: &ChainConfig) -> Result<Self, ChainError> {
        let storage = Storage::open(&config.data_dir)?;
        Self::with_storage(storage, config.pow)
    }

    /// Build a chain over an already-open store
    pub fn with_storage(storage: Storage, params: PowParams) -> Result<Self, ChainError> {
        if let Some(tip) = storage.get_tip()? {
            if storage.get_block_record(&tip)?.is_none() {
                return Err(ChainError::Corrupted { hash: tip });
            }
            tracing::info!("💾 Loaded chain: tip={}", short_hex(&tip));
            return Ok(Blockchain { storage, params, tip });
        }

        tracing::info!("🔨 Empty store, mining genesis block ({} bits)...", params.target_bits());
        let mut chain = Blockchain { storage, params, tip: Vec::new() };
        let genesis = Block::create_genesis(&chain.params)?;
        chain.commit(None, &genesis)?;
        tracing::info!("🔨 Genesis block written: {}", genesis.hash_hex());

        // Another handle may have written genesis first
        chain.tip = chain.storage.get_tip()?.unwrap_or(genesis.hash);
        Ok(chain)
    }

    /// Mine `data` on top of the current tip and persist it
    pub fn add_block(&mut self, data: impl Into<Vec<u8>>) -> Result<Block, ChainError> {
        let data = data.into();
        let mut prev_hash = match self.storage.get_tip()? {
            Some(tip) => tip,
            None => self.tip.clone(),
        };

        loop {
            let block = Block::create(data.clone(), prev_hash.clone(), &self.params)?;
            match self.commit(Some(prev_hash.as_slice()), &block)? {
                TipUpdate::Committed => {
                    self.tip = block.hash.clone();
                    tracing::info!(
                        "✅ Block added: {} nonce={} bytes={}",
                        block.hash_hex(),
                        block.nonce,
                        block.data.len(),
                    );
                    return Ok(block);
                }
                TipUpdate::TipMoved { current: Some(current) } => {
                    tracing::warn!(
                        "⚠️  Tip moved from {} to {} while mining, re-mining",
                        short_hex(&prev_hash),
                        short_hex(&current),
                    );
                    prev_hash = current;
                }
                TipUpdate::TipMoved { current: None } => {
                    return Err(ChainError::Corrupted { hash: prev_hash });
                }
            }
        }
    }

    fn commit(&self, expected_tip: Option<&[u8]>, block: &Block) -> Result<TipUpdate, ChainError> {
        let record = block.encode()?;
        let outcome = self.storage.append_block(expected_tip, &block.hash, &record)?;
        if outcome == TipUpdate::Committed {
            self.storage.flush()?;
        }
        Ok(outcome)
    }

    /// Cursor walking from the current tip back to genesis
    pub fn iterator(&self) -> ChainIterator<'_> {
        ChainIterator { current_hash: self.tip.clone(), storage: &self.storage }
    }

    // ─── Queries ────────────────────────────────────────────────────

    pub fn tip(&self) -> &[u8] { &self.tip }

    pub fn params(&self) -> &PowParams { &self.params }

    /// Look up a block by hash
    pub fn block(&self, hash: &[u8]) -> Result<Option<Block>, ChainError> {
        match self.storage.get_block_record(hash)? {
            Some(record) => Ok(Some(Block::decode(&record)?)),
            None => Ok(None),
        }
    }

    /// Number of blocks above genesis. O(N) walk.
    pub fn height(&self) -> Result<u64, ChainError> {
        let mut count = 0u64;
        for block in self.iterator() {
            block?;
            count += 1;
        }
        Ok(count.saturating_sub(1))
    }

    /// Walk the chain tip to genesis and re-check every block.
    ///
    /// Each block must sit under the key it was linked by, hash to its stored
    /// hash and meet the target. Returns the number of verified blocks.
    pub fn verify(&self) -> Result<usize, ChainError> {
        let mut expected = self.tip.clone();
        let mut verified = 0usize;

        for block in self.iterator() {
            let block = block?;
            if block.hash != expected {
                return Err(ChainError::InvalidBlock { hash: expected, reason: "stored under a different hash" });
            }
            let pow = ProofOfWork::new(&block, &self.params);
            if !pow.hash_matches() {
                return Err(ChainError::InvalidBlock { hash: block.hash, reason: "hash does not match content" });
            }
            if !pow.validate() {
                return Err(ChainError::InvalidBlock { hash: block.hash, reason: "insufficient PoW" });
            }
            expected = block.prev_hash;
            verified += 1;
        }

        tracing::debug!("🔍 Verified {} blocks", verified);
        Ok(verified)
    }
}

// ─── ChainIterator ──────────────────────────────────────────────────

/// Backward cursor over the persisted chain.
///
/// Yields each block once, tip first, and ends after genesis. A missing or
/// undecodable record is yielded as `ChainError::Corrupted` and ends the walk.
pub struct ChainIterator<'a> {
    current_hash: Vec<u8>,
    storage: &'a Storage,
}

impl ChainIterator<'_> {
    fn read_current(&self) -> Result<Block, ChainError> {
        let corrupted = || ChainError::Corrupted { hash: self.current_hash.clone() };
        let record = self.storage.get_block_record(&self.current_hash)?.ok_or_else(corrupted)?;
        let block = Block::decode(&record).map_err(|e| {
            tracing::error!("❌ Undecodable block {}: {}", short_hex(&self.current_hash), e);
            corrupted()
        })?;
        Ok(block)
    }
}

impl Iterator for ChainIterator<'_> {
    type Item = Result<Block, ChainError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_hash.is_empty() {
            return None;
        }
        match self.read_current() {
            Ok(block) => {
                self.current_hash = block.prev_hash.clone();
                Some(Ok(block))
            }
            Err(e) => {
                self.current_hash.clear();
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for ChainIterator<'_> {}

fn short_hex(hash: &[u8]) -> String {
    let encoded = hex::encode(hash);
    encoded.get(..16).map(str::to_string).unwrap_or(encoded)
}

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ChainError {
    Storage(StorageError),
    Pow(PowError),
    /// A linked record is missing or unreadable
    Corrupted { hash: Vec<u8> },
    InvalidBlock { hash: Vec<u8>, reason: &'static str },
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Storage(e) => write!(f, "storage: {}", e),
            ChainError::Pow(e) => write!(f, "mining failed: {}", e),
            ChainError::Corrupted { hash } => write!(f, "corrupted chain at block {}", hex::encode(hash)),
            ChainError::InvalidBlock { hash, reason } => write!(f, "invalid block {}: {}", hex::encode(hash), reason),
        }
    }
}

impl std::error::Error for ChainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChainError::Storage(e) => Some(e),
            ChainError::Pow(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for ChainError {
    fn from(e: StorageError) -> Self { ChainError::Storage(e) }
}

impl From<PowError> for ChainError {
    fn from(e: PowError) -> Self { ChainError::Pow(e) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_chain() -> (tempfile::TempDir, Blockchain) {
        let dir = tempfile::tempdir().unwrap();
        let chain = Blockchain::open(&ChainConfig::new(dir.path())).unwrap();
        (dir, chain)
    }

    fn collect(chain: &Blockchain) -> Vec<Block> {
        chain.iterator().collect::<Result<Vec<_>, _>>().unwrap()
    }

    #[test]
    fn test_open_creates_genesis() {
        let (_dir, chain) = temp_chain();
        let blocks = collect(&chain);
        assert_eq!(blocks.len(), 1);
        let genesis = &blocks[0];
        assert!(genesis.is_genesis());
        assert_eq!(genesis.data, GENESIS_DATA.as_bytes());
        assert_eq!(chain.tip(), &genesis.hash[..]);
        assert!(ProofOfWork::new(genesis, chain.params()).validate());
        assert_eq!(chain.height().unwrap(), 0);
    }

    #[test]
    fn test_add_block_scenario() {
        let (_dir, mut chain) = temp_chain();
        let first = chain.add_block("send 1 btc to ivan").unwrap();
        let second = chain.add_block("send 2 more btc to ivan").unwrap();
        assert_eq!(chain.tip(), &second.hash[..]);

        let blocks = collect(&chain);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].data, b"send 2 more btc to ivan".to_vec());
        assert_eq!(blocks[1].data, b"send 1 btc to ivan".to_vec());
        assert_eq!(blocks[2].data, GENESIS_DATA.as_bytes());

        assert_eq!(blocks[0], second);
        assert_eq!(blocks[1], first);
        assert_eq!(blocks[0].prev_hash, blocks[1].hash);
        assert_eq!(blocks[1].prev_hash, blocks[2].hash);
        assert!(blocks[2].prev_hash.is_empty());
    }

    #[test]
    fn test_chain_length_and_hashes() {
        let (_dir, mut chain) = temp_chain();
        let n = 5;
        for i in 0..n {
            chain.add_block(format!("entry {}", i)).unwrap();
        }

        let blocks = collect(&chain);
        assert_eq!(blocks.len(), n + 1);
        for block in &blocks {
            let pow = ProofOfWork::new(block, chain.params());
            assert!(pow.validate());
            assert!(pow.hash_matches());
        }
        assert_eq!(chain.height().unwrap(), n as u64);
        assert_eq!(chain.verify().unwrap(), n + 1);
    }

    #[test]
    fn test_empty_payload() {
        let (_dir, mut chain) = temp_chain();
        let block = chain.add_block(Vec::<u8>::new()).unwrap();
        let stored = chain.block(&block.hash).unwrap().unwrap();
        assert_eq!(stored, block);
        assert!(stored.data.is_empty());
    }

    #[test]
    fn test_reopen_keeps_tip() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChainConfig::new(dir.path());
        let last = {
            let mut chain = Blockchain::open(&config).unwrap();
            chain.add_block("one").unwrap();
            chain.add_block("two").unwrap()
        };

        let chain = Blockchain::open(&config).unwrap();
        assert_eq!(chain.tip(), &last.hash[..]);
        assert_eq!(collect(&chain).len(), 3);
    }

    #[test]
    fn test_iterator_is_not_restartable() {
        let (_dir, mut chain) = temp_chain();
        chain.add_block("x").unwrap();
        let mut iter = chain.iterator();
        assert!(iter.next().is_some());
        assert!(iter.next().is_some());
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());

        // A fresh cursor walks again
        assert_eq!(chain.iterator().count(), 2);
    }

    #[test]
    fn test_missing_record_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChainConfig::new(dir.path());
        let (genesis_hash, block_hash) = {
            let mut chain = Blockchain::open(&config).unwrap();
            let genesis_hash = chain.tip().to_vec();
            let block = chain.add_block("payload").unwrap();
            (genesis_hash, block.hash)
        };

        {
            let db = sled::open(dir.path()).unwrap();
            let tree = db.open_tree("blocks").unwrap();
            tree.remove(&genesis_hash).unwrap();
            db.flush().unwrap();
        }

        let chain = Blockchain::open(&config).unwrap();
        let mut iter = chain.iterator();
        assert_eq!(iter.next().unwrap().unwrap().hash, block_hash);
        match iter.next() {
            Some(Err(ChainError::Corrupted { hash })) => assert_eq!(hash, genesis_hash),
            other => panic!("expected corruption, got {:?}", other),
        }
        assert!(iter.next().is_none());
        assert!(chain.height().is_err());
    }

    #[test]
    fn test_open_failure_is_storage_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        match Blockchain::open(&ChainConfig::new(file.path())) {
            Err(ChainError::Storage(_)) => {}
            other => panic!("expected storage error, got {:?}", other),
        }
    }

    #[test]
    fn test_trailing_bytes_are_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChainConfig::new(dir.path());
        let block = {
            let mut chain = Blockchain::open(&config).unwrap();
            chain.add_block("payload").unwrap()
        };

        {
            let mut record = block.encode().unwrap();
            record.extend_from_slice(b"junk");
            let db = sled::open(dir.path()).unwrap();
            let tree = db.open_tree("blocks").unwrap();
            tree.insert(&block.hash, record).unwrap();
            db.flush().unwrap();
        }

        let chain = Blockchain::open(&config).unwrap();
        let mut iter = chain.iterator();
        match iter.next() {
            Some(Err(ChainError::Corrupted { hash })) => assert_eq!(hash, block.hash),
            other => panic!("expected corruption, got {:?}", other),
        }
        assert!(iter.next().is_none());
        assert!(chain.block(&block.hash).is_err());
    }

    #[test]
    fn test_undecodable_record_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChainConfig::new(dir.path());
        let tip = Blockchain::open(&config).unwrap().tip().to_vec();

        {
            let db = sled::open(dir.path()).unwrap();
            let tree = db.open_tree("blocks").unwrap();
            tree.insert(&tip, &[0xFF, 0x01][..]).unwrap();
            db.flush().unwrap();
        }

        let chain = Blockchain::open(&config).unwrap();
        let results: Vec<_> = chain.iterator().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ChainError::Corrupted { .. })));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChainConfig::new(dir.path());
        let block = {
            let mut chain = Blockchain::open(&config).unwrap();
            chain.add_block("honest").unwrap()
        };

        {
            let mut forged = block.clone();
            forged.data = b"forged".to_vec();
            let db = sled::open(dir.path()).unwrap();
            let tree = db.open_tree("blocks").unwrap();
            tree.insert(&block.hash, forged.encode().unwrap()).unwrap();
            db.flush().unwrap();
        }

        let chain = Blockchain::open(&config).unwrap();
        match chain.verify() {
            Err(ChainError::InvalidBlock { hash, .. }) => assert_eq!(hash, block.hash),
            other => panic!("expected invalid block, got {:?}", other),
        }
    }

    #[test]
    fn test_exhaustion_surfaces_from_add_block() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let mut chain = Blockchain::with_storage(storage.clone(), PowParams::default()).unwrap();
        let tip = chain.tip().to_vec();

        chain.params = PowParams::new(255).unwrap().with_max_nonce(8);
        match chain.add_block("unreachable") {
            Err(ChainError::Pow(PowError::Exhausted { attempts })) => assert_eq!(attempts, 8),
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(chain.tip(), &tip[..]);
        assert_eq!(storage.get_tip().unwrap(), Some(tip));
    }

    #[test]
    fn test_concurrent_writer_does_not_fork() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let mut a = Blockchain::with_storage(storage.clone(), PowParams::default()).unwrap();
        let mut b = Blockchain::with_storage(storage, PowParams::default()).unwrap();
        assert_eq!(a.tip(), b.tip());

        let from_a = a.add_block("from a").unwrap();
        // `b` still caches genesis as its tip; it must build on `from_a`
        let from_b = b.add_block("from b").unwrap();
        assert_eq!(from_b.prev_hash, from_a.hash);

        let blocks = collect(&b);
        assert_eq!(blocks.len(), 3);
        assert_eq!(b.verify().unwrap(), 3);
    }

    #[test]
    fn test_stale_commit_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let chain = Blockchain::with_storage(storage.clone(), PowParams::default()).unwrap();
        let genesis = chain.tip().to_vec();

        // Simulate another writer landing between our tip read and our commit
        let rival = Block::create("rival", genesis.clone(), chain.params()).unwrap();
        assert_eq!(chain.commit(Some(genesis.as_slice()), &rival).unwrap(), TipUpdate::Committed);
        let ours = Block::create("ours", genesis.clone(), chain.params()).unwrap();
        assert_eq!(
            chain.commit(Some(genesis.as_slice()), &ours).unwrap(),
            TipUpdate::TipMoved { current: Some(rival.hash.clone()) },
        );
        assert!(chain.block(&ours.hash).unwrap().is_none());
    }
}
