use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Tree};
use std::path::Path;

/// Name of the sled tree holding block records and the tip pointer
const BLOCKS_TREE: &[u8] = b"blocks";

/// Reserved key for the tip hash. One byte long, so it can never collide
/// with a 32-byte block hash in the same tree.
const TIP_KEY: &[u8] = b"l";

/// Persistent chain store backed by the sled embedded database
#[derive(Clone)]
pub struct Storage {
    db: Db,
    blocks: Tree,
}

/// Result of a conditional block + tip write
#[derive(Debug, PartialEq, Eq)]
pub enum TipUpdate {
    /// Block and tip were written together
    Committed,
    /// The stored tip no longer matched the expected one; nothing was written
    TipMoved { current: Option<Vec<u8>> },
}

impl Storage {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| StorageError::DbError(e.to_string()))?;
        let blocks = db.open_tree(BLOCKS_TREE)
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(Storage { db, blocks })
    }

    // ─── Block Records ───────────────────────────────────────────────

    /// Retrieve the encoded record stored under a block hash
    pub fn get_block_record(&self, hash: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let record = self.blocks.get(hash)
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(record.map(|bytes| bytes.to_vec()))
    }

    // ─── Chain Metadata ──────────────────────────────────────────────

    /// Get the chain tip hash
    pub fn get_tip(&self) -> Result<Option<Vec<u8>>, StorageError> {
        let tip = self.blocks.get(TIP_KEY)
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(tip.map(|bytes| bytes.to_vec()))
    }

    /// Write a block record and move the tip to it in one transaction.
    ///
    /// The write only happens if the stored tip still equals `expected_tip`
    /// (`None` meaning "no tip yet"). Otherwise the current tip is returned
    /// and the store is left untouched.
    pub fn append_block(
        &self,
        expected_tip: Option<&[u8]>,
        hash: &[u8],
        record: &[u8],
    ) -> Result<TipUpdate, StorageError> {
        let result: Result<(), TransactionError<Option<Vec<u8>>>> =
            self.blocks.transaction(|tx| {
                let current = tx.get(TIP_KEY)?;
                if current.as_deref() != expected_tip {
                    return Err(ConflictableTransactionError::Abort(
                        current.map(|bytes| bytes.to_vec()),
                    ));
                }
                tx.insert(hash, record)?;
                tx.insert(TIP_KEY, hash)?;
                Ok(())
            });

        match result {
            Ok(()) => Ok(TipUpdate::Committed),
            Err(TransactionError::Abort(current)) => Ok(TipUpdate::TipMoved { current }),
            Err(TransactionError::Storage(e)) => Err(StorageError::TransactionError(e.to_string())),
        }
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum StorageError {
    DbError(String),
    SerializeError(String),
    TransactionError(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::DbError(e) => write!(f, "database error: {}", e),
            StorageError::SerializeError(e) => write!(f, "serialization error: {}", e),
            StorageError::TransactionError(e) => write!(f, "transaction error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}
