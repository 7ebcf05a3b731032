// Block store using sled

use crate::core::Hash256;
use crate::error::Result;
use sled::Db;
use std::path::Path;

/// Key-value interface the ledger persists blocks through.
/// Each call commits on its own.
pub trait BlockStore: Send + Sync {
    /// Raw encoded block stored under `hash`
    fn get(&self, hash: &Hash256) -> Result<Option<Vec<u8>>>;
    fn put(&self, hash: &Hash256, block: &[u8]) -> Result<()>;
    /// Hash of the most recently appended block
    fn tip(&self) -> Result<Option<Hash256>>;
    fn set_tip(&self, hash: &Hash256) -> Result<()>;
    fn flush(&self) -> Result<()>;
}

/// Blockchain database
pub struct BlockchainDB {
    db: Db,
}

impl BlockchainDB {
    /// Open (or create) a database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing)
    pub fn memory() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    // Helper: create key for block storage
    fn block_key(hash: &Hash256) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(b'b'); // 'b' for block
        key.extend_from_slice(hash.as_bytes());
        key
    }
}

const TIP_KEY: &[u8] = b"tip";

impl BlockStore for BlockchainDB {
    fn get(&self, hash: &Hash256) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(Self::block_key(hash))?.map(|data| data.to_vec()))
    }

    fn put(&self, hash: &Hash256, block: &[u8]) -> Result<()> {
        self.db.insert(Self::block_key(hash), block)?;
        Ok(())
    }

    fn tip(&self) -> Result<Option<Hash256>> {
        match self.db.get(TIP_KEY)? {
            Some(data) => Ok(Some(Hash256::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn set_tip(&self, hash: &Hash256) -> Result<()> {
        self.db.insert(TIP_KEY, hash.as_bytes().as_slice())?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
