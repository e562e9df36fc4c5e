//! Block Store - Persistent block storage

use crate::db::{ColumnFamily, Database, WriteBatch};
use crate::StorageError;
use std::sync::Arc;
use vex_types::{Block, Hash};

/// Block column keyed by big-endian index, with hash and transaction indexes.
pub struct BlockStore {
    db: Arc<Database>,
}

impl BlockStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Add a block and its indexes to `batch` without writing it.
    pub fn stage_block(batch: &mut WriteBatch, block: &Block) -> Result<(), StorageError> {
        let key = block.index.to_be_bytes();
        batch.put(ColumnFamily::Blocks, &key, &serde_json::to_vec(block)?);
        batch.put(ColumnFamily::BlockHashes, block.hash.as_bytes(), &key);
        for tx in &block.transactions {
            batch.put(ColumnFamily::Transactions, tx.tx_hash.as_bytes(), &key);
        }
        Ok(())
    }

    /// Persist a block and its indexes in one batch.
    pub fn put_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        Self::stage_block(&mut batch, block)?;
        self.db.write_batch(batch)?;
        tracing::debug!(index = block.index, hash = %block.hash, "Block persisted");
        Ok(())
    }

    /// Remove a block and its indexes.
    pub fn remove_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.delete(ColumnFamily::Blocks, &block.index.to_be_bytes());
        batch.delete(ColumnFamily::BlockHashes, block.hash.as_bytes());
        for tx in &block.transactions {
            batch.delete(ColumnFamily::Transactions, tx.tx_hash.as_bytes());
        }
        self.db.write_batch(batch)
    }

    /// Add the replacement of every stored block with `blocks` to `batch`.
    pub fn stage_replace_all(batch: &mut WriteBatch, blocks: &[Block]) -> Result<(), StorageError> {
        batch.clear_column(ColumnFamily::Blocks);
        batch.clear_column(ColumnFamily::BlockHashes);
        batch.clear_column(ColumnFamily::Transactions);
        for block in blocks {
            Self::stage_block(batch, block)?;
        }
        Ok(())
    }

    /// Replace every stored block with `blocks`.
    pub fn replace_all(&self, blocks: &[Block]) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        Self::stage_replace_all(&mut batch, blocks)?;
        self.db.write_batch(batch)
    }

    /// All stored blocks in index order.
    pub fn load_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let blocks = self
            .db
            .iter_column(ColumnFamily::Blocks)?
            .into_iter()
            .map(|(_, value)| Ok(serde_json::from_slice(&value)?))
            .collect::<Result<Vec<Block>, StorageError>>()?;
        tracing::info!(count = blocks.len(), "Blocks loaded from disk");
        Ok(blocks)
    }

    pub fn get_block(&self, index: u64) -> Result<Option<Block>, StorageError> {
        match self.db.get(ColumnFamily::Blocks, &index.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn index_of_block(&self, hash: &Hash) -> Result<Option<u64>, StorageError> {
        self.read_index(ColumnFamily::BlockHashes, hash)
    }

    /// Index of the block containing a transaction.
    pub fn index_of_transaction(&self, tx_hash: &Hash) -> Result<Option<u64>, StorageError> {
        self.read_index(ColumnFamily::Transactions, tx_hash)
    }

    fn read_index(&self, column: ColumnFamily, hash: &Hash) -> Result<Option<u64>, StorageError> {
        match self.db.get(column, hash.as_bytes())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::Serialization(format!("bad index entry for {}", hash)))?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    pub fn count(&self) -> Result<usize, StorageError> {
        Ok(self.db.iter_column(ColumnFamily::Blocks)?.len())
    }
}
