//! Stand-in network layer for a node without peers.
//!
//! Every outbound call is logged and counted. Only the most recent hashes are
//! kept; sync requests return nothing.

use parking_lot::Mutex;
use std::collections::VecDeque;
use vex_core::{NetworkCollaborator, NetworkError};
use vex_types::{Block, Hash, Transaction};

/// Recent broadcasts kept per kind.
pub const RECENT_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Record {
    recent_blocks: VecDeque<(u64, Hash)>,
    recent_transactions: VecDeque<Hash>,
    blocks: u64,
    transactions: u64,
    sync_requests: u64,
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, capacity: usize) {
    if queue.len() == capacity {
        queue.pop_front();
    }
    queue.push_back(item);
}

/// Network collaborator that logs instead of gossiping.
#[derive(Debug)]
pub struct LoggingNetwork {
    record: Mutex<Record>,
    capacity: usize,
}

impl Default for LoggingNetwork {
    fn default() -> Self {
        Self::with_capacity(RECENT_CAPACITY)
    }
}

impl LoggingNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            record: Mutex::new(Record::default()),
            capacity: capacity.max(1),
        }
    }

    /// Index and hash of the most recent block broadcasts, oldest first.
    pub fn recent_blocks(&self) -> Vec<(u64, Hash)> {
        self.record.lock().recent_blocks.iter().copied().collect()
    }

    /// Hash of the most recent transaction broadcasts, oldest first.
    pub fn recent_transactions(&self) -> Vec<Hash> {
        self.record.lock().recent_transactions.iter().copied().collect()
    }

    pub fn blocks_broadcast(&self) -> u64 {
        self.record.lock().blocks
    }

    pub fn transactions_broadcast(&self) -> u64 {
        self.record.lock().transactions
    }

    pub fn sync_requests(&self) -> u64 {
        self.record.lock().sync_requests
    }
}

impl NetworkCollaborator for LoggingNetwork {
    fn broadcast_block(&self, block: &Block) -> Result<(), NetworkError> {
        tracing::debug!(index = block.index, hash = %block.hash, "broadcast_block");
        let mut record = self.record.lock();
        record.blocks += 1;
        push_bounded(&mut record.recent_blocks, (block.index, block.hash), self.capacity);
        Ok(())
    }

    fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), NetworkError> {
        tracing::debug!(tx = %tx.tx_hash, "broadcast_transaction");
        let mut record = self.record.lock();
        record.transactions += 1;
        push_bounded(&mut record.recent_transactions, tx.tx_hash, self.capacity);
        Ok(())
    }

    fn sync_blockchain(&self) -> Result<Vec<Block>, NetworkError> {
        tracing::debug!("sync_blockchain: no peers");
        self.record.lock().sync_requests += 1;
        Ok(Vec::new())
    }

    fn sync_mempool(&self) -> Result<Vec<Transaction>, NetworkError> {
        tracing::debug!("sync_mempool: no peers");
        self.record.lock().sync_requests += 1;
        Ok(Vec::new())
    }
}
