//! Transaction pool management.
//!
//! Holds signed transactions waiting for a block. Admission enforces strict
//! per-sender nonce order and checks the balance net of what the sender
//! already has pending. Every entry is mirrored to the `mempool` column.

use crate::error::PoolError;
use crate::ordering::{arrival_order, priority_order};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use vex_storage::{ColumnFamily, Database, StateStore, WriteBatch};
use vex_types::{now_millis, Address, Amount, Hash, Transaction, TxKind};

/// Configuration for the transaction pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of pending transactions
    pub max_size: usize,
    /// Age after which an entry is swept
    pub ttl: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// A pooled transaction with its admission sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolEntry {
    pub tx: Transaction,
    pub seq: u64,
}

/// Persisted shape of a pool entry.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    transaction: Transaction,
    seq: u64,
}

#[derive(Default)]
struct PoolInner {
    entries: HashMap<Hash, PoolEntry>,
    next_seq: u64,
}

impl PoolInner {
    fn from_sender<'a>(&'a self, sender: &'a Address) -> impl Iterator<Item = &'a PoolEntry> + 'a {
        self.entries.values().filter(move |e| &e.tx.sender == sender)
    }
}

/// What a transaction takes out of the sender's balance.
fn spend(tx: &Transaction) -> Amount {
    match tx.kind {
        TxKind::Unstake => tx.fee,
        _ => tx.total_cost(),
    }
}

fn is_expired(tx: &Transaction, now: u64, ttl: Duration) -> bool {
    now.saturating_sub(tx.timestamp) > ttl.as_millis() as u64
}

/// Transaction pool.
pub struct TransactionPool {
    config: PoolConfig,
    state: Arc<StateStore>,
    inner: Mutex<PoolInner>,
}

impl TransactionPool {
    /// Create an empty pool. Entries already in the `mempool` column are
    /// ignored; use [`TransactionPool::load`] to restore them.
    pub fn new(config: PoolConfig, state: Arc<StateStore>) -> Self {
        Self {
            config,
            state,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Restore the pool from the `mempool` column.
    ///
    /// Entries are re-admitted in their original order. Entries that no longer
    /// validate, have expired or cannot be decoded are dropped from disk.
    pub fn load(config: PoolConfig, state: Arc<StateStore>) -> Result<Self, PoolError> {
        let pool = Self::new(config, state);
        let db = pool.db().clone();

        let mut stored = Vec::new();
        let mut dropped = WriteBatch::new();
        for (key, value) in db.iter_column(ColumnFamily::Mempool)? {
            match serde_json::from_slice::<StoredEntry>(&value) {
                Ok(entry) => stored.push(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping undecodable mempool entry");
                    dropped.delete(ColumnFamily::Mempool, &key);
                }
            }
        }
        stored.sort_by_key(|e| e.seq);

        let now = now_millis();
        {
            let mut inner = pool.inner.lock();
            for entry in stored {
                let tx = entry.transaction;
                let verdict = if is_expired(&tx, now, pool.config.ttl) {
                    Err(PoolError::InvalidTransaction("expired".into()))
                } else {
                    pool.check(&inner, &tx)
                };
                match verdict {
                    Ok(()) => {
                        inner.next_seq = inner.next_seq.max(entry.seq + 1);
                        inner.entries.insert(tx.tx_hash, PoolEntry { tx, seq: entry.seq });
                    }
                    Err(e) => {
                        tracing::debug!(tx = %tx.tx_hash, reason = %e, "Dropping stale mempool entry");
                        dropped.delete(ColumnFamily::Mempool, tx.tx_hash.as_bytes());
                    }
                }
            }
        }
        db.write_batch(dropped)?;

        tracing::info!(count = pool.len(), "Mempool restored");
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn db(&self) -> &Arc<Database> {
        self.state.database()
    }

    /// Admission checks, in order: hash, duplicate, capacity, kind,
    /// signature, nonce, balance.
    fn check(&self, inner: &PoolInner, tx: &Transaction) -> Result<(), PoolError> {
        if !tx.hash_matches() {
            return Err(PoolError::InvalidTransaction(format!(
                "hash mismatch for {}",
                tx.tx_hash
            )));
        }
        if inner.entries.contains_key(&tx.tx_hash) {
            return Err(PoolError::DuplicateTransaction(tx.tx_hash.to_string()));
        }
        if inner.entries.len() >= self.config.max_size {
            return Err(PoolError::PoolFull(self.config.max_size));
        }
        if matches!(tx.kind, TxKind::Reward) {
            return Err(PoolError::RewardNotAllowed);
        }
        vex_crypto::verify_transaction(tx).map_err(|e| PoolError::InvalidSignature(e.to_string()))?;

        let confirmed = self.state.get_nonce(&tx.sender);
        let expected = inner
            .from_sender(&tx.sender)
            .map(|e| e.tx.nonce)
            .filter(|&n| n > confirmed)
            .max()
            .unwrap_or(confirmed)
            + 1;
        if tx.nonce != expected {
            return Err(PoolError::InvalidNonce {
                expected,
                got: tx.nonce,
            });
        }

        let pending = inner
            .from_sender(&tx.sender)
            .fold(0, |acc: Amount, e| acc.saturating_add(spend(&e.tx)));
        let want = pending.saturating_add(spend(tx));
        let have = self.state.get_balance(&tx.sender);
        if have < want {
            return Err(PoolError::InsufficientBalance { have, want });
        }
        Ok(())
    }

    /// Add a transaction to the pool.
    pub fn add_transaction(&self, tx: Transaction) -> Result<Hash, PoolError> {
        let mut inner = self.inner.lock();
        if let Err(e) = self.check(&inner, &tx) {
            tracing::debug!(tx = %tx.tx_hash, reason = %e, "Transaction rejected");
            return Err(e);
        }

        let hash = tx.tx_hash;
        let seq = inner.next_seq;
        let stored = StoredEntry {
            transaction: tx,
            seq,
        };
        let bytes = serde_json::to_vec(&stored)
            .map_err(|e| PoolError::InvalidTransaction(e.to_string()))?;
        self.db().put(ColumnFamily::Mempool, hash.as_bytes(), &bytes)?;

        inner.next_seq += 1;
        inner.entries.insert(
            hash,
            PoolEntry {
                tx: stored.transaction,
                seq,
            },
        );
        tracing::debug!(tx = %hash, size = inner.entries.len(), "Transaction added to pool");
        Ok(hash)
    }

    /// Up to `max_count` transactions, oldest first.
    pub fn get_transactions(&self, max_count: usize) -> Vec<Transaction> {
        let inner = self.inner.lock();
        arrival_order(inner.entries.values().collect(), max_count)
    }

    /// Up to `max_count` transactions, highest fee first within nonce order.
    pub fn get_transactions_by_priority(&self, max_count: usize) -> Vec<Transaction> {
        let inner = self.inner.lock();
        priority_order(inner.entries.values().collect(), max_count)
    }

    /// Evict the given hashes. Unknown hashes are ignored. Returns how many
    /// entries were removed.
    pub fn remove_transactions(&self, hashes: &[Hash]) -> Result<usize, PoolError> {
        let mut inner = self.inner.lock();
        let present: Vec<Hash> = hashes
            .iter()
            .filter(|h| inner.entries.contains_key(*h))
            .copied()
            .collect();
        self.evict(&mut inner, &present)?;
        if !present.is_empty() {
            tracing::debug!(count = present.len(), "Removed transactions from pool");
        }
        Ok(present.len())
    }

    /// Evict entries whose timestamp is more than `ttl` in the past.
    pub fn clear_expired(&self, ttl: Duration) -> Result<usize, PoolError> {
        self.clear_expired_at(now_millis(), ttl)
    }

    pub fn clear_expired_at(&self, now: u64, ttl: Duration) -> Result<usize, PoolError> {
        let mut inner = self.inner.lock();
        let expired: Vec<Hash> = inner
            .entries
            .values()
            .filter(|e| is_expired(&e.tx, now, ttl))
            .map(|e| e.tx.tx_hash)
            .collect();
        self.evict(&mut inner, &expired)?;
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Cleared expired transactions");
        }
        Ok(expired.len())
    }

    fn evict(&self, inner: &mut PoolInner, hashes: &[Hash]) -> Result<(), PoolError> {
        let mut batch = WriteBatch::new();
        for hash in hashes {
            batch.delete(ColumnFamily::Mempool, hash.as_bytes());
        }
        self.db().write_batch(batch)?;
        for hash in hashes {
            inner.entries.remove(hash);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.lock().entries.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<Transaction> {
        self.inner.lock().entries.get(hash).map(|e| e.tx.clone())
    }

    /// Drop every entry.
    pub fn clear(&self) -> Result<(), PoolError> {
        let mut inner = self.inner.lock();
        let mut batch = WriteBatch::new();
        batch.clear_column(ColumnFamily::Mempool);
        self.db().write_batch(batch)?;
        inner.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vex_crypto::Keypair;

    fn state(temp: &TempDir) -> Arc<StateStore> {
        Arc::new(StateStore::open(Arc::new(Database::open(temp.path()).unwrap())).unwrap())
    }

    fn funded(state: &StateStore, balance: Amount) -> Keypair {
        let kp = Keypair::generate();
        state.update_balance(&kp.address(), balance).unwrap();
        kp
    }

    fn signed(kp: &Keypair, amount: Amount, nonce: u64) -> Transaction {
        let mut tx = Transaction::transfer(kp.address(), Address::from_bytes([7u8; 20]), amount, nonce);
        kp.sign_transaction(&mut tx).unwrap();
        tx
    }

    #[test]
    fn test_add_and_query() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let kp = funded(&state, 1_000);
        let pool = TransactionPool::new(PoolConfig::default(), state);

        let tx = signed(&kp, 10, 1);
        let hash = pool.add_transaction(tx.clone()).unwrap();
        assert_eq!(hash, tx.tx_hash);
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&hash));
        assert_eq!(pool.get(&hash), Some(tx.clone()));
        assert_eq!(
            pool.add_transaction(tx),
            Err(PoolError::DuplicateTransaction(hash.to_string()))
        );
    }

    #[test]
    fn test_rejects_tampered_hash_and_signature() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let kp = funded(&state, 1_000);
        let pool = TransactionPool::new(PoolConfig::default(), state);

        let mut tampered = signed(&kp, 10, 1);
        tampered.amount = 11;
        assert!(matches!(
            pool.add_transaction(tampered),
            Err(PoolError::InvalidTransaction(_))
        ));

        let unsigned = Transaction::transfer(kp.address(), Address::from_bytes([7u8; 20]), 10, 1);
        assert!(matches!(
            pool.add_transaction(unsigned),
            Err(PoolError::InvalidSignature(_))
        ));

        let mut foreign = Transaction::transfer(kp.address(), Address::from_bytes([7u8; 20]), 10, 1);
        let other = Keypair::generate();
        foreign.signature = Some(other.sign(foreign.tx_hash.as_bytes()));
        foreign.public_key = Some(other.public_key());
        assert!(matches!(
            pool.add_transaction(foreign),
            Err(PoolError::InvalidSignature(_))
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_rejects_reward() {
        let temp = TempDir::new().unwrap();
        let pool = TransactionPool::new(PoolConfig::default(), state(&temp));
        let reward = Transaction::reward(Address::from_bytes([1u8; 20]), 5);
        assert_eq!(pool.add_transaction(reward), Err(PoolError::RewardNotAllowed));
    }

    #[test]
    fn test_nonce_must_be_next() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let kp = funded(&state, 1_000);
        let pool = TransactionPool::new(PoolConfig::default(), state.clone());

        assert_eq!(
            pool.add_transaction(signed(&kp, 1, 2)),
            Err(PoolError::InvalidNonce { expected: 1, got: 2 })
        );
        pool.add_transaction(signed(&kp, 1, 1)).unwrap();
        assert_eq!(
            pool.add_transaction(signed(&kp, 2, 1)),
            Err(PoolError::InvalidNonce { expected: 2, got: 1 })
        );
        pool.add_transaction(signed(&kp, 1, 2)).unwrap();

        // Once nonce 2 is confirmed, pending entries at or below it no longer count
        state.increment_nonce(&kp.address()).unwrap();
        state.increment_nonce(&kp.address()).unwrap();
        pool.add_transaction(signed(&kp, 1, 3)).unwrap();
    }

    #[test]
    fn test_balance_counts_pending_spend() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let kp = funded(&state, 100);
        let pool = TransactionPool::new(PoolConfig::default(), state);

        pool.add_transaction(signed(&kp, 60, 1)).unwrap();
        assert_eq!(
            pool.add_transaction(signed(&kp, 50, 2)),
            Err(PoolError::InsufficientBalance { have: 100, want: 110 })
        );
        pool.add_transaction(signed(&kp, 40, 2)).unwrap();
    }

    #[test]
    fn test_full_pool() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let config = PoolConfig {
            max_size: 2,
            ..PoolConfig::default()
        };
        let pool = TransactionPool::new(config, state.clone());

        for _ in 0..2 {
            let kp = funded(&state, 10);
            pool.add_transaction(signed(&kp, 1, 1)).unwrap();
        }
        let kp = funded(&state, 10);
        assert_eq!(pool.add_transaction(signed(&kp, 1, 1)), Err(PoolError::PoolFull(2)));
    }

    #[test]
    fn test_get_transactions_fifo() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let pool = TransactionPool::new(PoolConfig::default(), state.clone());

        let mut expected = Vec::new();
        for ts in [300u64, 100, 200] {
            let kp = funded(&state, 10);
            let mut tx = Transaction::transfer(kp.address(), Address::from_bytes([7u8; 20]), 1, 1)
                .with_timestamp(now_millis() - ts);
            kp.sign_transaction(&mut tx).unwrap();
            pool.add_transaction(tx.clone()).unwrap();
            expected.push(tx);
        }
        expected.sort_by_key(|t| t.timestamp);

        assert_eq!(pool.get_transactions(10), expected);
        assert_eq!(pool.get_transactions(2), expected[..2].to_vec());
    }

    #[test]
    fn test_get_transactions_keeps_nonce_order() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let kp = funded(&state, 100);
        let pool = TransactionPool::new(PoolConfig::default(), state);

        // Nonce 2 carries the older timestamp
        let mut first = Transaction::transfer(kp.address(), Address::from_bytes([7u8; 20]), 1, 1)
            .with_timestamp(now_millis() - 10);
        kp.sign_transaction(&mut first).unwrap();
        let mut second = Transaction::transfer(kp.address(), Address::from_bytes([7u8; 20]), 1, 2)
            .with_timestamp(now_millis() - 500);
        kp.sign_transaction(&mut second).unwrap();
        pool.add_transaction(first.clone()).unwrap();
        pool.add_transaction(second.clone()).unwrap();

        assert_eq!(pool.get_transactions(10), vec![first.clone(), second]);
        assert_eq!(pool.get_transactions(1), vec![first]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let kp = funded(&state, 100);
        let pool = TransactionPool::new(PoolConfig::default(), state);

        let hash = pool.add_transaction(signed(&kp, 1, 1)).unwrap();
        assert_eq!(pool.remove_transactions(&[hash, Hash::compute(b"unknown")]).unwrap(), 1);
        assert_eq!(pool.remove_transactions(&[hash]).unwrap(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_clear_expired() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let pool = TransactionPool::new(PoolConfig::default(), state.clone());

        let old = funded(&state, 10);
        let mut stale = Transaction::transfer(old.address(), Address::from_bytes([7u8; 20]), 1, 1)
            .with_timestamp(1_000);
        old.sign_transaction(&mut stale).unwrap();
        pool.add_transaction(stale.clone()).unwrap();

        let fresh = funded(&state, 10);
        let fresh_tx = signed(&fresh, 1, 1);
        pool.add_transaction(fresh_tx.clone()).unwrap();

        assert_eq!(pool.clear_expired(Duration::from_secs(3600)).unwrap(), 1);
        assert!(!pool.contains(&stale.tx_hash));
        assert!(pool.contains(&fresh_tx.tx_hash));
    }

    #[test]
    fn test_reload_from_disk() {
        let temp = TempDir::new().unwrap();
        let kp;
        let kept;
        let confirmed;
        {
            let state = state(&temp);
            kp = funded(&state, 100);
            let pool = TransactionPool::new(PoolConfig::default(), state.clone());
            confirmed = pool.add_transaction(signed(&kp, 1, 1)).unwrap();
            kept = pool.add_transaction(signed(&kp, 1, 2)).unwrap();
            // Nonce 1 lands in a block behind the pool's back
            state.increment_nonce(&kp.address()).unwrap();
        }

        let state = state(&temp);
        let pool = TransactionPool::load(PoolConfig::default(), state.clone()).unwrap();
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&kept));
        assert!(!pool.contains(&confirmed));
        pool.add_transaction(signed(&kp, 1, 3)).unwrap();

        assert_eq!(state.database().iter_column(ColumnFamily::Mempool).unwrap().len(), 2);
    }

    #[test]
    fn test_clear() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let kp = funded(&state, 100);
        let pool = TransactionPool::new(PoolConfig::default(), state.clone());
        pool.add_transaction(signed(&kp, 1, 1)).unwrap();

        pool.clear().unwrap();
        assert!(pool.is_empty());
        assert!(state.database().iter_column(ColumnFamily::Mempool).unwrap().is_empty());
    }

    #[test]
    fn test_priority_order_through_pool() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let pool = TransactionPool::new(PoolConfig::default(), state.clone());

        let low = funded(&state, 100);
        let mut low_tx = Transaction::transfer(low.address(), Address::from_bytes([7u8; 20]), 1, 1).with_fee(1);
        low.sign_transaction(&mut low_tx).unwrap();
        let high = funded(&state, 100);
        let mut high_tx = Transaction::transfer(high.address(), Address::from_bytes([7u8; 20]), 1, 1).with_fee(9);
        high.sign_transaction(&mut high_tx).unwrap();

        pool.add_transaction(low_tx.clone()).unwrap();
        pool.add_transaction(high_tx.clone()).unwrap();
        assert_eq!(pool.get_transactions_by_priority(10), vec![high_tx, low_tx]);
    }
}
