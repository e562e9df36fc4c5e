//! The ledger: chain, world state and pool behind one append lock.
//!
//! Lifecycle is `Uninitialized -> GenesisCreated -> Active`. Opening a ledger
//! either adopts a valid persisted chain or wipes state and writes a fresh
//! genesis block. Blocks then arrive through local production or external
//! ingestion. Both build the next state on a working copy and write it
//! together with the block in one batch; the in-memory chain and state only
//! move once that batch is on disk.

use crate::apply::{apply_block, apply_transaction, replay, reward_validator};
use crate::collaborator::{KeyProvider, NetworkCollaborator};
use crate::error::CoreError;
use crate::genesis::{build_genesis, GenesisConfig};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use vex_consensus::{cumulative_weight, ConsensusEngine, ValidatorRegistry, DEFAULT_ACTIVITY_WINDOW_MS};
use vex_crypto::Keypair;
use vex_storage::{BlockStore, StateStore, WorldState, WriteBatch};
use vex_txpool::TransactionPool;
use vex_types::{now_millis, Amount, Block, Hash, Transaction, VEX};

/// Base block reward paid on top of fees.
pub const DEFAULT_BASE_REWARD: Amount = 2 * VEX;

/// Most transactions pulled from the pool per block.
pub const DEFAULT_MAX_BLOCK_TRANSACTIONS: usize = 100;

/// Most blocks kept for broadcast retry. The oldest is dropped beyond this.
pub const MAX_PENDING_BROADCASTS: usize = 64;

/// Ledger parameters.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub base_reward: Amount,
    pub max_block_transactions: usize,
    pub activity_window_ms: u64,
    pub genesis: GenesisConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_reward: DEFAULT_BASE_REWARD,
            max_block_transactions: DEFAULT_MAX_BLOCK_TRANSACTIONS,
            activity_window_ms: DEFAULT_ACTIVITY_WINDOW_MS,
            genesis: GenesisConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerPhase {
    Uninitialized,
    GenesisCreated,
    Active,
}

pub struct Ledger {
    config: LedgerConfig,
    state: Arc<StateStore>,
    blocks: BlockStore,
    consensus: ConsensusEngine,
    pool: Arc<TransactionPool>,
    network: Arc<dyn NetworkCollaborator>,
    chain: RwLock<Vec<Block>>,
    phase: RwLock<LedgerPhase>,
    /// Serializes every append and its persistence
    append_lock: Mutex<()>,
    pending_broadcasts: Mutex<VecDeque<Block>>,
}

impl Ledger {
    /// Open the ledger over `state`.
    ///
    /// A persisted chain that passes validation and replays cleanly is
    /// adopted. If the persisted state disagrees with the replay, the replayed
    /// state wins and is written back. Otherwise state is wiped and a genesis
    /// block is created, signed by `genesis_key` or by a freshly generated key.
    pub fn open(
        config: LedgerConfig,
        state: Arc<StateStore>,
        pool: Arc<TransactionPool>,
        network: Arc<dyn NetworkCollaborator>,
        genesis_key: Option<&Keypair>,
    ) -> Result<Self, CoreError> {
        let registry = ValidatorRegistry::new(state.clone(), config.activity_window_ms);
        let ledger = Self {
            blocks: BlockStore::new(state.database().clone()),
            consensus: ConsensusEngine::new(registry),
            config,
            state,
            pool,
            network,
            chain: RwLock::new(Vec::new()),
            phase: RwLock::new(LedgerPhase::Uninitialized),
            append_lock: Mutex::new(()),
            pending_broadcasts: Mutex::new(VecDeque::new()),
        };

        let persisted = match ledger.blocks.load_blocks() {
            Ok(blocks) => blocks,
            Err(e) => {
                tracing::warn!(error = %e, "Persisted chain unreadable");
                Vec::new()
            }
        };

        if !persisted.is_empty() {
            let replayed = ledger
                .consensus
                .is_chain_valid(&persisted)
                .map_err(CoreError::from)
                .and_then(|()| replay(&persisted, ledger.config.base_reward));
            match replayed {
                Ok(world) => {
                    ledger.reconcile_state(world)?;
                    let phase = if persisted.len() > 1 {
                        LedgerPhase::Active
                    } else {
                        LedgerPhase::GenesisCreated
                    };
                    tracing::info!(height = persisted.len() - 1, "Chain loaded");
                    *ledger.chain.write() = persisted;
                    *ledger.phase.write() = phase;
                    return Ok(ledger);
                }
                Err(e) => tracing::warn!(error = %e, "Persisted chain invalid, re-creating genesis"),
            }
        }

        ledger.create_genesis(genesis_key)?;
        Ok(ledger)
    }

    /// Make the live state match the state replayed from the adopted chain.
    fn reconcile_state(&self, replayed: WorldState) -> Result<(), CoreError> {
        if self.state.read(|live| live == &replayed) {
            return Ok(());
        }
        tracing::warn!(
            persisted_accounts = self.state.read(|w| w.accounts.len()),
            replayed_accounts = replayed.accounts.len(),
            "Persisted state disagrees with chain, restoring replayed state"
        );
        self.state.restore(replayed)?;
        Ok(())
    }

    fn create_genesis(&self, key: Option<&Keypair>) -> Result<(), CoreError> {
        let generated;
        let key = match key {
            Some(key) => key,
            None => {
                generated = Keypair::generate();
                &generated
            }
        };

        let genesis = build_genesis(key, &self.config.genesis, now_millis())?;
        let mut working = self.state.snapshot();
        working.clear_non_system();
        apply_block(&mut working, &genesis, self.config.base_reward)?;

        let mut batch = WriteBatch::new();
        BlockStore::stage_replace_all(&mut batch, std::slice::from_ref(&genesis))?;
        tracing::warn!("Resetting world state for new genesis");
        self.state.commit(working, batch)?;
        self.pool.clear()?;

        tracing::info!(
            hash = %genesis.hash,
            validator = %genesis.validator,
            stake = genesis.stake_amount,
            "Genesis block created"
        );
        *self.chain.write() = vec![genesis];
        *self.phase.write() = LedgerPhase::GenesisCreated;
        Ok(())
    }

    pub fn phase(&self) -> LedgerPhase {
        *self.phase.read()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn pool(&self) -> &Arc<TransactionPool> {
        &self.pool
    }

    pub fn consensus(&self) -> &ConsensusEngine {
        &self.consensus
    }

    /// Admit a transaction to the pool and gossip it.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash, CoreError> {
        let hash = self.pool.add_transaction(tx.clone())?;
        if let Err(e) = self.network.broadcast_transaction(&tx) {
            tracing::warn!(tx = %hash, error = %e, "Transaction broadcast failed");
        }
        Ok(hash)
    }

    /// Produce, sign and append the next block as the holder of `keys`.
    ///
    /// Pool transactions that fail to apply are left out of the block and
    /// evicted from the pool. Nothing reaches disk until the signed block and
    /// the resulting state are written together.
    pub fn produce_block(&self, keys: &dyn KeyProvider) -> Result<Block, CoreError> {
        let _guard = self.append_lock.lock();
        let now = now_millis();
        let public_key = keys.public_key();
        let address = public_key.to_address();

        let stake = self.state.read(|w| w.stake_of(&address));
        if stake == 0 {
            return Err(CoreError::InsufficientStake {
                required: 1,
                available: 0,
            });
        }
        let selected = self.consensus.select_validator(now)?;
        if selected.address != address {
            return Err(CoreError::NotSelectedValidator {
                selected: selected.address.to_string(),
                caller: address.to_string(),
            });
        }

        let previous = self
            .latest_block()
            .ok_or_else(|| CoreError::InvalidBlock("empty chain".into()))?;
        let index = previous.index + 1;
        let timestamp = now.max(previous.timestamp);
        let mut working = self.state.snapshot();

        let mut included = Vec::new();
        let mut evicted = Vec::new();
        for tx in self.pool.get_transactions(self.config.max_block_transactions) {
            let mut attempt = working.clone();
            match apply_transaction(&mut attempt, &tx, index, timestamp) {
                Ok(_) => {
                    working = attempt;
                    included.push(tx);
                }
                Err(e) if e.is_persistence() => return Err(e),
                Err(e) => {
                    tracing::debug!(tx = %tx.tx_hash, error = %e, "Excluding transaction from block");
                    evicted.push(tx.tx_hash);
                }
            }
        }

        let mut block = Block::new(index, previous.hash, included, public_key, stake, timestamp);
        let reward = self.config.base_reward.saturating_add(block.total_fees());
        reward_validator(&mut working, &address, reward, timestamp)?;
        keys.sign_block(&mut block)?;

        self.commit_block(&block, working)?;

        evicted.extend(block.transactions.iter().map(|tx| tx.tx_hash));
        if let Err(e) = self.pool.remove_transactions(&evicted) {
            tracing::warn!(error = %e, "Failed to evict transactions from pool");
        }

        tracing::info!(
            index = block.index,
            hash = %block.hash,
            txs = block.tx_count(),
            reward,
            "Block produced"
        );

        if let Err(e) = self.network.broadcast_block(&block) {
            tracing::warn!(index = block.index, error = %e, "Block broadcast failed, queued for retry");
            self.queue_broadcast(block.clone());
        }
        Ok(block)
    }

    /// Validate and append a block received from a peer.
    ///
    /// The whole block is applied to a working copy; any failing
    /// transaction rejects the block without touching state.
    pub fn add_block(&self, block: Block) -> Result<(), CoreError> {
        let _guard = self.append_lock.lock();
        let previous = self
            .latest_block()
            .ok_or_else(|| CoreError::InvalidBlock("empty chain".into()))?;

        if let Err(e) = self.consensus.is_valid(&block, &previous) {
            tracing::warn!(index = block.index, error = %e, "Rejected block");
            return Err(e.into());
        }

        let mut working = self.state.snapshot();
        if let Err(e) = apply_block(&mut working, &block, self.config.base_reward) {
            tracing::warn!(index = block.index, error = %e, "Rejected block");
            return Err(e);
        }

        self.commit_block(&block, working)?;

        let hashes: Vec<Hash> = block.transactions.iter().map(|tx| tx.tx_hash).collect();
        let (index, hash) = (block.index, block.hash);

        if let Err(e) = self.pool.remove_transactions(&hashes) {
            tracing::warn!(error = %e, "Failed to evict transactions from pool");
        }
        tracing::info!(index, hash = %hash, "Block added");
        Ok(())
    }

    /// Write `block` and the state it produces in one batch, then extend the
    /// in-memory chain. A failed write leaves chain and state as they were.
    fn commit_block(&self, block: &Block, working: WorldState) -> Result<(), CoreError> {
        let mut batch = WriteBatch::new();
        BlockStore::stage_block(&mut batch, block)?;
        if let Err(e) = self.state.commit(working, batch) {
            tracing::error!(index = block.index, error = %e, "Block persistence failed");
            return Err(e.into());
        }
        self.chain.write().push(block.clone());
        *self.phase.write() = LedgerPhase::Active;
        Ok(())
    }

    fn queue_broadcast(&self, block: Block) {
        let mut pending = self.pending_broadcasts.lock();
        if pending.len() >= MAX_PENDING_BROADCASTS {
            if let Some(dropped) = pending.pop_front() {
                tracing::warn!(index = dropped.index, "Broadcast queue full, dropping oldest block");
            }
        }
        pending.push_back(block);
    }

    /// Adopt `candidate` if it is valid from an empty state and strictly
    /// heavier than the local chain. Returns whether it was adopted.
    pub fn consider_chain(&self, candidate: Vec<Block>) -> Result<bool, CoreError> {
        let _guard = self.append_lock.lock();

        let local_weight = cumulative_weight(&self.chain.read());
        let candidate_weight = cumulative_weight(&candidate);
        if candidate_weight <= local_weight {
            tracing::debug!(local_weight, candidate_weight, "Candidate chain not heavier");
            return Ok(false);
        }

        self.consensus.is_chain_valid(&candidate)?;
        let world = replay(&candidate, self.config.base_reward)?;

        let mut batch = WriteBatch::new();
        BlockStore::stage_replace_all(&mut batch, &candidate)?;
        if let Err(e) = self.state.commit(world, batch) {
            tracing::error!(error = %e, "Chain replacement persistence failed");
            return Err(e.into());
        }

        let hashes: Vec<Hash> = candidate
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.tx_hash))
            .collect();
        let height = candidate.len().saturating_sub(1);
        *self.phase.write() = if candidate.len() > 1 {
            LedgerPhase::Active
        } else {
            LedgerPhase::GenesisCreated
        };
        *self.chain.write() = candidate;

        if let Err(e) = self.pool.remove_transactions(&hashes) {
            tracing::warn!(error = %e, "Failed to evict transactions from pool");
        }
        tracing::info!(height, weight = candidate_weight, "Chain replaced");
        Ok(true)
    }

    /// Pull a chain and pending transactions from the network.
    ///
    /// Returns whether the local chain was replaced.
    pub fn sync(&self) -> Result<bool, CoreError> {
        let candidate = self
            .network
            .sync_blockchain()
            .map_err(|e| CoreError::Network(e.to_string()))?;
        let replaced = if candidate.is_empty() {
            false
        } else {
            self.consider_chain(candidate)?
        };

        let txs = self
            .network
            .sync_mempool()
            .map_err(|e| CoreError::Network(e.to_string()))?;
        let offered = txs.len();
        let admitted = txs
            .into_iter()
            .filter(|tx| self.pool.add_transaction(tx.clone()).is_ok())
            .count();
        tracing::debug!(offered, admitted, "Mempool synced");
        Ok(replaced)
    }

    /// Retry queued block broadcasts. Returns how many were delivered.
    pub fn retry_broadcasts(&self) -> usize {
        let queued = std::mem::take(&mut *self.pending_broadcasts.lock());
        let mut delivered = 0;
        let mut still_pending = VecDeque::new();
        for block in queued {
            match self.network.broadcast_block(&block) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(index = block.index, error = %e, "Block broadcast retry failed");
                    still_pending.push_back(block);
                }
            }
        }
        if !still_pending.is_empty() {
            let mut pending = self.pending_broadcasts.lock();
            still_pending.append(&mut pending);
            // Keep the newest blocks when the requeue overflows
            let excess = still_pending.len().saturating_sub(MAX_PENDING_BROADCASTS);
            if excess > 0 {
                tracing::warn!(dropped = excess, "Broadcast queue full, dropping oldest blocks");
                still_pending.drain(..excess);
            }
            *pending = still_pending;
        }
        delivered
    }

    pub fn pending_broadcasts(&self) -> usize {
        self.pending_broadcasts.lock().len()
    }

    /// Number of blocks, genesis included.
    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }

    pub fn latest_block(&self) -> Option<Block> {
        self.chain.read().last().cloned()
    }

    pub fn block_by_index(&self, index: u64) -> Option<Block> {
        self.chain.read().get(index as usize).cloned()
    }

    pub fn block_by_hash(&self, hash: &Hash) -> Option<Block> {
        match self.blocks.index_of_block(hash) {
            Ok(Some(index)) => self.block_by_index(index).filter(|b| &b.hash == hash),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Block index lookup failed");
                self.chain.read().iter().find(|b| &b.hash == hash).cloned()
            }
        }
    }

    /// Blocks newest first. Pages start at 1.
    pub fn blocks_paginated(&self, page: usize, per_page: usize) -> Vec<Block> {
        let offset = page.max(1).saturating_sub(1).saturating_mul(per_page);
        self.chain
            .read()
            .iter()
            .rev()
            .skip(offset)
            .take(per_page)
            .cloned()
            .collect()
    }

    /// A confirmed transaction and the index of its block.
    pub fn transaction_by_hash(&self, hash: &Hash) -> Option<(Transaction, u64)> {
        let index = match self.blocks.index_of_transaction(hash) {
            Ok(index) => index?,
            Err(e) => {
                tracing::warn!(error = %e, "Transaction index lookup failed");
                return None;
            }
        };
        let block = self.block_by_index(index)?;
        block
            .transactions
            .into_iter()
            .find(|tx| &tx.tx_hash == hash)
            .map(|tx| (tx, index))
    }

    pub fn cumulative_weight(&self) -> u128 {
        cumulative_weight(&self.chain.read())
    }

    /// Copy of the whole chain.
    pub fn blocks(&self) -> Vec<Block> {
        self.chain.read().clone()
    }

    /// Re-run structural validation over the current chain.
    pub fn is_chain_valid(&self) -> bool {
        self.consensus.is_chain_valid(&self.chain.read()).is_ok()
    }
}
