//! Transaction ordering.
//!
//! Two orders are offered:
//! 1. Arrival: ascending timestamp, ties broken by admission sequence
//! 2. Priority: highest fee first, older first
//!
//! Neither ever reorders a sender's nonces.

use crate::pool::PoolEntry;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use vex_types::{Address, Amount, Transaction};

/// Priority score for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityScore {
    pub fee: Amount,
    /// Unix milliseconds
    pub timestamp: u64,
    /// Admission sequence
    pub seq: u64,
}

impl PriorityScore {
    pub fn of(entry: &PoolEntry) -> Self {
        Self {
            fee: entry.tx.fee,
            timestamp: entry.tx.timestamp,
            seq: entry.seq,
        }
    }
}

impl PartialOrd for PriorityScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `Less` means "goes first".
impl Ord for PriorityScore {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher fee first
        match other.fee.cmp(&self.fee) {
            Ordering::Equal => {}
            other => return other,
        }

        // Then older first
        match self.timestamp.cmp(&other.timestamp) {
            Ordering::Equal => {}
            other => return other,
        }

        self.seq.cmp(&other.seq)
    }
}

/// Arrival order, truncated to `max_count`.
///
/// A sender's transactions still come out in nonce order, so a later nonce
/// stamped earlier cannot jump ahead of its predecessor.
pub fn arrival_order(entries: Vec<&PoolEntry>, max_count: usize) -> Vec<Transaction> {
    merge_by_sender(entries, max_count, |e| (e.tx.timestamp, e.seq))
}

/// Fee priority across senders, nonce order within a sender.
pub fn priority_order(entries: Vec<&PoolEntry>, max_count: usize) -> Vec<Transaction> {
    merge_by_sender(entries, max_count, PriorityScore::of)
}

/// Merge per-sender nonce queues, always taking the queue whose head has the
/// smallest key.
fn merge_by_sender<K, F>(entries: Vec<&PoolEntry>, max_count: usize, key: F) -> Vec<Transaction>
where
    K: Ord,
    F: Fn(&PoolEntry) -> K,
{
    let mut by_sender: BTreeMap<Address, Vec<&PoolEntry>> = BTreeMap::new();
    for entry in entries {
        by_sender.entry(entry.tx.sender).or_default().push(entry);
    }

    let mut queues: Vec<VecDeque<&PoolEntry>> = by_sender
        .into_values()
        .map(|mut list| {
            list.sort_by_key(|e| e.tx.nonce);
            VecDeque::from(list)
        })
        .collect();

    let mut heap = BinaryHeap::new();
    for (slot, queue) in queues.iter().enumerate() {
        if let Some(head) = queue.front() {
            heap.push(Reverse((key(head), slot)));
        }
    }

    let mut result = Vec::with_capacity(max_count.min(heap.len()));
    while result.len() < max_count {
        let Some(Reverse((_, slot))) = heap.pop() else {
            break;
        };
        let queue = &mut queues[slot];
        if let Some(entry) = queue.pop_front() {
            result.push(entry.tx.clone());
        }
        if let Some(next) = queue.front() {
            heap.push(Reverse((key(next), slot)));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sender: u8, nonce: u64, fee: Amount, timestamp: u64, seq: u64) -> PoolEntry {
        let tx = vex_types::Transaction::transfer(
            Address::from_bytes([sender; 20]),
            Address::from_bytes([0xee; 20]),
            1,
            nonce,
        )
        .with_fee(fee)
        .with_timestamp(timestamp);
        PoolEntry { tx, seq }
    }

    #[test]
    fn test_priority_score_ordering() {
        let cheap = PriorityScore { fee: 1, timestamp: 10, seq: 0 };
        let rich = PriorityScore { fee: 5, timestamp: 20, seq: 1 };
        let rich_older = PriorityScore { fee: 5, timestamp: 15, seq: 2 };

        assert!(rich < cheap);
        assert!(rich_older < rich);
    }

    #[test]
    fn test_arrival_order() {
        let entries = vec![entry(1, 1, 0, 30, 0), entry(2, 1, 0, 10, 1), entry(3, 1, 0, 10, 2)];
        let txs = arrival_order(entries.iter().collect(), 10);
        let timestamps: Vec<(u64, u8)> = txs.iter().map(|t| (t.timestamp, t.sender.as_bytes()[0])).collect();
        assert_eq!(timestamps, vec![(10, 2), (10, 3), (30, 1)]);

        assert_eq!(arrival_order(entries.iter().collect(), 1).len(), 1);
    }

    #[test]
    fn test_arrival_keeps_sender_nonce_order() {
        // Sender 1 stamped nonce 2 before nonce 1
        let entries = vec![
            entry(1, 2, 0, 5, 0),
            entry(2, 1, 0, 7, 1),
            entry(1, 1, 0, 10, 2),
            entry(1, 3, 0, 12, 3),
        ];
        let txs = arrival_order(entries.iter().collect(), 10);
        let order: Vec<(u8, u64)> = txs.iter().map(|t| (t.sender.as_bytes()[0], t.nonce)).collect();
        assert_eq!(order, vec![(2, 1), (1, 1), (1, 2), (1, 3)]);
    }

    #[test]
    fn test_priority_keeps_sender_nonce_order() {
        // Sender 1's second transaction pays more than its first
        let entries = vec![
            entry(1, 1, 1, 10, 0),
            entry(1, 2, 100, 11, 1),
            entry(2, 1, 50, 12, 2),
        ];
        let txs = priority_order(entries.iter().collect(), 10);
        let order: Vec<(u8, u64)> = txs.iter().map(|t| (t.sender.as_bytes()[0], t.nonce)).collect();
        assert_eq!(order, vec![(2, 1), (1, 1), (1, 2)]);
    }

    #[test]
    fn test_priority_truncates() {
        let entries = vec![entry(1, 1, 3, 10, 0), entry(2, 1, 2, 10, 1), entry(3, 1, 1, 10, 2)];
        let txs = priority_order(entries.iter().collect(), 2);
        let fees: Vec<Amount> = txs.iter().map(|t| t.fee).collect();
        assert_eq!(fees, vec![3, 2]);
    }
}
