//! Transaction Pool - Manages pending transactions
//!
//! Signed transactions wait here until a block includes them. The pool is
//! mirrored to disk and restored on startup.

pub mod error;
pub mod ordering;
pub mod pool;

pub use error::PoolError;
pub use ordering::{arrival_order, priority_order, PriorityScore};
pub use pool::{PoolConfig, PoolEntry, TransactionPool};
