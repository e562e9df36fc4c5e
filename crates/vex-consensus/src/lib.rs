//! VEX Consensus - Proof of Stake
//!
//! Block producers are drawn at random, weighted by stake, from the validators
//! active within the activity window. Blocks are checked for linkage, hash and
//! validator signature; the heavier valid chain wins a conflict.

pub mod engine;
pub mod error;
pub mod validator;

pub use engine::{cumulative_weight, select_from, ConsensusEngine};
pub use error::ConsensusError;
pub use validator::{
    active_in, slash_penalty, stake_in, unstake_in, StakeManager, ValidatorRegistry,
    DEFAULT_ACTIVITY_WINDOW_MS, SLASH_RATE_PERCENT,
};
