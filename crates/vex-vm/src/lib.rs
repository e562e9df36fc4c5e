//! VEX VM - gas-metered interpreter for line-oriented contracts.
//!
//! This crate provides:
//! - The closed opcode set with fixed gas costs and operand counts
//! - Program parsing (`;`-separated instructions)
//! - Gas metering
//! - Execution against the world state with all-or-nothing effects

pub mod error;
pub mod gas_metering;
pub mod opcode;
pub mod program;
pub mod runtime;

pub use error::VmError;
pub use gas_metering::GasTracker;
pub use opcode::{Opcode, CREATE_GAS};
pub use program::{Instruction, Program};
pub use runtime::{ContractVM, ExecutionResult, LogEntry, PendingTransfer};
