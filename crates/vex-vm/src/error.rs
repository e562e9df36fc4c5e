use thiserror::Error;
use vex_storage::StateError;

/// Errors that can occur during VM execution.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmError {
    #[error("Out of gas: used {used}, limit {limit}")]
    OutOfGas { used: u64, limit: u64 },

    #[error("Unknown opcode: {0}")]
    UnknownOpcode(String),

    #[error("{opcode} requires {expected} operands, got {actual}")]
    WrongArity {
        opcode: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid operand for {opcode}: {operand}")]
    InvalidOperand { opcode: &'static str, operand: String },

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Jump target out of range: {0}")]
    InvalidJump(i128),

    #[error("Divide by zero")]
    DivideByZero,

    #[error("Integer overflow")]
    IntegerOverflow,

    #[error("Insufficient balance for transfer: required {required}, available {available}")]
    InsufficientBalance { required: u128, available: u128 },

    #[error("Contract not found: {0}")]
    ContractNotFound(String),

    #[error("Not a contract transaction")]
    NotAContract,

    #[error("Execution reverted: {reason}")]
    Reverted { reason: String },

    #[error("State error: {0}")]
    State(#[from] StateError),
}
