//! Contract interpreter.
//!
//! Executes a parsed [`Program`] against a [`WorldState`] under a gas budget.
//! All effects (contract creation, storage, transfers) are staged and only
//! written to the world when the whole program succeeds.

use std::collections::BTreeMap;
use std::sync::Arc;

use vex_storage::{ContractStorage, StateStore, WorldState};
use vex_types::{Address, Amount, Contract, Transaction, TxKind};

use crate::error::VmError;
use crate::gas_metering::GasTracker;
use crate::opcode::{Opcode, CREATE_GAS};
use crate::program::{Instruction, Program};

/// A `LOG` or `CALL` record emitted during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub sender: Address,
    pub message: String,
    pub timestamp: u64,
}

/// Value move requested by `TRANSFER`, applied on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransfer {
    pub recipient: Address,
    pub amount: Amount,
}

/// Outcome of one contract execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    /// Contract address for deployments, `RETURN` value for calls
    pub output: Option<String>,
    pub gas_used: u64,
    pub logs: Vec<LogEntry>,
    pub transfers: Vec<PendingTransfer>,
    pub contract_address: Option<Address>,
    pub error: Option<VmError>,
}

impl ExecutionResult {
    fn failure(error: VmError, gas_used: u64) -> Self {
        Self {
            success: false,
            output: None,
            gas_used,
            logs: Vec::new(),
            transfers: Vec::new(),
            contract_address: None,
            error: Some(error),
        }
    }
}

/// Per-call execution context.
struct Frame<'a> {
    world: &'a WorldState,
    sender: Address,
    timestamp: u64,
    memory: BTreeMap<String, i128>,
    storage: ContractStorage,
    transfers: Vec<PendingTransfer>,
    logs: Vec<LogEntry>,
    output: Option<String>,
}

impl<'a> Frame<'a> {
    /// literal → memory → storage
    fn value(&self, operand: &str) -> Result<i128, VmError> {
        if let Ok(literal) = operand.parse::<i128>() {
            return Ok(literal);
        }
        if let Some(v) = self.memory.get(operand) {
            return Ok(*v);
        }
        if let Some(v) = self.storage.get(operand) {
            return Ok(*v);
        }
        Err(VmError::UndefinedVariable(operand.to_string()))
    }

    fn address(opcode: Opcode, operand: &str) -> Result<Address, VmError> {
        operand.parse().map_err(|_| VmError::InvalidOperand {
            opcode: opcode.name(),
            operand: operand.to_string(),
        })
    }

    fn binary(&mut self, ins: &Instruction) -> Result<(), VmError> {
        let a = self.value(&ins.operands[1])?;
        let b = self.value(&ins.operands[2])?;
        let result = match ins.opcode {
            Opcode::Add => a.checked_add(b).ok_or(VmError::IntegerOverflow)?,
            Opcode::Sub => a.checked_sub(b).ok_or(VmError::IntegerOverflow)?,
            Opcode::Mul => a.checked_mul(b).ok_or(VmError::IntegerOverflow)?,
            Opcode::Div => {
                if b == 0 {
                    return Err(VmError::DivideByZero);
                }
                a.checked_div(b).ok_or(VmError::IntegerOverflow)?
            }
            Opcode::Eq => (a == b) as i128,
            Opcode::Lt => (a < b) as i128,
            Opcode::Gt => (a > b) as i128,
            Opcode::And => a & b,
            Opcode::Or => a | b,
            other => return Err(VmError::UnknownOpcode(other.name().to_string())),
        };
        self.storage.insert(ins.operands[0].clone(), result);
        Ok(())
    }

    fn jump_target(&self, operand: &str, len: usize) -> Result<usize, VmError> {
        let target = self.value(operand)?;
        usize::try_from(target)
            .ok()
            .filter(|t| *t <= len)
            .ok_or(VmError::InvalidJump(target))
    }

    /// Execute one instruction and return the next program counter.
    fn step(&mut self, ins: &Instruction, pc: usize, len: usize) -> Result<usize, VmError> {
        let ops = &ins.operands;
        match ins.opcode {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Eq
            | Opcode::Lt
            | Opcode::Gt
            | Opcode::And
            | Opcode::Or => self.binary(ins)?,
            Opcode::Not => {
                let a = self.value(&ops[1])?;
                self.storage.insert(ops[0].clone(), !a);
            }
            Opcode::Sha3 => {
                let a = self.value(&ops[1])?;
                let digest = blake3::hash(a.to_string().as_bytes());
                let mut head = [0u8; 16];
                head.copy_from_slice(&digest.as_bytes()[..16]);
                self.storage.insert(ops[0].clone(), i128::from_be_bytes(head));
            }
            Opcode::Store => {
                let v = self.value(&ops[1])?;
                self.memory.insert(ops[0].clone(), v);
            }
            Opcode::Load => {
                let v = self.memory.get(&ops[1]).copied().unwrap_or(0);
                self.memory.insert(ops[0].clone(), v);
            }
            Opcode::SStore => {
                let v = self.value(&ops[1])?;
                self.storage.insert(ops[0].clone(), v);
            }
            Opcode::SLoad => {
                let v = self.storage.get(&ops[1]).copied().unwrap_or(0);
                self.memory.insert(ops[0].clone(), v);
            }
            Opcode::Balance => {
                let address = Self::address(ins.opcode, &ops[1])?;
                let balance =
                    i128::try_from(self.world.balance(&address)).map_err(|_| VmError::IntegerOverflow)?;
                self.memory.insert(ops[0].clone(), balance);
            }
            Opcode::Transfer => {
                let recipient = Self::address(ins.opcode, &ops[0])?;
                let raw = self.value(&ops[1])?;
                let amount = Amount::try_from(raw).map_err(|_| VmError::InvalidOperand {
                    opcode: ins.opcode.name(),
                    operand: raw.to_string(),
                })?;
                let pending = self
                    .transfers
                    .iter()
                    .fold(0 as Amount, |acc, t| acc.saturating_add(t.amount));
                let available = self.world.balance(&self.sender).saturating_sub(pending);
                if available < amount {
                    return Err(VmError::InsufficientBalance {
                        required: amount,
                        available,
                    });
                }
                self.transfers.push(PendingTransfer { recipient, amount });
            }
            Opcode::Call => {
                // Recorded only; calls never re-enter the interpreter.
                self.logs.push(LogEntry {
                    sender: self.sender,
                    message: format!("CALL {}", ops.join(" ")),
                    timestamp: self.timestamp,
                });
            }
            Opcode::Jump => return self.jump_target(&ops[0], len),
            Opcode::JumpI => {
                if self.value(&ops[1])? != 0 {
                    return self.jump_target(&ops[0], len);
                }
            }
            Opcode::Revert => {
                let reason = if ops.is_empty() {
                    "Execution reverted".to_string()
                } else {
                    ops.join(" ")
                };
                return Err(VmError::Reverted { reason });
            }
            Opcode::Return => {
                if let Some(operand) = ops.first() {
                    self.output = Some(self.value(operand)?.to_string());
                }
            }
            Opcode::Log => {
                self.logs.push(LogEntry {
                    sender: self.sender,
                    message: ops.join(" "),
                    timestamp: self.timestamp,
                });
            }
        }
        Ok(pc + 1)
    }
}

/// Contract virtual machine bound to a state store.
pub struct ContractVM {
    state: Arc<StateStore>,
}

impl ContractVM {
    pub fn new(state: Arc<StateStore>) -> Self {
        Self { state }
    }

    /// Execute a contract transaction and commit its effects on success.
    ///
    /// Only contract effects are applied here; value and fee movement of the
    /// transaction itself is the caller's concern.
    pub fn execute(&self, tx: &Transaction, block_number: u64, timestamp: u64) -> ExecutionResult {
        let mut failed = None;
        let committed = self.state.update(|world| {
            let result = Self::execute_in(world, tx, block_number, timestamp);
            if result.success {
                Ok(result)
            } else {
                let error = result.error.clone().unwrap_or(VmError::NotAContract);
                failed = Some(result);
                Err(error)
            }
        });

        match committed {
            Ok(result) => result,
            Err(error) => failed.unwrap_or_else(|| ExecutionResult::failure(error, 0)),
        }
    }

    /// Execute against a working world state.
    ///
    /// On success the contract, its storage and the pending transfers are
    /// written into `world`. On failure `world` is left unchanged.
    pub fn execute_in(
        world: &mut WorldState,
        tx: &Transaction,
        block_number: u64,
        timestamp: u64,
    ) -> ExecutionResult {
        let mut gas = GasTracker::new(tx.gas_limit);
        match Self::run(world, tx, timestamp, &mut gas) {
            Ok(result) => {
                tracing::debug!(
                    tx = %tx.tx_hash,
                    block = block_number,
                    gas_used = result.gas_used,
                    "Contract execution succeeded"
                );
                result
            }
            Err(error) => {
                tracing::debug!(
                    tx = %tx.tx_hash,
                    block = block_number,
                    gas_used = gas.used(),
                    %error,
                    "Contract execution failed"
                );
                ExecutionResult::failure(error, gas.used())
            }
        }
    }

    fn run(
        world: &mut WorldState,
        tx: &Transaction,
        timestamp: u64,
        gas: &mut GasTracker,
    ) -> Result<ExecutionResult, VmError> {
        let (code, contract_address, storage, is_create, args) = match &tx.kind {
            TxKind::Create { code } => (
                code.clone(),
                Contract::derive_address(&tx.sender, &tx.tx_hash),
                ContractStorage::new(),
                true,
                BTreeMap::new(),
            ),
            TxKind::Call {
                contract_address,
                args,
                ..
            } => {
                let contract = world
                    .contract(contract_address)
                    .ok_or_else(|| VmError::ContractNotFound(contract_address.to_string()))?;
                (
                    contract.code.clone(),
                    *contract_address,
                    world.contract_storage(contract_address),
                    false,
                    args.clone(),
                )
            }
            TxKind::Normal | TxKind::Reward | TxKind::Stake | TxKind::Unstake => {
                return Err(VmError::NotAContract)
            }
        };

        let program = Program::parse(&code)?;
        if is_create {
            gas.charge(CREATE_GAS)?;
        }

        let mut frame = Frame {
            world: &*world,
            sender: tx.sender,
            timestamp,
            memory: args,
            storage,
            transfers: Vec::new(),
            logs: Vec::new(),
            output: None,
        };

        let mut pc = 0;
        while let Some(ins) = program.get(pc) {
            gas.charge_op(ins.opcode)?;
            tracing::trace!(pc, instruction = %ins, "step");
            pc = frame.step(ins, pc, program.len())?;
        }

        let Frame {
            storage,
            transfers,
            logs,
            output,
            ..
        } = frame;

        let mut next = world.clone();
        for transfer in &transfers {
            next.transfer(&tx.sender, &transfer.recipient, transfer.amount)?;
        }
        if is_create {
            next.insert_contract(Contract {
                address: contract_address,
                code,
                creator: tx.sender,
                created_at: timestamp,
            });
        }
        next.set_contract_storage(&contract_address, storage);
        *world = next;

        let output = if is_create {
            Some(contract_address.to_string())
        } else {
            output
        };

        Ok(ExecutionResult {
            success: true,
            output,
            gas_used: gas.used(),
            logs,
            transfers,
            contract_address: Some(contract_address),
            error: None,
        })
    }
}
