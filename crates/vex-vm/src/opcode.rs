use crate::error::VmError;
use std::fmt;
use std::str::FromStr;

/// Gas charged up front for a contract deployment.
pub const CREATE_GAS: u64 = 2000;

/// Interpreter instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Lt,
    Gt,
    And,
    Or,
    Not,
    Sha3,
    Store,
    Load,
    SStore,
    SLoad,
    Balance,
    Transfer,
    Call,
    Jump,
    JumpI,
    Revert,
    Return,
    Log,
}

impl Opcode {
    pub const ALL: [Opcode; 23] = [
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Eq,
        Opcode::Lt,
        Opcode::Gt,
        Opcode::And,
        Opcode::Or,
        Opcode::Not,
        Opcode::Sha3,
        Opcode::Store,
        Opcode::Load,
        Opcode::SStore,
        Opcode::SLoad,
        Opcode::Balance,
        Opcode::Transfer,
        Opcode::Call,
        Opcode::Jump,
        Opcode::JumpI,
        Opcode::Revert,
        Opcode::Return,
        Opcode::Log,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Eq => "EQ",
            Opcode::Lt => "LT",
            Opcode::Gt => "GT",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Not => "NOT",
            Opcode::Sha3 => "SHA3",
            Opcode::Store => "STORE",
            Opcode::Load => "LOAD",
            Opcode::SStore => "SSTORE",
            Opcode::SLoad => "SLOAD",
            Opcode::Balance => "BALANCE",
            Opcode::Transfer => "TRANSFER",
            Opcode::Call => "CALL",
            Opcode::Jump => "JUMP",
            Opcode::JumpI => "JUMPI",
            Opcode::Revert => "REVERT",
            Opcode::Return => "RETURN",
            Opcode::Log => "LOG",
        }
    }

    /// Fixed gas cost per execution.
    pub fn gas_cost(&self) -> u64 {
        match self {
            Opcode::Add | Opcode::Sub => 3,
            Opcode::Mul | Opcode::Div => 5,
            Opcode::Eq | Opcode::Lt | Opcode::Gt | Opcode::And | Opcode::Or | Opcode::Not => 3,
            Opcode::Sha3 => 30,
            Opcode::Store => 100,
            Opcode::Load => 50,
            Opcode::SStore => 200,
            Opcode::SLoad | Opcode::Balance => 100,
            Opcode::Transfer | Opcode::Call => 500,
            Opcode::Jump | Opcode::JumpI => 10,
            Opcode::Revert => 0,
            Opcode::Return | Opcode::Log => 10,
        }
    }

    /// Minimum operand count. Extra operands are allowed only for the
    /// variadic opcodes.
    pub fn min_operands(&self) -> usize {
        match self {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Eq
            | Opcode::Lt
            | Opcode::Gt
            | Opcode::And
            | Opcode::Or => 3,
            Opcode::Not
            | Opcode::Sha3
            | Opcode::Store
            | Opcode::Load
            | Opcode::SStore
            | Opcode::SLoad
            | Opcode::Balance
            | Opcode::Transfer
            | Opcode::JumpI => 2,
            Opcode::Call | Opcode::Jump => 1,
            Opcode::Revert | Opcode::Return | Opcode::Log => 0,
        }
    }

    pub fn is_variadic(&self) -> bool {
        matches!(self, Opcode::Call | Opcode::Revert | Opcode::Log)
    }

    /// Operand count check.
    pub fn check_arity(&self, actual: usize) -> Result<(), VmError> {
        let expected = self.min_operands();
        let max = match self {
            Opcode::Return => 1,
            op if op.is_variadic() => usize::MAX,
            _ => expected,
        };
        if actual < expected || actual > max {
            return Err(VmError::WrongArity {
                opcode: self.name(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Opcode {
    type Err = VmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.name() == upper)
            .ok_or_else(|| VmError::UnknownOpcode(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_parse_case_insensitive() {
        assert_eq!("add".parse::<Opcode>().unwrap(), Opcode::Add);
        assert_eq!("SSTORE".parse::<Opcode>().unwrap(), Opcode::SStore);
        assert_eq!(
            "PUSH".parse::<Opcode>(),
            Err(VmError::UnknownOpcode("PUSH".to_string()))
        );
    }

    #[test]
    fn test_name_roundtrip() {
        for op in Opcode::ALL {
            assert_eq!(op.name().parse::<Opcode>().unwrap(), op);
        }
    }

    #[test]
    fn test_gas_costs() {
        assert_eq!(Opcode::Add.gas_cost(), 3);
        assert_eq!(Opcode::Div.gas_cost(), 5);
        assert_eq!(Opcode::Store.gas_cost(), 100);
        assert_eq!(Opcode::Load.gas_cost(), 50);
        assert_eq!(Opcode::SStore.gas_cost(), 200);
        assert_eq!(Opcode::SLoad.gas_cost(), 100);
        assert_eq!(Opcode::Balance.gas_cost(), 100);
        assert_eq!(Opcode::Transfer.gas_cost(), 500);
        assert_eq!(Opcode::Call.gas_cost(), 500);
        assert_eq!(Opcode::Sha3.gas_cost(), 30);
        assert_eq!(Opcode::Revert.gas_cost(), 0);
        assert_eq!(CREATE_GAS, 2000);
    }

    #[test]
    fn test_arity() {
        assert!(Opcode::Add.check_arity(3).is_ok());
        assert!(Opcode::Add.check_arity(2).is_err());
        assert!(Opcode::Add.check_arity(4).is_err());
        assert!(Opcode::Log.check_arity(0).is_ok());
        assert!(Opcode::Log.check_arity(5).is_ok());
        assert!(Opcode::Return.check_arity(1).is_ok());
        assert!(Opcode::Return.check_arity(2).is_err());
        assert!(Opcode::Call.check_arity(0).is_err());
    }
}
