use crate::error::VmError;
use crate::opcode::Opcode;
use std::fmt;

/// One parsed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<String>,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for operand in &self.operands {
            write!(f, " {}", operand)?;
        }
        Ok(())
    }
}

/// A fully parsed program. Jump targets index into `instructions`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    instructions: Vec<Instruction>,
}

impl Program {
    /// Parse `;`-separated instructions with whitespace-separated operands.
    /// Empty statements are skipped.
    pub fn parse(source: &str) -> Result<Self, VmError> {
        let mut instructions = Vec::new();
        for statement in source.split(';') {
            let mut parts = statement.split_whitespace();
            let Some(word) = parts.next() else {
                continue;
            };
            let opcode: Opcode = word.parse()?;
            let operands: Vec<String> = parts.map(str::to_string).collect();
            opcode.check_arity(operands.len())?;
            instructions.push(Instruction { opcode, operands });
        }
        Ok(Self { instructions })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program() {
        let program = Program::parse("STORE x 5;  ADD y x 2 ;\n;LOG done now").unwrap();
        assert_eq!(program.len(), 3);
        assert_eq!(program.get(0).unwrap().opcode, Opcode::Store);
        assert_eq!(program.get(1).unwrap().operands, vec!["y", "x", "2"]);
        assert_eq!(program.get(2).unwrap().to_string(), "LOG done now");
    }

    #[test]
    fn test_empty_program() {
        assert!(Program::parse("").unwrap().is_empty());
        assert!(Program::parse(" ; ;").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        assert_eq!(
            Program::parse("STORE x 1; FOO x"),
            Err(VmError::UnknownOpcode("FOO".to_string()))
        );
    }

    #[test]
    fn test_wrong_arity_rejected() {
        assert!(matches!(
            Program::parse("ADD x 1"),
            Err(VmError::WrongArity { opcode: "ADD", expected: 3, actual: 2 })
        ));
    }
}
