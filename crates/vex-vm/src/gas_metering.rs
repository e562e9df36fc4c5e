use crate::error::VmError;
use crate::opcode::Opcode;

/// Gas tracking during execution.
#[derive(Debug, Clone)]
pub struct GasTracker {
    /// Gas limit for this execution
    limit: u64,
    /// Gas already used
    used: u64,
}

impl GasTracker {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    /// Charge gas, failing without charging if the limit would be exceeded.
    pub fn charge(&mut self, amount: u64) -> Result<(), VmError> {
        let new_used = self.used.checked_add(amount).ok_or(VmError::OutOfGas {
            used: u64::MAX,
            limit: self.limit,
        })?;

        if new_used > self.limit {
            Err(VmError::OutOfGas {
                used: new_used,
                limit: self.limit,
            })
        } else {
            self.used = new_used;
            Ok(())
        }
    }

    /// Charge the fixed cost of an opcode.
    pub fn charge_op(&mut self, opcode: Opcode) -> Result<(), VmError> {
        self.charge(opcode.gas_cost())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_tracker() {
        let mut tracker = GasTracker::new(100_000);
        assert_eq!(tracker.limit(), 100_000);
        assert_eq!(tracker.remaining(), 100_000);

        tracker.charge(10_000).unwrap();
        assert_eq!(tracker.used(), 10_000);
        assert_eq!(tracker.remaining(), 90_000);
    }

    #[test]
    fn test_gas_tracker_out_of_gas_does_not_charge() {
        let mut tracker = GasTracker::new(1_000);
        tracker.charge(900).unwrap();
        assert_eq!(
            tracker.charge(200),
            Err(VmError::OutOfGas { used: 1_100, limit: 1_000 })
        );
        assert_eq!(tracker.used(), 900);
    }

    #[test]
    fn test_exact_limit_is_allowed() {
        let mut tracker = GasTracker::new(203);
        tracker.charge_op(Opcode::SStore).unwrap();
        tracker.charge_op(Opcode::Add).unwrap();
        assert_eq!(tracker.remaining(), 0);
        assert!(tracker.charge_op(Opcode::Revert).is_ok());
        assert!(tracker.charge_op(Opcode::Add).is_err());
    }
}
