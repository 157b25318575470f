// Per-call execution context and gas meter
use crate::primitives::{Address, ChainError, Gas, Height, Result};
use crate::state::LedgerState;

/// Runtime context for one transaction or contract call. Holds exclusive
/// access to the ledger for the duration of the call.
pub struct ExecutionContext<'a> {
    pub caller: Address,
    pub originator: Address,
    pub gas_limit: Gas,
    pub gas_used: Gas,
    pub height: Height,
    pub state: &'a mut LedgerState,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(state: &'a mut LedgerState, caller: Address, gas_limit: Gas, height: Height) -> Self {
        Self {
            caller,
            originator: caller,
            gas_limit,
            gas_used: 0,
            height,
            state,
        }
    }

    pub fn gas_left(&self) -> Gas {
        self.gas_limit.saturating_sub(self.gas_used)
    }

    /// Charges `amount`, failing without charging anything if it would exceed the limit
    pub fn use_gas(&mut self, amount: Gas) -> Result<()> {
        match self.gas_used.checked_add(amount) {
            Some(total) if total <= self.gas_limit => {
                self.gas_used = total;
                Ok(())
            }
            _ => Err(ChainError::OutOfGas {
                used: self.gas_used,
                requested: amount,
                limit: self.gas_limit,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_metering() {
        let mut state = LedgerState::new();
        let mut ctx = ExecutionContext::new(&mut state, Address::zero(), 100, 1);

        ctx.use_gas(60).unwrap();
        assert_eq!(ctx.gas_left(), 40);

        let err = ctx.use_gas(41).unwrap_err();
        assert_eq!(err, ChainError::OutOfGas { used: 60, requested: 41, limit: 100 });
        assert_eq!(ctx.gas_used, 60);

        ctx.use_gas(40).unwrap();
        assert_eq!(ctx.gas_left(), 0);
        assert!(ctx.use_gas(Gas::MAX).is_err());
    }
}
