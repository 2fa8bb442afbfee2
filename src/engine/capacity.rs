use crate::error::EngineError;
use tracing::error;

/// Running TEU total of one storage area against its declared maximum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityLedger {
    max: u32,
    current: u32,
}

impl CapacityLedger {
    pub fn new(max: u32) -> Self {
        Self { max, current: 0 }
    }

    pub fn reserve(&mut self, amount: u32) -> Result<(), EngineError> {
        let exceeded = EngineError::CapacityExceeded {
            requested: amount,
            current: self.current,
            max: self.max,
        };
        match self.current.checked_add(amount) {
            Some(total) if total <= self.max => {
                self.current = total;
                Ok(())
            }
            _ => Err(exceeded),
        }
    }

    /// Returns capacity to the pool. Releasing more than is held floors the
    /// total at zero and reports an internal consistency error.
    pub fn release(&mut self, amount: u32) -> Result<(), EngineError> {
        if amount > self.current {
            let held = self.current;
            error!(current = held, release = amount, "Capacity ledger underflow");
            self.current = 0;
            return Err(EngineError::InternalConsistency(format!(
                "ledger underflow: released {} TEU with only {} held",
                amount, held
            )));
        }
        self.current -= amount;
        Ok(())
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn available(&self) -> u32 {
        self.max.saturating_sub(self.current)
    }

    pub fn set_max(&mut self, max: u32) -> Result<(), EngineError> {
        if max < self.current {
            return Err(EngineError::CapacityBelowUsage {
                requested_max: max,
                current: self.current,
            });
        }
        self.max = max;
        Ok(())
    }
}
