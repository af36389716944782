//! Condition marking arithmetic
//!
//! Markings are non-negative 32-bit counters. Going below zero or past
//! `u32::MAX` is a structural-integrity failure, never a wrap.

use crate::error::EngineError;
use crate::store::ConditionRow;

impl ConditionRow {
    /// Add `n` tokens, returning the new marking
    pub fn produce(&mut self, n: u32) -> Result<u32, EngineError> {
        self.marking = self.marking.checked_add(n).ok_or_else(|| {
            EngineError::structural(format!(
                "marking overflow on condition '{}'",
                self.name
            ))
            .with_context("conditionId", self.id.to_string())
        })?;
        Ok(self.marking)
    }

    /// Remove `n` tokens, returning the new marking
    pub fn consume(&mut self, n: u32) -> Result<u32, EngineError> {
        self.marking = self.marking.checked_sub(n).ok_or_else(|| {
            EngineError::structural(format!(
                "negative marking on condition '{}' (had {}, consumed {})",
                self.name, self.marking, n
            ))
            .with_context("conditionId", self.id.to_string())
        })?;
        Ok(self.marking)
    }

    /// Drop all tokens (cancellation sweep), returning the prior marking
    pub fn reset(&mut self) -> u32 {
        std::mem::take(&mut self.marking)
    }
}
