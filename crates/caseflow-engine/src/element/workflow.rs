//! Workflow lifecycle transitions

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::store::{WorkflowRow, WorkflowState};

impl WorkflowRow {
    /// `initialized → started`
    pub fn start(&mut self) -> Result<(), EngineError> {
        match self.state {
            WorkflowState::Initialized => {
                self.state = WorkflowState::Started;
                Ok(())
            }
            state => Err(EngineError::invalid_transition(
                "workflow", self.id, "start", state,
            )),
        }
    }

    /// `started → completed`; terminal
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), EngineError> {
        match self.state {
            WorkflowState::Started => {
                self.state = WorkflowState::Completed;
                self.terminated_at = Some(at);
                Ok(())
            }
            state => Err(EngineError::invalid_transition(
                "workflow", self.id, "complete", state,
            )),
        }
    }

    /// `initialized | started → canceled`; terminal
    ///
    /// Returns `false` when already canceled, making repeated cancellation
    /// a no-op.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<bool, EngineError> {
        match self.state {
            WorkflowState::Initialized | WorkflowState::Started => {
                self.state = WorkflowState::Canceled;
                self.terminated_at = Some(at);
                Ok(true)
            }
            WorkflowState::Canceled => Ok(false),
            state => Err(EngineError::invalid_transition(
                "workflow", self.id, "cancel", state,
            )),
        }
    }
}
