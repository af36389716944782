//! Task lifecycle transitions
//!
//! State progresses `disabled → enabled → started → completed`, with
//! `failed` reachable from `started` and `canceled` allowed to interrupt
//! `enabled` or `started`.

use crate::error::EngineError;
use crate::store::{TaskRow, TaskState};

impl TaskRow {
    /// `disabled | completed → enabled` (join satisfied)
    ///
    /// Re-arming from `completed` is what lets a loop re-fire the task;
    /// each fire stamps a fresh generation.
    pub fn enable(&mut self) -> Result<(), EngineError> {
        match self.state {
            TaskState::Disabled | TaskState::Completed => {
                self.state = TaskState::Enabled;
                Ok(())
            }
            state => Err(EngineError::invalid_transition(
                "task", self.id, "enable", state,
            )),
        }
    }

    /// `enabled → disabled` (join no longer satisfied)
    pub fn disable(&mut self) -> Result<(), EngineError> {
        match self.state {
            TaskState::Enabled => {
                self.state = TaskState::Disabled;
                Ok(())
            }
            state => Err(EngineError::invalid_transition(
                "task", self.id, "disable", state,
            )),
        }
    }

    /// `enabled → started`; bumps the fire counter and returns it
    pub fn fire(&mut self) -> Result<u32, EngineError> {
        match self.state {
            TaskState::Enabled => {
                self.state = TaskState::Started;
                self.generation += 1;
                Ok(self.generation)
            }
            state => Err(EngineError::invalid_transition(
                "task", self.id, "fire", state,
            )),
        }
    }

    /// `started → completed`; terminal
    pub fn complete(&mut self) -> Result<(), EngineError> {
        match self.state {
            TaskState::Started => {
                self.state = TaskState::Completed;
                Ok(())
            }
            state => Err(EngineError::invalid_transition(
                "task", self.id, "complete", state,
            )),
        }
    }

    /// `started → failed`; terminal
    pub fn fail(&mut self) -> Result<(), EngineError> {
        match self.state {
            TaskState::Started => {
                self.state = TaskState::Failed;
                Ok(())
            }
            state => Err(EngineError::invalid_transition(
                "task", self.id, "fail", state,
            )),
        }
    }

    /// `enabled | started → canceled`; terminal
    ///
    /// Returns `false` when already canceled.
    pub fn cancel(&mut self) -> Result<bool, EngineError> {
        match self.state {
            TaskState::Enabled | TaskState::Started => {
                self.state = TaskState::Canceled;
                Ok(true)
            }
            TaskState::Canceled => Ok(false),
            state => Err(EngineError::invalid_transition(
                "task", self.id, "cancel", state,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn row() -> TaskRow {
        TaskRow {
            id: Uuid::now_v7(),
            case_id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            name: "t".into(),
            state: TaskState::Disabled,
            generation: 0,
        }
    }

    #[test]
    fn test_fire_increments_generation() {
        let mut task = row();
        task.enable().unwrap();

        assert_eq!(task.fire().unwrap(), 1);
        assert_eq!(task.state, TaskState::Started);
    }

    #[test]
    fn test_fire_requires_enabled() {
        let mut task = row();

        let err = task.fire().unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
    }

    #[test]
    fn test_enable_disable_roundtrip() {
        let mut task = row();

        task.enable().unwrap();
        task.disable().unwrap();
        assert_eq!(task.state, TaskState::Disabled);
    }

    #[test]
    fn test_cancel_interrupts_started() {
        let mut task = row();
        task.enable().unwrap();
        task.fire().unwrap();

        assert!(task.cancel().unwrap());
        assert!(!task.cancel().unwrap());
    }

    #[test]
    fn test_cancel_from_disabled_rejected() {
        let mut task = row();

        assert!(matches!(
            task.cancel(),
            Err(EngineError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_completed_cannot_cancel_or_fail() {
        let mut task = row();
        task.enable().unwrap();
        task.fire().unwrap();
        task.complete().unwrap();

        assert!(task.cancel().is_err());
        assert!(task.fail().is_err());
    }

    #[test]
    fn test_completed_task_rearms_with_next_generation() {
        let mut task = row();
        task.enable().unwrap();
        task.fire().unwrap();
        task.complete().unwrap();

        task.enable().unwrap();
        assert_eq!(task.fire().unwrap(), 2);
    }
}
