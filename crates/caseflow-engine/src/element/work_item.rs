//! Work-item lifecycle and offer/claim transitions
//!
//! For a human work item the machine reads
//!
//! ```text
//! initialized --offer--> offered --claim(user)--> claimed
//!                                              --release--> offered
//! claimed    --start-->  started   --complete--> completed
//!                                   --fail-->     failed
//! any non-terminal --cancel--> canceled
//! ```
//!
//! `offered` and `claimed` are derived here, not stored: an item with an
//! offer descriptor is offered, one with a claim descriptor is claimed.
//! Automated offers skip both — the engine synthesizes an automated claim
//! at fire time and immediately starts the item.

use caseflow_net::{AutoTriggerKind, OfferTemplate};

use crate::error::EngineError;
use crate::store::{Claim, WorkItemRow, WorkItemState};

impl WorkItemRow {
    /// Bind a claim; at most one over the item's lifetime
    ///
    /// Human offers require a human claim. A losing claimant observes the
    /// winner's identity in the error context.
    pub fn claim(&mut self, claim: Claim) -> Result<(), EngineError> {
        if self.state != WorkItemState::Initialized {
            return Err(EngineError::invalid_transition(
                "work item",
                self.id,
                "claim",
                self.state,
            ));
        }

        let offer = self.offer.as_ref().ok_or_else(|| {
            EngineError::invalid_transition("work item", self.id, "claim", self.state)
                .with_context("reason", "no offer")
        })?;

        if let Some(existing) = &self.claim {
            return Err(EngineError::invalid_transition(
                "work item",
                self.id,
                "claim",
                self.state,
            )
            .with_context("claimedBy", existing.claimant()));
        }

        if matches!(offer, OfferTemplate::Human { .. }) && matches!(claim, Claim::Automated) {
            return Err(EngineError::invalid_transition(
                "work item",
                self.id,
                "claim",
                self.state,
            )
            .with_context("reason", "human offers require a human claim"));
        }

        self.claim = Some(claim);
        Ok(())
    }

    /// Drop an unstarted claim, returning the item to the offered pool
    pub fn release(&mut self) -> Result<(), EngineError> {
        if self.state != WorkItemState::Initialized || self.claim.is_none() {
            return Err(EngineError::invalid_transition(
                "work item",
                self.id,
                "release",
                self.state,
            ));
        }
        self.claim = None;
        Ok(())
    }

    /// `initialized → started`; requires a claim
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state != WorkItemState::Initialized {
            return Err(EngineError::invalid_transition(
                "work item",
                self.id,
                "start",
                self.state,
            ));
        }
        if self.claim.is_none() {
            return Err(EngineError::invalid_transition(
                "work item",
                self.id,
                "start",
                self.state,
            )
            .with_context("reason", "no claim"));
        }
        self.state = WorkItemState::Started;
        Ok(())
    }

    /// `started → completed`; terminal. Replaces the payload when given.
    pub fn complete(&mut self, payload: Option<serde_json::Value>) -> Result<(), EngineError> {
        if self.state != WorkItemState::Started {
            return Err(EngineError::invalid_transition(
                "work item",
                self.id,
                "complete",
                self.state,
            ));
        }
        if let Some(payload) = payload {
            self.payload = payload;
        }
        self.state = WorkItemState::Completed;
        Ok(())
    }

    /// `started → failed`; terminal
    pub fn fail(&mut self, payload: Option<serde_json::Value>) -> Result<(), EngineError> {
        if self.state != WorkItemState::Started {
            return Err(EngineError::invalid_transition(
                "work item",
                self.id,
                "fail",
                self.state,
            ));
        }
        if let Some(payload) = payload {
            self.payload = payload;
        }
        self.state = WorkItemState::Failed;
        Ok(())
    }

    /// `initialized | started → canceled`; terminal
    ///
    /// Returns `false` when already canceled.
    pub fn cancel(&mut self) -> Result<bool, EngineError> {
        match self.state {
            WorkItemState::Initialized | WorkItemState::Started => {
                self.state = WorkItemState::Canceled;
                Ok(true)
            }
            WorkItemState::Canceled => Ok(false),
            state => Err(EngineError::invalid_transition(
                "work item",
                self.id,
                "cancel",
                state,
            )),
        }
    }

    /// Set the auto-trigger; allowed at most once
    pub fn set_auto_trigger(&mut self, trigger: AutoTriggerKind) -> Result<(), EngineError> {
        if self.state.is_terminal() {
            return Err(EngineError::invalid_transition(
                "work item",
                self.id,
                "set_auto_trigger",
                self.state,
            ));
        }
        if self.auto_trigger.is_some() {
            return Err(EngineError::constraint(format!(
                "auto-trigger already set on work item {}",
                self.id
            )));
        }
        self.auto_trigger = Some(trigger);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn item(offer: Option<OfferTemplate>) -> WorkItemRow {
        WorkItemRow {
            id: Uuid::now_v7(),
            case_id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            task_id: Uuid::now_v7(),
            task_name: "t".into(),
            state: WorkItemState::Initialized,
            offer,
            claim: None,
            payload: serde_json::Value::Null,
            auto_trigger: None,
            aggregate_id: None,
            priority: None,
            created_at: Utc::now(),
        }
    }

    fn human_offer() -> OfferTemplate {
        OfferTemplate::Human {
            required_scope: "wf.staff".into(),
            required_group_id: None,
        }
    }

    fn user(id: &str) -> Claim {
        Claim::Human {
            user_id: id.into(),
        }
    }

    #[test]
    fn test_claim_then_start_then_complete() {
        let mut item = item(Some(human_offer()));

        item.claim(user("u-1")).unwrap();
        item.start().unwrap();
        item.complete(Some(serde_json::json!({ "ok": true }))).unwrap();

        assert_eq!(item.state, WorkItemState::Completed);
        assert_eq!(item.payload["ok"], true);
    }

    #[test]
    fn test_second_claim_carries_winner() {
        let mut item = item(Some(human_offer()));
        item.claim(user("winner")).unwrap();

        let err = item.claim(user("loser")).unwrap_err();
        assert_eq!(err.context()["claimedBy"], "winner");
    }

    #[test]
    fn test_start_without_claim_rejected() {
        let mut item = item(Some(human_offer()));

        let err = item.start().unwrap_err();
        assert_eq!(err.context()["reason"], "no claim");
    }

    #[test]
    fn test_automated_claim_on_human_offer_rejected() {
        let mut item = item(Some(human_offer()));

        let err = item.claim(Claim::Automated).unwrap_err();
        assert_eq!(
            err.context()["reason"],
            "human offers require a human claim"
        );
    }

    #[test]
    fn test_release_returns_to_offered() {
        let mut item = item(Some(human_offer()));

        item.claim(user("u-1")).unwrap();
        item.release().unwrap();
        assert!(item.claim.is_none());

        // A new claimant may now take it.
        item.claim(user("u-2")).unwrap();
    }

    #[test]
    fn test_release_after_start_rejected() {
        let mut item = item(Some(human_offer()));
        item.claim(user("u-1")).unwrap();
        item.start().unwrap();

        assert!(item.release().is_err());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut item = item(Some(human_offer()));

        assert!(item.cancel().unwrap());
        assert!(!item.cancel().unwrap());
    }

    #[test]
    fn test_auto_trigger_set_once() {
        let mut item = item(Some(human_offer()));

        item.set_auto_trigger(AutoTriggerKind::Start).unwrap();
        let err = item.set_auto_trigger(AutoTriggerKind::Complete).unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    }

    #[test]
    fn test_claim_without_offer_rejected() {
        let mut item = item(None);

        let err = item.claim(user("u-1")).unwrap_err();
        assert_eq!(err.context()["reason"], "no offer");
    }
}
