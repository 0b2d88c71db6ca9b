//! Pending actions: server-side requests awaiting single execution.
//!
//! ```text
//!   ┌─────────┐  claim (CAS)  ┌───────────┐  effect ok  ┌──────────┐
//!   │ PENDING ├──────────────▶│ EXECUTING ├────────────▶│ EXECUTED │
//!   └─────────┘               └─────┬─────┘             └──────────┘
//!                                   │ effect failed
//!                                   ▼
//!                              ┌────────┐
//!                              │ FAILED │
//!                              └────────┘
//! ```
//!
//! `EXECUTED` and `FAILED` are terminal. The execution token written by the
//! winner is never cleared.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::truncate_to_millis;
use crate::constants::MAX_ACTION_TYPE_LEN;
use crate::{ActionId, ClaimvaultError, ExecutionToken, ResolutionRecord, Result, Subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executing,
    Executed,
    Failed,
}

impl ActionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed)
    }

    /// Legal edges of the state machine above.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Executing)
                | (Self::Executing, Self::Executed | Self::Failed)
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = ClaimvaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "executing" => Ok(Self::Executing),
            "executed" => Ok(Self::Executed),
            "failed" => Ok(Self::Failed),
            other => Err(ClaimvaultError::InvalidPayload {
                reason: format!("unknown action status {other:?}"),
            }),
        }
    }
}

/// A stored request for a privileged action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action_id: ActionId,
    pub subject: Subject,
    pub action_type: String,
    pub payload: serde_json::Value,
    pub status: ActionStatus,
    pub execution_token: Option<ExecutionToken>,
    pub created_at: DateTime<Utc>,
    /// When the execution token was bound.
    pub claimed_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub outcome_detail: Option<String>,
    pub resolution: Option<ResolutionRecord>,
}

impl PendingAction {
    /// Build a new pending action.
    ///
    /// # Errors
    /// Returns `InvalidActionType` if `action_type` is empty, too long, or
    /// uses characters outside `[A-Za-z0-9_.:-]`.
    pub fn new(
        subject: Subject,
        action_type: impl Into<String>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let action_type = action_type.into();
        validate_action_type(&action_type)?;
        Ok(Self {
            action_id: ActionId::new(),
            subject,
            action_type,
            payload,
            status: ActionStatus::Pending,
            execution_token: None,
            created_at: truncate_to_millis(created_at),
            claimed_at: None,
            executed_at: None,
            outcome_detail: None,
            resolution: None,
        })
    }

    #[must_use]
    pub fn awaiting_reconciliation(&self) -> bool {
        self.status == ActionStatus::Failed && self.resolution.is_none()
    }
}

fn validate_action_type(action_type: &str) -> Result<()> {
    if action_type.is_empty() {
        return Err(ClaimvaultError::InvalidActionType {
            reason: "action type is empty".into(),
        });
    }
    if action_type.len() > MAX_ACTION_TYPE_LEN {
        return Err(ClaimvaultError::InvalidActionType {
            reason: format!(
                "action type has {} bytes (max {MAX_ACTION_TYPE_LEN})",
                action_type.len()
            ),
        });
    }
    if let Some(bad) = action_type
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')))
    {
        return Err(ClaimvaultError::InvalidActionType {
            reason: format!("action type contains {bad:?}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> Subject {
        Subject::new("0xAAA").unwrap()
    }

    #[test]
    fn new_action_is_pending_without_token() {
        let a = PendingAction::new(subject(), "upgrade.pickaxe", serde_json::json!({}), Utc::now())
            .unwrap();
        assert_eq!(a.status, ActionStatus::Pending);
        assert!(a.execution_token.is_none());
        assert!(a.executed_at.is_none());
    }

    #[test]
    fn action_type_validation() {
        let ok = ["upgrade", "shop:buy-item", "v2.unlock_zone"];
        for t in ok {
            assert!(validate_action_type(t).is_ok(), "{t}");
        }
        let bad = ["", "has space", "semi;colon", "ünïcode"];
        for t in bad {
            assert!(validate_action_type(t).is_err(), "{t}");
        }
        assert!(validate_action_type(&"a".repeat(MAX_ACTION_TYPE_LEN + 1)).is_err());
    }

    #[test]
    fn transitions() {
        use ActionStatus::*;
        assert!(Pending.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Executed));
        assert!(Executing.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Executed));
        assert!(!Executed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Executing));
        assert!(Executed.is_terminal() && Failed.is_terminal());
        assert!(!Executing.is_terminal());
    }

    #[test]
    fn status_text_roundtrip() {
        for s in [
            ActionStatus::Pending,
            ActionStatus::Executing,
            ActionStatus::Executed,
            ActionStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<ActionStatus>().unwrap(), s);
        }
    }
}
