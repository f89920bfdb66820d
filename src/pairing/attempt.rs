//! Per-attempt login state machine.
//!
//! ```text
//! Start -> CredentialsChecked -> FingerprintEvaluated(outcome)
//!   FingerprintEvaluated(match)                 -> SessionIssued -> Delivered | Undelivered
//!   FingerprintEvaluated(mismatch|no-enrollment) -> Rejected
//! ```
//!
//! `Delivered`, `Undelivered` and `Rejected` are terminal.

use crate::security::fingerprint::MatchOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    Start,
    CredentialsChecked,
    FingerprintEvaluated(MatchOutcome),
    SessionIssued,
    Delivered,
    Undelivered,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginEvent {
    CredentialsVerified,
    FingerprintCompared(MatchOutcome),
    SessionPersisted,
    DeliveryAttempted { delivered: bool },
    /// The evaluated fingerprint did not allow a session.
    Refused,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("illegal login transition: {event:?} in stage {stage:?}")]
pub struct InvalidTransition {
    pub stage: LoginStage,
    pub event: LoginEvent,
}

impl LoginStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Undelivered | Self::Rejected)
    }

    pub fn advance(self, event: LoginEvent) -> Result<Self, InvalidTransition> {
        use LoginEvent as E;
        use LoginStage as S;

        let next = match (self, event) {
            (S::Start, E::CredentialsVerified) => S::CredentialsChecked,
            (S::CredentialsChecked, E::FingerprintCompared(outcome)) => {
                S::FingerprintEvaluated(outcome)
            }
            (S::FingerprintEvaluated(MatchOutcome::Match), E::SessionPersisted) => S::SessionIssued,
            (
                S::FingerprintEvaluated(MatchOutcome::Mismatch | MatchOutcome::NoEnrollment),
                E::Refused,
            ) => S::Rejected,
            (S::SessionIssued, E::DeliveryAttempted { delivered: true }) => S::Delivered,
            (S::SessionIssued, E::DeliveryAttempted { delivered: false }) => S::Undelivered,
            (stage, event) => return Err(InvalidTransition { stage, event }),
        };
        Ok(next)
    }
}

/// One login attempt for `username`, logging every transition.
#[derive(Debug)]
pub struct LoginAttempt {
    username: String,
    stage: LoginStage,
}

impl LoginAttempt {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            stage: LoginStage::Start,
        }
    }

    pub fn stage(&self) -> LoginStage {
        self.stage
    }

    pub fn record(&mut self, event: LoginEvent) -> Result<LoginStage, InvalidTransition> {
        let next = self.stage.advance(event)?;
        tracing::debug!(
            username = %self.username,
            from = ?self.stage,
            to = ?next,
            "Login attempt advanced"
        );
        self.stage = next;
        Ok(next)
    }
}
