//! Session state machine
//!
//! ```text
//!            start
//!              |
//!              v
//!   +----> ACTIVE ---pause---> PAUSED
//!   |        |                   |
//!   +--------|------resume-------+
//!            |                   |
//!          finish              finish
//!            v                   v
//!          COMPLETED (terminal, immutable)
//! ```

use chrono::{DateTime, Local};
use rental_api::{
    Bill, CompletionReason, CompletionSnapshot, Money, RentalMode, RentalModeTag, SessionInfo,
    SessionState,
};
use rental_config::Resource;
use rental_util::{RentalError, ResourceId, Result, SessionId};
use std::time::Duration;

use crate::{Accrual, BillingPolicy};

/// Build a rental mode from the requested tag and duration.
///
/// Fixed-duration rentals need a positive duration; open-ended rentals
/// ignore it.
pub fn resolve_mode(tag: RentalModeTag, duration_minutes: Option<u32>) -> Result<RentalMode> {
    match tag {
        RentalModeTag::OpenEnded => Ok(RentalMode::OpenEnded),
        RentalModeTag::FixedDuration => match duration_minutes {
            Some(minutes) if minutes > 0 => Ok(RentalMode::FixedDuration { minutes }),
            _ => Err(RentalError::InvalidDuration),
        },
    }
}

/// One rental of one resource
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    resource_id: ResourceId,
    resource_label: String,
    hourly_rate: Money,
    customer_name: String,
    mode: RentalMode,
    state: SessionState,
    accrual: Accrual,
    created_at: DateTime<Local>,
    /// Time of the latest applied transition. Later transitions are never
    /// stamped before it.
    last_transition_at: DateTime<Local>,
    revision: u64,
    completion: Option<CompletionSnapshot>,
}

impl Session {
    /// Create an ACTIVE session on `resource` starting at `now`
    pub fn start(
        resource: &Resource,
        customer_name: impl Into<String>,
        mode: RentalMode,
        now: DateTime<Local>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            resource_id: resource.id.clone(),
            resource_label: resource.label.clone(),
            hourly_rate: resource.hourly_rate,
            customer_name: customer_name.into(),
            mode,
            state: SessionState::Active,
            accrual: Accrual::running(now),
            created_at: now,
            last_transition_at: now,
            revision: 1,
            completion: None,
        }
    }

    /// Rebuild a session from its shared view (crash recovery)
    pub fn from_info(info: SessionInfo) -> Self {
        let running_since = match info.state {
            SessionState::Active => info.last_resume_at.or(Some(info.created_at)),
            _ => None,
        };

        // A pause is not persisted; a session cannot have stopped before
        // it accrued its base time
        let accrued_until = i64::try_from(info.base_elapsed_ms)
            .ok()
            .and_then(|ms| info.created_at.checked_add_signed(chrono::Duration::milliseconds(ms)))
            .unwrap_or(info.created_at);
        let last_transition_at = [
            info.last_resume_at,
            info.completion.as_ref().map(|c| c.completed_at),
        ]
        .into_iter()
        .flatten()
        .fold(accrued_until, |latest, at| latest.max(at));

        Self {
            id: info.session_id,
            resource_id: info.resource_id,
            resource_label: info.resource_label,
            hourly_rate: info.hourly_rate,
            customer_name: info.customer_name,
            mode: info.mode,
            state: info.state,
            accrual: Accrual::from_parts(info.base_elapsed_ms, running_since),
            created_at: info.created_at,
            last_transition_at,
            revision: info.revision,
            completion: info.completion,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    pub fn customer_name(&self) -> &str {
        &self.customer_name
    }

    pub fn hourly_rate(&self) -> Money {
        self.hourly_rate
    }

    pub fn mode(&self) -> RentalMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn last_transition_at(&self) -> DateTime<Local> {
        self.last_transition_at
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn completion(&self) -> Option<&CompletionSnapshot> {
        self.completion.as_ref()
    }

    /// Active or paused
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// Accrued active time at `now`
    pub fn elapsed_at(&self, now: DateTime<Local>) -> Duration {
        self.accrual.elapsed_at(now)
    }

    /// Current bill if the session were finished at `now`
    pub fn bill_at(&self, now: DateTime<Local>, policy: &BillingPolicy) -> Bill {
        policy.bill(self.elapsed_at(now), self.hourly_rate)
    }

    /// Minutes left before a fixed-duration session expires; negative once
    /// past the limit. `None` for open-ended sessions.
    pub fn remaining_minutes(&self, now: DateTime<Local>) -> Option<i64> {
        let fixed = i64::from(self.mode.fixed_minutes()?);
        let raw = i64::try_from(BillingPolicy::raw_minutes(self.elapsed_at(now)))
            .unwrap_or(i64::MAX);
        Some(fixed.saturating_sub(raw))
    }

    /// Whether a fixed-duration session has used up its time
    pub fn is_due(&self, now: DateTime<Local>) -> bool {
        self.is_live() && self.remaining_minutes(now).is_some_and(|left| left <= 0)
    }

    /// ACTIVE -> PAUSED
    pub fn pause(&mut self, now: DateTime<Local>) -> Result<()> {
        match self.state {
            SessionState::Active => {
                let now = self.stamp(now);
                self.accrual.stop(now);
                self.state = SessionState::Paused;
                self.revision += 1;
                Ok(())
            }
            SessionState::Paused => Err(self.invalid("pause")),
            SessionState::Completed => Err(RentalError::AlreadyCompleted(self.id.clone())),
        }
    }

    /// PAUSED -> ACTIVE
    pub fn resume(&mut self, now: DateTime<Local>) -> Result<()> {
        match self.state {
            SessionState::Paused => {
                let now = self.stamp(now);
                self.accrual.start(now);
                self.state = SessionState::Active;
                self.revision += 1;
                Ok(())
            }
            SessionState::Active => Err(self.invalid("resume")),
            SessionState::Completed => Err(RentalError::AlreadyCompleted(self.id.clone())),
        }
    }

    /// {ACTIVE, PAUSED} -> COMPLETED. Flushes the running interval, bills
    /// the accrued time and records the completion snapshot.
    pub fn finish(
        &mut self,
        reason: CompletionReason,
        now: DateTime<Local>,
        policy: &BillingPolicy,
    ) -> Result<&CompletionSnapshot> {
        if self.state == SessionState::Completed {
            return Err(RentalError::AlreadyCompleted(self.id.clone()));
        }

        let now = self.stamp(now);
        self.accrual.stop(now);
        let bill = policy.bill(self.accrual.elapsed_at(now), self.hourly_rate);

        self.state = SessionState::Completed;
        self.revision += 1;
        let snapshot = self.completion.insert(CompletionSnapshot {
            raw_minutes: bill.raw_minutes,
            billed_minutes: bill.billable_minutes,
            billed_amount: bill.amount,
            reason,
            completed_at: now,
        });
        Ok(&*snapshot)
    }

    /// Shared view of this session
    pub fn to_info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            resource_id: self.resource_id.clone(),
            resource_label: self.resource_label.clone(),
            hourly_rate: self.hourly_rate,
            customer_name: self.customer_name.clone(),
            mode: self.mode,
            state: self.state,
            base_elapsed_ms: self.accrual.base_ms(),
            last_resume_at: self.accrual.running_since(),
            created_at: self.created_at,
            revision: self.revision,
            completion: self.completion.clone(),
        }
    }

    /// Clock reading for a transition, moved up to the previous
    /// transition if it is older
    fn stamp(&mut self, now: DateTime<Local>) -> DateTime<Local> {
        self.last_transition_at = self.last_transition_at.max(now);
        self.last_transition_at
    }

    fn invalid(&self, action: &'static str) -> RentalError {
        RentalError::InvalidTransition {
            session_id: self.id.clone(),
            action,
            state: self.state.as_str(),
        }
    }
}
