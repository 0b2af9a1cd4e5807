//! Expiration watcher
//!
//! Driven by the daemon's tick loop. Each check looks at the live
//! fixed-duration sessions and decides which ones are due to expire and
//! which ones should get their one-time "time almost up" warning.
//! Expiry is measured in raw minutes: billable minutes jump around block
//! boundaries and would expire a session early.

use chrono::{DateTime, Local};
use rental_api::{SessionInfo, SessionState};
use rental_config::ExpiryConfig;
use rental_util::SessionId;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::BillingPolicy;

/// What the watcher wants done with a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    /// Fixed duration reached; finish with reason EXPIRED
    Expire { session_id: SessionId },
    /// Few minutes left; warn once
    Warn {
        session_id: SessionId,
        remaining_minutes: u64,
    },
}

pub struct ExpirationWatcher {
    warning_minutes: u64,
    warned: Mutex<HashSet<SessionId>>,
}

impl ExpirationWatcher {
    pub fn new(config: &ExpiryConfig) -> Self {
        Self {
            warning_minutes: u64::from(config.warning_minutes),
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Decide actions for the given live sessions at `now`.
    ///
    /// Warnings are recorded as issued when returned. Sessions missing from
    /// `live` are forgotten.
    pub fn check(&self, live: &[SessionInfo], now: DateTime<Local>) -> Vec<WatchAction> {
        let mut warned = self.warned.lock().unwrap_or_else(PoisonError::into_inner);
        warned.retain(|id| live.iter().any(|s| &s.session_id == id));

        let mut actions = Vec::new();
        for session in live {
            if !session.state.is_live() {
                continue;
            }
            let Some(fixed) = session.mode.fixed_minutes().map(u64::from) else {
                continue;
            };

            let raw = BillingPolicy::raw_minutes(session.elapsed_at(now));
            if raw >= fixed {
                actions.push(WatchAction::Expire {
                    session_id: session.session_id.clone(),
                });
                continue;
            }

            let remaining = fixed - raw;
            if session.state == SessionState::Active
                && remaining <= self.warning_minutes
                && warned.insert(session.session_id.clone())
            {
                actions.push(WatchAction::Warn {
                    session_id: session.session_id.clone(),
                    remaining_minutes: remaining,
                });
            }
        }

        actions
    }

    /// Drop warning state for a finished session
    pub fn forget(&self, session_id: &SessionId) {
        self.warned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Session;
    use chrono::TimeZone;
    use rental_api::{Money, RentalMode};
    use rental_config::Resource;
    use rental_util::ResourceId;

    fn t(minutes: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    fn session(mode: RentalMode) -> Session {
        let resource = Resource {
            id: ResourceId::new("ps5-1"),
            label: "PS5 #1".into(),
            hourly_rate: Money::from_cents(800),
            active: true,
        };
        Session::start(&resource, "Jane", mode, t(0))
    }

    fn watcher() -> ExpirationWatcher {
        ExpirationWatcher::new(&ExpiryConfig { warning_minutes: 5 })
    }

    #[test]
    fn test_open_ended_never_expires() {
        let watcher = watcher();
        let open = session(RentalMode::OpenEnded).to_info();
        assert!(watcher.check(&[open], t(600)).is_empty());
    }

    #[test]
    fn test_fixed_session_expires_at_limit() {
        let watcher = watcher();
        let fixed = session(RentalMode::FixedDuration { minutes: 30 }).to_info();

        assert!(!watcher
            .check(std::slice::from_ref(&fixed), t(29))
            .iter()
            .any(|a| matches!(a, WatchAction::Expire { .. })));

        assert_eq!(
            watcher.check(std::slice::from_ref(&fixed), t(30)),
            vec![WatchAction::Expire {
                session_id: fixed.session_id.clone()
            }]
        );
    }

    #[test]
    fn test_warning_issued_once() {
        let watcher = watcher();
        let fixed = session(RentalMode::FixedDuration { minutes: 30 }).to_info();

        assert!(watcher.check(std::slice::from_ref(&fixed), t(20)).is_empty());

        let actions = watcher.check(std::slice::from_ref(&fixed), t(25));
        assert_eq!(
            actions,
            vec![WatchAction::Warn {
                session_id: fixed.session_id.clone(),
                remaining_minutes: 5,
            }]
        );

        assert!(watcher.check(std::slice::from_ref(&fixed), t(27)).is_empty());
    }

    #[test]
    fn test_paused_session_not_warned() {
        let watcher = watcher();
        let mut fixed = session(RentalMode::FixedDuration { minutes: 30 });
        fixed.pause(t(26)).unwrap();

        assert!(watcher.check(&[fixed.to_info()], t(40)).is_empty());
    }

    #[test]
    fn test_forgotten_sessions_can_warn_again() {
        let watcher = watcher();
        let fixed = session(RentalMode::FixedDuration { minutes: 30 }).to_info();

        assert_eq!(watcher.check(std::slice::from_ref(&fixed), t(26)).len(), 1);
        watcher.forget(&fixed.session_id);
        assert_eq!(watcher.check(std::slice::from_ref(&fixed), t(26)).len(), 1);

        // Dropping out of the live list also clears the warning state
        assert!(watcher.check(&[], t(26)).is_empty());
        assert_eq!(watcher.check(std::slice::from_ref(&fixed), t(26)).len(), 1);
    }

    #[test]
    fn test_zero_warning_minutes_disables_warnings() {
        let watcher = ExpirationWatcher::new(&ExpiryConfig { warning_minutes: 0 });
        let fixed = session(RentalMode::FixedDuration { minutes: 30 }).to_info();
        assert!(watcher.check(std::slice::from_ref(&fixed), t(29)).is_empty());
    }
}
