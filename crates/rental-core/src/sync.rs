//! Real-time synchronizer
//!
//! Observers get a full snapshot when they (re)subscribe and an ordered
//! stream of deltas afterwards. The broadcast receiver is created before
//! the snapshot is taken, so a transition racing with a subscribe shows up
//! in the snapshot, the stream, or both; observers drop deltas whose
//! revision is not newer than what they hold.

use chrono::{DateTime, Local};
use rental_api::{
    ActiveSnapshot, Event, EventPayload, ReconcileOutcome, ReconcileReport, SessionInfo,
    TransitionEvent, TransitionKind, API_VERSION,
};
use rental_config::SyncConfig;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{Registry, Session};

/// Fan-out of session transitions to observers
pub struct Synchronizer {
    tx: broadcast::Sender<Event>,
    drift_tolerance: Duration,
    max_plausible_drift: Duration,
}

impl Synchronizer {
    pub fn new(config: &SyncConfig) -> Self {
        let (tx, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            tx,
            drift_tolerance: config.drift_tolerance,
            max_plausible_drift: config.max_plausible_drift,
        }
    }

    /// Full view of live sessions at `now`
    pub fn snapshot(&self, registry: &Registry, now: DateTime<Local>) -> ActiveSnapshot {
        ActiveSnapshot {
            api_version: API_VERSION,
            server_time: now,
            sessions: registry.list_active(),
        }
    }

    /// Subscribe to the delta stream and take the initial snapshot
    pub fn subscribe(
        &self,
        registry: &Registry,
        now: DateTime<Local>,
    ) -> (broadcast::Receiver<Event>, ActiveSnapshot) {
        let rx = self.tx.subscribe();
        let snapshot = self.snapshot(registry, now);
        debug!(
            sessions = snapshot.sessions.len(),
            observers = self.tx.receiver_count(),
            "Observer subscribed"
        );
        (rx, snapshot)
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Broadcast a transition. Callers hold the session's slot lock.
    pub fn publish_transition(&self, kind: TransitionKind, session: &Session, at: DateTime<Local>) {
        let info = session.to_info();
        debug!(
            session_id = %info.session_id,
            kind = ?kind,
            revision = info.revision,
            "Publishing transition"
        );

        self.publish(
            at,
            EventPayload::Transition(TransitionEvent {
                kind,
                session_id: info.session_id.clone(),
                resource_id: info.resource_id.clone(),
                session: info,
            }),
        );
    }

    /// Broadcast any payload. Having no observers is not an error.
    pub fn publish(&self, at: DateTime<Local>, payload: EventPayload) {
        if self.tx.send(Event::at(at, payload)).is_err() {
            debug!("No observers subscribed");
        }
    }

    /// Compare an observer's elapsed-time report with the authoritative
    /// session. The report never changes the session; implausible reports
    /// are logged and marked as not accepted.
    pub fn reconcile(
        &self,
        report: &ReconcileReport,
        authoritative: SessionInfo,
        now: DateTime<Local>,
    ) -> ReconcileOutcome {
        let elapsed = authoritative.elapsed_at(now);
        let authoritative_elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let authoritative_ms = i64::try_from(authoritative_elapsed_ms).unwrap_or(i64::MAX);
        let drift_ms = report.observed_elapsed_ms.saturating_sub(authoritative_ms);
        let drift = Duration::from_millis(drift_ms.unsigned_abs());

        let accepted = if report.observed_elapsed_ms < 0 {
            warn!(
                session_id = %report.session_id,
                observed_ms = report.observed_elapsed_ms,
                "Discarding negative elapsed report"
            );
            false
        } else if drift > self.max_plausible_drift {
            warn!(
                session_id = %report.session_id,
                drift_ms,
                "Discarding implausible elapsed report"
            );
            false
        } else {
            true
        };

        let within_tolerance = accepted && drift <= self.drift_tolerance;
        if accepted && !within_tolerance {
            info!(
                session_id = %report.session_id,
                drift_ms,
                observed_at = %report.observed_at,
                "Observer clock drift detected"
            );
        }

        ReconcileOutcome {
            session: authoritative,
            authoritative_elapsed_ms,
            drift_ms,
            accepted,
            within_tolerance,
        }
    }
}
