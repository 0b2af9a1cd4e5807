//! Observer side of session synchronization
//!
//! An [`ObserverView`] mirrors the service's live sessions: it is replaced
//! wholesale by every snapshot and patched by transition deltas, dropping
//! any delta whose revision is not newer than what it already holds.
//! Elapsed times shown to people are computed locally from the carried
//! timestamps, shifted by the estimated offset between the local clock and
//! the service clock.
//!
//! [`Observer`] drives a view over a real connection: subscribe, apply
//! events, tick a display clock, send periodic reconciliation reports, and
//! reconnect with a fresh snapshot whenever the connection drops.

use chrono::{DateTime, Local};
use rental_api::{
    ActiveSnapshot, Command, Event, EventPayload, ReconcileOutcome, ReconcileReport,
    ResponsePayload, SessionInfo, SessionState,
};
use rental_util::SessionId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{IpcClient, IpcError, IpcResult};

/// Local mirror of the service's live sessions
#[derive(Debug, Clone, Default)]
pub struct ObserverView {
    /// Every session seen since the last snapshot, completed ones included
    /// so late deltas cannot resurrect them
    sessions: HashMap<SessionId, SessionInfo>,
    /// service clock - local clock, in milliseconds
    clock_offset_ms: i64,
    /// False between a disconnect and the next snapshot
    synced: bool,
}

impl ObserverView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the view with a snapshot received at `local_now`
    pub fn apply_snapshot(&mut self, snapshot: &ActiveSnapshot, local_now: DateTime<Local>) {
        self.sessions = snapshot
            .sessions
            .iter()
            .map(|s| (s.session_id.clone(), s.clone()))
            .collect();
        self.clock_offset_ms = (snapshot.server_time - local_now).num_milliseconds();
        self.synced = true;
    }

    /// Apply a session as seen by the service. Returns false if the view
    /// already holds the same or a newer revision.
    pub fn apply_session(&mut self, session: &SessionInfo) -> bool {
        if self
            .sessions
            .get(&session.session_id)
            .is_some_and(|held| held.revision >= session.revision)
        {
            return false;
        }
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        true
    }

    /// Apply a pushed event. Returns true if the view changed.
    pub fn apply_event(&mut self, event: &Event) -> bool {
        match &event.payload {
            EventPayload::Snapshot(snapshot) => {
                self.apply_snapshot(snapshot, rental_util::now());
                true
            }
            EventPayload::Transition(delta) => self.apply_session(&delta.session),
            EventPayload::ResyncRequired { .. } | EventPayload::Shutdown => {
                self.synced = false;
                false
            }
            EventPayload::ExpiryWarning { .. } => false,
        }
    }

    /// Re-anchor on the authoritative session returned by a reconcile
    pub fn apply_reconcile(&mut self, outcome: &ReconcileOutcome) -> bool {
        self.apply_session(&outcome.session)
    }

    pub fn mark_stale(&mut self) {
        self.synced = false;
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn clock_offset(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.clock_offset_ms)
    }

    /// Local time translated to the service clock
    pub fn server_now(&self, local_now: DateTime<Local>) -> DateTime<Local> {
        local_now + self.clock_offset()
    }

    /// Live sessions, oldest first
    pub fn live_sessions(&self) -> Vec<&SessionInfo> {
        let mut live: Vec<&SessionInfo> = self
            .sessions
            .values()
            .filter(|s| s.state.is_live())
            .collect();
        live.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        live
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&SessionInfo> {
        self.sessions.get(session_id)
    }

    /// Display approximation of a session's elapsed time
    pub fn display_elapsed(&self, session_id: &SessionId, local_now: DateTime<Local>) -> Option<Duration> {
        self.sessions
            .get(session_id)
            .map(|s| s.elapsed_at(self.server_now(local_now)))
    }

    /// Reports for every running session, stamped with the local clock
    pub fn reconcile_reports(&self, local_now: DateTime<Local>) -> Vec<ReconcileReport> {
        self.live_sessions()
            .into_iter()
            .filter(|s| s.state == SessionState::Active)
            .map(|s| ReconcileReport {
                session_id: s.session_id.clone(),
                observed_elapsed_ms: i64::try_from(
                    s.elapsed_at(self.server_now(local_now)).as_millis(),
                )
                .unwrap_or(i64::MAX),
                observed_at: local_now,
            })
            .collect()
    }
}

/// Callbacks from a running [`Observer`]
pub trait ObserverSink: Send + Sync + 'static {
    /// The view was replaced by a fresh snapshot
    fn on_snapshot(&self, _view: &ObserverView) {}

    /// An event arrived; `changed` tells whether the view was updated
    fn on_event(&self, _event: &Event, _view: &ObserverView, _changed: bool) {}

    /// Display clock tick
    fn on_clock(&self, _view: &ObserverView, _local_now: DateTime<Local>) {}

    /// Connection lost; the observer will retry
    fn on_disconnect(&self, _error: &IpcError) {}
}

/// Observer timing knobs
#[derive(Debug, Clone, Copy)]
pub struct ObserverOptions {
    pub reconnect_delay: Duration,
    pub clock_interval: Duration,
    /// Zero disables reconciliation reports
    pub reconcile_interval: Duration,
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(2),
            clock_interval: Duration::from_secs(1),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

/// A subscribed observer that keeps its view in sync across reconnects
pub struct Observer {
    socket_path: PathBuf,
    options: ObserverOptions,
    view: Arc<Mutex<ObserverView>>,
}

impl Observer {
    pub fn new(socket_path: impl AsRef<Path>, options: ObserverOptions) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            options,
            view: Arc::new(Mutex::new(ObserverView::new())),
        }
    }

    pub fn view(&self) -> Arc<Mutex<ObserverView>> {
        self.view.clone()
    }

    /// Run until the task is dropped, reconnecting on every failure
    pub async fn run<S: ObserverSink>(&self, sink: Arc<S>) {
        loop {
            let error = match self.run_connection(&sink).await {
                Ok(()) => IpcError::ConnectionClosed,
                Err(e) => e,
            };

            lock(&self.view).mark_stale();
            warn!(error = %error, "Observer disconnected, will reconnect");
            sink.on_disconnect(&error);

            tokio::time::sleep(self.options.reconnect_delay).await;
        }
    }

    /// One connection lifetime: returns when the service goes away
    async fn run_connection<S: ObserverSink>(&self, sink: &Arc<S>) -> IpcResult<()> {
        let mut client = IpcClient::connect(&self.socket_path).await?;
        let (observer_id, snapshot) = client.subscribe().await?;

        {
            let mut view = lock(&self.view);
            view.apply_snapshot(&snapshot, rental_util::now());
            sink.on_snapshot(&view);
        }
        info!(
            observer_id = %observer_id,
            sessions = snapshot.sessions.len(),
            "Observer subscribed"
        );

        let clock = self.spawn_clock(sink.clone());
        let result = self.event_loop(&mut client, sink).await;
        clock.abort();
        result
    }

    fn spawn_clock<S: ObserverSink>(&self, sink: Arc<S>) -> tokio::task::JoinHandle<()> {
        let view = self.view.clone();
        let period = self.options.clock_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let view = lock(&view);
                sink.on_clock(&view, rental_util::now());
            }
        })
    }

    async fn event_loop<S: ObserverSink>(&self, client: &mut IpcClient, sink: &Arc<S>) -> IpcResult<()> {
        let reconcile_enabled = !self.options.reconcile_interval.is_zero();
        let mut reconcile = tokio::time::interval(if reconcile_enabled {
            self.options.reconcile_interval
        } else {
            Duration::from_secs(3600)
        });
        // The first tick completes immediately
        reconcile.tick().await;

        loop {
            tokio::select! {
                event = client.next_event() => {
                    let event = event?;

                    match &event.payload {
                        EventPayload::ResyncRequired { missed } => {
                            warn!(missed, "Observer fell behind, fetching fresh snapshot");
                            let (_, snapshot) = client.subscribe().await?;
                            let mut view = lock(&self.view);
                            view.apply_snapshot(&snapshot, rental_util::now());
                            sink.on_snapshot(&view);
                            continue;
                        }
                        EventPayload::Shutdown => {
                            info!("Service shutting down");
                            let mut view = lock(&self.view);
                            view.apply_event(&event);
                            sink.on_event(&event, &view, false);
                            return Ok(());
                        }
                        _ => {}
                    }

                    let mut view = lock(&self.view);
                    let changed = view.apply_event(&event);
                    sink.on_event(&event, &view, changed);
                }

                _ = reconcile.tick(), if reconcile_enabled => {
                    let reports = lock(&self.view).reconcile_reports(rental_util::now());
                    for report in reports {
                        match client.call(Command::Reconcile { report }).await {
                            Ok(ResponsePayload::Reconciled(outcome)) => {
                                if !outcome.within_tolerance {
                                    debug!(
                                        session_id = %outcome.session.session_id,
                                        drift_ms = outcome.drift_ms,
                                        "Re-anchoring on service time"
                                    );
                                }
                                lock(&self.view).apply_reconcile(&outcome);
                            }
                            Ok(other) => debug!(reply = ?other, "Unexpected reconcile reply"),
                            // Session finished since the report was built
                            Err(IpcError::ServerError(reason)) => debug!(reason = %reason, "Reconcile rejected"),
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
        }
    }
}

fn lock(view: &Mutex<ObserverView>) -> std::sync::MutexGuard<'_, ObserverView> {
    view.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rental_api::{Money, RentalMode, TransitionEvent, TransitionKind, API_VERSION};
    use rental_util::ResourceId;

    fn t(minutes: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    fn session(id: &SessionId, state: SessionState, revision: u64) -> SessionInfo {
        SessionInfo {
            session_id: id.clone(),
            resource_id: ResourceId::new("ps5-1"),
            resource_label: "PS5 #1".into(),
            hourly_rate: Money::from_cents(800),
            customer_name: "Jane".into(),
            mode: RentalMode::OpenEnded,
            state,
            base_elapsed_ms: 0,
            last_resume_at: (state == SessionState::Active).then(|| t(0)),
            created_at: t(0),
            revision,
            completion: None,
        }
    }

    fn snapshot(server_time: DateTime<Local>, sessions: Vec<SessionInfo>) -> ActiveSnapshot {
        ActiveSnapshot {
            api_version: API_VERSION,
            server_time,
            sessions,
        }
    }

    fn delta(kind: TransitionKind, session: SessionInfo) -> Event {
        Event::at(
            t(0),
            EventPayload::Transition(TransitionEvent {
                kind,
                session_id: session.session_id.clone(),
                resource_id: session.resource_id.clone(),
                session,
            }),
        )
    }

    #[test]
    fn test_snapshot_replaces_view() {
        let mut view = ObserverView::new();
        let id = SessionId::new();
        view.apply_session(&session(&SessionId::new(), SessionState::Active, 1));

        view.apply_snapshot(&snapshot(t(5), vec![session(&id, SessionState::Active, 1)]), t(5));

        let live = view.live_sessions();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].session_id, id);
        assert!(view.is_synced());
    }

    #[test]
    fn test_stale_deltas_are_dropped() {
        let mut view = ObserverView::new();
        let id = SessionId::new();
        view.apply_snapshot(&snapshot(t(5), vec![session(&id, SessionState::Paused, 2)]), t(5));

        // Started delta raced with the snapshot
        assert!(!view.apply_event(&delta(
            TransitionKind::Started,
            session(&id, SessionState::Active, 1)
        )));
        assert_eq!(view.get(&id).map(|s| s.state), Some(SessionState::Paused));

        assert!(view.apply_event(&delta(
            TransitionKind::Resumed,
            session(&id, SessionState::Active, 3)
        )));
        assert_eq!(view.get(&id).map(|s| s.revision), Some(3));
    }

    #[test]
    fn test_completed_sessions_leave_and_stay_gone() {
        let mut view = ObserverView::new();
        let id = SessionId::new();
        view.apply_snapshot(&snapshot(t(5), vec![session(&id, SessionState::Active, 1)]), t(5));

        assert!(view.apply_event(&delta(
            TransitionKind::Completed,
            session(&id, SessionState::Completed, 3)
        )));
        assert!(view.live_sessions().is_empty());

        // A late pause delta must not bring it back
        assert!(!view.apply_event(&delta(
            TransitionKind::Paused,
            session(&id, SessionState::Paused, 2)
        )));
        assert!(view.live_sessions().is_empty());
    }

    #[test]
    fn test_display_clock_uses_offset() {
        let mut view = ObserverView::new();
        let id = SessionId::new();

        // Local clock runs two minutes behind the service
        view.apply_snapshot(&snapshot(t(10), vec![session(&id, SessionState::Active, 1)]), t(8));
        assert_eq!(view.clock_offset(), chrono::Duration::minutes(2));

        assert_eq!(
            view.display_elapsed(&id, t(8)),
            Some(Duration::from_secs(600))
        );

        let reports = view.reconcile_reports(t(8));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].observed_elapsed_ms, 600_000);
        assert_eq!(reports[0].observed_at, t(8));
    }

    #[test]
    fn test_resync_marks_stale() {
        let mut view = ObserverView::new();
        view.apply_snapshot(&snapshot(t(0), vec![]), t(0));
        assert!(view.is_synced());

        view.apply_event(&Event::at(t(1), EventPayload::ResyncRequired { missed: 4 }));
        assert!(!view.is_synced());
    }

    #[test]
    fn test_paused_sessions_are_not_reported() {
        let mut view = ObserverView::new();
        view.apply_snapshot(
            &snapshot(t(0), vec![session(&SessionId::new(), SessionState::Paused, 2)]),
            t(0),
        );
        assert!(view.reconcile_reports(t(3)).is_empty());
    }
}
