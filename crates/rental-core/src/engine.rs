//! Core rental engine

use chrono::{DateTime, Local};
use rental_api::{
    ActiveSnapshot, CompletionReason, ConvertedAmount, Event, EventPayload, FinishOutcome,
    HistoryFilter, Money, Quote, ReconcileOutcome, ReconcileReport, RentalModeTag, ResourceView,
    SessionInfo, TransitionKind, UsageStats,
};
use rental_config::Policy;
use rental_store::{ActiveSessionsSnapshot, AuditEvent, AuditEventType, Store};
use rental_util::{RentalError, ResourceId, Result, SessionId};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    resolve_mode, BillingPolicy, Catalog, ConfigCatalog, CoreEvent, ExpirationWatcher, FixedRate,
    RateSource, Registry, Session, Synchronizer, WatchAction,
};

/// The rental engine.
///
/// Every operation takes `&self` and the clock reading `now`; the engine is
/// shared between tasks behind an `Arc`.
pub struct RentalEngine {
    billing: BillingPolicy,
    rates: Arc<dyn RateSource>,
    store: Arc<dyn Store>,
    registry: Registry,
    sync: Synchronizer,
    watcher: ExpirationWatcher,
    persist_lock: Mutex<()>,
}

impl RentalEngine {
    /// Create an engine whose catalog and exchange rate come from `policy`
    pub fn new(policy: &Policy, store: Arc<dyn Store>) -> Self {
        Self::with_sources(
            policy,
            Arc::new(ConfigCatalog::from_policy(policy)),
            Arc::new(FixedRate(policy.currency.display.clone())),
            store,
        )
    }

    /// Create an engine with external catalog and rate sources
    pub fn with_sources(
        policy: &Policy,
        catalog: Arc<dyn Catalog>,
        rates: Arc<dyn RateSource>,
        store: Arc<dyn Store>,
    ) -> Self {
        let billing = BillingPolicy::from(&policy.billing);
        let resource_count = catalog.list().len();

        info!(
            resource_count,
            block_minutes = billing.block_minutes,
            grace_minutes = billing.grace_minutes,
            "Rental engine initialized"
        );

        let engine = Self {
            billing,
            rates,
            store,
            registry: Registry::new(catalog),
            sync: Synchronizer::new(&policy.sync),
            watcher: ExpirationWatcher::new(&policy.expiry),
            persist_lock: Mutex::new(()),
        };
        engine.audit(
            rental_util::now(),
            AuditEventType::PolicyLoaded { resource_count },
        );
        engine
    }

    pub fn billing(&self) -> &BillingPolicy {
        &self.billing
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn audit(&self, at: DateTime<Local>, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::at(at, event)) {
            warn!(error = %e, "Failed to append audit event");
        }
    }

    /// Registry access that tells finished sessions from unknown ones,
    /// including sessions completed before a restart.
    fn with_session<R, F>(&self, session_id: &SessionId, f: F) -> Result<R>
    where
        F: FnOnce(&mut Session) -> Result<R>,
    {
        self.registry.with_session(session_id, f).map_err(|e| match e {
            RentalError::SessionNotFound(id) => match self.store.is_completed(&id) {
                Ok(true) => RentalError::AlreadyCompleted(id),
                Ok(false) => RentalError::SessionNotFound(id),
                Err(store_err) => {
                    warn!(session_id = %id, error = %store_err, "Failed to look up session history");
                    RentalError::SessionNotFound(id)
                }
            },
            other => other,
        })
    }

    /// Save the live sessions for crash recovery
    fn persist_active(&self, now: DateTime<Local>) {
        let _guard = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = ActiveSessionsSnapshot {
            timestamp: now,
            sessions: self.registry.list_active(),
        };
        if let Err(e) = self.store.save_snapshot(&snapshot) {
            warn!(error = %e, "Failed to save active-session snapshot");
        }
    }

    fn convert(&self, amount: Money) -> Option<ConvertedAmount> {
        self.rates.rate().map(|rate| rate.convert(amount))
    }

    /// Reinstall sessions that were live when the service last stopped
    pub fn recover(&self, now: DateTime<Local>) -> usize {
        let snapshot = match self.store.load_snapshot() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return 0,
            Err(e) => {
                warn!(error = %e, "Failed to load active-session snapshot");
                return 0;
            }
        };

        let count = self.registry.restore(snapshot.sessions);
        if count > 0 {
            info!(count, saved_at = %snapshot.timestamp, "Recovered in-progress sessions");
            self.audit(now, AuditEventType::SessionsRecovered { count });
        }
        count
    }

    /// Lease a resource to a customer
    pub fn start(
        &self,
        resource_id: &ResourceId,
        customer_name: &str,
        mode: RentalModeTag,
        duration_minutes: Option<u32>,
        now: DateTime<Local>,
    ) -> Result<SessionInfo> {
        let mode = resolve_mode(mode, duration_minutes)?;
        let customer_name = customer_name.trim();

        let info = self
            .registry
            .acquire(resource_id, customer_name, mode, now, |session| {
                self.sync
                    .publish_transition(TransitionKind::Started, session, now)
            })?;

        info!(
            session_id = %info.session_id,
            resource_id = %resource_id,
            customer = %customer_name,
            mode = ?mode,
            "Session started"
        );
        self.audit(
            now,
            AuditEventType::SessionStarted {
                session_id: info.session_id.clone(),
                resource_id: resource_id.clone(),
                customer_name: info.customer_name.clone(),
                mode,
            },
        );
        self.persist_active(now);

        Ok(info)
    }

    /// ACTIVE -> PAUSED
    pub fn pause(&self, session_id: &SessionId, now: DateTime<Local>) -> Result<SessionInfo> {
        let (info, now) = self.with_session(session_id, |session| {
            session.pause(now)?;
            let at = session.last_transition_at();
            self.sync.publish_transition(TransitionKind::Paused, session, at);
            Ok((session.to_info(), at))
        })?;

        info!(
            session_id = %session_id,
            elapsed_ms = info.base_elapsed_ms,
            "Session paused"
        );
        self.audit(
            now,
            AuditEventType::SessionPaused {
                session_id: session_id.clone(),
                elapsed_ms: info.base_elapsed_ms,
            },
        );
        self.persist_active(now);

        Ok(info)
    }

    /// PAUSED -> ACTIVE
    pub fn resume(&self, session_id: &SessionId, now: DateTime<Local>) -> Result<SessionInfo> {
        let (info, now) = self.with_session(session_id, |session| {
            session.resume(now)?;
            let at = session.last_transition_at();
            self.sync.publish_transition(TransitionKind::Resumed, session, at);
            Ok((session.to_info(), at))
        })?;

        info!(session_id = %session_id, "Session resumed");
        self.audit(
            now,
            AuditEventType::SessionResumed {
                session_id: session_id.clone(),
            },
        );
        self.persist_active(now);

        Ok(info)
    }

    /// Complete a session and bill it
    pub fn finish(&self, session_id: &SessionId, now: DateTime<Local>) -> Result<FinishOutcome> {
        self.complete_if(session_id, CompletionReason::Manual, now, |_| true)?
            .ok_or_else(|| RentalError::SessionNotFound(session_id.clone()))
    }

    /// Complete a fixed-duration session that has reached its limit.
    ///
    /// Returns `None` without error if the session is gone, already
    /// completed, or not due.
    pub fn expire(&self, session_id: &SessionId, now: DateTime<Local>) -> Option<FinishOutcome> {
        match self.complete_if(session_id, CompletionReason::Expired, now, |s| s.is_due(now)) {
            Ok(outcome) => outcome,
            Err(RentalError::SessionNotFound(_)) | Err(RentalError::AlreadyCompleted(_)) => {
                debug!(session_id = %session_id, "Expiry skipped: session already finished");
                None
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Expiry failed");
                None
            }
        }
    }

    fn complete_if<P>(
        &self,
        session_id: &SessionId,
        reason: CompletionReason,
        now: DateTime<Local>,
        should_complete: P,
    ) -> Result<Option<FinishOutcome>>
    where
        P: FnOnce(&Session) -> bool,
    {
        let kind = match reason {
            CompletionReason::Manual => TransitionKind::Completed,
            CompletionReason::Expired => TransitionKind::Expired,
        };

        let finished = self.with_session(session_id, |session| {
            if !should_complete(session) {
                return Ok(None);
            }
            let snapshot = session.finish(reason, now, &self.billing)?.clone();
            self.sync.publish_transition(kind, session, snapshot.completed_at);
            Ok(Some((session.to_info(), snapshot)))
        })?;

        let Some((info, snapshot)) = finished else {
            return Ok(None);
        };
        let now = snapshot.completed_at;

        self.registry.release(&info.resource_id);
        self.watcher.forget(session_id);

        if let Err(e) = self.store.record_completed(&info) {
            warn!(session_id = %session_id, error = %e, "Failed to record completed session");
        }

        info!(
            session_id = %session_id,
            resource_id = %info.resource_id,
            reason = reason.as_str(),
            raw_minutes = snapshot.raw_minutes,
            billed_minutes = snapshot.billed_minutes,
            billed_amount = %snapshot.billed_amount,
            "Session completed"
        );
        self.audit(
            now,
            AuditEventType::SessionCompleted {
                session_id: session_id.clone(),
                resource_id: info.resource_id.clone(),
                reason,
                raw_minutes: snapshot.raw_minutes,
                billed_minutes: snapshot.billed_minutes,
                billed_amount: snapshot.billed_amount,
            },
        );
        self.persist_active(now);

        Ok(Some(FinishOutcome {
            converted: self.convert(snapshot.billed_amount),
            billed_minutes: snapshot.billed_minutes,
            billed_amount: snapshot.billed_amount,
            session: info,
        }))
    }

    /// All live sessions, oldest first
    pub fn list_active(&self) -> Vec<SessionInfo> {
        self.registry.list_active()
    }

    pub fn active_count(&self) -> usize {
        self.registry.active_count()
    }

    /// Full view of live sessions for a (re)connecting observer
    pub fn snapshot(&self, now: DateTime<Local>) -> ActiveSnapshot {
        self.sync.snapshot(&self.registry, now)
    }

    /// Subscribe to transitions; the snapshot is taken after subscribing
    pub fn subscribe(&self, now: DateTime<Local>) -> (broadcast::Receiver<Event>, ActiveSnapshot) {
        self.sync.subscribe(&self.registry, now)
    }

    pub fn observer_count(&self) -> usize {
        self.sync.observer_count()
    }

    /// Completed sessions matching `filter`, most recent first
    pub fn history(&self, filter: &HistoryFilter) -> Result<Vec<SessionInfo>> {
        Ok(self.store.query_history(filter)?)
    }

    /// Usage totals over completed sessions matching `filter`
    pub fn stats(&self, filter: &HistoryFilter) -> Result<UsageStats> {
        let sessions = self.history(filter)?;

        let total_sessions = sessions.len() as u64;
        let mut total_raw_minutes = 0u64;
        let mut total_billed_minutes = 0u64;
        let mut revenue = Money::ZERO;

        for completion in sessions.iter().filter_map(|s| s.completion.as_ref()) {
            total_raw_minutes = total_raw_minutes.saturating_add(completion.raw_minutes);
            total_billed_minutes = total_billed_minutes.saturating_add(completion.billed_minutes);
            revenue += completion.billed_amount;
        }

        let average_billed_minutes = if total_sessions == 0 {
            0
        } else {
            (2 * total_billed_minutes + total_sessions) / (2 * total_sessions)
        };

        Ok(UsageStats {
            total_sessions,
            total_raw_minutes,
            total_billed_minutes,
            revenue,
            average_billed_minutes,
            average_revenue: revenue.div_round(total_sessions),
            converted_revenue: self.convert(revenue),
        })
    }

    /// Catalog resources with their current availability
    pub fn list_resources(&self) -> Vec<ResourceView> {
        self.registry
            .catalog()
            .list()
            .into_iter()
            .map(|resource| {
                let current_session = self.registry.holder(&resource.id);
                ResourceView {
                    available: resource.active && current_session.is_none(),
                    resource_id: resource.id,
                    label: resource.label,
                    hourly_rate: resource.hourly_rate,
                    active: resource.active,
                    current_session,
                }
            })
            .collect()
    }

    /// Live elapsed time and the bill if finished at `now`
    pub fn quote(&self, session_id: &SessionId, now: DateTime<Local>) -> Result<Quote> {
        let quote = self.with_session(session_id, |session| {
            let elapsed = session.elapsed_at(now);
            Ok(Quote {
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                bill: session.bill_at(now, &self.billing),
                remaining_minutes: session.remaining_minutes(now),
                converted: None,
                session: session.to_info(),
            })
        })?;

        Ok(Quote {
            converted: self.convert(quote.bill.amount),
            ..quote
        })
    }

    /// Check an observer's elapsed-time report against the authoritative
    /// session. Never changes the session.
    pub fn reconcile(&self, report: &ReconcileReport, now: DateTime<Local>) -> Result<ReconcileOutcome> {
        let authoritative = self
            .with_session(&report.session_id, |session| Ok(session.to_info()))
            .inspect_err(|_| {
                warn!(
                    session_id = %report.session_id,
                    "Discarding elapsed report for unknown session"
                );
            })?;

        Ok(self.sync.reconcile(report, authoritative, now))
    }

    /// Delete completed history, optionally only before a cutoff
    pub fn clear_history(&self, before: Option<DateTime<Local>>, now: DateTime<Local>) -> Result<usize> {
        let removed = self.store.clear_history(before)?;

        info!(removed, before = ?before, "History cleared");
        self.audit(now, AuditEventType::HistoryCleared { removed, before });

        Ok(removed)
    }

    /// Periodic check: expiry warnings and automatic expiry
    pub fn tick(&self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let live = self.registry.list_active();
        let mut events = Vec::new();

        for action in self.watcher.check(&live, now) {
            match action {
                WatchAction::Warn {
                    session_id,
                    remaining_minutes,
                } => {
                    let Some(session) = live.iter().find(|s| s.session_id == session_id) else {
                        continue;
                    };

                    info!(
                        session_id = %session_id,
                        remaining_minutes,
                        "Expiry warning issued"
                    );
                    self.audit(
                        now,
                        AuditEventType::ExpiryWarning {
                            session_id: session_id.clone(),
                            remaining_minutes,
                        },
                    );
                    self.sync.publish(
                        now,
                        EventPayload::ExpiryWarning {
                            session_id: session_id.clone(),
                            resource_id: session.resource_id.clone(),
                            customer_name: session.customer_name.clone(),
                            remaining_minutes,
                        },
                    );

                    events.push(CoreEvent::ExpiryWarning {
                        session_id,
                        resource_id: session.resource_id.clone(),
                        remaining_minutes,
                    });
                }
                WatchAction::Expire { session_id } => {
                    if let Some(outcome) = self.expire(&session_id, now) {
                        events.push(CoreEvent::Expired(outcome));
                    }
                }
            }
        }

        events
    }

    /// Tell observers the service is going away and save live sessions
    pub fn shutdown(&self, now: DateTime<Local>) {
        self.persist_active(now);
        self.sync.publish(now, EventPayload::Shutdown);
    }

    pub fn is_store_healthy(&self) -> bool {
        self.store.is_healthy()
    }
}
