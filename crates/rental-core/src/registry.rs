//! Resource registry
//!
//! Each resource id owns a slot guarded by its own mutex; a slot holds at
//! most one session. All reads and writes of a session happen under its
//! slot lock, so transitions on one resource are serialized while
//! different resources proceed independently.
//!
//! Lock order: slot mutex, then the session index, then the record of
//! released ids. Neither is held while a slot is being locked.

use chrono::{DateTime, Local};
use rental_api::{RentalMode, SessionInfo};
use rental_util::{RentalError, ResourceId, Result, SessionId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::{Catalog, Session};

#[derive(Debug, Default)]
struct Slot {
    session: Option<Session>,
}

type SlotRef = Arc<Mutex<Slot>>;

/// How many released session ids are remembered
const RELEASED_CAPACITY: usize = 4096;

/// Recently released session ids, oldest evicted first
#[derive(Debug, Default)]
struct Released {
    order: VecDeque<SessionId>,
    ids: HashSet<SessionId>,
}

impl Released {
    fn insert(&mut self, session_id: SessionId) {
        if !self.ids.insert(session_id.clone()) {
            return;
        }
        self.order.push_back(session_id);
        if self.order.len() > RELEASED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

/// Owner of every live session, keyed by resource
pub struct Registry {
    catalog: Arc<dyn Catalog>,
    slots: RwLock<HashMap<ResourceId, SlotRef>>,
    index: RwLock<HashMap<SessionId, ResourceId>>,
    released: Mutex<Released>,
}

impl Registry {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            slots: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            released: Mutex::new(Released::default()),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    fn slot(&self, resource_id: &ResourceId) -> SlotRef {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource_id)
        {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(resource_id.clone()).or_default())
    }

    fn existing_slot(&self, resource_id: &ResourceId) -> Option<SlotRef> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource_id)
            .cloned()
    }

    fn all_slots(&self) -> Vec<SlotRef> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn lock(slot: &SlotRef) -> MutexGuard<'_, Slot> {
        slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_insert(&self, session_id: SessionId, resource_id: ResourceId) {
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id, resource_id);
    }

    fn index_remove(&self, session_id: &SessionId) {
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }

    /// Drop a completed session from the index and remember its id
    fn retire(&self, session_id: &SessionId) {
        self.index_remove(session_id);
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.clone());
    }

    /// Whether `session_id` was completed and released by this registry
    pub fn was_released(&self, session_id: &SessionId) -> bool {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .contains(session_id)
    }

    fn resource_of(&self, session_id: &SessionId) -> Option<ResourceId> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Lease `resource_id` to a customer.
    ///
    /// `on_acquired` runs while the slot is still locked, before any other
    /// transition on the resource can be applied.
    pub fn acquire<F>(
        &self,
        resource_id: &ResourceId,
        customer_name: &str,
        mode: RentalMode,
        now: DateTime<Local>,
        on_acquired: F,
    ) -> Result<SessionInfo>
    where
        F: FnOnce(&Session),
    {
        let resource = self
            .catalog
            .lookup(resource_id)
            .filter(|r| r.active)
            .ok_or_else(|| RentalError::ResourceNotFound(resource_id.clone()))?;

        let slot = self.slot(resource_id);
        let mut guard = Self::lock(&slot);

        if let Some(existing) = &guard.session {
            if existing.is_live() {
                return Err(RentalError::ResourceBusy {
                    resource_id: resource_id.clone(),
                    session_id: existing.id().clone(),
                });
            }
            // Completed but not yet released
            self.retire(existing.id());
        }

        let session = Session::start(&resource, customer_name, mode, now);
        self.index_insert(session.id().clone(), resource_id.clone());
        on_acquired(&session);

        let info = session.to_info();
        guard.session = Some(session);
        debug!(session_id = %info.session_id, resource_id = %resource_id, "Resource acquired");
        Ok(info)
    }

    /// Run `f` on a session under its slot lock.
    ///
    /// Fails with `AlreadyCompleted` for a session this registry has
    /// released and `SessionNotFound` for any other unknown id.
    pub fn with_session<R, F>(&self, session_id: &SessionId, f: F) -> Result<R>
    where
        F: FnOnce(&mut Session) -> Result<R>,
    {
        let not_found = || {
            if self.was_released(session_id) {
                RentalError::AlreadyCompleted(session_id.clone())
            } else {
                RentalError::SessionNotFound(session_id.clone())
            }
        };

        let resource_id = self.resource_of(session_id).ok_or_else(not_found)?;
        let slot = self.existing_slot(&resource_id).ok_or_else(not_found)?;
        let mut guard = Self::lock(&slot);

        match guard.session.as_mut() {
            Some(session) if session.id() == session_id => f(session),
            // Released and replaced between the index lookup and the lock
            _ => Err(not_found()),
        }
    }

    /// Remove a completed session from the active index.
    ///
    /// Returns the removed session, or `None` if the slot is empty or its
    /// session is still live.
    pub fn release(&self, resource_id: &ResourceId) -> Option<SessionInfo> {
        let slot = self.existing_slot(resource_id)?;
        let mut guard = Self::lock(&slot);

        if guard.session.as_ref().is_some_and(|s| s.is_live()) {
            return None;
        }

        let session = guard.session.take()?;
        self.retire(session.id());
        debug!(session_id = %session.id(), resource_id = %resource_id, "Resource released");
        Some(session.to_info())
    }

    /// All live sessions, oldest first
    pub fn list_active(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .all_slots()
            .iter()
            .filter_map(|slot| {
                let guard = Self::lock(slot);
                guard
                    .session
                    .as_ref()
                    .filter(|s| s.is_live())
                    .map(Session::to_info)
            })
            .collect();

        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        sessions
    }

    /// Live session holding `resource_id`, if any
    pub fn holder(&self, resource_id: &ResourceId) -> Option<SessionId> {
        let slot = self.existing_slot(resource_id)?;
        let guard = Self::lock(&slot);
        guard
            .session
            .as_ref()
            .filter(|s| s.is_live())
            .map(|s| s.id().clone())
    }

    /// Number of live sessions
    pub fn active_count(&self) -> usize {
        self.all_slots()
            .iter()
            .filter(|slot| Self::lock(slot).session.as_ref().is_some_and(|s| s.is_live()))
            .count()
    }

    /// Reinstall live sessions recovered from the store.
    ///
    /// Completed sessions and sessions whose resource is already held are
    /// skipped. Returns the number restored.
    pub fn restore(&self, sessions: Vec<SessionInfo>) -> usize {
        let mut restored = 0;

        for info in sessions {
            if !info.state.is_live() {
                continue;
            }

            let slot = self.slot(&info.resource_id);
            let mut guard = Self::lock(&slot);
            if guard.session.as_ref().is_some_and(|s| s.is_live()) {
                warn!(
                    session_id = %info.session_id,
                    resource_id = %info.resource_id,
                    "Skipping recovered session: resource already held"
                );
                continue;
            }

            if let Some(existing) = guard.session.take() {
                self.retire(existing.id());
            }

            let session = Session::from_info(info);
            self.index_insert(session.id().clone(), session.resource_id().clone());
            guard.session = Some(session);
            restored += 1;
        }

        restored
    }
}
