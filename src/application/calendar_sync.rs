use crate::domain::date_window::DateWindow;
use crate::domain::models::{AuthUser, CalendarEvent, EventDraft, EventUpdate};
use crate::infrastructure::auth::AuthProvider;
use crate::infrastructure::config::DEFAULT_UPCOMING_LIMIT;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_store::EventStore;
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Observable state of the upcoming-events cache.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct UpcomingSnapshot {
    pub events: Vec<CalendarEvent>,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug)]
struct CacheState {
    events: Vec<CalendarEvent>,
    error: Option<String>,
    in_flight: usize,
    // Refresh tickets: a result is applied only if no later-issued refresh was applied first.
    issued_ticket: u64,
    applied_ticket: u64,
    bound_user_id: Option<String>,
    last_limit: usize,
}

impl CacheState {
    fn new(limit: usize) -> Self {
        Self {
            events: Vec::new(),
            error: None,
            in_flight: 0,
            issued_ticket: 0,
            applied_ticket: 0,
            bound_user_id: None,
            last_limit: limit,
        }
    }
}

/// Per-session owner of the current user's upcoming events.
///
/// Writes go straight to the store; after each successful write the cache is
/// rebuilt from a fresh `get_upcoming_events` read, never patched locally.
/// Range and week reads bypass the cache entirely.
pub struct CalendarSyncService<A, E>
where
    A: AuthProvider,
    E: EventStore,
{
    auth: Arc<A>,
    store: Arc<E>,
    timezone: Tz,
    default_limit: usize,
    state: Mutex<CacheState>,
}

impl<A, E> CalendarSyncService<A, E>
where
    A: AuthProvider,
    E: EventStore,
{
    pub fn new(auth: Arc<A>, store: Arc<E>) -> Self {
        Self {
            auth,
            store,
            timezone: chrono_tz::Australia::Melbourne,
            default_limit: DEFAULT_UPCOMING_LIMIT,
            state: Mutex::new(CacheState::new(DEFAULT_UPCOMING_LIMIT)),
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        let limit = limit.max(1);
        self.default_limit = limit;
        if let Ok(state) = self.state.get_mut() {
            state.last_limit = limit;
        }
        self
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, CacheState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::lock_poisoned("upcoming events cache", error))
    }

    fn bound_user(&self) -> Result<AuthUser, InfraError> {
        self.auth.current_user().ok_or(InfraError::NotAuthenticated)
    }

    pub fn snapshot(&self) -> Result<UpcomingSnapshot, InfraError> {
        let state = self.lock_state()?;
        Ok(UpcomingSnapshot {
            events: state.events.clone(),
            loading: state.in_flight > 0,
            error: state.error.clone(),
        })
    }

    /// Re-binds the cache to the auth provider's current user.
    ///
    /// A changed user empties the cache and invalidates in-flight refreshes; a
    /// newly present user then gets a fresh load. Returns whether the binding changed.
    pub async fn sync_user(&self) -> Result<bool, InfraError> {
        let current = self.auth.current_user();
        let limit = {
            let mut state = self.lock_state()?;
            let current_id = current.as_ref().map(|user| user.id.as_str());
            if state.bound_user_id.as_deref() == current_id {
                return Ok(false);
            }
            state.bound_user_id = current_id.map(ToOwned::to_owned);
            state.events.clear();
            state.error = None;
            state.issued_ticket += 1;
            state.applied_ticket = state.issued_ticket;
            state.last_limit = self.default_limit;
            self.default_limit
        };

        match current {
            Some(user) => {
                info!(user_id = %user.id, "bound calendar cache to user");
                // Load failures are captured in the snapshot.
                let _ = self.load_upcoming(limit).await;
            }
            None => info!("cleared calendar cache after sign-out"),
        }
        Ok(true)
    }

    fn begin_refresh(&self, limit: usize) -> Result<u64, InfraError> {
        let mut state = self.lock_state()?;
        state.issued_ticket += 1;
        state.in_flight += 1;
        state.last_limit = limit;
        Ok(state.issued_ticket)
    }

    fn finish_refresh(
        &self,
        ticket: u64,
        user: &AuthUser,
        limit: usize,
        result: Result<Vec<CalendarEvent>, InfraError>,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        let result = result.map(|events| normalize_upcoming(events, &user.id, limit));
        let mut state = self.lock_state()?;
        state.in_flight = state.in_flight.saturating_sub(1);

        if ticket <= state.applied_ticket {
            debug!(ticket, applied = state.applied_ticket, "discarded stale upcoming refresh");
            return result;
        }
        state.applied_ticket = ticket;

        match &result {
            Ok(events) => {
                state.events = events.clone();
                state.error = None;
            }
            Err(error) => {
                // A failed upcoming load leaves an empty list, unlike range reads.
                state.events.clear();
                state.error = Some(error.to_string());
            }
        }
        result
    }

    pub async fn load_upcoming(&self, limit: usize) -> Result<Vec<CalendarEvent>, InfraError> {
        if limit == 0 {
            return Err(InfraError::InvalidInput("limit must be > 0".to_string()));
        }
        let user = self.bound_user()?;
        let ticket = self.begin_refresh(limit)?;
        let result = self.store.get_upcoming_events(&user, limit).await;
        if let Err(error) = &result {
            warn!(user_id = %user.id, %error, "failed to load upcoming events");
        }
        self.finish_refresh(ticket, &user, limit, result)
    }

    /// Reloads with the most recently used limit.
    pub async fn refresh(&self) -> Result<Vec<CalendarEvent>, InfraError> {
        let limit = self.lock_state()?.last_limit;
        self.load_upcoming(limit).await
    }

    async fn refresh_after_write(&self, operation: &str) {
        if let Err(error) = self.refresh().await {
            warn!(operation, %error, "refresh after write failed");
        }
    }

    pub async fn load_by_date_range(
        &self,
        start: &str,
        end: &str,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        let user = self.bound_user()?;
        let window = DateWindow::from_date_strings(start, end, self.timezone)
            .map_err(InfraError::InvalidInput)?;
        self.store.get_events_by_date_range(&user, window).await
    }

    pub async fn load_by_week(&self, week_start: &str) -> Result<Vec<CalendarEvent>, InfraError> {
        let user = self.bound_user()?;
        let week = DateWindow::week(week_start, self.timezone).map_err(InfraError::InvalidInput)?;
        self.store.get_events_by_week(&user, week).await
    }

    pub async fn add_event(&self, draft: EventDraft) -> Result<CalendarEvent, InfraError> {
        let user = self.bound_user()?;
        draft.validate().map_err(InfraError::InvalidInput)?;

        let created = self.store.create_event(&user, &draft).await?;
        info!(user_id = %user.id, event_id = %created.id, "created calendar event");
        self.refresh_after_write("add_event").await;
        Ok(created)
    }

    pub async fn edit_event(
        &self,
        event_id: &str,
        update: EventUpdate,
    ) -> Result<CalendarEvent, InfraError> {
        let user = self.bound_user()?;
        let event_id = required_event_id(event_id)?;
        update.validate().map_err(InfraError::InvalidInput)?;

        let updated = self.store.update_event(&user, event_id, &update).await?;
        info!(user_id = %user.id, event_id, "updated calendar event");
        self.refresh_after_write("edit_event").await;
        Ok(updated)
    }

    pub async fn complete_event(&self, event_id: &str) -> Result<(), InfraError> {
        let user = self.bound_user()?;
        let event_id = required_event_id(event_id)?;

        self.store.mark_event_complete(&user, event_id).await?;
        info!(user_id = %user.id, event_id, "completed calendar event");
        self.refresh_after_write("complete_event").await;
        Ok(())
    }

    pub async fn remove_event(&self, event_id: &str) -> Result<(), InfraError> {
        let user = self.bound_user()?;
        let event_id = required_event_id(event_id)?;

        self.store.delete_event(&user, event_id).await?;
        info!(user_id = %user.id, event_id, "deleted calendar event");
        self.refresh_after_write("remove_event").await;
        Ok(())
    }
}

fn required_event_id(event_id: &str) -> Result<&str, InfraError> {
    let event_id = event_id.trim();
    if event_id.is_empty() {
        return Err(InfraError::InvalidInput("event id must not be empty".to_string()));
    }
    Ok(event_id)
}

/// Enforces the cache shape whatever the store returned: own, incomplete, soonest first, capped.
fn normalize_upcoming(events: Vec<CalendarEvent>, user_id: &str, limit: usize) -> Vec<CalendarEvent> {
    let mut events: Vec<CalendarEvent> = events
        .into_iter()
        .filter(|event| event.user_id == user_id && !event.is_completed)
        .collect();
    events.sort_by(|left, right| left.start_at.cmp(&right.start_at));
    events.truncate(limit);
    events
}
