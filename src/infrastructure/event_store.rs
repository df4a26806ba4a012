use crate::domain::date_window::DateWindow;
use crate::domain::models::{AuthUser, CalendarEvent, EventDraft, EventUpdate};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{
    decode_event_row, encode_event_row, format_timestamp, BackendEventRow,
};
use crate::infrastructure::storage::open_connection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// Remote calendar store. Every call is scoped to `user.id`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Incomplete events still running or starting at/after now, soonest first, at most `limit`.
    async fn get_upcoming_events(
        &self,
        user: &AuthUser,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>, InfraError>;

    async fn get_events_by_date_range(
        &self,
        user: &AuthUser,
        window: DateWindow,
    ) -> Result<Vec<CalendarEvent>, InfraError>;

    async fn get_events_by_week(
        &self,
        user: &AuthUser,
        week: DateWindow,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        self.get_events_by_date_range(user, week).await
    }

    async fn create_event(
        &self,
        user: &AuthUser,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, InfraError>;

    async fn update_event(
        &self,
        user: &AuthUser,
        event_id: &str,
        update: &EventUpdate,
    ) -> Result<CalendarEvent, InfraError>;

    async fn mark_event_complete(&self, user: &AuthUser, event_id: &str) -> Result<(), InfraError>;

    async fn delete_event(&self, user: &AuthUser, event_id: &str) -> Result<(), InfraError>;
}

fn sort_by_start(events: &mut [CalendarEvent]) {
    events.sort_by(|left, right| {
        left.start_at
            .cmp(&right.start_at)
            .then_with(|| left.id.cmp(&right.id))
    });
}

fn not_found(event_id: &str, user_id: &str) -> InfraError {
    InfraError::NotFound(format!("event {event_id} for user {user_id}"))
}

pub struct InMemoryEventStore {
    events: Mutex<HashMap<String, CalendarEvent>>,
    now_provider: NowProvider,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
            now_provider: Arc::new(Utc::now),
        }
    }
}

impl InMemoryEventStore {
    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn insert(&self, event: CalendarEvent) -> Result<(), InfraError> {
        let mut events = self.lock()?;
        events.insert(event.id.clone(), event);
        Ok(())
    }

    pub fn get(&self, event_id: &str) -> Result<Option<CalendarEvent>, InfraError> {
        Ok(self.lock()?.get(event_id).cloned())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CalendarEvent>>, InfraError> {
        self.events
            .lock()
            .map_err(|error| InfraError::lock_poisoned("event store", error))
    }

    fn owned_mut<'a>(
        events: &'a mut HashMap<String, CalendarEvent>,
        user: &AuthUser,
        event_id: &str,
    ) -> Result<&'a mut CalendarEvent, InfraError> {
        events
            .get_mut(event_id)
            .filter(|event| event.user_id == user.id)
            .ok_or_else(|| not_found(event_id, &user.id))
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn get_upcoming_events(
        &self,
        user: &AuthUser,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        let now = (self.now_provider)();
        let mut upcoming: Vec<CalendarEvent> = self
            .lock()?
            .values()
            .filter(|event| event.user_id == user.id && event.is_upcoming_at(now))
            .cloned()
            .collect();
        sort_by_start(&mut upcoming);
        upcoming.truncate(limit);
        Ok(upcoming)
    }

    async fn get_events_by_date_range(
        &self,
        user: &AuthUser,
        window: DateWindow,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        let mut events: Vec<CalendarEvent> = self
            .lock()?
            .values()
            .filter(|event| event.user_id == user.id && event.overlaps(window.start, window.end))
            .cloned()
            .collect();
        sort_by_start(&mut events);
        Ok(events)
    }

    async fn create_event(
        &self,
        user: &AuthUser,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, InfraError> {
        let event = draft
            .clone()
            .into_event(next_id("evt"), user.id.clone(), (self.now_provider)());
        self.lock()?.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn update_event(
        &self,
        user: &AuthUser,
        event_id: &str,
        update: &EventUpdate,
    ) -> Result<CalendarEvent, InfraError> {
        let mut events = self.lock()?;
        let stored = Self::owned_mut(&mut events, user, event_id)?;
        let mut updated = stored.clone();
        update.apply_to(&mut updated);
        updated.validate().map_err(InfraError::InvalidInput)?;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn mark_event_complete(&self, user: &AuthUser, event_id: &str) -> Result<(), InfraError> {
        let mut events = self.lock()?;
        Self::owned_mut(&mut events, user, event_id)?.is_completed = true;
        Ok(())
    }

    async fn delete_event(&self, user: &AuthUser, event_id: &str) -> Result<(), InfraError> {
        let mut events = self.lock()?;
        Self::owned_mut(&mut events, user, event_id)?;
        events.remove(event_id);
        Ok(())
    }
}

const EVENT_COLUMNS: &str = "id, user_id, title, description, subject_id, event_type, start_at, end_at, is_completed, created_at";

#[derive(Clone)]
pub struct SqliteEventStore {
    db_path: PathBuf,
    now_provider: NowProvider,
}

impl SqliteEventStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn read_row(row: &Row<'_>) -> rusqlite::Result<BackendEventRow> {
        Ok(BackendEventRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            subject_id: row.get(4)?,
            event_type: row.get(5)?,
            start_at: row.get(6)?,
            end_at: row.get(7)?,
            is_completed: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    async fn run_blocking<T, F>(&self, operation: F) -> Result<T, InfraError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, InfraError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || operation(&db_path))
            .await
            .map_err(|error| InfraError::Remote(format!("sqlite worker failed: {error}")))?
    }

    fn query_events(
        db_path: &Path,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        let connection = open_connection(db_path)?;
        let mut statement = connection.prepare(sql)?;
        let rows = statement
            .query_map(params, Self::read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(decode_event_row).collect()
    }

    fn load_owned(
        connection: &rusqlite::Connection,
        user_id: &str,
        event_id: &str,
    ) -> Result<CalendarEvent, InfraError> {
        let row = connection
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM calendar_events WHERE id = ?1 AND user_id = ?2"),
                params![event_id, user_id],
                Self::read_row,
            )
            .optional()?
            .ok_or_else(|| not_found(event_id, user_id))?;
        decode_event_row(row)
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn get_upcoming_events(
        &self,
        user: &AuthUser,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        let user_id = user.id.clone();
        let now = format_timestamp((self.now_provider)());
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run_blocking(move |db_path| {
            Self::query_events(
                db_path,
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM calendar_events
                     WHERE user_id = ?1 AND is_completed = 0 AND COALESCE(end_at, start_at) >= ?2
                     ORDER BY start_at ASC, id ASC
                     LIMIT ?3"
                ),
                params![user_id, now, limit],
            )
        })
        .await
    }

    async fn get_events_by_date_range(
        &self,
        user: &AuthUser,
        window: DateWindow,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        let user_id = user.id.clone();
        let window_start = format_timestamp(window.start);
        let window_end = format_timestamp(window.end);
        self.run_blocking(move |db_path| {
            Self::query_events(
                db_path,
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM calendar_events
                     WHERE user_id = ?1 AND start_at < ?3 AND COALESCE(end_at, start_at) >= ?2
                     ORDER BY start_at ASC, id ASC"
                ),
                params![user_id, window_start, window_end],
            )
        })
        .await
    }

    async fn create_event(
        &self,
        user: &AuthUser,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, InfraError> {
        let event = draft
            .clone()
            .into_event(next_id("evt"), user.id.clone(), (self.now_provider)());
        let row = encode_event_row(&event);
        self.run_blocking(move |db_path| {
            let connection = open_connection(db_path)?;
            connection.execute(
                &format!(
                    "INSERT INTO calendar_events ({EVENT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    row.id,
                    row.user_id,
                    row.title,
                    row.description,
                    row.subject_id,
                    row.event_type,
                    row.start_at,
                    row.end_at,
                    row.is_completed,
                    row.created_at
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(event)
    }

    async fn update_event(
        &self,
        user: &AuthUser,
        event_id: &str,
        update: &EventUpdate,
    ) -> Result<CalendarEvent, InfraError> {
        let user_id = user.id.clone();
        let event_id = event_id.to_string();
        let update = update.clone();
        self.run_blocking(move |db_path| {
            let mut connection = open_connection(db_path)?;
            let transaction = connection.transaction()?;
            let mut event = Self::load_owned(&transaction, &user_id, &event_id)?;
            update.apply_to(&mut event);
            // Uncommitted transaction rolls back on drop.
            event.validate().map_err(InfraError::InvalidInput)?;
            let row = encode_event_row(&event);
            transaction.execute(
                "UPDATE calendar_events
                 SET title = ?3, description = ?4, subject_id = ?5, event_type = ?6,
                     start_at = ?7, end_at = ?8, is_completed = ?9
                 WHERE id = ?1 AND user_id = ?2",
                params![
                    row.id,
                    row.user_id,
                    row.title,
                    row.description,
                    row.subject_id,
                    row.event_type,
                    row.start_at,
                    row.end_at,
                    row.is_completed
                ],
            )?;
            transaction.commit()?;
            Ok(event)
        })
        .await
    }

    async fn mark_event_complete(&self, user: &AuthUser, event_id: &str) -> Result<(), InfraError> {
        let user_id = user.id.clone();
        let event_id = event_id.to_string();
        self.run_blocking(move |db_path| {
            let connection = open_connection(db_path)?;
            let changed = connection.execute(
                "UPDATE calendar_events SET is_completed = 1 WHERE id = ?1 AND user_id = ?2",
                params![event_id, user_id],
            )?;
            if changed == 0 {
                return Err(not_found(&event_id, &user_id));
            }
            Ok(())
        })
        .await
    }

    async fn delete_event(&self, user: &AuthUser, event_id: &str) -> Result<(), InfraError> {
        let user_id = user.id.clone();
        let event_id = event_id.to_string();
        self.run_blocking(move |db_path| {
            let connection = open_connection(db_path)?;
            let changed = connection.execute(
                "DELETE FROM calendar_events WHERE id = ?1 AND user_id = ?2",
                params![event_id, user_id],
            )?;
            if changed == 0 {
                return Err(not_found(&event_id, &user_id));
            }
            Ok(())
        })
        .await
    }
}
