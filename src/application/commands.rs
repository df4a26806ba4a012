use crate::application::bootstrap::bootstrap_workspace;
use crate::application::calendar_sync::{CalendarSyncService, UpcomingSnapshot};
use crate::application::navigation_gate::{NavigationGate, RouteOutbox};
use crate::domain::date_window::DateWindow;
use crate::domain::models::{AuthUser, CalendarEvent, EventDraft, EventUpdate, Route};
use crate::infrastructure::auth::{AuthProvider, InMemoryAuthProvider};
use crate::infrastructure::backend_client::ReqwestBackendClient;
use crate::infrastructure::config::{
    read_app_config, read_backend_config, save_backend_config, AppConfig, BackendConfig,
    BackendMode,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_store::{EventStore, SqliteEventStore};
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::subject_repository::{
    SqliteSubjectRepository, SubjectSelectionRepository,
};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Store selected by `backend.json`.
pub enum ConfiguredBackend {
    Local {
        events: SqliteEventStore,
        subjects: SqliteSubjectRepository,
    },
    Remote(ReqwestBackendClient),
}

impl ConfiguredBackend {
    fn from_config(config: &BackendConfig, database_path: &Path) -> Result<Self, InfraError> {
        match config.mode {
            BackendMode::Local => Ok(Self::Local {
                events: SqliteEventStore::new(database_path),
                subjects: SqliteSubjectRepository::new(database_path),
            }),
            BackendMode::Remote => {
                let base_url = config.base_url.as_deref().ok_or_else(|| {
                    InfraError::InvalidConfig("remote backend requires baseUrl".to_string())
                })?;
                let anon_key = config.anon_key.clone().ok_or_else(|| {
                    InfraError::InvalidConfig("remote backend requires anonKey".to_string())
                })?;
                Ok(Self::Remote(ReqwestBackendClient::new(base_url, anon_key)?))
            }
        }
    }

    pub fn mode(&self) -> BackendMode {
        match self {
            Self::Local { .. } => BackendMode::Local,
            Self::Remote(_) => BackendMode::Remote,
        }
    }
}

#[async_trait]
impl EventStore for ConfiguredBackend {
    async fn get_upcoming_events(
        &self,
        user: &AuthUser,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        match self {
            Self::Local { events, .. } => events.get_upcoming_events(user, limit).await,
            Self::Remote(client) => client.get_upcoming_events(user, limit).await,
        }
    }

    async fn get_events_by_date_range(
        &self,
        user: &AuthUser,
        window: DateWindow,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        match self {
            Self::Local { events, .. } => events.get_events_by_date_range(user, window).await,
            Self::Remote(client) => client.get_events_by_date_range(user, window).await,
        }
    }

    async fn get_events_by_week(
        &self,
        user: &AuthUser,
        week: DateWindow,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        match self {
            Self::Local { events, .. } => events.get_events_by_week(user, week).await,
            Self::Remote(client) => client.get_events_by_week(user, week).await,
        }
    }

    async fn create_event(
        &self,
        user: &AuthUser,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, InfraError> {
        match self {
            Self::Local { events, .. } => events.create_event(user, draft).await,
            Self::Remote(client) => client.create_event(user, draft).await,
        }
    }

    async fn update_event(
        &self,
        user: &AuthUser,
        event_id: &str,
        update: &EventUpdate,
    ) -> Result<CalendarEvent, InfraError> {
        match self {
            Self::Local { events, .. } => events.update_event(user, event_id, update).await,
            Self::Remote(client) => client.update_event(user, event_id, update).await,
        }
    }

    async fn mark_event_complete(&self, user: &AuthUser, event_id: &str) -> Result<(), InfraError> {
        match self {
            Self::Local { events, .. } => events.mark_event_complete(user, event_id).await,
            Self::Remote(client) => client.mark_event_complete(user, event_id).await,
        }
    }

    async fn delete_event(&self, user: &AuthUser, event_id: &str) -> Result<(), InfraError> {
        match self {
            Self::Local { events, .. } => events.delete_event(user, event_id).await,
            Self::Remote(client) => client.delete_event(user, event_id).await,
        }
    }
}

#[async_trait]
impl SubjectSelectionRepository for ConfiguredBackend {
    async fn get_user_subject_ids(&self, user: &AuthUser) -> Result<Vec<String>, InfraError> {
        match self {
            Self::Local { subjects, .. } => subjects.get_user_subject_ids(user).await,
            Self::Remote(client) => client.get_user_subject_ids(user).await,
        }
    }

    async fn save_user_subject_ids(
        &self,
        user: &AuthUser,
        subject_ids: &[String],
    ) -> Result<Vec<String>, InfraError> {
        match self {
            Self::Local { subjects, .. } => subjects.save_user_subject_ids(user, subject_ids).await,
            Self::Remote(client) => client.save_user_subject_ids(user, subject_ids).await,
        }
    }
}

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    app_config: AppConfig,
    auth: Arc<InMemoryAuthProvider>,
    backend: Arc<ConfiguredBackend>,
    routes: Arc<RouteOutbox>,
    calendar: CalendarSyncService<InMemoryAuthProvider, ConfiguredBackend>,
    gate: NavigationGate<ConfiguredBackend, RouteOutbox>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        init_logging(&bootstrap.logs_dir)?;

        let app_config = read_app_config(&bootstrap.config_dir)?;
        let backend_config = read_backend_config(&bootstrap.config_dir)?;
        let backend = Arc::new(ConfiguredBackend::from_config(
            &backend_config,
            &bootstrap.database_path,
        )?);
        let auth = Arc::new(InMemoryAuthProvider::default());
        let routes = Arc::new(RouteOutbox::default());

        let calendar = CalendarSyncService::new(Arc::clone(&auth), Arc::clone(&backend))
            .with_timezone(app_config.timezone)
            .with_default_limit(app_config.upcoming_limit);
        let gate = NavigationGate::new(Arc::clone(&backend), Arc::clone(&routes))
            .with_subject_fetch_timeout(app_config.subject_fetch_timeout);

        info!(
            app = %app_config.app_name,
            backend = ?backend.mode(),
            workspace = %workspace_root.display(),
            "app state initialized"
        );

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            app_config,
            auth,
            backend,
            routes,
            calendar,
            gate,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.app_config
    }

    pub fn backend_mode(&self) -> BackendMode {
        self.backend.mode()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        error!(command, %error, "command failed");
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        info!(command, "{message}");
    }

    fn current_user(&self) -> Result<AuthUser, InfraError> {
        self.auth.current_user().ok_or(InfraError::NotAuthenticated)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionResponse {
    pub user_id: Option<String>,
    pub route: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EventListResponse {
    pub events: Vec<CalendarEvent>,
    pub count: usize,
}

impl From<Vec<CalendarEvent>> for EventListResponse {
    fn from(events: Vec<CalendarEvent>) -> Self {
        Self {
            count: events.len(),
            events,
        }
    }
}

fn route_path(route: Option<Route>) -> Option<String> {
    route.map(|route| route.as_path().to_string())
}

/// Settles the session on a signed-in user, rebinds the cache and lets the gate decide.
pub async fn sign_in_impl(
    state: &AppState,
    user_id: String,
    email: Option<String>,
    access_token: Option<String>,
) -> Result<SessionResponse, InfraError> {
    let mut user = AuthUser::new(user_id.trim());
    user.email = email.filter(|value| !value.trim().is_empty());
    if let Some(token) = access_token.filter(|value| !value.trim().is_empty()) {
        user = user.with_access_token(token);
    }

    state.auth.set_session(Some(user.clone()))?;
    state.calendar.sync_user().await?;
    let route = state.gate.evaluate(state.auth.as_ref()).await?;
    state.log_info("sign_in", &format!("signed in user {}", user.id));

    Ok(SessionResponse {
        user_id: Some(user.id),
        route: route_path(route),
    })
}

pub async fn sign_out_impl(state: &AppState) -> Result<SessionResponse, InfraError> {
    state.auth.set_session(None)?;
    state.calendar.sync_user().await?;
    let route = state.gate.evaluate(state.auth.as_ref()).await?;
    state.log_info("sign_out", "signed out");

    Ok(SessionResponse {
        user_id: None,
        route: route_path(route),
    })
}

pub async fn resolve_launch_route_impl(state: &AppState) -> Result<Option<String>, InfraError> {
    let route = state.gate.evaluate(state.auth.as_ref()).await?;
    Ok(route_path(route))
}

/// Drains redirects the gate issued since the last call.
pub fn take_pending_routes_impl(state: &AppState) -> Vec<String> {
    state
        .routes
        .take()
        .into_iter()
        .map(|route| route.as_path().to_string())
        .collect()
}

pub async fn get_upcoming_events_impl(
    state: &AppState,
    limit: Option<usize>,
) -> Result<UpcomingSnapshot, InfraError> {
    let limit = limit.unwrap_or(state.app_config.upcoming_limit);
    state.calendar.load_upcoming(limit).await?;
    state.calendar.snapshot()
}

pub async fn refresh_upcoming_impl(state: &AppState) -> Result<UpcomingSnapshot, InfraError> {
    state.calendar.refresh().await?;
    state.calendar.snapshot()
}

pub fn upcoming_snapshot_impl(state: &AppState) -> Result<UpcomingSnapshot, InfraError> {
    state.calendar.snapshot()
}

pub async fn get_events_by_date_range_impl(
    state: &AppState,
    start_date: String,
    end_date: String,
) -> Result<EventListResponse, InfraError> {
    let events = state
        .calendar
        .load_by_date_range(&start_date, &end_date)
        .await?;
    Ok(events.into())
}

pub async fn get_events_by_week_impl(
    state: &AppState,
    week_start: String,
) -> Result<EventListResponse, InfraError> {
    let events = state.calendar.load_by_week(&week_start).await?;
    Ok(events.into())
}

pub async fn create_event_impl(
    state: &AppState,
    draft: EventDraft,
) -> Result<CalendarEvent, InfraError> {
    state.calendar.add_event(draft).await
}

pub async fn update_event_impl(
    state: &AppState,
    event_id: String,
    update: EventUpdate,
) -> Result<CalendarEvent, InfraError> {
    state.calendar.edit_event(&event_id, update).await
}

pub async fn complete_event_impl(state: &AppState, event_id: String) -> Result<bool, InfraError> {
    state.calendar.complete_event(&event_id).await?;
    Ok(true)
}

pub async fn delete_event_impl(state: &AppState, event_id: String) -> Result<bool, InfraError> {
    state.calendar.remove_event(&event_id).await?;
    Ok(true)
}

pub async fn get_subjects_impl(state: &AppState) -> Result<Vec<String>, InfraError> {
    let user = state.current_user()?;
    state.backend.get_user_subject_ids(&user).await
}

pub async fn save_subjects_impl(
    state: &AppState,
    subject_ids: Vec<String>,
) -> Result<Vec<String>, InfraError> {
    let user = state.current_user()?;
    let saved = state.backend.save_user_subject_ids(&user, &subject_ids).await?;
    state.log_info(
        "save_subjects",
        &format!("saved {} subjects for user {}", saved.len(), user.id),
    );
    Ok(saved)
}

/// Switches `backend.json` to remote mode. Applies from the next `AppState::new`.
pub fn configure_remote_backend_impl(
    state: &AppState,
    base_url: String,
    anon_key: String,
) -> Result<bool, InfraError> {
    ReqwestBackendClient::new(&base_url, anon_key.clone())?;
    save_backend_config(&state.config_dir, &base_url, &anon_key)?;
    state.log_info("configure_remote_backend", "saved remote backend settings");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::EventType;
    use chrono::{Duration, Utc};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "vce-planner-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }

        fn app_state(&self) -> AppState {
            AppState::new(self.path.clone()).expect("initialize app state")
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn draft_in_days(title: &str, days: i64) -> EventDraft {
        let mut draft = EventDraft::new(title, Utc::now() + Duration::days(days));
        draft.event_type = EventType::Sac;
        draft.subject_id = Some("ENG".to_string());
        draft
    }

    #[tokio::test]
    async fn commands_require_a_signed_in_user() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let error = get_upcoming_events_impl(&state, None)
            .await
            .expect_err("no user");
        assert_eq!(error.to_string(), "User not authenticated");
        assert_eq!(
            state.command_error("get_upcoming_events", &error),
            "User not authenticated"
        );
        assert!(matches!(
            save_subjects_impl(&state, vec!["ENG".to_string()]).await,
            Err(InfraError::NotAuthenticated)
        ));
        assert_eq!(resolve_launch_route_impl(&state).await.expect("resolve"), None);
    }

    #[tokio::test]
    async fn new_user_is_routed_to_onboarding_then_manages_events() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        assert_eq!(state.backend_mode(), BackendMode::Local);

        let session = sign_in_impl(&state, "student-1".to_string(), None, None)
            .await
            .expect("sign in");
        assert_eq!(session.route.as_deref(), Some("/onboarding"));
        assert_eq!(take_pending_routes_impl(&state), vec!["/onboarding".to_string()]);

        let saved = save_subjects_impl(&state, vec!["eng".to_string(), "MAT1".to_string()])
            .await
            .expect("save subjects");
        assert_eq!(saved, vec!["ENG".to_string(), "MAT1".to_string()]);
        assert_eq!(get_subjects_impl(&state).await.expect("subjects"), saved);

        let later = create_event_impl(&state, draft_in_days("English SAC", 3))
            .await
            .expect("create later event");
        let sooner = create_event_impl(&state, draft_in_days("Methods exam", 1))
            .await
            .expect("create sooner event");

        let snapshot = upcoming_snapshot_impl(&state).expect("snapshot");
        let ids: Vec<&str> = snapshot.events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids, vec![sooner.id.as_str(), later.id.as_str()]);
        assert!(!snapshot.loading);

        assert!(complete_event_impl(&state, sooner.id.clone()).await.expect("complete"));
        let snapshot = refresh_upcoming_impl(&state).await.expect("refresh");
        assert_eq!(snapshot.events.len(), 1);
        assert_eq!(snapshot.events[0].id, later.id);

        let renamed = update_event_impl(
            &state,
            later.id.clone(),
            EventUpdate {
                title: Some("English SAC 2".to_string()),
                ..EventUpdate::default()
            },
        )
        .await
        .expect("update");
        assert_eq!(renamed.title, "English SAC 2");

        assert!(delete_event_impl(&state, later.id.clone()).await.expect("delete"));
        let snapshot = get_upcoming_events_impl(&state, Some(5)).await.expect("upcoming");
        assert!(snapshot.events.is_empty());
    }

    #[tokio::test]
    async fn range_and_week_reads_return_lists() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        sign_in_impl(&state, "student-1".to_string(), None, None)
            .await
            .expect("sign in");

        let today = Utc::now()
            .with_timezone(&state.app_config().timezone)
            .date_naive();
        let start = today.format("%Y-%m-%d").to_string();
        let end = (today + Duration::days(7)).format("%Y-%m-%d").to_string();
        create_event_impl(&state, draft_in_days("Chemistry prac", 2))
            .await
            .expect("create event");

        let range = get_events_by_date_range_impl(&state, start.clone(), end.clone())
            .await
            .expect("range");
        assert_eq!(range.count, 1);
        assert_eq!(range.events[0].title, "Chemistry prac");

        let week = get_events_by_week_impl(&state, end.clone()).await.expect("week");
        assert_eq!(week.count, 0);

        assert!(matches!(
            get_events_by_date_range_impl(&state, end, start).await,
            Err(InfraError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn returning_user_with_subjects_lands_on_main() {
        let workspace = TempWorkspace::new();
        {
            let state = workspace.app_state();
            sign_in_impl(&state, "student-2".to_string(), None, None)
                .await
                .expect("sign in");
            save_subjects_impl(&state, vec!["LIT".to_string()])
                .await
                .expect("save subjects");
        }

        let state = workspace.app_state();
        let session = sign_in_impl(
            &state,
            "student-2".to_string(),
            Some("student@example.com".to_string()),
            None,
        )
        .await
        .expect("sign in again");
        assert_eq!(session.route.as_deref(), Some("/(tabs)"));

        // The launch decision is not revisited on sign-out.
        let signed_out = sign_out_impl(&state).await.expect("sign out");
        assert_eq!(signed_out.route.as_deref(), Some("/(tabs)"));
        assert_eq!(take_pending_routes_impl(&state), vec!["/(tabs)".to_string()]);
        assert!(upcoming_snapshot_impl(&state).expect("snapshot").events.is_empty());
    }

    #[tokio::test]
    async fn signed_out_launch_goes_to_login() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let session = sign_out_impl(&state).await.expect("sign out");

        assert_eq!(session.route.as_deref(), Some("/(auth)/login"));
    }

    #[test]
    fn configure_remote_backend_switches_mode_on_next_start() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        assert!(matches!(
            configure_remote_backend_impl(&state, "not a url".to_string(), "anon".to_string()),
            Err(InfraError::InvalidInput(_) | InfraError::InvalidConfig(_))
        ));
        configure_remote_backend_impl(
            &state,
            "https://planner.example.com".to_string(),
            "anon-key".to_string(),
        )
        .expect("configure remote");

        let restarted = workspace.app_state();
        assert_eq!(restarted.backend_mode(), BackendMode::Remote);
    }
}
