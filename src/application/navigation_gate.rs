use crate::domain::models::{AuthUser, Route};
use crate::infrastructure::auth::AuthProvider;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::subject_repository::SubjectSelectionRepository;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_SUBJECT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fire-and-forget navigation.
pub trait Router: Send + Sync {
    fn replace(&self, route: Route);
}

/// Router that queues redirects for the host shell to drain.
#[derive(Debug, Default)]
pub struct RouteOutbox {
    routes: Mutex<Vec<Route>>,
}

impl RouteOutbox {
    fn lock_routes(&self) -> MutexGuard<'_, Vec<Route>> {
        self.routes.lock().unwrap_or_else(|error| {
            warn!("route outbox lock poisoned; recovering queued routes");
            error.into_inner()
        })
    }

    pub fn take(&self) -> Vec<Route> {
        std::mem::take(&mut *self.lock_routes())
    }
}

impl Router for RouteOutbox {
    fn replace(&self, route: Route) {
        self.lock_routes().push(route);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Pending,
    Resolving,
    Decided(Route),
}

/// `subject_ids` is `None` when the selection could not be fetched.
pub fn decide_route(user: Option<&AuthUser>, subject_ids: Option<&[String]>) -> Route {
    match (user, subject_ids) {
        (None, _) => Route::Login,
        (Some(_), Some(ids)) if !ids.is_empty() => Route::Main,
        (Some(_), _) => Route::Onboarding,
    }
}

/// Picks the launch route once the session settles, then stays decided.
pub struct NavigationGate<S, R>
where
    S: SubjectSelectionRepository,
    R: Router,
{
    subjects: Arc<S>,
    router: Arc<R>,
    subject_fetch_timeout: Duration,
    state: Mutex<GateState>,
}

impl<S, R> NavigationGate<S, R>
where
    S: SubjectSelectionRepository,
    R: Router,
{
    pub fn new(subjects: Arc<S>, router: Arc<R>) -> Self {
        Self {
            subjects,
            router,
            subject_fetch_timeout: DEFAULT_SUBJECT_FETCH_TIMEOUT,
            state: Mutex::new(GateState::Pending),
        }
    }

    pub fn with_subject_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.subject_fetch_timeout = timeout;
        self
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, GateState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::lock_poisoned("navigation gate", error))
    }

    pub fn state(&self) -> Result<GateState, InfraError> {
        Ok(*self.lock_state()?)
    }

    pub async fn evaluate<A: AuthProvider>(&self, auth: &A) -> Result<Option<Route>, InfraError> {
        let user = auth.current_user();
        self.on_auth_state(user.as_ref(), auth.is_resolving()).await
    }

    /// Returns the decided route, or `None` while the session or the subject fetch is unresolved.
    /// Only the call that moves the gate out of `Pending` issues a redirect. If that call is
    /// dropped before deciding, the gate falls back to `Pending` so a later render can decide.
    pub async fn on_auth_state(
        &self,
        user: Option<&AuthUser>,
        is_loading: bool,
    ) -> Result<Option<Route>, InfraError> {
        let resolving = {
            let mut state = self.lock_state()?;
            match *state {
                GateState::Decided(route) => return Ok(Some(route)),
                GateState::Resolving => return Ok(None),
                GateState::Pending if is_loading => return Ok(None),
                GateState::Pending => *state = GateState::Resolving,
            }
            ResolvingGuard { state: &self.state }
        };

        let route = match user {
            None => decide_route(None, None),
            Some(user) => match self.fetch_subject_ids(user).await {
                Ok(subject_ids) => decide_route(Some(user), Some(&subject_ids)),
                Err(error) => {
                    warn!(user_id = %user.id, %error, "subject fetch failed; routing to onboarding");
                    decide_route(Some(user), None)
                }
            },
        };

        resolving.decide(route)?;
        info!(route = route.as_path(), "launch route decided");
        self.router.replace(route);
        Ok(Some(route))
    }

    async fn fetch_subject_ids(&self, user: &AuthUser) -> Result<Vec<String>, InfraError> {
        tokio::time::timeout(
            self.subject_fetch_timeout,
            self.subjects.get_user_subject_ids(user),
        )
        .await
        .map_err(|_| {
            InfraError::Timeout(format!(
                "subject fetch exceeded {} ms",
                self.subject_fetch_timeout.as_millis()
            ))
        })?
    }
}

/// Holds the gate in `Resolving`; resets it to `Pending` on drop unless a route was decided.
struct ResolvingGuard<'a> {
    state: &'a Mutex<GateState>,
}

impl ResolvingGuard<'_> {
    fn decide(self, route: Route) -> Result<(), InfraError> {
        let mut state = self
            .state
            .lock()
            .map_err(|error| InfraError::lock_poisoned("navigation gate", error))?;
        *state = GateState::Decided(route);
        Ok(())
    }
}

impl Drop for ResolvingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == GateState::Resolving {
            *state = GateState::Pending;
        }
    }
}
