use crate::domain::models::AuthUser;
use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

/// Read-only view of the session owned by the auth provider.
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;
    fn is_resolving(&self) -> bool;
}

#[derive(Debug)]
struct SessionState {
    user: Option<AuthUser>,
    resolving: bool,
}

/// Session holder fed by the host shell once the hosted auth service settles.
#[derive(Debug)]
pub struct InMemoryAuthProvider {
    state: Mutex<SessionState>,
}

impl Default for InMemoryAuthProvider {
    fn default() -> Self {
        Self {
            state: Mutex::new(SessionState {
                user: None,
                resolving: true,
            }),
        }
    }
}

impl InMemoryAuthProvider {
    pub fn signed_in(user: AuthUser) -> Self {
        Self {
            state: Mutex::new(SessionState {
                user: Some(user),
                resolving: false,
            }),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            state: Mutex::new(SessionState {
                user: None,
                resolving: false,
            }),
        }
    }

    pub fn set_session(&self, user: Option<AuthUser>) -> Result<(), InfraError> {
        if let Some(user) = user.as_ref() {
            user.validate().map_err(InfraError::InvalidInput)?;
        }
        let mut state = self
            .state
            .lock()
            .map_err(|error| InfraError::lock_poisoned("auth session", error))?;
        state.user = user;
        state.resolving = false;
        Ok(())
    }

    pub fn begin_resolving(&self) -> Result<(), InfraError> {
        let mut state = self
            .state
            .lock()
            .map_err(|error| InfraError::lock_poisoned("auth session", error))?;
        state.resolving = true;
        Ok(())
    }
}

impl AuthProvider for InMemoryAuthProvider {
    fn current_user(&self) -> Option<AuthUser> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.user.clone())
    }

    fn is_resolving(&self) -> bool {
        self.state.lock().map(|state| state.resolving).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_session_is_resolving_without_user() {
        let auth = InMemoryAuthProvider::default();
        assert!(auth.is_resolving());
        assert!(auth.current_user().is_none());
    }

    #[test]
    fn set_session_settles_resolution() {
        let auth = InMemoryAuthProvider::default();
        auth.set_session(Some(AuthUser::new("u1"))).expect("set session");
        assert!(!auth.is_resolving());
        assert_eq!(auth.current_user().map(|user| user.id), Some("u1".to_string()));

        auth.set_session(None).expect("sign out");
        assert!(auth.current_user().is_none());
    }

    #[test]
    fn set_session_rejects_blank_user_id() {
        let auth = InMemoryAuthProvider::signed_out();
        assert!(matches!(
            auth.set_session(Some(AuthUser::new(" "))),
            Err(InfraError::InvalidInput(_))
        ));
    }
}
