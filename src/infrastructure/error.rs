use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("User not authenticated")]
    NotAuthenticated,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Remote store error: {0}")]
    Remote(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl InfraError {
    pub fn lock_poisoned(resource: &str, error: impl std::fmt::Display) -> Self {
        Self::LockPoisoned(format!("{resource}: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_authenticated_message_is_stable() {
        assert_eq!(InfraError::NotAuthenticated.to_string(), "User not authenticated");
    }

    #[test]
    fn lock_poisoning_has_its_own_variant() {
        let error = InfraError::lock_poisoned("event store", "worker panicked");
        assert!(matches!(error, InfraError::LockPoisoned(_)));
        assert_eq!(error.to_string(), "Lock poisoned: event store: worker panicked");
    }
}
