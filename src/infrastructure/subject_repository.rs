use crate::domain::models::{normalize_subject_ids, AuthUser};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::format_timestamp;
use crate::infrastructure::storage::open_connection;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[async_trait]
pub trait SubjectSelectionRepository: Send + Sync {
    async fn get_user_subject_ids(&self, user: &AuthUser) -> Result<Vec<String>, InfraError>;

    /// Replaces the user's whole selection.
    async fn save_user_subject_ids(
        &self,
        user: &AuthUser,
        subject_ids: &[String],
    ) -> Result<Vec<String>, InfraError>;
}

#[derive(Debug, Default)]
pub struct InMemorySubjectRepository {
    selections: Mutex<HashMap<String, Vec<String>>>,
}

#[async_trait]
impl SubjectSelectionRepository for InMemorySubjectRepository {
    async fn get_user_subject_ids(&self, user: &AuthUser) -> Result<Vec<String>, InfraError> {
        let selections = self
            .selections
            .lock()
            .map_err(|error| InfraError::lock_poisoned("subject selection", error))?;
        Ok(selections.get(&user.id).cloned().unwrap_or_default())
    }

    async fn save_user_subject_ids(
        &self,
        user: &AuthUser,
        subject_ids: &[String],
    ) -> Result<Vec<String>, InfraError> {
        let normalized = normalize_subject_ids(subject_ids).map_err(InfraError::InvalidInput)?;
        let mut selections = self
            .selections
            .lock()
            .map_err(|error| InfraError::lock_poisoned("subject selection", error))?;
        selections.insert(user.id.clone(), normalized.clone());
        Ok(normalized)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteSubjectRepository {
    db_path: PathBuf,
}

impl SqliteSubjectRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl SubjectSelectionRepository for SqliteSubjectRepository {
    async fn get_user_subject_ids(&self, user: &AuthUser) -> Result<Vec<String>, InfraError> {
        let db_path = self.db_path.clone();
        let user_id = user.id.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>, InfraError> {
            let connection = open_connection(&db_path)?;
            let mut statement = connection.prepare(
                "SELECT subject_id FROM user_subjects WHERE user_id = ?1 ORDER BY selected_at, subject_id",
            )?;
            let ids = statement
                .query_map(params![user_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
        .await
        .map_err(|error| InfraError::Remote(format!("sqlite worker failed: {error}")))?
    }

    async fn save_user_subject_ids(
        &self,
        user: &AuthUser,
        subject_ids: &[String],
    ) -> Result<Vec<String>, InfraError> {
        let normalized = normalize_subject_ids(subject_ids).map_err(InfraError::InvalidInput)?;
        let db_path = self.db_path.clone();
        let user_id = user.id.clone();
        let rows = normalized.clone();
        tokio::task::spawn_blocking(move || -> Result<(), InfraError> {
            let mut connection = open_connection(&db_path)?;
            let transaction = connection.transaction()?;
            transaction.execute("DELETE FROM user_subjects WHERE user_id = ?1", params![user_id])?;
            let selected_at = format_timestamp(Utc::now());
            for subject_id in &rows {
                transaction.execute(
                    "INSERT INTO user_subjects (user_id, subject_id, selected_at) VALUES (?1, ?2, ?3)",
                    params![user_id, subject_id, selected_at],
                )?;
            }
            transaction.commit()?;
            Ok(())
        })
        .await
        .map_err(|error| InfraError::Remote(format!("sqlite worker failed: {error}")))??;
        Ok(normalized)
    }
}
