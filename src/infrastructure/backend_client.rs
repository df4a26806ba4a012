use crate::domain::date_window::DateWindow;
use crate::domain::models::{normalize_subject_ids, AuthUser, CalendarEvent, EventDraft, EventUpdate};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{
    decode_event_row, decode_event_rows, encode_draft, encode_update, format_timestamp,
    BackendEventRow,
};
use crate::infrastructure::event_store::{EventStore, NowProvider};
use crate::infrastructure::subject_repository::SubjectSelectionRepository;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use std::sync::Arc;
use url::Url;

const REST_PREFIX: &str = "rest/v1";
const EVENTS_TABLE: &str = "calendar_events";
const SUBJECTS_TABLE: &str = "user_subjects";
const RETURN_REPRESENTATION: &str = "return=representation";
const MERGE_DUPLICATES: &str = "resolution=merge-duplicates";

#[derive(Debug, serde::Deserialize)]
struct SubjectRow {
    subject_id: String,
}

#[derive(Debug, serde::Serialize)]
struct NewSubjectRow<'a> {
    user_id: &'a str,
    subject_id: &'a str,
}

/// PostgREST client for the hosted backend tables.
#[derive(Clone)]
pub struct ReqwestBackendClient {
    client: Client,
    base_url: Url,
    anon_key: String,
    now_provider: NowProvider,
}

impl ReqwestBackendClient {
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self, InfraError> {
        let mut base_url = Url::parse(base_url.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid backend url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "backend url cannot be a base".to_string(),
            ));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let anon_key = anon_key.into();
        if anon_key.trim().is_empty() {
            return Err(InfraError::InvalidConfig("anon key must not be empty".to_string()));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            anon_key,
            now_provider: Arc::new(Utc::now),
        })
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn table_endpoint(&self, table: &str) -> Result<Url, InfraError> {
        self.base_url
            .join(&format!("{REST_PREFIX}/{table}"))
            .map_err(|error| InfraError::InvalidConfig(format!("invalid table url: {error}")))
    }

    fn upcoming_url(&self, user_id: &str, limit: usize) -> Result<Url, InfraError> {
        let now = format_timestamp((self.now_provider)());
        let mut url = self.table_endpoint(EVENTS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("user_id", &format!("eq.{user_id}"))
            .append_pair("is_completed", "eq.false")
            .append_pair(
                "or",
                &format!("(end_at.gte.{now},and(end_at.is.null,start_at.gte.{now}))"),
            )
            .append_pair("order", "start_at.asc")
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }

    fn window_url(&self, user_id: &str, window: DateWindow) -> Result<Url, InfraError> {
        let start = format_timestamp(window.start);
        let end = format_timestamp(window.end);
        let mut url = self.table_endpoint(EVENTS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("user_id", &format!("eq.{user_id}"))
            .append_pair("start_at", &format!("lt.{end}"))
            .append_pair(
                "or",
                &format!("(end_at.gte.{start},and(end_at.is.null,start_at.gte.{start}))"),
            )
            .append_pair("order", "start_at.asc");
        Ok(url)
    }

    fn owned_event_url(&self, user_id: &str, event_id: &str) -> Result<Url, InfraError> {
        let mut url = self.table_endpoint(EVENTS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{event_id}"))
            .append_pair("user_id", &format!("eq.{user_id}"));
        Ok(url)
    }

    fn subjects_url(&self, user_id: &str) -> Result<Url, InfraError> {
        let mut url = self.table_endpoint(SUBJECTS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("user_id", &format!("eq.{user_id}"));
        Ok(url)
    }

    fn subjects_upsert_url(&self) -> Result<Url, InfraError> {
        let mut url = self.table_endpoint(SUBJECTS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("on_conflict", "user_id,subject_id");
        Ok(url)
    }

    /// Rows of `user_id` outside `keep`; every row when `keep` is empty.
    fn stale_subjects_url(&self, user_id: &str, keep: &[String]) -> Result<Url, InfraError> {
        let mut url = self.subjects_url(user_id)?;
        if !keep.is_empty() {
            let quoted: Vec<String> = keep.iter().map(|id| format!("\"{id}\"")).collect();
            url.query_pairs_mut()
                .append_pair("subject_id", &format!("not.in.({})", quoted.join(",")));
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder, user: &AuthUser) -> RequestBuilder {
        let bearer = user
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .unwrap_or(self.anon_key.as_str());
        request.header("apikey", &self.anon_key).bearer_auth(bearer)
    }

    fn remote_http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("backend error: http {}", status.as_u16())
        } else {
            format!("backend error: http {}; body={body}", status.as_u16())
        };
        InfraError::Remote(message)
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<String, InfraError> {
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Remote(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Remote(format!("failed reading response while {action}: {error}")))?;

        if !status.is_success() {
            return Err(Self::remote_http_error(status, &body));
        }
        Ok(body)
    }

    async fn fetch_rows(
        &self,
        user: &AuthUser,
        url: Url,
        action: &str,
    ) -> Result<Vec<BackendEventRow>, InfraError> {
        let body = self
            .send(self.authorized(self.client.get(url), user), action)
            .await?;
        parse_rows(&body, action)
    }

    async fn fetch_owned_event(
        &self,
        user: &AuthUser,
        event_id: &str,
    ) -> Result<CalendarEvent, InfraError> {
        let mut url = self.owned_event_url(&user.id, event_id)?;
        url.query_pairs_mut().append_pair("select", "*");
        let rows = self.fetch_rows(user, url, "reading event").await?;
        decode_event_row(Self::single_row(rows, event_id, &user.id)?)
    }

    fn single_row(rows: Vec<BackendEventRow>, event_id: &str, user_id: &str) -> Result<BackendEventRow, InfraError> {
        rows.into_iter()
            .next()
            .ok_or_else(|| InfraError::NotFound(format!("event {event_id} for user {user_id}")))
    }
}

/// Validates the merged range and sends both bounds, so a partial range edit cannot
/// leave the stored row ending before it starts.
fn range_checked_patch(
    update: &EventUpdate,
    mut current: CalendarEvent,
) -> Result<serde_json::Map<String, serde_json::Value>, InfraError> {
    update.apply_to(&mut current);
    current.validate().map_err(InfraError::InvalidInput)?;
    let mut patch = encode_update(update);
    patch.insert("start_at".to_string(), format_timestamp(current.start_at).into());
    patch.insert(
        "end_at".to_string(),
        current
            .end_at
            .map(format_timestamp)
            .map_or(serde_json::Value::Null, serde_json::Value::String),
    );
    Ok(patch)
}

fn parse_rows<T: serde::de::DeserializeOwned>(body: &str, action: &str) -> Result<Vec<T>, InfraError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(body).map_err(|error| {
        InfraError::Remote(format!("invalid payload while {action}: {error}; body={body}"))
    })
}

#[async_trait]
impl EventStore for ReqwestBackendClient {
    async fn get_upcoming_events(
        &self,
        user: &AuthUser,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        let url = self.upcoming_url(&user.id, limit)?;
        let rows = self.fetch_rows(user, url, "listing upcoming events").await?;
        decode_event_rows(rows)
    }

    async fn get_events_by_date_range(
        &self,
        user: &AuthUser,
        window: DateWindow,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        let url = self.window_url(&user.id, window)?;
        let rows = self.fetch_rows(user, url, "listing events by date range").await?;
        decode_event_rows(rows)
    }

    async fn create_event(
        &self,
        user: &AuthUser,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, InfraError> {
        let endpoint = self.table_endpoint(EVENTS_TABLE)?;
        let payload = encode_draft(&user.id, draft);
        let request = self
            .authorized(self.client.post(endpoint), user)
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&payload);
        let body = self.send(request, "creating event").await?;
        let row = parse_rows::<BackendEventRow>(&body, "creating event")?
            .into_iter()
            .next()
            .ok_or_else(|| InfraError::Remote("event create response did not include a row".to_string()))?;
        decode_event_row(row)
    }

    async fn update_event(
        &self,
        user: &AuthUser,
        event_id: &str,
        update: &EventUpdate,
    ) -> Result<CalendarEvent, InfraError> {
        let patch = if update.start_at.is_some() || update.end_at.is_some() {
            let current = self.fetch_owned_event(user, event_id).await?;
            range_checked_patch(update, current)?
        } else {
            encode_update(update)
        };
        let url = self.owned_event_url(&user.id, event_id)?;
        let request = self
            .authorized(self.client.patch(url), user)
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&patch);
        let body = self.send(request, "updating event").await?;
        let rows = parse_rows(&body, "updating event")?;
        decode_event_row(Self::single_row(rows, event_id, &user.id)?)
    }

    async fn mark_event_complete(&self, user: &AuthUser, event_id: &str) -> Result<(), InfraError> {
        self.update_event(user, event_id, &EventUpdate::completed())
            .await
            .map(|_| ())
    }

    async fn delete_event(&self, user: &AuthUser, event_id: &str) -> Result<(), InfraError> {
        let url = self.owned_event_url(&user.id, event_id)?;
        let request = self
            .authorized(self.client.delete(url), user)
            .header("Prefer", RETURN_REPRESENTATION);
        let body = self.send(request, "deleting event").await?;
        Self::single_row(parse_rows(&body, "deleting event")?, event_id, &user.id).map(|_| ())
    }
}

#[async_trait]
impl SubjectSelectionRepository for ReqwestBackendClient {
    async fn get_user_subject_ids(&self, user: &AuthUser) -> Result<Vec<String>, InfraError> {
        let mut url = self.subjects_url(&user.id)?;
        url.query_pairs_mut()
            .append_pair("select", "subject_id")
            .append_pair("order", "selected_at.asc");
        let body = self
            .send(self.authorized(self.client.get(url), user), "listing subjects")
            .await?;
        Ok(parse_rows::<SubjectRow>(&body, "listing subjects")?
            .into_iter()
            .map(|row| row.subject_id)
            .collect())
    }

    async fn save_user_subject_ids(
        &self,
        user: &AuthUser,
        subject_ids: &[String],
    ) -> Result<Vec<String>, InfraError> {
        let normalized = normalize_subject_ids(subject_ids).map_err(InfraError::InvalidInput)?;

        // Upsert before pruning: a failed write never leaves the selection empty.
        if !normalized.is_empty() {
            let rows: Vec<NewSubjectRow<'_>> = normalized
                .iter()
                .map(|subject_id| NewSubjectRow {
                    user_id: &user.id,
                    subject_id,
                })
                .collect();
            let request = self
                .authorized(self.client.post(self.subjects_upsert_url()?), user)
                .header("Prefer", MERGE_DUPLICATES)
                .json(&rows);
            self.send(request, "saving subjects").await?;
        }

        let stale = self.stale_subjects_url(&user.id, &normalized)?;
        self.send(
            self.authorized(self.client.delete(stale), user),
            "pruning subjects",
        )
        .await?;
        Ok(normalized)
    }
}
