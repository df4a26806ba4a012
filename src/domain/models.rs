use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl AuthUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "user.id")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Sac,
    Exam,
    Assignment,
    Study,
    Reminder,
    #[default]
    Other,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sac => "sac",
            Self::Exam => "exam",
            Self::Assignment => "assignment",
            Self::Study => "study",
            Self::Reminder => "reminder",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sac" => Some(Self::Sac),
            "exam" => Some(Self::Exam),
            "assignment" => Some(Self::Assignment),
            "study" | "study_session" => Some(Self::Study),
            "reminder" => Some(Self::Reminder),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub subject_id: Option<String>,
    pub event_type: EventType,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
}

impl CalendarEvent {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "event.id")?;
        validate_non_empty(&self.user_id, "event.user_id")?;
        validate_non_empty(&self.title, "event.title")?;
        validate_range(self.start_at, self.end_at)
    }

    pub fn effective_end(&self) -> DateTime<Utc> {
        self.end_at.unwrap_or(self.start_at)
    }

    /// Not completed, and still running or yet to start at `now`.
    pub fn is_upcoming_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_completed && self.effective_end() >= now
    }

    pub fn overlaps(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> bool {
        self.start_at < window_end && self.effective_end() >= window_start
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub event_type: EventType,
    pub start_at: DateTime<Utc>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
}

impl EventDraft {
    pub fn new(title: impl Into<String>, start_at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: None,
            subject_id: None,
            event_type: EventType::Other,
            start_at,
            end_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "draft.title")?;
        validate_range(self.start_at, self.end_at)
    }

    pub fn into_event(
        self,
        id: impl Into<String>,
        user_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> CalendarEvent {
        CalendarEvent {
            id: id.into(),
            user_id: user_id.into(),
            title: self.title.trim().to_string(),
            description: self.description,
            subject_id: self.subject_id,
            event_type: self.event_type,
            start_at: self.start_at,
            end_at: self.end_at,
            is_completed: false,
            created_at,
        }
    }
}

/// Partial update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EventUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
}

impl EventUpdate {
    pub fn completed() -> Self {
        Self {
            is_completed: Some(true),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("update must change at least one field".to_string());
        }
        if let Some(title) = self.title.as_deref() {
            validate_non_empty(title, "update.title")?;
        }
        if let Some(start_at) = self.start_at {
            validate_range(start_at, self.end_at)?;
        }
        Ok(())
    }

    pub fn apply_to(&self, event: &mut CalendarEvent) {
        if let Some(title) = self.title.as_deref() {
            event.title = title.trim().to_string();
        }
        if let Some(description) = self.description.clone() {
            event.description = Some(description);
        }
        if let Some(subject_id) = self.subject_id.clone() {
            event.subject_id = Some(subject_id);
        }
        if let Some(event_type) = self.event_type {
            event.event_type = event_type;
        }
        if let Some(start_at) = self.start_at {
            event.start_at = start_at;
        }
        if let Some(end_at) = self.end_at {
            event.end_at = Some(end_at);
        }
        if let Some(is_completed) = self.is_completed {
            event.is_completed = is_completed;
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Login,
    Onboarding,
    Main,
}

impl Route {
    pub fn as_path(self) -> &'static str {
        match self {
            Self::Login => "/(auth)/login",
            Self::Onboarding => "/onboarding",
            Self::Main => "/(tabs)",
        }
    }
}

/// Trims, upper-cases and de-duplicates VCE study codes, keeping first-seen order.
pub fn normalize_subject_ids(subject_ids: &[String]) -> Result<Vec<String>, String> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(subject_ids.len());
    for raw in subject_ids {
        let code = raw.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err("subject id must not be empty".to_string());
        }
        if seen.insert(code.clone()) {
            normalized.push(code);
        }
    }
    Ok(normalized)
}

pub fn parse_date(value: &str, field_name: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_range(start_at: DateTime<Utc>, end_at: Option<DateTime<Utc>>) -> Result<(), String> {
    match end_at {
        Some(end_at) if end_at <= start_at => {
            Err("event.end_at must be after event.start_at".to_string())
        }
        _ => Ok(()),
    }
}
