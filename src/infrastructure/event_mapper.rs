use crate::domain::models::{CalendarEvent, EventDraft, EventType, EventUpdate};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Row shape shared by the hosted backend (`calendar_events` table) and the local SQLite store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendEventRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    pub start_at: String,
    #[serde(default)]
    pub end_at: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewEventPayload {
    pub user_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub event_type: String,
    pub start_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_at: Option<String>,
    pub is_completed: bool,
}

pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| InfraError::Remote(format!("invalid {field} '{value}': {error}")))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

pub fn encode_draft(user_id: &str, draft: &EventDraft) -> NewEventPayload {
    NewEventPayload {
        user_id: user_id.to_string(),
        title: draft.title.trim().to_string(),
        description: non_empty(draft.description.as_deref()),
        subject_id: non_empty(draft.subject_id.as_deref()),
        event_type: draft.event_type.as_str().to_string(),
        start_at: format_timestamp(draft.start_at),
        end_at: draft.end_at.map(format_timestamp),
        is_completed: false,
    }
}

/// Only fields present in `update` are emitted, so the backend leaves the rest untouched.
pub fn encode_update(update: &EventUpdate) -> serde_json::Map<String, serde_json::Value> {
    let mut patch = serde_json::Map::new();
    if let Some(title) = update.title.as_deref() {
        patch.insert("title".to_string(), title.trim().into());
    }
    if let Some(description) = update.description.as_deref() {
        patch.insert("description".to_string(), description.into());
    }
    if let Some(subject_id) = update.subject_id.as_deref() {
        patch.insert("subject_id".to_string(), subject_id.into());
    }
    if let Some(event_type) = update.event_type {
        patch.insert("event_type".to_string(), event_type.as_str().into());
    }
    if let Some(start_at) = update.start_at {
        patch.insert("start_at".to_string(), format_timestamp(start_at).into());
    }
    if let Some(end_at) = update.end_at {
        patch.insert("end_at".to_string(), format_timestamp(end_at).into());
    }
    if let Some(is_completed) = update.is_completed {
        patch.insert("is_completed".to_string(), is_completed.into());
    }
    patch
}

pub fn encode_event_row(event: &CalendarEvent) -> BackendEventRow {
    BackendEventRow {
        id: event.id.clone(),
        user_id: event.user_id.clone(),
        title: event.title.clone(),
        description: event.description.clone(),
        subject_id: event.subject_id.clone(),
        event_type: Some(event.event_type.as_str().to_string()),
        start_at: format_timestamp(event.start_at),
        end_at: event.end_at.map(format_timestamp),
        is_completed: event.is_completed,
        created_at: Some(format_timestamp(event.created_at)),
    }
}

pub fn decode_event_row(row: BackendEventRow) -> Result<CalendarEvent, InfraError> {
    let id = non_empty(Some(row.id.as_str()))
        .ok_or_else(|| InfraError::Remote("event row is missing id".to_string()))?;
    let start_at = parse_timestamp(&row.start_at, "start_at")?;
    let end_at = row
        .end_at
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(|value| parse_timestamp(value, "end_at"))
        .transpose()?;
    let created_at = row
        .created_at
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(|value| parse_timestamp(value, "created_at"))
        .transpose()?
        .unwrap_or(start_at);
    let event_type = row
        .event_type
        .as_deref()
        .and_then(EventType::parse)
        .unwrap_or_default();

    Ok(CalendarEvent {
        id,
        user_id: row.user_id,
        title: row.title,
        description: row.description,
        subject_id: row.subject_id,
        event_type,
        start_at,
        end_at,
        is_completed: row.is_completed,
        created_at,
    })
}

pub fn decode_event_rows(rows: Vec<BackendEventRow>) -> Result<Vec<CalendarEvent>, InfraError> {
    rows.into_iter().map(decode_event_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn decode_accepts_postgres_offsets_and_unknown_types() {
        let row: BackendEventRow = serde_json::from_value(serde_json::json!({
            "id": "42",
            "user_id": "u1",
            "title": "Chemistry practice exam",
            "event_type": "mock",
            "start_at": "2026-03-02T09:00:00+00:00",
            "end_at": null,
            "is_completed": false
        }))
        .expect("row payload");

        let event = decode_event_row(row).expect("decode row");
        assert_eq!(event.id, "42");
        assert_eq!(event.event_type, EventType::Other);
        assert_eq!(event.start_at, fixed_time("2026-03-02T09:00:00Z"));
        assert_eq!(event.created_at, event.start_at);
        assert!(event.end_at.is_none());
    }

    #[test]
    fn decode_rejects_invalid_timestamp() {
        let row = BackendEventRow {
            id: "1".to_string(),
            user_id: "u1".to_string(),
            title: "Broken".to_string(),
            description: None,
            subject_id: None,
            event_type: None,
            start_at: "next tuesday".to_string(),
            end_at: None,
            is_completed: false,
            created_at: None,
        };
        assert!(matches!(decode_event_row(row), Err(InfraError::Remote(_))));
    }

    #[test]
    fn encode_draft_trims_and_drops_blank_fields() {
        let mut draft = EventDraft::new(" Biology SAC ", fixed_time("2026-03-02T09:00:00Z"));
        draft.subject_id = Some("  ".to_string());
        draft.event_type = EventType::Sac;

        let payload = encode_draft("u1", &draft);
        assert_eq!(payload.title, "Biology SAC");
        assert_eq!(payload.subject_id, None);
        assert_eq!(payload.event_type, "sac");
        assert_eq!(payload.start_at, "2026-03-02T09:00:00.000Z");

        let json = serde_json::to_value(&payload).expect("serialize payload");
        assert!(json.get("subject_id").is_none());
        assert_eq!(json["is_completed"], false);
    }

    #[test]
    fn encode_update_emits_only_present_fields() {
        let patch = encode_update(&EventUpdate::completed());
        assert_eq!(patch.len(), 1);
        assert_eq!(patch["is_completed"], true);
    }
}
