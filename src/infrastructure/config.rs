use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const BACKEND_JSON: &str = "backend.json";
const DEFAULT_APP_NAME: &str = "VCE Planner";
const DEFAULT_TIMEZONE: &str = "Australia/Melbourne";
pub const DEFAULT_UPCOMING_LIMIT: usize = 10;
const DEFAULT_SUBJECT_FETCH_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub backend: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub app_name: String,
    pub timezone: Tz,
    pub upcoming_limit: usize,
    pub subject_fetch_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            timezone: chrono_tz::Australia::Melbourne,
            upcoming_limit: DEFAULT_UPCOMING_LIMIT,
            subject_fetch_timeout: Duration::from_millis(DEFAULT_SUBJECT_FETCH_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub mode: BackendMode,
    pub base_url: Option<String>,
    pub anon_key: Option<String>,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": DEFAULT_APP_NAME,
                "timezone": DEFAULT_TIMEZONE,
                "upcomingLimit": DEFAULT_UPCOMING_LIMIT,
                "subjectFetchTimeoutMs": DEFAULT_SUBJECT_FETCH_TIMEOUT_MS
            }),
        ),
        (
            BACKEND_JSON,
            serde_json::json!({
                "schema": 1,
                "mode": "local",
                "baseUrl": null,
                "anonKey": null
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        backend: read_config(&config_dir.join(BACKEND_JSON))?,
    })
}

fn optional_str<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn read_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let app = read_config(&path)?;
    let defaults = AppConfig::default();

    let timezone = match optional_str(&app, "timezone") {
        Some(name) => name.parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid timezone '{name}' in {}: {error}", path.display()))
        })?,
        None => defaults.timezone,
    };

    let upcoming_limit = match app.get("upcomingLimit").and_then(serde_json::Value::as_u64) {
        Some(0) => {
            return Err(InfraError::InvalidConfig(format!(
                "upcomingLimit must be > 0 in {}",
                path.display()
            )));
        }
        Some(limit) => limit as usize,
        None => defaults.upcoming_limit,
    };

    let subject_fetch_timeout = app
        .get("subjectFetchTimeoutMs")
        .and_then(serde_json::Value::as_u64)
        .map(Duration::from_millis)
        .unwrap_or(defaults.subject_fetch_timeout);

    Ok(AppConfig {
        app_name: optional_str(&app, "appName")
            .map(ToOwned::to_owned)
            .unwrap_or(defaults.app_name),
        timezone,
        upcoming_limit,
        subject_fetch_timeout,
    })
}

pub fn read_backend_config(config_dir: &Path) -> Result<BackendConfig, InfraError> {
    let path = config_dir.join(BACKEND_JSON);
    let backend = read_config(&path)?;
    let mode = match optional_str(&backend, "mode") {
        None | Some("local") => BackendMode::Local,
        Some("remote") => BackendMode::Remote,
        Some(other) => {
            return Err(InfraError::InvalidConfig(format!(
                "unsupported backend mode '{other}' in {}",
                path.display()
            )));
        }
    };
    let base_url = optional_str(&backend, "baseUrl").map(ToOwned::to_owned);
    let anon_key = optional_str(&backend, "anonKey").map(ToOwned::to_owned);

    if mode == BackendMode::Remote && (base_url.is_none() || anon_key.is_none()) {
        return Err(InfraError::InvalidConfig(format!(
            "remote backend requires baseUrl and anonKey in {}",
            path.display()
        )));
    }

    Ok(BackendConfig {
        mode,
        base_url,
        anon_key,
    })
}

pub fn save_backend_config(config_dir: &Path, base_url: &str, anon_key: &str) -> Result<(), InfraError> {
    let base_url = base_url.trim();
    let anon_key = anon_key.trim();
    if base_url.is_empty() || anon_key.is_empty() {
        return Err(InfraError::InvalidConfig(
            "baseUrl and anonKey must not be empty".to_string(),
        ));
    }

    let path = config_dir.join(BACKEND_JSON);
    let mut backend = read_config(&path)?;
    let object = backend.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert("mode".to_string(), serde_json::Value::String("remote".to_string()));
    object.insert("baseUrl".to_string(), serde_json::Value::String(base_url.to_string()));
    object.insert("anonKey".to_string(), serde_json::Value::String(anon_key.to_string()));

    let formatted = serde_json::to_string_pretty(&backend)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}
