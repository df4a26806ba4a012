use crate::infrastructure::error::InfraError;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE: &str = "app.log";
const DEFAULT_FILTER: &str = "vce_planner=info";

/// Installs the global JSON-lines subscriber writing to `<logs_dir>/app.log`.
///
/// `RUST_LOG` overrides the default filter. Returns `false` when a global
/// subscriber was already installed, in which case nothing changes.
pub fn init_logging(logs_dir: &Path) -> Result<bool, InfraError> {
    fs::create_dir_all(logs_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path(logs_dir))?;

    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .is_ok();
    Ok(installed)
}

pub fn log_path(logs_dir: &Path) -> PathBuf {
    logs_dir.join(LOG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_creates_log_file_and_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("vce-planner-logging-{}", std::process::id()));

        init_logging(&dir).expect("first init");
        let second = init_logging(&dir).expect("second init");

        assert!(!second);
        assert!(log_path(&dir).exists());
        let _ = fs::remove_dir_all(dir);
    }
}
