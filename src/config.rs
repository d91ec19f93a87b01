//! Run settings and workspace layout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::apply::Operation;
use crate::retry::RetryPolicy;

/// Resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding `logs/`, `archives/` and `reports/`.
    pub workdir: PathBuf,
    pub retry: RetryPolicy,
    /// Timeout applied to every single store call.
    pub call_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl Settings {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            ..Self::default()
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.workdir.join("logs")
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.workdir.join("archives")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.workdir.join("reports")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [self.logs_dir(), self.archives_dir(), self.reports_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// `logs/<ts>_<operation>_<root>_<run-id>_audit.csv`
    pub fn audit_log_path(
        &self,
        started_at: DateTime<Utc>,
        operation: Operation,
        root_name: &str,
        run_id: Uuid,
    ) -> PathBuf {
        self.logs_dir().join(format!(
            "{}_{}_{}_{}_audit.csv",
            file_timestamp(started_at),
            operation.as_str(),
            sanitize_filename(root_name),
            run_id
        ))
    }

    /// `archives/<ts>_<operation>_<root>_<stage>.csv`
    pub fn archive_path(
        &self,
        started_at: DateTime<Utc>,
        operation: Operation,
        root_name: &str,
        stage: &str,
    ) -> PathBuf {
        self.archives_dir().join(format!(
            "{}_{}_{}_{}.csv",
            file_timestamp(started_at),
            operation.as_str(),
            sanitize_filename(root_name),
            sanitize_filename(stage)
        ))
    }

    pub fn editor_sheet_path(&self, root_name: &str) -> PathBuf {
        self.reports_dir()
            .join(format!("permissions_editor_{}.csv", sanitize_filename(root_name)))
    }

    /// Whether `path` resolves to somewhere inside the logs directory.
    pub fn is_in_logs_dir(&self, path: &Path) -> bool {
        match (path.canonicalize(), self.logs_dir().canonicalize()) {
            (Ok(path), Ok(logs)) => path.starts_with(logs),
            _ => false,
        }
    }
}

fn file_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// Makes a Drive name safe for a file name.
///
/// Whitespace and path separators become `_`; anything other than ASCII
/// alphanumerics, `_` and `-` is dropped.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .filter_map(|c| match c {
            c if c.is_whitespace() || c == '/' || c == '\\' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => Some(c),
            _ => None,
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
