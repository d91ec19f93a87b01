//! Append-only CSV audit log.
//!
//! One row per attempted action. The log is the only input to rollback, so a
//! row carries every value needed to rebuild the action it describes.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::apply::Mode;
use crate::model::{Principal, PrincipalType, Role};
use crate::plan::{ActionKind, Change, PlannedAction};
use crate::sheet::line_of;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to write audit log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to read audit log {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("malformed audit log {path}, line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Applied,
    SkippedDryRun,
    Failed,
}

/// One attempted action and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub root_folder_id: String,
    pub mode: Mode,
    /// 1-based position in the plan.
    pub sequence: usize,
    pub action: PlannedAction,
    pub outcome: Outcome,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Destination for audit records. Records are appended in the order produced.
pub trait AuditSink {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError>;
}

impl AuditSink for Vec<AuditRecord> {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        self.push(record.clone());
        Ok(())
    }
}

/// CSV audit log, created on the first appended record and flushed per row.
pub struct CsvAuditLog {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    written: usize,
}

impl CsvAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written so far; zero means no file was created.
    pub fn written(&self) -> usize {
        self.written
    }

    fn write_err(&self, source: csv::Error) -> AuditError {
        AuditError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

impl AuditSink for CsvAuditLog {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        if self.writer.is_none() {
            let writer = csv::Writer::from_path(&self.path).map_err(|e| self.write_err(e))?;
            self.writer = Some(writer);
        }
        let row = AuditRow::from(record);
        let result = match self.writer.as_mut() {
            Some(writer) => writer
                .serialize(&row)
                .and_then(|()| writer.flush().map_err(csv::Error::from)),
            None => Ok(()),
        };
        result.map_err(|e| self.write_err(e))?;
        self.written += 1;
        Ok(())
    }
}

/// Reads and validates a whole audit log.
pub fn read_audit_log(path: &Path) -> Result<Vec<AuditRecord>, AuditError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| AuditError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let headers = reader
        .headers()
        .map_err(|source| AuditError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .clone();

    let mut records = Vec::new();
    for record in reader.records() {
        let malformed = |line: usize, reason: String| AuditError::Malformed {
            path: path.to_path_buf(),
            line,
            reason,
        };
        let record = record.map_err(|e| malformed(line_of(e.position()), e.to_string()))?;
        let line = line_of(record.position());
        let row: AuditRow = record
            .deserialize(Some(&headers))
            .map_err(|e| malformed(line, e.to_string()))?;
        records.push(row.into_record().map_err(|reason| malformed(line, reason))?);
    }
    Ok(records)
}

#[derive(Debug, Serialize, Deserialize)]
struct AuditRow {
    #[serde(rename = "Timestamp")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "Run ID")]
    run_id: Uuid,
    #[serde(rename = "Root Folder ID")]
    root_folder_id: String,
    #[serde(rename = "Mode")]
    mode: Mode,
    #[serde(rename = "Sequence")]
    sequence: usize,
    #[serde(rename = "Outcome")]
    outcome: Outcome,
    #[serde(rename = "Action")]
    action: ActionKind,
    #[serde(rename = "Item ID")]
    file_id: String,
    #[serde(rename = "Item Name")]
    file_name: String,
    #[serde(rename = "Permission ID")]
    permission_id: Option<String>,
    #[serde(rename = "Principal Type")]
    principal_type: Option<PrincipalType>,
    #[serde(rename = "Principal")]
    principal: Option<String>,
    #[serde(rename = "Prior Role")]
    prior_role: Option<Role>,
    #[serde(rename = "New Role")]
    new_role: Option<Role>,
    #[serde(rename = "Prior Restriction")]
    prior_restriction: Option<bool>,
    #[serde(rename = "New Restriction")]
    new_restriction: Option<bool>,
    #[serde(rename = "Attempts")]
    attempts: u32,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Error")]
    error: Option<String>,
}

impl From<&AuditRecord> for AuditRow {
    fn from(record: &AuditRecord) -> Self {
        let action = &record.action;
        let (principal_type, principal) = match action.change.principal() {
            Some(p) => (Some(p.kind), p.identifier.clone()),
            None => (None, None),
        };
        let (prior_role, new_role, prior_restriction, new_restriction) = match &action.change {
            Change::Add { role, .. } => (None, Some(*role), None, None),
            Change::Modify { from, to, .. } => (Some(*from), Some(*to), None, None),
            Change::Remove { prior_role, .. } => (Some(*prior_role), None, None, None),
            Change::SetRestriction { from, to } => (None, None, Some(*from), Some(*to)),
        };

        Self {
            timestamp: record.timestamp,
            run_id: record.run_id,
            root_folder_id: record.root_folder_id.clone(),
            mode: record.mode,
            sequence: record.sequence,
            outcome: record.outcome,
            action: action.kind(),
            file_id: action.file_id.clone(),
            file_name: action.file_name.clone(),
            permission_id: action.permission_id.clone(),
            principal_type,
            principal,
            prior_role,
            new_role,
            prior_restriction,
            new_restriction,
            attempts: record.attempts,
            note: action.note.clone(),
            error: record.error.clone(),
        }
    }
}

impl AuditRow {
    fn into_record(self) -> Result<AuditRecord, String> {
        let principal = || -> Result<Principal, String> {
            let kind = self.principal_type.ok_or("missing principal type")?;
            Principal::new(kind, self.principal.as_deref())
        };
        let missing = |column: &str| format!("{} row without {column}", self.action);

        let change = match self.action {
            ActionKind::Add => Change::Add {
                principal: principal()?,
                role: self.new_role.ok_or_else(|| missing("New Role"))?,
            },
            ActionKind::Modify => Change::Modify {
                principal: principal()?,
                from: self.prior_role.ok_or_else(|| missing("Prior Role"))?,
                to: self.new_role.ok_or_else(|| missing("New Role"))?,
            },
            ActionKind::Remove => Change::Remove {
                principal: principal()?,
                prior_role: self.prior_role.ok_or_else(|| missing("Prior Role"))?,
            },
            ActionKind::SetRestriction => Change::SetRestriction {
                from: self
                    .prior_restriction
                    .ok_or_else(|| missing("Prior Restriction"))?,
                to: self.new_restriction.ok_or_else(|| missing("New Restriction"))?,
            },
        };

        Ok(AuditRecord {
            timestamp: self.timestamp,
            run_id: self.run_id,
            root_folder_id: self.root_folder_id,
            mode: self.mode,
            sequence: self.sequence,
            action: PlannedAction {
                file_id: self.file_id,
                file_name: self.file_name,
                permission_id: self.permission_id,
                change,
                note: self.note,
            },
            outcome: self.outcome,
            attempts: self.attempts,
            error: self.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: usize, change: Change, outcome: Outcome) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            run_id: Uuid::new_v4(),
            root_folder_id: "root".into(),
            mode: Mode::Live,
            sequence,
            action: PlannedAction {
                file_id: "F1".into(),
                file_name: "Budget, 2024.xlsx".into(),
                permission_id: Some("perm-1".into()),
                change,
                note: None,
            },
            outcome,
            attempts: 1,
            error: None,
        }
    }

    #[test]
    fn log_is_created_lazily_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_audit.csv");
        let mut log = CsvAuditLog::new(&path);
        assert!(!path.exists());

        let written = vec![
            record(
                1,
                Change::Remove {
                    principal: Principal::anyone(),
                    prior_role: Role::Reader,
                },
                Outcome::Applied,
            ),
            AuditRecord {
                error: Some("forbidden: insufficient permissions".into()),
                ..record(
                    2,
                    Change::SetRestriction { from: false, to: true },
                    Outcome::Failed,
                )
            },
        ];
        for r in &written {
            log.append(r).unwrap();
        }
        assert_eq!(log.written(), 2);

        let read = read_audit_log(&path).unwrap();
        assert_eq!(read, written);
    }

    #[test]
    fn malformed_rows_report_their_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_audit.csv");
        let mut log = CsvAuditLog::new(&path);
        log.append(&record(
            1,
            Change::Modify {
                principal: Principal::user("a@x.org"),
                from: Role::Reader,
                to: Role::Writer,
            },
            Outcome::Applied,
        ))
        .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let broken = text.replace(",writer,", ",,");
        std::fs::write(&path, broken).unwrap();

        let err = read_audit_log(&path).unwrap_err();
        assert!(matches!(err, AuditError::Malformed { line: 2, .. }));
    }

    #[test]
    fn malformed_line_counts_multiline_notes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes_audit.csv");
        let mut log = CsvAuditLog::new(&path);
        let mut noted = record(
            1,
            Change::Remove {
                principal: Principal::anyone(),
                prior_role: Role::Reader,
            },
            Outcome::Applied,
        );
        noted.action.note = Some("first line\nsecond line".into());
        log.append(&noted).unwrap();
        log.append(&record(
            2,
            Change::Modify {
                principal: Principal::user("a@x.org"),
                from: Role::Reader,
                to: Role::Writer,
            },
            Outcome::Applied,
        ))
        .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace(",writer,", ",,")).unwrap();

        // The noted row spans lines 2 and 3.
        let err = read_audit_log(&path).unwrap_err();
        assert!(matches!(err, AuditError::Malformed { line: 4, .. }));
    }
}
