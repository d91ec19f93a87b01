//! The fetch, apply, rollback and inspect commands.
//!
//! Each command is generic over the [`PermissionStore`] so the same flow runs
//! against Drive and against [`crate::store::MemoryStore`].

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::apply::{ApplyEngine, CancelFlag, Mode, Operation, RunContext};
use crate::audit::{read_audit_log, CsvAuditLog, Outcome};
use crate::config::Settings;
use crate::model::{DriveItem, StoredPermission};
use crate::plan::{plan, reconcile, PlannedAction};
use crate::retry::with_retry;
use crate::rollback::{rollback, root_folder_of};
use crate::sheet::{read_sheet, write_archive, write_editor_sheet, SheetError};
use crate::snapshot::{Snapshot, SnapshotReader};
use crate::store::PermissionStore;

#[derive(Debug, Clone)]
pub struct FetchSummary {
    pub root: DriveItem,
    pub grants: usize,
    pub sheet: PathBuf,
    pub archive: PathBuf,
}

/// Outcome of an apply or rollback run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run_id: Option<Uuid>,
    pub planned: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
    /// Absent when there was nothing to do.
    pub audit_log: Option<PathBuf>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

#[derive(Debug, Serialize)]
pub struct Inspection {
    pub item: DriveItem,
    pub permissions: Vec<StoredPermission>,
}

async fn take_snapshot<S: PermissionStore + ?Sized>(
    store: &S,
    settings: &Settings,
    root_id: &str,
    email: Option<&str>,
    cancel: &CancelFlag,
) -> Result<Snapshot> {
    SnapshotReader::new(store, settings.retry, settings.call_timeout)
        .with_cancel(cancel.clone())
        .read(root_id, email)
        .await
        .with_context(|| format!("failed to snapshot folder {root_id}"))
}

/// Snapshots a folder tree and writes the baseline archive and the editor sheet.
pub async fn fetch<S: PermissionStore + ?Sized>(
    store: &S,
    settings: &Settings,
    root_id: &str,
    email: Option<&str>,
) -> Result<FetchSummary> {
    settings.ensure_dirs().context("failed to create workspace directories")?;
    let snapshot = take_snapshot(store, settings, root_id, email, &CancelFlag::new()).await?;
    let root_name = snapshot.root.name.as_str();

    let archive = settings.archive_path(Utc::now(), Operation::Fetch, root_name, "baseline");
    write_archive(&archive, &snapshot.records)?;
    let sheet = settings.editor_sheet_path(root_name);
    write_editor_sheet(&sheet, &snapshot.root.id, &snapshot.records)?;

    tracing::info!(
        items = snapshot.item_count(),
        grants = snapshot.records.len(),
        sheet = %sheet.display(),
        "fetch complete, edit the sheet and run apply"
    );
    Ok(FetchSummary {
        grants: snapshot.records.len(),
        root: snapshot.root,
        sheet,
        archive,
    })
}

/// Plans an edited sheet against live state and runs it.
///
/// Validation problems abort before anything is written to the audit log.
pub async fn apply_sheet<S: PermissionStore + ?Sized>(
    store: &S,
    settings: &Settings,
    input: &Path,
    root_override: Option<&str>,
    mode: Mode,
    cancel: CancelFlag,
) -> Result<RunSummary> {
    settings.ensure_dirs().context("failed to create workspace directories")?;
    let actions = read_sheet(input).map_err(|err| {
        if let SheetError::Invalid(errors) = &err {
            for error in &errors.0 {
                tracing::error!("{error}");
            }
        }
        err
    })?;

    let root_id = match (root_override, actions.root_folder_id.as_deref()) {
        (Some(root), _) | (None, Some(root)) => root.to_string(),
        (None, None) => bail!("{} names no root folder; pass --root", input.display()),
    };
    tracing::info!(requests = actions.requests.len(), root = %root_id, "sheet parsed");

    let snapshot = take_snapshot(store, settings, &root_id, None, &cancel).await?;
    let started = Utc::now();
    write_archive(
        &settings.archive_path(started, Operation::Apply, &snapshot.root.name, "pre_apply"),
        &snapshot.records,
    )?;

    let planned = plan(&snapshot.items, &snapshot.records, &actions.requests).map_err(|errors| {
        for error in &errors.0 {
            tracing::error!("{error}");
        }
        errors
    })?;

    execute(store, settings, &snapshot, Operation::Apply, mode, planned, cancel).await
}

/// Undoes the applied actions of an audit log.
///
/// The inverse plan is reconciled against live state first, so actions already
/// undone (for example by an earlier rollback of the same log) are skipped.
pub async fn rollback_log<S: PermissionStore + ?Sized>(
    store: &S,
    settings: &Settings,
    log_path: &Path,
    root_override: Option<&str>,
    mode: Mode,
    cancel: CancelFlag,
) -> Result<RunSummary> {
    settings.ensure_dirs().context("failed to create workspace directories")?;
    if !settings.is_in_logs_dir(log_path) {
        bail!(
            "{} is not an audit log inside {}",
            log_path.display(),
            settings.logs_dir().display()
        );
    }
    let records = read_audit_log(log_path)?;

    let root_id = match (root_override, root_folder_of(&records)) {
        (Some(root), _) | (None, Some(root)) => root.to_string(),
        (None, None) => bail!(
            "cannot tell the root folder from {}; pass --root",
            log_path.display()
        ),
    };
    let inverse = rollback(&records);
    tracing::info!(
        log = %log_path.display(),
        entries = records.len(),
        inverse = inverse.len(),
        "audit log read"
    );

    let snapshot = take_snapshot(store, settings, &root_id, None, &cancel).await?;
    let archive = settings.archive_path(
        Utc::now(),
        Operation::Rollback,
        &snapshot.root.name,
        "pre_rollback",
    );
    write_archive(&archive, &snapshot.records)?;

    let planned = reconcile(&snapshot.items, &snapshot.records, inverse);
    execute(store, settings, &snapshot, Operation::Rollback, mode, planned, cancel).await
}

async fn execute<S: PermissionStore + ?Sized>(
    store: &S,
    settings: &Settings,
    snapshot: &Snapshot,
    operation: Operation,
    mode: Mode,
    planned: Vec<PlannedAction>,
    cancel: CancelFlag,
) -> Result<RunSummary> {
    if planned.is_empty() {
        tracing::info!("no changes between the requested and the live state");
        return Ok(RunSummary::default());
    }

    let run = RunContext::new(&snapshot.root.id, mode, operation);
    let path =
        settings.audit_log_path(run.started_at, operation, &snapshot.root.name, run.run_id);
    tracing::info!(
        run_id = %run.run_id,
        mode = %mode,
        actions = planned.len(),
        "starting {}",
        operation.as_str()
    );

    let mut log = CsvAuditLog::new(&path);
    let report = ApplyEngine::new(store, settings.retry, settings.call_timeout)
        .with_cancel(cancel)
        .apply(&run, &planned, &mut log)
        .await
        .with_context(|| format!("run {} stopped", run.run_id))?;

    let summary = RunSummary {
        run_id: Some(run.run_id),
        planned: planned.len(),
        applied: report.count(Outcome::Applied),
        skipped: report.count(Outcome::SkippedDryRun),
        failed: report.count(Outcome::Failed),
        cancelled: report.cancelled,
        audit_log: (log.written() > 0).then(|| log.path().to_path_buf()),
    };
    tracing::info!(
        run_id = %run.run_id,
        applied = summary.applied,
        skipped = summary.skipped,
        failed = summary.failed,
        cancelled = summary.cancelled,
        audit_log = %path.display(),
        "{} finished",
        operation.as_str()
    );
    Ok(summary)
}

/// One item and its grants.
pub async fn inspect<S: PermissionStore + ?Sized>(
    store: &S,
    settings: &Settings,
    file_id: &str,
) -> Result<Inspection> {
    let (policy, timeout) = (&settings.retry, settings.call_timeout);
    let item = with_retry(policy, timeout, "get item", || store.get_item(file_id))
        .await
        .result
        .with_context(|| format!("failed to read item {file_id}"))?;
    let permissions = with_retry(policy, timeout, "list permissions", || {
        store.list_permissions(file_id)
    })
    .await
    .result
    .with_context(|| format!("failed to list permissions of {file_id}"))?;
    Ok(Inspection { item, permissions })
}

