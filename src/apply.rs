//! Executes a plan against a [`PermissionStore`], one audit record per action.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{AuditError, AuditRecord, AuditSink, Outcome};
use crate::model::IdentityKey;
use crate::plan::{Change, PlannedAction};
use crate::retry::{with_retry, Attempted, RetryPolicy};
use crate::store::{PermissionStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    DryRun,
    Live,
}

impl Mode {
    pub fn from_live_flag(live: bool) -> Self {
        if live {
            Self::Live
        } else {
            Self::DryRun
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DryRun => "DRY_RUN",
            Self::Live => "LIVE",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Fetch,
    Apply,
    Rollback,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Apply => "apply",
            Self::Rollback => "rollback",
        }
    }
}

/// Per-invocation context.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub root_folder_id: String,
    pub mode: Mode,
    pub operation: Operation,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(root_folder_id: &str, mode: Mode, operation: Operation) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            root_folder_id: root_folder_id.to_string(),
            mode,
            operation,
            started_at: Utc::now(),
        }
    }
}

/// Operator cancellation, honoured between actions.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub records: Vec<AuditRecord>,
    pub cancelled: bool,
}

impl ApplyReport {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(Outcome::Failed) > 0
    }
}

/// The audit log could not be written. `report` holds every action attempted
/// so far, including the one whose record was lost.
#[derive(Debug, Error)]
#[error("audit log write failed after {} action(s): {source}", .report.records.len())]
pub struct ApplyError {
    pub report: ApplyReport,
    #[source]
    pub source: AuditError,
}

pub struct ApplyEngine<'a, S: ?Sized> {
    store: &'a S,
    policy: RetryPolicy,
    call_timeout: Duration,
    cancel: CancelFlag,
}

impl<'a, S: PermissionStore + ?Sized> ApplyEngine<'a, S> {
    pub fn new(store: &'a S, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            store,
            policy,
            call_timeout,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs `plan` in order. A failed action is recorded and the run continues;
    /// only a failure to write the audit log stops it.
    pub async fn apply<A: AuditSink>(
        &self,
        run: &RunContext,
        plan: &[PlannedAction],
        sink: &mut A,
    ) -> Result<ApplyReport, ApplyError> {
        let mut report = ApplyReport::default();

        for (index, action) in plan.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(
                    run_id = %run.run_id,
                    remaining = plan.len() - index,
                    "run cancelled, remaining actions not attempted"
                );
                report.cancelled = true;
                break;
            }

            let sequence = index + 1;
            let (recorded, attempted) = self.execute(run.mode, action).await;
            let (outcome, error) = match attempted.result {
                Ok(()) if run.mode == Mode::Live => (Outcome::Applied, None),
                Ok(()) => (Outcome::SkippedDryRun, None),
                Err(err) => (Outcome::Failed, Some(err.to_string())),
            };

            let record = AuditRecord {
                timestamp: Utc::now(),
                run_id: run.run_id,
                root_folder_id: run.root_folder_id.clone(),
                mode: run.mode,
                sequence,
                action: recorded,
                outcome,
                attempts: attempted.attempts,
                error,
            };
            log_outcome(&record);
            let appended = sink.append(&record);
            report.records.push(record);
            if let Err(source) = appended {
                if let Some(lost) = report.records.last() {
                    tracing::error!(
                        run_id = %run.run_id,
                        sequence = lost.sequence,
                        item = %lost.action.file_id,
                        permission_id = lost.action.permission_id.as_deref().unwrap_or(""),
                        outcome = ?lost.outcome,
                        "not in the audit log: {}",
                        lost.action.change
                    );
                }
                return Err(ApplyError { report, source });
            }
        }

        Ok(report)
    }

    /// Resolves and (in LIVE mode) performs one action. Returns the action as it
    /// should be recorded, with any resolved or created permission id filled in.
    async fn execute(&self, mode: Mode, action: &PlannedAction) -> (PlannedAction, Attempted<()>) {
        let mut recorded = action.clone();

        let needs_id = matches!(action.change, Change::Modify { .. } | Change::Remove { .. });
        if recorded.permission_id.is_none() && needs_id {
            match self.resolve_permission_id(action).await {
                Attempted {
                    result: Ok(id),
                    ..
                } => recorded.permission_id = Some(id),
                Attempted { result: Err(err), attempts } => {
                    return (
                        recorded,
                        Attempted {
                            result: Err(err),
                            attempts,
                        },
                    )
                }
            }
        }

        if mode == Mode::DryRun {
            return (
                recorded,
                Attempted {
                    result: Ok(()),
                    attempts: 0,
                },
            );
        }

        let store = self.store;
        let file_id = action.file_id.as_str();
        let permission_id = recorded.permission_id.clone().unwrap_or_default();
        let permission_id = permission_id.as_str();
        let label = action.kind().to_string();

        let attempted = match &action.change {
            Change::Add { principal, role } => {
                let created = with_retry(&self.policy, self.call_timeout, &label, || {
                    store.create_permission(file_id, principal, *role)
                })
                .await;
                let Attempted { result, attempts } = created;
                let result = result.map(|id| {
                    recorded.permission_id = Some(id);
                });
                Attempted { result, attempts }
            }
            Change::Modify { to, .. } => {
                with_retry(&self.policy, self.call_timeout, &label, || {
                    store.update_permission_role(file_id, permission_id, *to)
                })
                .await
            }
            Change::Remove { .. } => {
                with_retry(&self.policy, self.call_timeout, &label, || {
                    store.delete_permission(file_id, permission_id)
                })
                .await
            }
            Change::SetRestriction { to, .. } => {
                with_retry(&self.policy, self.call_timeout, &label, || {
                    store.set_download_restriction(file_id, *to)
                })
                .await
            }
        };
        (recorded, attempted)
    }

    /// Finds the permission id of the grant an action targets.
    async fn resolve_permission_id(&self, action: &PlannedAction) -> Attempted<String> {
        let store = self.store;
        let file_id = action.file_id.as_str();
        let listed = with_retry(&self.policy, self.call_timeout, "list permissions", || {
            store.list_permissions(file_id)
        })
        .await;

        let Some(key) = action.identity_key() else {
            return Attempted {
                result: Err(StoreError::NotFound(format!(
                    "{} targets no principal",
                    action.kind()
                ))),
                attempts: listed.attempts,
            };
        };
        let result = listed.result.and_then(|permissions| {
            permissions
                .into_iter()
                .find(|p| IdentityKey::new(file_id, &p.principal) == key)
                .map(|p| p.id)
                .ok_or_else(|| {
                    let principal = action
                        .change
                        .principal()
                        .map_or_else(String::new, ToString::to_string);
                    StoreError::NotFound(format!("no grant for {principal} on {file_id}"))
                })
        });
        Attempted {
            result,
            attempts: listed.attempts,
        }
    }
}

fn log_outcome(record: &AuditRecord) {
    let action = &record.action;
    match record.outcome {
        Outcome::Applied => tracing::info!(
            run_id = %record.run_id,
            sequence = record.sequence,
            item = %action.file_id,
            attempts = record.attempts,
            "[APPLIED] {} on '{}'",
            action.change,
            action.file_name
        ),
        Outcome::SkippedDryRun => tracing::info!(
            run_id = %record.run_id,
            sequence = record.sequence,
            item = %action.file_id,
            "[DRY RUN] would {} on '{}'",
            action.change,
            action.file_name
        ),
        Outcome::Failed => tracing::error!(
            run_id = %record.run_id,
            sequence = record.sequence,
            item = %action.file_id,
            attempts = record.attempts,
            error = record.error.as_deref().unwrap_or(""),
            "[FAILED] {} on '{}'",
            action.change,
            action.file_name
        ),
    }
    if let Some(note) = &action.note {
        tracing::info!(run_id = %record.run_id, sequence = record.sequence, "{note}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Principal, Role};
    use crate::store::MemoryStore;

    async fn seeded() -> (MemoryStore, String) {
        let store = MemoryStore::new();
        store.add_folder("root", "Root", None).await;
        store.add_file("F1", "a.pdf", false, "root").await;
        let id = store.grant("F1", Principal::user("alice@x.org"), Role::Writer).await;
        (store, id)
    }

    fn action(change: Change) -> PlannedAction {
        PlannedAction {
            file_id: "F1".into(),
            file_name: "a.pdf".into(),
            permission_id: None,
            change,
            note: None,
        }
    }

    fn engine(store: &MemoryStore) -> ApplyEngine<'_, MemoryStore> {
        ApplyEngine::new(store, RetryPolicy::immediate(2), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn dry_run_never_mutates() {
        let (store, id) = seeded().await;
        let plan = vec![
            action(Change::Modify {
                principal: Principal::user("alice@x.org"),
                from: Role::Writer,
                to: Role::Reader,
            }),
            action(Change::SetRestriction { from: false, to: true }),
        ];
        let run = RunContext::new("root", Mode::DryRun, Operation::Apply);
        let mut sink = Vec::new();

        let report = engine(&store).apply(&run, &plan, &mut sink).await.unwrap();

        assert_eq!(report.count(Outcome::SkippedDryRun), 2);
        assert_eq!(report.count(Outcome::Applied), 0);
        assert_eq!(store.mutation_count().await, 0);
        // Identity-key resolution still happens in a dry run.
        assert_eq!(sink[0].action.permission_id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_run() {
        let (store, _) = seeded().await;
        store.add_file("F2", "b.pdf", false, "root").await;
        store.fail_next("F1", StoreError::Forbidden("not an owner".into())).await;

        let plan = vec![
            action(Change::SetRestriction { from: false, to: true }),
            PlannedAction {
                file_id: "F2".into(),
                ..action(Change::Add {
                    principal: Principal::user("bob@x.org"),
                    role: Role::Reader,
                })
            },
        ];
        let run = RunContext::new("root", Mode::Live, Operation::Apply);
        let mut sink = Vec::new();
        let report = engine(&store).apply(&run, &plan, &mut sink).await.unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(report.records[0].outcome, Outcome::Failed);
        assert_eq!(report.records[0].attempts, 1);
        assert_eq!(report.records[1].outcome, Outcome::Applied);
        assert!(report.records[1].action.permission_id.is_some());
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (store, _) = seeded().await;
        store.fail_next("F1", StoreError::RateLimited("quota".into())).await;

        let plan = vec![action(Change::SetRestriction { from: false, to: true })];
        let run = RunContext::new("root", Mode::Live, Operation::Apply);
        let report = engine(&store).apply(&run, &plan, &mut Vec::new()).await.unwrap();

        assert_eq!(report.records[0].outcome, Outcome::Applied);
        assert_eq!(report.records[0].attempts, 2);
        assert_eq!(store.restriction_of("F1").await, Some(true));
    }

    #[tokio::test]
    async fn missing_grant_fails_resolution() {
        let (store, _) = seeded().await;
        let plan = vec![action(Change::Remove {
            principal: Principal::user("carol@x.org"),
            prior_role: Role::Reader,
        })];
        let run = RunContext::new("root", Mode::DryRun, Operation::Apply);
        let report = engine(&store).apply(&run, &plan, &mut Vec::new()).await.unwrap();

        assert_eq!(report.records[0].outcome, Outcome::Failed);
        assert!(report.records[0].error.as_deref().unwrap().contains("carol@x.org"));
    }

    struct BrokenSink;

    impl AuditSink for BrokenSink {
        fn append(&mut self, _record: &AuditRecord) -> Result<(), AuditError> {
            Err(AuditError::Write {
                path: "audit.csv".into(),
                source: std::io::Error::other("disk full").into(),
            })
        }
    }

    #[tokio::test]
    async fn audit_write_failure_keeps_the_applied_action() {
        let (store, _) = seeded().await;
        let plan = vec![
            action(Change::Add {
                principal: Principal::user("bob@x.org"),
                role: Role::Reader,
            }),
            action(Change::SetRestriction { from: false, to: true }),
        ];
        let run = RunContext::new("root", Mode::Live, Operation::Apply);

        let err = engine(&store)
            .apply(&run, &plan, &mut BrokenSink)
            .await
            .unwrap_err();

        assert_eq!(err.report.records.len(), 1);
        let lost = &err.report.records[0];
        assert_eq!(lost.outcome, Outcome::Applied);
        assert!(lost.action.permission_id.is_some());
        // The run stops at the first unrecorded action.
        assert_eq!(store.mutation_count().await, 1);
        assert_eq!(store.restriction_of("F1").await, Some(false));
    }

    #[tokio::test]
    async fn cancelled_runs_stop_between_actions() {
        let (store, _) = seeded().await;
        let cancel = CancelFlag::new();
        cancel.cancel();

        let plan = vec![action(Change::SetRestriction { from: false, to: true })];
        let run = RunContext::new("root", Mode::Live, Operation::Apply);
        let report = engine(&store)
            .with_cancel(cancel)
            .apply(&run, &plan, &mut Vec::new())
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.records.is_empty());
        assert_eq!(store.mutation_count().await, 0);
    }
}
