//! Rebuilding an undo plan from an audit log.

use crate::apply::Mode;
use crate::audit::{AuditRecord, Outcome};
use crate::plan::PlannedAction;

/// Inverse plan for every action the log shows as applied, most recent first.
///
/// Dry-run and failed records are skipped since nothing happened for them. The
/// result goes through [`crate::plan::reconcile`] before it is applied.
pub fn rollback(log: &[AuditRecord]) -> Vec<PlannedAction> {
    let mut applied: Vec<&AuditRecord> = log
        .iter()
        .filter(|r| r.outcome == Outcome::Applied && r.mode == Mode::Live)
        .collect();
    applied.sort_by_key(|r| r.sequence);
    applied.iter().rev().map(|r| r.action.invert()).collect()
}

/// Root folder recorded in the log, if it names exactly one.
pub fn root_folder_of(log: &[AuditRecord]) -> Option<&str> {
    let first = log.first()?.root_folder_id.as_str();
    log.iter()
        .all(|r| r.root_folder_id == first)
        .then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Principal, Role};
    use crate::plan::Change;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(sequence: usize, change: Change, outcome: Outcome) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            run_id: Uuid::nil(),
            root_folder_id: "root".into(),
            mode: Mode::Live,
            sequence,
            action: PlannedAction {
                file_id: "F1".into(),
                file_name: "a.pdf".into(),
                permission_id: Some(format!("perm-{sequence}")),
                change,
                note: None,
            },
            outcome,
            attempts: 1,
            error: None,
        }
    }

    fn alice() -> Principal {
        Principal::user("alice@x.org")
    }

    #[test]
    fn inverts_in_reverse_order() {
        let a = Change::Remove {
            principal: alice(),
            prior_role: Role::Writer,
        };
        let b = Change::Add {
            principal: alice(),
            role: Role::Reader,
        };
        let c = Change::SetRestriction { from: false, to: true };
        let log = vec![
            record(1, a.clone(), Outcome::Applied),
            record(2, b.clone(), Outcome::Applied),
            record(3, c.clone(), Outcome::Applied),
        ];

        let changes: Vec<Change> = rollback(&log).into_iter().map(|p| p.change).collect();
        assert_eq!(changes, vec![c.invert(), b.invert(), a.invert()]);
    }

    #[test]
    fn skips_failed_and_dry_run_records() {
        let dry = AuditRecord {
            mode: Mode::DryRun,
            ..record(
                1,
                Change::SetRestriction { from: false, to: true },
                Outcome::SkippedDryRun,
            )
        };
        let failed = record(
            2,
            Change::Remove {
                principal: alice(),
                prior_role: Role::Reader,
            },
            Outcome::Failed,
        );
        let applied = record(
            3,
            Change::Modify {
                principal: alice(),
                from: Role::Writer,
                to: Role::Reader,
            },
            Outcome::Applied,
        );

        let plan = rollback(&[dry, failed, applied]);
        assert_eq!(plan.len(), 1);
        assert_eq!(
            plan[0].change,
            Change::Modify {
                principal: alice(),
                from: Role::Reader,
                to: Role::Writer
            }
        );
        assert_eq!(plan[0].permission_id.as_deref(), Some("perm-3"));
    }

    #[test]
    fn root_folder_must_be_unique() {
        let a = record(1, Change::SetRestriction { from: false, to: true }, Outcome::Applied);
        let b = AuditRecord {
            root_folder_id: "other".into(),
            ..a.clone()
        };
        assert_eq!(root_folder_of(std::slice::from_ref(&a)), Some("root"));
        assert_eq!(root_folder_of(&[a, b]), None);
        assert_eq!(root_folder_of(&[]), None);
    }
}
