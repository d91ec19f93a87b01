//! Planning: turning requested changes into an ordered, invertible action list.
//!
//! Everything here is pure. [`plan`] resolves operator requests against a
//! snapshot, [`invert`] produces the complementary actions, and [`reconcile`]
//! re-checks an already built plan (typically an inverse one) against live state.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{DownloadRestriction, DriveItem, IdentityKey, PermissionRecord, Principal, Role};

/// What an operator asked for on one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Add { principal: Principal, role: Role },
    Modify { principal: Principal, role: Role },
    Remove { principal: Principal },
    SetRestriction { restricted: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub file_id: String,
    /// Sheet row the request came from, for error reporting.
    pub source_row: Option<usize>,
    pub intent: Intent,
}

impl ActionRequest {
    pub fn new(file_id: &str, intent: Intent) -> Self {
        Self {
            file_id: file_id.to_string(),
            source_row: None,
            intent,
        }
    }

    pub fn at_row(mut self, row: usize) -> Self {
        self.source_row = Some(row);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Remove,
    Modify,
    Add,
    SetRestriction,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Remove => "REMOVE",
            Self::Modify => "MODIFY",
            Self::Add => "ADD",
            Self::SetRestriction => "SET_RESTRICTION",
        })
    }
}

/// A resolved change, carrying the prior values needed to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// The grant did not exist before.
    Add { principal: Principal, role: Role },
    Modify { principal: Principal, from: Role, to: Role },
    Remove { principal: Principal, prior_role: Role },
    SetRestriction { from: bool, to: bool },
}

impl Change {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Add { .. } => ActionKind::Add,
            Self::Modify { .. } => ActionKind::Modify,
            Self::Remove { .. } => ActionKind::Remove,
            Self::SetRestriction { .. } => ActionKind::SetRestriction,
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Add { principal, .. }
            | Self::Modify { principal, .. }
            | Self::Remove { principal, .. } => Some(principal),
            Self::SetRestriction { .. } => None,
        }
    }

    /// The complementary change: ADD⇄REMOVE, MODIFY and SET_RESTRICTION swap their values.
    pub fn invert(&self) -> Change {
        match self {
            Self::Add { principal, role } => Self::Remove {
                principal: principal.clone(),
                prior_role: *role,
            },
            Self::Remove {
                principal,
                prior_role,
            } => Self::Add {
                principal: principal.clone(),
                role: *prior_role,
            },
            Self::Modify { principal, from, to } => Self::Modify {
                principal: principal.clone(),
                from: *to,
                to: *from,
            },
            Self::SetRestriction { from, to } => Self::SetRestriction { from: *to, to: *from },
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add { principal, role } => write!(f, "add {principal} as {}", role.label()),
            Self::Modify { principal, from, to } => {
                write!(f, "change {principal} from {} to {}", from.label(), to.label())
            }
            Self::Remove {
                principal,
                prior_role,
            } => write!(f, "remove {principal} ({})", prior_role.label()),
            Self::SetRestriction { from, to } => {
                write!(f, "set download restriction from {from} to {to}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub file_id: String,
    pub file_name: String,
    /// Known grant id; resolved at apply time when absent.
    pub permission_id: Option<String>,
    pub change: Change,
    /// Informational note, e.g. when an ADD was resolved as a MODIFY.
    pub note: Option<String>,
}

impl PlannedAction {
    pub fn kind(&self) -> ActionKind {
        self.change.kind()
    }

    pub fn identity_key(&self) -> Option<IdentityKey> {
        self.change
            .principal()
            .map(|principal| IdentityKey::new(&self.file_id, principal))
    }

    pub fn invert(&self) -> PlannedAction {
        PlannedAction {
            file_id: self.file_id.clone(),
            file_name: self.file_name.clone(),
            // The grant an ADD created gets a new id when it is re-created.
            permission_id: match self.change {
                Change::Remove { .. } => None,
                _ => self.permission_id.clone(),
            },
            change: self.change.invert(),
            note: None,
        }
    }
}

/// One rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub row: Option<usize>,
    pub file_id: Option<String>,
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.row, &self.file_id) {
            (Some(row), Some(file)) => write!(f, "row {row} (item {file}): {}", self.reason),
            (Some(row), None) => write!(f, "row {row}: {}", self.reason),
            (None, Some(file)) => write!(f, "item {file}: {}", self.reason),
            (None, None) => f.write_str(&self.reason),
        }
    }
}

/// Every validation problem found in a request set. The run aborts on any of them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} invalid request(s): {}", .0.len(), join(.0))]
pub struct ValidationErrors(pub Vec<ValidationError>);

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone)]
struct FileState {
    name: String,
    restriction: DownloadRestriction,
}

#[derive(Debug, Clone)]
struct Grant {
    permission_id: Option<String>,
    role: Role,
}

/// Working copy of current state, updated as actions are planned.
#[derive(Debug, Clone, Default)]
struct State {
    files: HashMap<String, FileState>,
    grants: HashMap<IdentityKey, Grant>,
}

impl State {
    /// Items are known from the walk even when they hold no grant.
    fn new(items: &[DriveItem], records: &[PermissionRecord]) -> Self {
        let mut state = Self::default();
        for item in items {
            state.files.insert(
                item.id.clone(),
                FileState {
                    name: item.name.clone(),
                    restriction: item.restriction(),
                },
            );
        }
        for record in records {
            state
                .files
                .entry(record.file_id.clone())
                .or_insert_with(|| FileState {
                    name: record.file_name.clone(),
                    restriction: record.download_restricted,
                });
            state.grants.insert(
                record.identity_key(),
                Grant {
                    permission_id: record.permission_id.clone(),
                    role: record.role,
                },
            );
        }
        state
    }

    fn file_name(&self, file_id: &str) -> String {
        self.files
            .get(file_id)
            .map_or_else(|| file_id.to_string(), |f| f.name.clone())
    }
}

fn phase(intent: &Intent) -> ActionKind {
    match intent {
        Intent::Remove { .. } => ActionKind::Remove,
        Intent::Modify { .. } => ActionKind::Modify,
        Intent::Add { .. } => ActionKind::Add,
        Intent::SetRestriction { .. } => ActionKind::SetRestriction,
    }
}

/// Resolves `requests` against the walked `items` and their `current` grants
/// into an ordered plan.
///
/// Requests are evaluated REMOVE, MODIFY, ADD, SET_RESTRICTION (stable within a
/// phase), each seeing the effect of those before it. Requests that would change
/// nothing are dropped. An ADD for an existing grant is planned as a MODIFY and
/// noted. Any invalid request fails the whole plan.
pub fn plan(
    items: &[DriveItem],
    current: &[PermissionRecord],
    requests: &[ActionRequest],
) -> Result<Vec<PlannedAction>, ValidationErrors> {
    let mut state = State::new(items, current);
    let mut ordered: Vec<&ActionRequest> = requests.iter().collect();
    ordered.sort_by_key(|request| phase(&request.intent));

    let mut planned = Vec::new();
    let mut errors = Vec::new();

    for request in ordered {
        let file_id = request.file_id.as_str();
        let invalid = |reason: String| ValidationError {
            row: request.source_row,
            file_id: Some(file_id.to_string()),
            reason,
        };

        match &request.intent {
            Intent::Remove { principal } => {
                let key = IdentityKey::new(file_id, principal);
                match state.grants.remove(&key) {
                    Some(grant) => planned.push(PlannedAction {
                        file_id: file_id.to_string(),
                        file_name: state.file_name(file_id),
                        permission_id: grant.permission_id,
                        change: Change::Remove {
                            principal: principal.clone(),
                            prior_role: grant.role,
                        },
                        note: None,
                    }),
                    None => {
                        errors.push(invalid(format!("cannot remove {principal}: no such grant")))
                    }
                }
            }
            Intent::Modify { principal, role } => {
                let key = IdentityKey::new(file_id, principal);
                let file_name = state.file_name(file_id);
                match state.grants.get_mut(&key) {
                    Some(grant) if grant.role == *role => {}
                    Some(grant) => {
                        planned.push(PlannedAction {
                            file_id: file_id.to_string(),
                            file_name,
                            permission_id: grant.permission_id.clone(),
                            change: Change::Modify {
                                principal: principal.clone(),
                                from: grant.role,
                                to: *role,
                            },
                            note: None,
                        });
                        grant.role = *role;
                    }
                    None => {
                        errors.push(invalid(format!("cannot modify {principal}: no such grant")))
                    }
                }
            }
            Intent::Add { principal, role } => {
                if !state.files.contains_key(file_id) {
                    errors.push(invalid("item is not part of the snapshot".to_string()));
                    continue;
                }
                let key = IdentityKey::new(file_id, principal);
                let file_name = state.file_name(file_id);
                match state.grants.get_mut(&key) {
                    Some(grant) if grant.role == *role => {}
                    Some(grant) => {
                        planned.push(PlannedAction {
                            file_id: file_id.to_string(),
                            file_name,
                            permission_id: grant.permission_id.clone(),
                            change: Change::Modify {
                                principal: principal.clone(),
                                from: grant.role,
                                to: *role,
                            },
                            note: Some(format!(
                                "ADD resolved as MODIFY: {principal} already held {}",
                                grant.role.label()
                            )),
                        });
                        grant.role = *role;
                    }
                    None => {
                        planned.push(PlannedAction {
                            file_id: file_id.to_string(),
                            file_name,
                            permission_id: None,
                            change: Change::Add {
                                principal: principal.clone(),
                                role: *role,
                            },
                            note: None,
                        });
                        state.grants.insert(
                            key,
                            Grant {
                                permission_id: None,
                                role: *role,
                            },
                        );
                    }
                }
            }
            Intent::SetRestriction { restricted } => {
                let Some(file) = state.files.get_mut(file_id) else {
                    errors.push(invalid("item is not part of the snapshot".to_string()));
                    continue;
                };
                match file.restriction.as_flag() {
                    None => errors.push(invalid(
                        "download restriction does not apply to folders".to_string(),
                    )),
                    Some(current) if current == *restricted => {}
                    Some(current) => {
                        planned.push(PlannedAction {
                            file_id: file_id.to_string(),
                            file_name: file.name.clone(),
                            permission_id: None,
                            change: Change::SetRestriction {
                                from: current,
                                to: *restricted,
                            },
                            note: None,
                        });
                        file.restriction = DownloadRestriction::from_flag(*restricted);
                    }
                }
            }
        }
    }

    if !errors.is_empty() {
        return Err(ValidationErrors(errors));
    }
    planned.sort_by_key(PlannedAction::kind);
    Ok(planned)
}

/// Inverts every action, keeping the order.
pub fn invert(plan: &[PlannedAction]) -> Vec<PlannedAction> {
    plan.iter().map(PlannedAction::invert).collect()
}

/// Re-checks an existing plan against live state without reordering it.
///
/// Actions whose effect is already in place are dropped, prior values and
/// permission ids are refreshed from `current`, and an ADD for an existing grant
/// becomes a MODIFY. Actions that can no longer apply (their item or grant is
/// gone) are dropped with a warning.
pub fn reconcile(
    items: &[DriveItem],
    current: &[PermissionRecord],
    plan: Vec<PlannedAction>,
) -> Vec<PlannedAction> {
    let mut state = State::new(items, current);
    let mut kept = Vec::with_capacity(plan.len());

    for mut action in plan {
        let file_id = action.file_id.clone();
        if !state.files.contains_key(&file_id) {
            tracing::warn!(
                file_id = %file_id,
                action = %action.change,
                "item no longer present, skipping"
            );
            continue;
        }

        match action.change.clone() {
            Change::Remove { principal, .. } => {
                let key = IdentityKey::new(&file_id, &principal);
                let Some(grant) = state.grants.remove(&key) else {
                    tracing::debug!(file_id = %file_id, %principal, "grant already absent");
                    continue;
                };
                action.permission_id = grant.permission_id;
                action.change = Change::Remove {
                    principal,
                    prior_role: grant.role,
                };
            }
            Change::Modify { principal, to, .. } => {
                let key = IdentityKey::new(&file_id, &principal);
                let Some(grant) = state.grants.get_mut(&key) else {
                    tracing::warn!(
                        file_id = %file_id,
                        %principal,
                        "grant to modify no longer exists, skipping"
                    );
                    continue;
                };
                if grant.role == to {
                    tracing::debug!(
                        file_id = %file_id,
                        %principal,
                        role = %to,
                        "role already in place"
                    );
                    continue;
                }
                action.permission_id = grant.permission_id.clone();
                action.change = Change::Modify {
                    principal,
                    from: grant.role,
                    to,
                };
                grant.role = to;
            }
            Change::Add { principal, role } => {
                let key = IdentityKey::new(&file_id, &principal);
                match state.grants.get_mut(&key) {
                    Some(grant) if grant.role == role => {
                        tracing::debug!(file_id = %file_id, %principal, "grant already in place");
                        continue;
                    }
                    Some(grant) => {
                        action.note = Some(format!(
                            "ADD resolved as MODIFY: {principal} already held {}",
                            grant.role.label()
                        ));
                        action.permission_id = grant.permission_id.clone();
                        action.change = Change::Modify {
                            principal,
                            from: grant.role,
                            to: role,
                        };
                        grant.role = role;
                    }
                    None => {
                        action.permission_id = None;
                        state.grants.insert(
                            key,
                            Grant {
                                permission_id: None,
                                role,
                            },
                        );
                    }
                }
            }
            Change::SetRestriction { to, .. } => {
                let Some(file) = state.files.get_mut(&file_id) else {
                    continue;
                };
                match file.restriction.as_flag() {
                    None => {
                        tracing::warn!(
                            file_id = %file_id,
                            "item is a folder, skipping restriction change"
                        );
                        continue;
                    }
                    Some(current) if current == to => continue,
                    Some(current) => {
                        action.change = Change::SetRestriction { from: current, to };
                        file.restriction = DownloadRestriction::from_flag(to);
                    }
                }
            }
        }
        kept.push(action);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PrincipalType;

    fn record(file: &str, principal: Principal, role: Role) -> PermissionRecord {
        PermissionRecord {
            file_id: file.to_string(),
            file_name: format!("{file}.pdf"),
            full_path: format!("/Root/{file}.pdf"),
            permission_id: Some(format!(
                "{file}-{}",
                principal.identifier.clone().unwrap_or_default()
            )),
            principal,
            role,
            download_restricted: DownloadRestriction::Unrestricted,
        }
    }

    fn folder_record(folder: &str) -> PermissionRecord {
        PermissionRecord {
            download_restricted: DownloadRestriction::NotApplicable,
            ..record(folder, Principal::user("owner@x.org"), Role::Owner)
        }
    }

    fn bare_file(id: &str) -> DriveItem {
        DriveItem {
            id: id.to_string(),
            name: format!("{id}.pdf"),
            mime_type: "application/pdf".into(),
            download_restricted: Some(false),
            web_view_link: None,
            owner: None,
        }
    }

    fn alice() -> Principal {
        Principal::user("alice@x.org")
    }

    fn bob() -> Principal {
        Principal::user("bob@x.org")
    }

    #[test]
    fn no_op_requests_yield_empty_plan() {
        let current = vec![record("F1", alice(), Role::Writer)];
        let requests = vec![
            ActionRequest::new(
                "F1",
                Intent::Modify {
                    principal: alice(),
                    role: Role::Writer,
                },
            ),
            ActionRequest::new("F1", Intent::SetRestriction { restricted: false }),
        ];
        assert!(plan(&[], &current, &requests).unwrap().is_empty());
    }

    #[test]
    fn add_on_existing_grant_becomes_modify() {
        let current = vec![record("F1", alice(), Role::Writer)];
        let requests = vec![ActionRequest::new(
            "F1",
            Intent::Add {
                principal: Principal::user("ALICE@x.org"),
                role: Role::Reader,
            },
        )];

        let planned = plan(&[], &current, &requests).unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].kind(), ActionKind::Modify);
        assert!(matches!(
            planned[0].change,
            Change::Modify {
                from: Role::Writer,
                to: Role::Reader,
                ..
            }
        ));
        assert_eq!(planned[0].permission_id.as_deref(), Some("F1-alice@x.org"));
        assert!(planned[0].note.as_deref().unwrap().contains("ADD resolved as MODIFY"));
    }

    #[test]
    fn remove_of_missing_grant_is_rejected() {
        let current = vec![record("F1", alice(), Role::Writer)];
        let requests =
            vec![ActionRequest::new("F1", Intent::Remove { principal: bob() }).at_row(7)];

        let err = plan(&[], &current, &requests).unwrap_err();
        assert_eq!(err.0.len(), 1);
        assert_eq!(err.0[0].row, Some(7));
        assert!(err.to_string().contains("row 7"));
    }

    #[test]
    fn restriction_on_folder_is_rejected() {
        let current = vec![folder_record("D1")];
        let requests = vec![ActionRequest::new("D1", Intent::SetRestriction { restricted: true })];

        let err = plan(&[], &current, &requests).unwrap_err();
        assert!(err.0[0].reason.contains("folders"));
    }

    #[test]
    fn all_errors_are_reported() {
        let current = vec![folder_record("D1")];
        let requests = vec![
            ActionRequest::new("D1", Intent::SetRestriction { restricted: true }).at_row(2),
            ActionRequest::new("D1", Intent::Remove { principal: bob() }).at_row(3),
            ActionRequest::new(
                "F404",
                Intent::Add {
                    principal: bob(),
                    role: Role::Reader,
                },
            )
            .at_row(4),
        ];
        assert_eq!(plan(&[], &current, &requests).unwrap_err().0.len(), 3);
    }

    #[test]
    fn item_without_grants_accepts_add_and_restriction() {
        let items = vec![bare_file("F1")];
        let requests = vec![
            ActionRequest::new(
                "F1",
                Intent::Add {
                    principal: alice(),
                    role: Role::Reader,
                },
            ),
            ActionRequest::new("F1", Intent::SetRestriction { restricted: true }),
        ];

        let planned = plan(&items, &[], &requests).unwrap();
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].file_name, "F1.pdf");
        assert_eq!(
            planned[1].change,
            Change::SetRestriction { from: false, to: true }
        );
    }

    #[test]
    fn plan_orders_remove_modify_add_restriction() {
        let current = vec![
            record("F1", alice(), Role::Writer),
            record("F1", bob(), Role::Reader),
        ];
        let requests = vec![
            ActionRequest::new("F1", Intent::SetRestriction { restricted: true }),
            ActionRequest::new(
                "F1",
                Intent::Add {
                    principal: Principal::new(PrincipalType::Domain, Some("x.org")).unwrap(),
                    role: Role::Reader,
                },
            ),
            ActionRequest::new(
                "F1",
                Intent::Modify {
                    principal: bob(),
                    role: Role::Commenter,
                },
            ),
            ActionRequest::new("F1", Intent::Remove { principal: alice() }),
        ];

        let kinds: Vec<_> = plan(&[], &current, &requests)
            .unwrap()
            .iter()
            .map(PlannedAction::kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::Remove,
                ActionKind::Modify,
                ActionKind::Add,
                ActionKind::SetRestriction
            ]
        );
    }

    #[test]
    fn remove_then_add_on_same_key_stays_an_add() {
        let current = vec![record("F1", alice(), Role::Writer)];
        let requests = vec![
            ActionRequest::new(
                "F1",
                Intent::Add {
                    principal: alice(),
                    role: Role::Reader,
                },
            ),
            ActionRequest::new("F1", Intent::Remove { principal: alice() }),
        ];

        let planned = plan(&[], &current, &requests).unwrap();
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].kind(), ActionKind::Remove);
        assert_eq!(planned[1].kind(), ActionKind::Add);
    }

    #[test]
    fn double_inversion_restores_plan() {
        let current = vec![
            record("F1", alice(), Role::Writer),
            record("F1", bob(), Role::Reader),
        ];
        let requests = vec![
            ActionRequest::new("F1", Intent::Remove { principal: alice() }),
            ActionRequest::new(
                "F1",
                Intent::Modify {
                    principal: bob(),
                    role: Role::Writer,
                },
            ),
            ActionRequest::new(
                "F1",
                Intent::Add {
                    principal: Principal::anyone(),
                    role: Role::Reader,
                },
            ),
            ActionRequest::new("F1", Intent::SetRestriction { restricted: true }),
        ];
        let original = plan(&[], &current, &requests).unwrap();
        let twice = invert(&invert(&original));

        assert_eq!(twice.len(), original.len());
        for (a, b) in original.iter().zip(&twice) {
            assert_eq!(a.file_id, b.file_id);
            assert_eq!(a.change, b.change);
        }
    }

    #[test]
    fn inversion_pairs_kinds() {
        let add = Change::Add {
            principal: alice(),
            role: Role::Commenter,
        };
        assert_eq!(
            add.invert(),
            Change::Remove {
                principal: alice(),
                prior_role: Role::Commenter
            }
        );
        assert_eq!(
            Change::SetRestriction { from: false, to: true }.invert(),
            Change::SetRestriction { from: true, to: false }
        );
    }

    #[test]
    fn reconcile_drops_satisfied_actions() {
        let current = vec![record("F1", alice(), Role::Reader)];
        let inverse = vec![
            PlannedAction {
                file_id: "F1".into(),
                file_name: "F1.pdf".into(),
                permission_id: Some("stale".into()),
                change: Change::Remove {
                    principal: bob(),
                    prior_role: Role::Reader,
                },
                note: None,
            },
            PlannedAction {
                file_id: "F1".into(),
                file_name: "F1.pdf".into(),
                permission_id: None,
                change: Change::Modify {
                    principal: alice(),
                    from: Role::Writer,
                    to: Role::Reader,
                },
                note: None,
            },
            PlannedAction {
                file_id: "F1".into(),
                file_name: "F1.pdf".into(),
                permission_id: None,
                change: Change::Add {
                    principal: alice(),
                    role: Role::Writer,
                },
                note: None,
            },
        ];

        let kept = reconcile(&[], &current, inverse);
        assert_eq!(kept.len(), 1);
        assert_eq!(
            kept[0].change,
            Change::Modify {
                principal: alice(),
                from: Role::Reader,
                to: Role::Writer
            }
        );
        assert_eq!(kept[0].permission_id.as_deref(), Some("F1-alice@x.org"));
    }

    #[test]
    fn reconcile_restores_last_grant_of_an_item() {
        let removed = PlannedAction {
            file_id: "F1".into(),
            file_name: "F1.pdf".into(),
            permission_id: Some("p1".into()),
            change: Change::Remove {
                principal: alice(),
                prior_role: Role::Commenter,
            },
            note: None,
        };

        let kept = reconcile(&[bare_file("F1")], &[], vec![removed.invert()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(
            kept[0].change,
            Change::Add {
                principal: alice(),
                role: Role::Commenter
            }
        );

        // An item missing from the walk is still skipped.
        assert!(reconcile(&[], &[], vec![removed.invert()]).is_empty());
    }
}
