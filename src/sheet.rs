//! Editor sheet and archive CSV files.
//!
//! The editor sheet has one row per grant plus the action columns an operator
//! fills in. Reading it back turns each row into zero, one or two
//! [`ActionRequest`]s: a grant action and a file-scoped restriction change are
//! independent even when they share a row.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{DownloadRestriction, PermissionRecord, Principal, PrincipalType, Role};
use crate::plan::{ActionRequest, Intent, ValidationError, ValidationErrors};

/// Columns an edited sheet must still carry.
const REQUIRED_COLUMNS: [&str; 8] = [
    "Item ID",
    "Principal Type",
    "Email Address",
    "Action_Type",
    "New_Role",
    "Type (for ADD)",
    "Email/Domain (for ADD)",
    "SET Download Restriction",
];

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("failed to read sheet {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("sheet {path} is missing column(s): {}", .columns.join(", "))]
    MissingColumns { path: PathBuf, columns: Vec<String> },

    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
}

/// Parsed sheet: the root it was fetched from and the requested changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetActions {
    pub root_folder_id: Option<String>,
    pub requests: Vec<ActionRequest>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct EditorRow {
    #[serde(rename = "Root Folder ID")]
    root_folder_id: String,
    #[serde(rename = "Full Path")]
    full_path: String,
    #[serde(rename = "Item Name")]
    item_name: String,
    #[serde(rename = "Item ID")]
    item_id: String,
    #[serde(rename = "Item Type")]
    item_type: String,
    #[serde(rename = "Permission ID")]
    permission_id: String,
    #[serde(rename = "Principal Type")]
    principal_type: String,
    #[serde(rename = "Email Address")]
    email_address: String,
    #[serde(rename = "Role")]
    role: String,
    #[serde(rename = "Download Restricted")]
    download_restricted: String,
    #[serde(rename = "Action_Type")]
    action_type: String,
    #[serde(rename = "New_Role")]
    new_role: String,
    #[serde(rename = "Type (for ADD)")]
    add_type: String,
    #[serde(rename = "Email/Domain (for ADD)")]
    add_identifier: String,
    #[serde(rename = "SET Download Restriction")]
    set_restriction: String,
}

impl EditorRow {
    fn from_record(root_folder_id: &str, record: &PermissionRecord) -> Self {
        Self {
            root_folder_id: root_folder_id.to_string(),
            full_path: record.full_path.clone(),
            item_name: record.file_name.clone(),
            item_id: record.file_id.clone(),
            item_type: if record.is_folder() { "Folder" } else { "File" }.to_string(),
            permission_id: record.permission_id.clone().unwrap_or_default(),
            principal_type: record.principal.kind.api_name().to_string(),
            email_address: record.principal.identifier.clone().unwrap_or_default(),
            role: record.role.label().to_string(),
            download_restricted: record.download_restricted.as_sheet_value().to_string(),
            ..Self::default()
        }
    }
}

/// Raw snapshot layout used for archives.
#[derive(Debug, Serialize)]
struct ArchiveRow<'a> {
    #[serde(rename = "Item ID")]
    item_id: &'a str,
    #[serde(rename = "Item Name")]
    item_name: &'a str,
    #[serde(rename = "Full Path")]
    full_path: &'a str,
    #[serde(rename = "Permission ID")]
    permission_id: Option<&'a str>,
    #[serde(rename = "Principal Type")]
    principal_type: PrincipalType,
    #[serde(rename = "Principal")]
    principal: Option<&'a str>,
    #[serde(rename = "Role")]
    role: Role,
    #[serde(rename = "Download Restriction")]
    download_restriction: DownloadRestriction,
}

fn write_rows<T: Serialize>(
    path: &Path,
    rows: impl IntoIterator<Item = T>,
) -> Result<(), SheetError> {
    let write_err = |source: csv::Error| SheetError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(write_err)?;
    for row in rows {
        writer.serialize(row).map_err(write_err)?;
    }
    writer.flush().map_err(|e| write_err(e.into()))
}

/// Writes the operator-facing sheet with empty action columns.
pub fn write_editor_sheet(
    path: &Path,
    root_folder_id: &str,
    records: &[PermissionRecord],
) -> Result<(), SheetError> {
    if records.is_empty() {
        // Headers still have to be present for an empty sheet to be edited and read back.
        let mut writer = csv::Writer::from_path(path).map_err(|source| SheetError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        return writer
            .write_record(editor_headers())
            .and_then(|()| writer.flush().map_err(csv::Error::from))
            .map_err(|source| SheetError::Write {
                path: path.to_path_buf(),
                source,
            });
    }
    write_rows(
        path,
        records.iter().map(|r| EditorRow::from_record(root_folder_id, r)),
    )?;
    tracing::info!(path = %path.display(), rows = records.len(), "editor sheet written");
    Ok(())
}

fn editor_headers() -> [&'static str; 15] {
    [
        "Root Folder ID",
        "Full Path",
        "Item Name",
        "Item ID",
        "Item Type",
        "Permission ID",
        "Principal Type",
        "Email Address",
        "Role",
        "Download Restricted",
        "Action_Type",
        "New_Role",
        "Type (for ADD)",
        "Email/Domain (for ADD)",
        "SET Download Restriction",
    ]
}

/// Writes a raw snapshot backup.
pub fn write_archive(path: &Path, records: &[PermissionRecord]) -> Result<(), SheetError> {
    write_rows(
        path,
        records.iter().map(|r| ArchiveRow {
            item_id: &r.file_id,
            item_name: &r.file_name,
            full_path: &r.full_path,
            permission_id: r.permission_id.as_deref(),
            principal_type: r.principal.kind,
            principal: r.principal.identifier.as_deref(),
            role: r.role,
            download_restriction: r.download_restricted,
        }),
    )?;
    tracing::info!(path = %path.display(), rows = records.len(), "archive written");
    Ok(())
}

/// Reads an edited sheet into action requests.
///
/// Every bad row is reported, not only the first. Rows are numbered by the
/// line they start on, so the header is row 1.
pub fn read_sheet(path: &Path) -> Result<SheetActions, SheetError> {
    let read_err = |source: csv::Error| SheetError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(read_err)?;

    let headers = reader.headers().map_err(read_err)?.clone();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|h| h == **column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SheetError::MissingColumns {
            path: path.to_path_buf(),
            columns: missing,
        });
    }

    let mut parser = RowParser::default();
    for record in reader.records() {
        let parsed = record.and_then(|record| {
            let line = line_of(record.position());
            record
                .deserialize::<EditorRow>(Some(&headers))
                .map(|row| (line, row))
        });
        match parsed {
            Ok((line, row)) => parser.row(line, &row),
            Err(err) => parser.errors.push(ValidationError {
                row: Some(line_of(err.position())),
                file_id: None,
                reason: err.to_string(),
            }),
        }
    }
    parser.finish()
}

/// The physical line a record starts on.
pub(crate) fn line_of(position: Option<&csv::Position>) -> usize {
    position.map_or(0, |p| p.line() as usize)
}

#[derive(Default)]
struct RowParser {
    root_folder_id: Option<String>,
    requests: Vec<ActionRequest>,
    /// Desired restriction per item: (value, deciding row), in first-seen order.
    restrictions: Vec<(String, bool, usize)>,
    restriction_index: HashMap<String, usize>,
    errors: Vec<ValidationError>,
}

impl RowParser {
    fn row(&mut self, line: usize, row: &EditorRow) {
        let item_id = row.item_id.trim();
        let invalid = |reason: String| ValidationError {
            row: Some(line),
            file_id: (!item_id.is_empty()).then(|| item_id.to_string()),
            reason,
        };

        let root = row.root_folder_id.trim();
        if !root.is_empty() {
            match &self.root_folder_id {
                None => self.root_folder_id = Some(root.to_string()),
                Some(existing) if existing != root => self.errors.push(invalid(format!(
                    "root folder {root} differs from {existing} named earlier in the sheet"
                ))),
                Some(_) => {}
            }
        }

        let action = row.action_type.trim().to_ascii_uppercase();
        let restriction = row.set_restriction.trim();
        if action.is_empty() && restriction.is_empty() {
            return;
        }
        if item_id.is_empty() {
            self.errors
                .push(invalid("row requests a change but has no Item ID".to_string()));
            return;
        }

        if !action.is_empty() {
            match parse_intent(&action, row) {
                Ok(intent) => self
                    .requests
                    .push(ActionRequest::new(item_id, intent).at_row(line)),
                Err(reason) => self.errors.push(invalid(reason)),
            }
        }

        if !restriction.is_empty() {
            match parse_flag(restriction) {
                Some(restricted) => self.restriction(item_id, restricted, line),
                None => self.errors.push(invalid(format!(
                    "SET Download Restriction must be TRUE, FALSE or blank, got '{restriction}'"
                ))),
            }
        }
    }

    /// The stricter value wins when rows of one item disagree.
    fn restriction(&mut self, item_id: &str, restricted: bool, line: usize) {
        match self.restriction_index.get(item_id) {
            Some(&i) => {
                let entry = &mut self.restrictions[i];
                if restricted && !entry.1 {
                    entry.1 = true;
                    entry.2 = line;
                }
            }
            None => {
                self.restriction_index
                    .insert(item_id.to_string(), self.restrictions.len());
                self.restrictions.push((item_id.to_string(), restricted, line));
            }
        }
    }

    fn finish(mut self) -> Result<SheetActions, SheetError> {
        if !self.errors.is_empty() {
            return Err(ValidationErrors(self.errors).into());
        }
        for (item_id, restricted, line) in self.restrictions {
            let request = ActionRequest::new(&item_id, Intent::SetRestriction { restricted });
            self.requests.push(request.at_row(line));
        }
        Ok(SheetActions {
            root_folder_id: self.root_folder_id,
            requests: self.requests,
        })
    }
}

fn parse_intent(action: &str, row: &EditorRow) -> Result<Intent, String> {
    match action {
        "ADD" => Ok(Intent::Add {
            principal: parse_principal(&row.add_type, &row.add_identifier, "Type (for ADD)")?,
            role: parse_role(&row.new_role)?,
        }),
        "MODIFY" => Ok(Intent::Modify {
            principal: parse_principal(&row.principal_type, &row.email_address, "Principal Type")?,
            role: parse_role(&row.new_role)?,
        }),
        "REMOVE" => Ok(Intent::Remove {
            principal: parse_principal(&row.principal_type, &row.email_address, "Principal Type")?,
        }),
        other => Err(format!(
            "unknown Action_Type '{other}', expected ADD, MODIFY or REMOVE"
        )),
    }
}

fn parse_principal(kind: &str, identifier: &str, column: &str) -> Result<Principal, String> {
    if kind.trim().is_empty() {
        return Err(format!("{column} is empty"));
    }
    let kind: PrincipalType = kind.parse()?;
    Principal::new(kind, Some(identifier))
}

fn parse_role(value: &str) -> Result<Role, String> {
    if value.trim().is_empty() {
        return Err("New_Role is empty".to_string());
    }
    value.parse()
}

fn parse_flag(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
