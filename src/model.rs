//! Core permission types shared by the reader, planner and engines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Drive permission role, ordered from broadest to narrowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Owner,
    Organizer,
    FileOrganizer,
    Writer,
    Commenter,
    Reader,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Owner,
        Role::Organizer,
        Role::FileOrganizer,
        Role::Writer,
        Role::Commenter,
        Role::Reader,
    ];

    /// Name used by the Drive API.
    pub fn api_name(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Organizer => "organizer",
            Self::FileOrganizer => "fileOrganizer",
            Self::Writer => "writer",
            Self::Commenter => "commenter",
            Self::Reader => "reader",
        }
    }

    /// Name shown to operators in the editor sheet.
    pub fn label(self) -> &'static str {
        match self {
            Self::Owner => "Owner",
            Self::Organizer => "Organizer",
            Self::FileOrganizer => "File Organizer",
            Self::Writer => "Editor",
            Self::Commenter => "Commenter",
            Self::Reader => "Viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for Role {
    type Err = String;

    /// Accepts either the API name or the sheet label, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Role::ALL
            .into_iter()
            .find(|role| {
                role.api_name().eq_ignore_ascii_case(wanted)
                    || role.label().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| format!("unknown role '{wanted}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalType {
    User,
    Group,
    Domain,
    Anyone,
}

impl PrincipalType {
    pub fn api_name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Domain => "domain",
            Self::Anyone => "anyone",
        }
    }

    /// Users and groups are addressed by email, domains by domain name.
    pub fn uses_email(self) -> bool {
        matches!(self, Self::User | Self::Group)
    }
}

impl fmt::Display for PrincipalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for PrincipalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "group" => Ok(Self::Group),
            "domain" => Ok(Self::Domain),
            "anyone" => Ok(Self::Anyone),
            other => Err(format!("unknown principal type '{other}'")),
        }
    }
}

/// Entity holding a grant. `identifier` is an email or domain, absent for `anyone`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub kind: PrincipalType,
    pub identifier: Option<String>,
}

impl Principal {
    pub fn new(kind: PrincipalType, identifier: Option<&str>) -> Result<Self, String> {
        if kind == PrincipalType::Anyone {
            return Ok(Self::anyone());
        }
        match identifier.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => Ok(Self {
                kind,
                identifier: Some(id.to_string()),
            }),
            None => Err(format!("a {kind} principal needs an email address or domain")),
        }
    }

    pub fn user(email: &str) -> Self {
        Self {
            kind: PrincipalType::User,
            identifier: Some(email.to_string()),
        }
    }

    pub fn anyone() -> Self {
        Self {
            kind: PrincipalType::Anyone,
            identifier: None,
        }
    }

    /// Case-insensitive form used for identity matching.
    pub fn normalized_identifier(&self) -> Option<String> {
        self.identifier.as_deref().map(str::to_lowercase)
    }

    pub fn matches(&self, other: &Principal) -> bool {
        self.kind == other.kind && self.normalized_identifier() == other.normalized_identifier()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// (file, principal type, principal identifier): addresses exactly one grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub file_id: String,
    pub kind: PrincipalType,
    pub identifier: Option<String>,
}

impl IdentityKey {
    pub fn new(file_id: &str, principal: &Principal) -> Self {
        Self {
            file_id: file_id.to_string(),
            kind: principal.kind,
            identifier: principal.normalized_identifier(),
        }
    }
}

/// Download restriction of an item. Folders carry no restriction of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadRestriction {
    Restricted,
    Unrestricted,
    NotApplicable,
}

impl DownloadRestriction {
    pub fn from_flag(restricted: bool) -> Self {
        if restricted {
            Self::Restricted
        } else {
            Self::Unrestricted
        }
    }

    pub fn as_flag(self) -> Option<bool> {
        match self {
            Self::Restricted => Some(true),
            Self::Unrestricted => Some(false),
            Self::NotApplicable => None,
        }
    }

    /// Sheet rendering: `TRUE`, `FALSE` or `N/A`.
    pub fn as_sheet_value(self) -> &'static str {
        match self {
            Self::Restricted => "TRUE",
            Self::Unrestricted => "FALSE",
            Self::NotApplicable => "N/A",
        }
    }
}

/// A file or folder as listed by the permission store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// `copyRequiresWriterPermission`; `None` when Drive did not report it.
    pub download_restricted: Option<bool>,
    pub web_view_link: Option<String>,
    pub owner: Option<String>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn restriction(&self) -> DownloadRestriction {
        if self.is_folder() {
            DownloadRestriction::NotApplicable
        } else {
            DownloadRestriction::from_flag(self.download_restricted.unwrap_or(false))
        }
    }
}

/// A grant as stored in Drive, before it is tied to a walked item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPermission {
    pub id: String,
    pub principal: Principal,
    pub role: Role,
}

/// One (item, principal) grant from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub file_id: String,
    pub file_name: String,
    pub full_path: String,
    pub permission_id: Option<String>,
    pub principal: Principal,
    pub role: Role,
    pub download_restricted: DownloadRestriction,
}

impl PermissionRecord {
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(&self.file_id, &self.principal)
    }

    pub fn is_folder(&self) -> bool {
        self.download_restricted == DownloadRestriction::NotApplicable
    }
}
