use async_trait::async_trait;
use drive3::api::{File, Permission, Scope};
use drive3::hyper::client::HttpConnector;
use drive3::hyper_rustls::HttpsConnector;
use drive3::{hyper, hyper_rustls, DriveHub, Error};

use super::{PermissionStore, StoreError};
use crate::auth::Credential;
use crate::model::{DriveItem, Principal, PrincipalType, Role, StoredPermission};

const ITEM_FIELDS: &str =
    "id,name,mimeType,copyRequiresWriterPermission,webViewLink,owners(emailAddress)";
const PERMISSION_FIELDS: &str = "nextPageToken,permissions(id,type,role,emailAddress,domain)";

/// [`PermissionStore`] backed by the Drive v3 API.
pub struct DriveStore {
    hub: DriveHub<HttpsConnector<HttpConnector>>,
}

impl DriveStore {
    pub fn new(auth: Credential) -> Self {
        let client = hyper::Client::builder().build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .https_or_http()
                .enable_http1()
                .build(),
        );

        Self {
            hub: DriveHub::new(client, auth),
        }
    }
}

#[async_trait]
impl PermissionStore for DriveStore {
    async fn get_item(&self, file_id: &str) -> Result<DriveItem, StoreError> {
        let (_, file) = self
            .hub
            .files()
            .get(file_id)
            .supports_all_drives(true)
            .param("fields", ITEM_FIELDS)
            .add_scope(Scope::Full)
            .doit()
            .await
            .map_err(classify)?;
        to_item(file)
    }

    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveItem>, StoreError> {
        let query = format!("'{folder_id}' in parents and trashed = false");
        let fields = format!("nextPageToken,files({ITEM_FIELDS})");
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut call = self
                .hub
                .files()
                .list()
                .q(&query)
                .page_size(1000)
                .supports_all_drives(true)
                .include_items_from_all_drives(true)
                .param("fields", fields.as_str())
                .add_scope(Scope::Full);
            if let Some(token) = page_token.as_deref() {
                call = call.page_token(token);
            }

            let (_, list) = call.doit().await.map_err(classify)?;
            for file in list.files.unwrap_or_default() {
                items.push(to_item(file)?);
            }

            page_token = list.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        Ok(items)
    }

    async fn list_permissions(&self, file_id: &str) -> Result<Vec<StoredPermission>, StoreError> {
        let mut permissions = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut call = self
                .hub
                .permissions()
                .list(file_id)
                .supports_all_drives(true)
                .page_size(100)
                .param("fields", PERMISSION_FIELDS)
                .add_scope(Scope::Full);
            if let Some(token) = page_token.as_deref() {
                call = call.page_token(token);
            }

            let (_, list) = call.doit().await.map_err(classify)?;
            for permission in list.permissions.unwrap_or_default() {
                match to_stored(permission) {
                    Some(stored) => permissions.push(stored),
                    None => tracing::warn!(
                        file_id,
                        "skipping permission with unrecognised type or role"
                    ),
                }
            }

            page_token = list.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        Ok(permissions)
    }

    async fn create_permission(
        &self,
        file_id: &str,
        principal: &Principal,
        role: Role,
    ) -> Result<String, StoreError> {
        let mut request = Permission {
            type_: Some(principal.kind.api_name().to_string()),
            role: Some(role.api_name().to_string()),
            ..Default::default()
        };
        if principal.kind.uses_email() {
            request.email_address = principal.identifier.clone();
        } else if principal.kind == PrincipalType::Domain {
            request.domain = principal.identifier.clone();
        }

        let (_, created) = self
            .hub
            .permissions()
            .create(request, file_id)
            .send_notification_email(false)
            .supports_all_drives(true)
            .add_scope(Scope::Full)
            .doit()
            .await
            .map_err(classify)?;

        created
            .id
            .ok_or_else(|| StoreError::Rejected {
                status: 200,
                message: format!(
                    "Drive created a permission on {file_id} without returning its id"
                ),
            })
    }

    async fn update_permission_role(
        &self,
        file_id: &str,
        permission_id: &str,
        role: Role,
    ) -> Result<(), StoreError> {
        let request = Permission {
            role: Some(role.api_name().to_string()),
            ..Default::default()
        };
        self.hub
            .permissions()
            .update(request, file_id, permission_id)
            .supports_all_drives(true)
            .add_scope(Scope::Full)
            .doit()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_permission(
        &self,
        file_id: &str,
        permission_id: &str,
    ) -> Result<(), StoreError> {
        self.hub
            .permissions()
            .delete(file_id, permission_id)
            .supports_all_drives(true)
            .add_scope(Scope::Full)
            .doit()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn set_download_restriction(
        &self,
        file_id: &str,
        restricted: bool,
    ) -> Result<(), StoreError> {
        let request = File {
            copy_requires_writer_permission: Some(restricted),
            ..Default::default()
        };
        self.hub
            .files()
            .update(request, file_id)
            .supports_all_drives(true)
            .add_scope(Scope::Full)
            .doit_without_upload()
            .await
            .map_err(classify)?;
        Ok(())
    }
}

fn to_item(file: File) -> Result<DriveItem, StoreError> {
    let id = file.id.ok_or_else(|| StoreError::Rejected {
        status: 200,
        message: "Drive returned a file without an id".to_string(),
    })?;
    Ok(DriveItem {
        name: file.name.unwrap_or_else(|| "Untitled".to_string()),
        mime_type: file.mime_type.unwrap_or_default(),
        download_restricted: file.copy_requires_writer_permission,
        web_view_link: file.web_view_link,
        owner: file
            .owners
            .and_then(|owners| owners.into_iter().next())
            .and_then(|owner| owner.email_address),
        id,
    })
}

fn to_stored(permission: Permission) -> Option<StoredPermission> {
    let kind: PrincipalType = permission.type_.as_deref()?.parse().ok()?;
    let role: Role = permission.role.as_deref()?.parse().ok()?;
    let identifier = match kind {
        PrincipalType::User | PrincipalType::Group => permission.email_address,
        PrincipalType::Domain => permission.domain,
        PrincipalType::Anyone => None,
    };
    Some(StoredPermission {
        id: permission.id?,
        principal: Principal { kind, identifier },
        role,
    })
}

/// Sorts a google-drive3 error into the store taxonomy.
fn classify(err: Error) -> StoreError {
    match err {
        Error::HttpError(e) => StoreError::Transport(e.to_string()),
        Error::Io(e) => StoreError::Transport(e.to_string()),
        Error::MissingToken(e) => StoreError::Auth(e.to_string()),
        Error::BadRequest(body) => from_error_body(&body),
        Error::Failure(response) => {
            let status = response.status();
            StoreError::from_status(status.as_u16(), None, status.to_string())
        }
        other => StoreError::Rejected {
            status: 0,
            message: other.to_string(),
        },
    }
}

/// Drive error bodies look like
/// `{"error": {"code": 403, "message": ..., "errors": [{"reason": ...}]}}`.
fn from_error_body(body: &serde_json::Value) -> StoreError {
    let error = &body["error"];
    let status = error["code"]
        .as_u64()
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(400);
    let reason = error["errors"][0]["reason"].as_str();
    let message = error["message"]
        .as_str()
        .map_or_else(|| body.to_string(), str::to_string);
    StoreError::from_status(status, reason, message)
}
