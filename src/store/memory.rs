use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{PermissionStore, StoreError};
use crate::model::{DriveItem, Principal, Role, StoredPermission, FOLDER_MIME_TYPE};

#[derive(Debug, Default)]
struct Inner {
    items: BTreeMap<String, DriveItem>,
    parents: BTreeMap<String, String>,
    grants: BTreeMap<String, Vec<StoredPermission>>,
    injected: HashMap<String, VecDeque<StoreError>>,
    next_id: u64,
    mutations: usize,
}

impl Inner {
    fn take_injected(&mut self, file_id: &str) -> Result<(), StoreError> {
        match self.injected.get_mut(file_id).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn grants_mut(&mut self, file_id: &str) -> Result<&mut Vec<StoredPermission>, StoreError> {
        if !self.items.contains_key(file_id) {
            return Err(StoreError::NotFound(format!("file {file_id}")));
        }
        Ok(self.grants.entry(file_id.to_string()).or_default())
    }
}

/// In-process permission store.
///
/// Holds a folder tree with grants, counts mutating calls, and can be told to fail
/// the next calls touching an item.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_folder(&self, id: &str, name: &str, parent: Option<&str>) {
        self.add_item(id, name, FOLDER_MIME_TYPE, None, parent).await;
    }

    pub async fn add_file(&self, id: &str, name: &str, restricted: bool, parent: &str) {
        self.add_item(id, name, "application/pdf", Some(restricted), Some(parent))
            .await;
    }

    async fn add_item(
        &self,
        id: &str,
        name: &str,
        mime_type: &str,
        restricted: Option<bool>,
        parent: Option<&str>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.items.insert(
            id.to_string(),
            DriveItem {
                id: id.to_string(),
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                download_restricted: restricted,
                web_view_link: None,
                owner: None,
            },
        );
        if let Some(parent) = parent {
            inner.parents.insert(id.to_string(), parent.to_string());
        }
    }

    /// Seeds a grant without counting it as a mutation.
    pub async fn grant(&self, file_id: &str, principal: Principal, role: Role) -> String {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = format!("perm-{}", inner.next_id);
        inner
            .grants
            .entry(file_id.to_string())
            .or_default()
            .push(StoredPermission {
                id: id.clone(),
                principal,
                role,
            });
        id
    }

    /// Queues an error for the next call that touches `file_id`.
    pub async fn fail_next(&self, file_id: &str, err: StoreError) {
        let mut inner = self.inner.lock().await;
        inner
            .injected
            .entry(file_id.to_string())
            .or_default()
            .push_back(err);
    }

    /// Number of successful create/update/delete/restriction calls.
    pub async fn mutation_count(&self) -> usize {
        self.inner.lock().await.mutations
    }

    /// Current role of a principal on an item, if any.
    pub async fn role_of(&self, file_id: &str, principal: &Principal) -> Option<Role> {
        let inner = self.inner.lock().await;
        inner
            .grants
            .get(file_id)?
            .iter()
            .find(|p| p.principal.matches(principal))
            .map(|p| p.role)
    }

    pub async fn restriction_of(&self, file_id: &str) -> Option<bool> {
        let inner = self.inner.lock().await;
        inner.items.get(file_id)?.download_restricted
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn get_item(&self, file_id: &str) -> Result<DriveItem, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.take_injected(file_id)?;
        inner
            .items
            .get(file_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("file {file_id}")))
    }

    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveItem>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.take_injected(folder_id)?;
        if !inner.items.contains_key(folder_id) {
            return Err(StoreError::NotFound(format!("folder {folder_id}")));
        }
        Ok(inner
            .parents
            .iter()
            .filter(|(_, parent)| parent.as_str() == folder_id)
            .filter_map(|(child, _)| inner.items.get(child).cloned())
            .collect())
    }

    async fn list_permissions(&self, file_id: &str) -> Result<Vec<StoredPermission>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.take_injected(file_id)?;
        Ok(inner.grants_mut(file_id)?.clone())
    }

    async fn create_permission(
        &self,
        file_id: &str,
        principal: &Principal,
        role: Role,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.take_injected(file_id)?;
        inner.next_id += 1;
        let id = format!("perm-{}", inner.next_id);
        let grants = inner.grants_mut(file_id)?;
        if grants.iter().any(|p| p.principal.matches(principal)) {
            return Err(StoreError::Rejected {
                status: 400,
                message: format!("{principal} already has access to {file_id}"),
            });
        }
        grants.push(StoredPermission {
            id: id.clone(),
            principal: principal.clone(),
            role,
        });
        inner.mutations += 1;
        Ok(id)
    }

    async fn update_permission_role(
        &self,
        file_id: &str,
        permission_id: &str,
        role: Role,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.take_injected(file_id)?;
        let grant = inner
            .grants_mut(file_id)?
            .iter_mut()
            .find(|p| p.id == permission_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("permission {permission_id} on {file_id}"))
            })?;
        grant.role = role;
        inner.mutations += 1;
        Ok(())
    }

    async fn delete_permission(
        &self,
        file_id: &str,
        permission_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.take_injected(file_id)?;
        let grants = inner.grants_mut(file_id)?;
        let before = grants.len();
        grants.retain(|p| p.id != permission_id);
        if grants.len() == before {
            return Err(StoreError::NotFound(format!(
                "permission {permission_id} on {file_id}"
            )));
        }
        inner.mutations += 1;
        Ok(())
    }

    async fn set_download_restriction(
        &self,
        file_id: &str,
        restricted: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.take_injected(file_id)?;
        let item = inner
            .items
            .get_mut(file_id)
            .ok_or_else(|| StoreError::NotFound(format!("file {file_id}")))?;
        item.download_restricted = Some(restricted);
        inner.mutations += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let store = MemoryStore::new();
        store.add_folder("root", "Root", None).await;
        store.add_file("F1", "a.pdf", false, "root").await;
        store.fail_next("F1", StoreError::RateLimited("quota".into())).await;

        let first = store.set_download_restriction("F1", true).await;
        assert!(matches!(first, Err(StoreError::RateLimited(_))));
        store.set_download_restriction("F1", true).await.unwrap();

        assert_eq!(store.restriction_of("F1").await, Some(true));
        assert_eq!(store.mutation_count().await, 1);
    }

    #[tokio::test]
    async fn lists_only_direct_children() {
        let store = MemoryStore::new();
        store.add_folder("root", "Root", None).await;
        store.add_folder("sub", "Sub", Some("root")).await;
        store.add_file("F1", "a.pdf", false, "sub").await;

        let children = store.list_children("root").await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, "sub");
    }
}
