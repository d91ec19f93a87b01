//! Recursive permission snapshot of a folder tree.

use std::time::Duration;

use async_recursion::async_recursion;

use crate::apply::CancelFlag;
use crate::model::{DriveItem, PermissionRecord, PrincipalType};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{PermissionStore, StoreError};

/// Every item and grant under a root folder, the root included.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub root: DriveItem,
    /// Walked items, including those without any grant.
    pub items: Vec<DriveItem>,
    pub records: Vec<PermissionRecord>,
}

impl Snapshot {
    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

pub struct SnapshotReader<'a, S: ?Sized> {
    store: &'a S,
    policy: RetryPolicy,
    call_timeout: Duration,
    cancel: CancelFlag,
}

impl<'a, S: PermissionStore + ?Sized> SnapshotReader<'a, S> {
    pub fn new(store: &'a S, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            store,
            policy,
            call_timeout,
            cancel: CancelFlag::new(),
        }
    }

    /// Stops the walk at the next item once `cancel` is set.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Walks the tree under `root_id`. With `email`, only items on which that
    /// user or group holds a grant are kept (with all of their grants).
    pub async fn read(&self, root_id: &str, email: Option<&str>) -> Result<Snapshot, StoreError> {
        let store = self.store;
        let root = with_retry(&self.policy, self.call_timeout, "get item", || {
            store.get_item(root_id)
        })
        .await
        .result?;

        let mut snapshot = Snapshot {
            root: root.clone(),
            items: Vec::new(),
            records: Vec::new(),
        };
        let path = format!("/{}", root.name);
        self.walk(&root, &path, email, &mut snapshot).await?;

        tracing::info!(
            root = %root.id,
            items = snapshot.items.len(),
            grants = snapshot.records.len(),
            "snapshot of '{}' complete",
            root.name
        );
        Ok(snapshot)
    }

    #[async_recursion]
    async fn walk(
        &self,
        item: &DriveItem,
        path: &str,
        email: Option<&str>,
        snapshot: &mut Snapshot,
    ) -> Result<(), StoreError> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let store = self.store;
        let item_id = item.id.as_str();

        let permissions = with_retry(&self.policy, self.call_timeout, "list permissions", || {
            store.list_permissions(item_id)
        })
        .await
        .result
        .inspect_err(|err| {
            tracing::error!(item = %item_id, path, error = %err, "failed to list permissions")
        })?;

        let wanted = match email {
            Some(email) => permissions.iter().any(|p| {
                matches!(p.principal.kind, PrincipalType::User | PrincipalType::Group)
                    && p.principal
                        .identifier
                        .as_deref()
                        .is_some_and(|id| id.eq_ignore_ascii_case(email))
            }),
            None => true,
        };
        if wanted {
            let restriction = item.restriction();
            snapshot.items.push(item.clone());
            snapshot.records.extend(permissions.into_iter().map(|p| PermissionRecord {
                file_id: item.id.clone(),
                file_name: item.name.clone(),
                full_path: path.to_string(),
                permission_id: Some(p.id),
                principal: p.principal,
                role: p.role,
                download_restricted: restriction,
            }));
        }

        if item.is_folder() {
            let children = with_retry(&self.policy, self.call_timeout, "list children", || {
                store.list_children(item_id)
            })
            .await
            .result
            .inspect_err(|err| {
                tracing::error!(item = %item_id, path, error = %err, "failed to list folder")
            })?;

            tracing::debug!(folder = %item_id, children = children.len(), "walking {path}");
            for child in &children {
                let child_path = format!("{path}/{}", child.name);
                self.walk(child, &child_path, email, snapshot).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DownloadRestriction, Principal, Role};
    use crate::store::MemoryStore;

    async fn tree() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_folder("root", "Root", None).await;
        store.add_folder("sub", "Sub", Some("root")).await;
        store.add_file("F1", "a.pdf", true, "sub").await;
        store.add_file("F2", "b.pdf", false, "root").await;
        store.grant("root", Principal::user("owner@x.org"), Role::Owner).await;
        store.grant("sub", Principal::user("owner@x.org"), Role::Owner).await;
        store.grant("F1", Principal::user("Alice@x.org"), Role::Writer).await;
        store.grant("F1", Principal::anyone(), Role::Reader).await;
        store.grant("F2", Principal::user("bob@x.org"), Role::Reader).await;
        store
    }

    fn reader(store: &MemoryStore) -> SnapshotReader<'_, MemoryStore> {
        SnapshotReader::new(store, RetryPolicy::immediate(1), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn walks_tree_with_paths() {
        let store = tree().await;
        let snapshot = reader(&store).read("root", None).await.unwrap();

        assert_eq!(snapshot.root.name, "Root");
        assert_eq!(snapshot.records.len(), 5);
        assert_eq!(snapshot.item_count(), 4);

        let f1: Vec<_> = snapshot.records.iter().filter(|r| r.file_id == "F1").collect();
        assert_eq!(f1.len(), 2);
        assert_eq!(f1[0].full_path, "/Root/Sub/a.pdf");
        assert_eq!(f1[0].download_restricted, DownloadRestriction::Restricted);

        let sub = snapshot.records.iter().find(|r| r.file_id == "sub").unwrap();
        assert_eq!(sub.download_restricted, DownloadRestriction::NotApplicable);
    }

    #[tokio::test]
    async fn email_filter_keeps_whole_items() {
        let store = tree().await;
        let snapshot = reader(&store).read("root", Some("alice@X.org")).await.unwrap();

        assert_eq!(snapshot.item_count(), 1);
        assert_eq!(snapshot.records.len(), 2);
        assert!(snapshot.records.iter().all(|r| r.file_id == "F1"));
    }

    #[tokio::test]
    async fn listing_failure_aborts() {
        let store = tree().await;
        store
            .fail_next("sub", StoreError::Forbidden("no access".into()))
            .await;

        let err = reader(&store).read("root", None).await.unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn items_without_grants_are_kept() {
        let store = tree().await;
        store.add_file("F3", "c.pdf", false, "root").await;

        let snapshot = reader(&store).read("root", None).await.unwrap();
        assert_eq!(snapshot.item_count(), 5);
        assert!(snapshot.items.iter().any(|item| item.id == "F3"));
        assert!(snapshot.records.iter().all(|r| r.file_id != "F3"));
    }

    #[tokio::test]
    async fn cancelled_walk_stops() {
        let store = tree().await;
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = reader(&store)
            .with_cancel(cancel)
            .read("root", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }

    #[tokio::test]
    async fn transient_listing_errors_are_retried() {
        let store = tree().await;
        store
            .fail_next("F2", StoreError::RateLimited("quota".into()))
            .await;

        let snapshot = reader(&store).read("root", None).await.unwrap();
        assert_eq!(snapshot.records.len(), 5);
    }
}
