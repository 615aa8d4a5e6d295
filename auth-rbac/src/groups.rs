use crate::{
    engine::{require_slug, RbacEngine},
    error::{RbacError, Result},
    models::*,
};
use tracing::{debug, info};

impl RbacEngine {
    // =============================================================================
    // Group lifecycle
    // =============================================================================

    pub async fn create_group(&self, group: NewPermissionsGroup) -> Result<PermissionsGroup> {
        require_slug("permissions group", &group.slug)?;

        let group = self.repository.insert_group(group).await?;
        info!(group_id = %group.id, slug = %group.slug, "Created permissions group");
        Ok(group)
    }

    pub async fn find_group(&self, id: impl Into<GroupId>) -> Result<PermissionsGroup> {
        let id = id.into();
        self.repository
            .find_group(id)
            .await?
            .ok_or_else(|| RbacError::not_found("PermissionsGroup", id))
    }

    pub async fn find_group_by_slug(&self, slug: &str) -> Result<PermissionsGroup> {
        self.repository
            .find_group_by_slug(slug)
            .await?
            .ok_or_else(|| RbacError::not_found("PermissionsGroup", slug))
    }

    pub async fn list_groups(&self) -> Result<Vec<PermissionsGroup>> {
        self.repository.list_groups().await
    }

    pub async fn rename_group(&self, group: &mut PermissionsGroup, name: &str) -> Result<()> {
        let mut renamed = group.clone();
        renamed.set_name(name);
        require_slug("permissions group", &renamed.slug)?;

        *group = self
            .repository
            .rename_group(group.id, &renamed.name, &renamed.slug)
            .await?;
        info!(group_id = %group.id, slug = %group.slug, "Renamed permissions group");
        Ok(())
    }

    /// Delete a group. Its permissions are kept and become ungrouped.
    pub async fn delete_group(&self, id: impl Into<GroupId>) -> Result<bool> {
        let id = id.into();
        let deleted = self.repository.delete_group(id).await?;

        if deleted {
            info!(group_id = %id, "Deleted permissions group");
        }
        Ok(deleted)
    }

    /// Permissions that belong to no group
    pub async fn ungrouped_permissions(&self) -> Result<Vec<Permission>> {
        self.repository.list_permissions(Some(GroupId::NONE)).await
    }

    // =============================================================================
    // Group / Permission
    // =============================================================================

    /// Create a permission owned by the group
    pub async fn create_group_permission(
        &self,
        group: impl Into<GroupId>,
        permission: NewPermission,
    ) -> Result<Permission> {
        let group = self.find_group(group).await?;
        self.create_permission(permission.in_group(group.id)).await
    }

    /// Move the permission into the group. Returns false if the group already
    /// owned it.
    pub async fn attach_permission_to_group(
        &self,
        group: impl Into<GroupId>,
        permission: &mut Permission,
    ) -> Result<bool> {
        let group = self.find_group(group).await?;

        if self.group_has_permission(group.id, permission.id).await? {
            debug!(group_id = %group.id, permission_id = %permission.id, "Permission already in group");
            return Ok(false);
        }

        let previous = permission.group_id;
        *permission = self
            .repository
            .set_permission_group(permission.id, group.id)
            .await?;

        info!(
            group_id = %group.id,
            previous_group_id = %previous,
            permission_id = %permission.id,
            "Attached permission to group"
        );
        Ok(true)
    }

    /// Attach by id. Returns `None` when no such permission exists.
    pub async fn attach_permission_to_group_by_id(
        &self,
        group: impl Into<GroupId>,
        permission: impl Into<PermissionId>,
    ) -> Result<Option<Permission>> {
        match self.repository.find_permission(permission.into()).await? {
            Some(mut permission) => {
                self.attach_permission_to_group(group, &mut permission).await?;
                Ok(Some(permission))
            }
            None => Ok(None),
        }
    }

    /// Ungroup the permission if this group owns it. The permission is kept.
    pub async fn detach_permission_from_group(
        &self,
        group: impl Into<GroupId>,
        permission: &mut Permission,
    ) -> Result<bool> {
        let group = self.find_group(group).await?;

        if !self.group_has_permission(group.id, permission.id).await? {
            debug!(group_id = %group.id, permission_id = %permission.id, "Permission not in group");
            return Ok(false);
        }

        *permission = self
            .repository
            .set_permission_group(permission.id, GroupId::NONE)
            .await?;

        info!(group_id = %group.id, permission_id = %permission.id, "Detached permission from group");
        Ok(true)
    }

    pub async fn detach_permission_from_group_by_id(
        &self,
        group: impl Into<GroupId>,
        permission: impl Into<PermissionId>,
    ) -> Result<Option<Permission>> {
        match self.repository.find_permission(permission.into()).await? {
            Some(mut permission) => {
                self.detach_permission_from_group(group, &mut permission).await?;
                Ok(Some(permission))
            }
            None => Ok(None),
        }
    }

    /// Checked against the group's permissions as currently stored
    pub async fn group_has_permission(
        &self,
        group: impl Into<GroupId>,
        permission: impl Into<PermissionId>,
    ) -> Result<bool> {
        let permission = permission.into();
        let permissions = self.group_permissions(group).await?;
        Ok(permissions.iter().any(|p| p.id == permission))
    }

    pub async fn group_permissions(&self, group: impl Into<GroupId>) -> Result<Vec<Permission>> {
        let group = group.into();
        if group.is_none() {
            return Ok(Vec::new());
        }
        self.repository.list_permissions(Some(group)).await
    }
}

#[cfg(test)]
mod tests {
    use crate::{engine::RbacEngine, error::RbacError, models::*};

    async fn setup() -> (RbacEngine, PermissionsGroup, PermissionsGroup) {
        let engine = RbacEngine::in_memory();
        let posts = engine
            .create_group(NewPermissionsGroup::new("Posts"))
            .await
            .unwrap();
        let users = engine
            .create_group(NewPermissionsGroup::new("Users"))
            .await
            .unwrap();
        (engine, posts, users)
    }

    #[tokio::test]
    async fn test_create_group_permission() {
        let (engine, posts, _) = setup().await;
        let permission = engine
            .create_group_permission(&posts, NewPermission::new("Publish Posts"))
            .await
            .unwrap();

        assert_eq!(permission.group_id, posts.id);
        assert!(engine.group_has_permission(&posts, &permission).await.unwrap());

        let err = engine
            .create_group_permission(GroupId(42), NewPermission::new("Nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_attach_moves_between_groups() {
        let (engine, posts, users) = setup().await;
        let mut permission = engine
            .create_group_permission(&posts, NewPermission::new("Review"))
            .await
            .unwrap();

        assert!(!engine.attach_permission_to_group(&posts, &mut permission).await.unwrap());
        assert!(engine.attach_permission_to_group(&users, &mut permission).await.unwrap());

        assert_eq!(permission.group_id, users.id);
        assert!(!engine.group_has_permission(&posts, &permission).await.unwrap());
        assert!(engine.group_has_permission(&users, &permission).await.unwrap());
    }

    #[tokio::test]
    async fn test_detach_ungroups_without_deleting() {
        let (engine, posts, users) = setup().await;
        let mut permission = engine
            .create_group_permission(&posts, NewPermission::new("Publish Posts"))
            .await
            .unwrap();

        // Not owned by `users`, nothing happens
        assert!(!engine.detach_permission_from_group(&users, &mut permission).await.unwrap());
        assert_eq!(permission.group_id, posts.id);

        assert!(engine.detach_permission_from_group(&posts, &mut permission).await.unwrap());
        assert_eq!(permission.group_id, GroupId::NONE);

        let stored = engine.find_permission(&permission).await.unwrap();
        assert!(!stored.is_grouped());
        assert!(engine.group_permissions(&posts).await.unwrap().is_empty());
        assert_eq!(engine.ungrouped_permissions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_by_id_variants() {
        let (engine, posts, _) = setup().await;
        let permission = engine
            .create_permission(NewPermission::new("Archive"))
            .await
            .unwrap();

        let attached = engine
            .attach_permission_to_group_by_id(&posts, &permission)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attached.group_id, posts.id);

        let detached = engine
            .detach_permission_from_group_by_id(&posts, &permission)
            .await
            .unwrap()
            .unwrap();
        assert!(detached.group_id.is_none());

        assert!(engine
            .attach_permission_to_group_by_id(&posts, PermissionId(999))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_group_keeps_permissions() {
        let (engine, posts, _) = setup().await;
        let permission = engine
            .create_group_permission(&posts, NewPermission::new("Publish Posts"))
            .await
            .unwrap();

        assert!(engine.delete_group(&posts).await.unwrap());
        let stored = engine.find_permission(&permission).await.unwrap();
        assert_eq!(stored.group_id, GroupId::NONE);
        assert!(engine.find_group_by_slug("posts").await.is_err());
    }

    #[tokio::test]
    async fn test_rename_group() {
        let (engine, mut posts, _) = setup().await;
        engine.rename_group(&mut posts, "Blog Posts").await.unwrap();
        assert_eq!(posts.slug, "blog-posts");
        assert_eq!(engine.list_groups().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_group_moves_keep_concurrent_rename() {
        let (engine, posts, users) = setup().await;
        let mut current = engine
            .create_group_permission(&posts, NewPermission::new("Review"))
            .await
            .unwrap();
        let mut outdated = current.clone();

        engine.rename_permission(&mut current, "Review Drafts").await.unwrap();

        // Only group_id is written, the rename survives and the copy catches up
        assert!(engine.attach_permission_to_group(&users, &mut outdated).await.unwrap());
        assert_eq!(outdated.slug, "review-drafts");
        assert_eq!(outdated.group_id, users.id);

        assert!(engine.detach_permission_from_group(&users, &mut current).await.unwrap());
        let stored = engine.find_permission(&current).await.unwrap();
        assert_eq!(stored.slug, "review-drafts");
        assert_eq!(stored.group_id, GroupId::NONE);
    }
}
