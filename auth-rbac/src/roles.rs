use crate::{
    engine::{require_slug, RbacEngine},
    error::{RbacError, Result},
    models::*,
};
use tracing::{debug, info, warn};

impl RbacEngine {
    // =============================================================================
    // Role lifecycle
    // =============================================================================

    pub async fn create_role(&self, role: NewRole) -> Result<Role> {
        require_slug("role", &role.slug)?;

        let role = self.repository.insert_role(role).await?;
        info!(role_id = %role.id, slug = %role.slug, "Created role");
        Ok(role)
    }

    pub async fn find_role(&self, id: impl Into<RoleId>) -> Result<Role> {
        let id = id.into();
        self.repository
            .find_role(id)
            .await?
            .ok_or_else(|| RbacError::not_found("Role", id))
    }

    pub async fn find_role_by_slug(&self, slug: &str) -> Result<Role> {
        self.repository
            .find_role_by_slug(slug)
            .await?
            .ok_or_else(|| RbacError::not_found("Role", slug))
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        self.repository.list_roles().await
    }

    /// Delete a role and its pivot rows. Locked roles are refused.
    ///
    /// The lock is checked by the repository against the stored row.
    pub async fn delete_role(&self, id: impl Into<RoleId>) -> Result<bool> {
        let id = id.into();
        let deleted = match self.repository.delete_role(id).await {
            Err(RbacError::RoleLocked(slug)) => {
                warn!(role_id = %id, slug = %slug, "Refusing to delete locked role");
                return Err(RbacError::RoleLocked(slug));
            }
            other => other?,
        };
        self.invalidate_cache();

        if deleted {
            info!(role_id = %id, "Deleted role");
        }
        Ok(deleted)
    }

    /// Set the role's name and re-derive its slug
    pub async fn rename_role(&self, role: &mut Role, name: &str) -> Result<()> {
        let mut renamed = role.clone();
        renamed.set_name(name);
        require_slug("role", &renamed.slug)?;

        let stored = match self
            .repository
            .rename_role(role.id, &renamed.name, &renamed.slug)
            .await
        {
            Err(RbacError::RoleLocked(slug)) => {
                warn!(role_id = %role.id, slug = %slug, "Refusing to rename locked role");
                return Err(RbacError::RoleLocked(slug));
            }
            other => other?,
        };
        *role = stored;
        self.invalidate_cache();

        info!(role_id = %role.id, slug = %role.slug, "Renamed role");
        Ok(())
    }

    pub async fn activate_role(&self, role: &mut Role) -> Result<()> {
        *role = self.repository.set_role_active(role.id, true).await?;
        self.role_status_changed(role);
        Ok(())
    }

    pub async fn deactivate_role(&self, role: &mut Role) -> Result<()> {
        *role = self.repository.set_role_active(role.id, false).await?;
        self.role_status_changed(role);
        Ok(())
    }

    pub async fn lock_role(&self, role: &mut Role) -> Result<()> {
        *role = self.repository.set_role_locked(role.id, true).await?;
        self.role_status_changed(role);
        Ok(())
    }

    pub async fn unlock_role(&self, role: &mut Role) -> Result<()> {
        *role = self.repository.set_role_locked(role.id, false).await?;
        self.role_status_changed(role);
        Ok(())
    }

    fn role_status_changed(&self, role: &Role) {
        self.invalidate_cache();
        info!(
            role_id = %role.id,
            active = role.is_active,
            locked = role.is_locked,
            "Updated role status"
        );
    }

    // =============================================================================
    // Role / Permission
    // =============================================================================

    /// Grant a permission to a role. Returns false when it was already granted.
    pub async fn attach_permission(
        &self,
        role: impl Into<RoleId>,
        permission: impl Into<PermissionId>,
    ) -> Result<bool> {
        let (role, permission) = (role.into(), permission.into());
        let attached = self.repository.insert_permission_role(role, permission).await?;
        self.invalidate_cache();

        if attached {
            info!(role_id = %role, permission_id = %permission, "Attached permission to role");
        } else {
            debug!(role_id = %role, permission_id = %permission, "Permission already attached to role");
        }
        Ok(attached)
    }

    pub async fn detach_permission(
        &self,
        role: impl Into<RoleId>,
        permission: impl Into<PermissionId>,
    ) -> Result<u64> {
        let (role, permission) = (role.into(), permission.into());
        let detached = self
            .repository
            .delete_permission_role(role, Some(permission))
            .await?;
        self.invalidate_cache();

        info!(role_id = %role, permission_id = %permission, detached, "Detached permission from role");
        Ok(detached)
    }

    pub async fn detach_all_permissions(&self, role: impl Into<RoleId>) -> Result<u64> {
        let role = role.into();
        let detached = self.repository.delete_permission_role(role, None).await?;
        self.invalidate_cache();

        info!(role_id = %role, detached, "Detached all permissions from role");
        Ok(detached)
    }

    pub async fn role_has_permission(
        &self,
        role: impl Into<RoleId>,
        permission: impl Into<PermissionId>,
    ) -> Result<bool> {
        self.repository
            .permission_role_exists(role.into(), permission.into())
            .await
    }

    pub async fn role_permissions(&self, role: impl Into<RoleId>) -> Result<Vec<Permission>> {
        let role = self.find_role(role).await?;
        self.repository.permissions_for_role(role.id).await
    }

    /// Roles that grant the given permission
    pub async fn permission_roles(&self, permission: impl Into<PermissionId>) -> Result<Vec<Role>> {
        let permission = self.find_permission(permission).await?;
        self.repository.roles_for_permission(permission.id).await
    }

    // =============================================================================
    // Role / User
    // =============================================================================

    pub async fn attach_user(&self, role: impl Into<RoleId>, user: impl Into<UserId>) -> Result<bool> {
        self.attach_role(user, role).await
    }

    pub async fn detach_user(&self, role: impl Into<RoleId>, user: impl Into<UserId>) -> Result<u64> {
        self.detach_role(user, role).await
    }

    pub async fn detach_all_users(&self, role: impl Into<RoleId>) -> Result<u64> {
        let role = role.into();
        let detached = self.repository.delete_role_user(role, None).await?;
        self.invalidate_cache();

        info!(role_id = %role, detached, "Detached all users from role");
        Ok(detached)
    }

    pub async fn role_has_user(&self, role: impl Into<RoleId>, user: impl Into<UserId>) -> Result<bool> {
        self.repository.role_user_exists(role.into(), user.into()).await
    }

    pub async fn role_users(&self, role: impl Into<RoleId>) -> Result<Vec<User>> {
        let role = self.find_role(role).await?;
        self.repository.users_for_role(role.id).await
    }
}
