use crate::{
    error::{RbacError, Result},
    models::*,
    repository::RbacRepository,
};
use std::sync::Arc;
use tracing::debug;

/// Resolves what a user holds through the roles assigned to them:
/// - role membership, straight from the `role_user` pivot
/// - effective permissions, granted only by active roles of an active user
pub struct PermissionChecker {
    repository: Arc<dyn RbacRepository>,
}

impl PermissionChecker {
    pub fn new(repository: Arc<dyn RbacRepository>) -> Self {
        Self { repository }
    }

    async fn load_user(&self, user: UserId) -> Result<User> {
        self.repository
            .find_user(user)
            .await?
            .ok_or_else(|| RbacError::not_found("User", user))
    }

    /// Roles assigned to the user, active or not
    pub async fn roles(&self, user: UserId) -> Result<Vec<Role>> {
        self.load_user(user).await?;
        self.repository.roles_for_user(user).await
    }

    pub async fn has_role(&self, user: UserId, role_slug: &str) -> Result<bool> {
        let roles = self.roles(user).await?;
        Ok(roles.iter().any(|role| role.slug == role_slug))
    }

    pub async fn has_any_role(&self, user: UserId, role_slugs: &[&str]) -> Result<bool> {
        let roles = self.roles(user).await?;
        Ok(role_slugs
            .iter()
            .any(|slug| roles.iter().any(|role| role.slug == *slug)))
    }

    pub async fn has_all_roles(&self, user: UserId, role_slugs: &[&str]) -> Result<bool> {
        let roles = self.roles(user).await?;
        Ok(role_slugs
            .iter()
            .all(|slug| roles.iter().any(|role| role.slug == *slug)))
    }

    /// Permissions granted by the user's active roles, deduplicated and ordered by slug
    pub async fn effective_permissions(&self, user: UserId) -> Result<Vec<Permission>> {
        let account = self.load_user(user).await?;
        if !account.is_active {
            debug!(user_id = %user, "Inactive user holds no permissions");
            return Ok(Vec::new());
        }

        let active_roles: Vec<RoleId> = self
            .repository
            .roles_for_user(user)
            .await?
            .into_iter()
            .filter(|role| role.is_active)
            .map(|role| role.id)
            .collect();

        if active_roles.is_empty() {
            return Ok(Vec::new());
        }

        self.repository.permissions_for_roles(&active_roles).await
    }

    pub async fn can(&self, user: UserId, permission_slug: &str) -> Result<bool> {
        let permissions = self.effective_permissions(user).await?;
        let allowed = permissions
            .iter()
            .any(|permission| permission.slug == permission_slug);

        debug!(user_id = %user, permission = permission_slug, allowed, "Permission check");
        Ok(allowed)
    }

    pub async fn can_any(&self, user: UserId, permission_slugs: &[&str]) -> Result<bool> {
        let permissions = self.effective_permissions(user).await?;
        Ok(permission_slugs
            .iter()
            .any(|slug| permissions.iter().any(|p| p.slug == *slug)))
    }

    pub async fn can_all(&self, user: UserId, permission_slugs: &[&str]) -> Result<bool> {
        let permissions = self.effective_permissions(user).await?;
        Ok(permission_slugs
            .iter()
            .all(|slug| permissions.iter().any(|p| p.slug == *slug)))
    }
}
