use crate::{
    check::PermissionChecker,
    config::RbacConfig,
    error::{RbacError, Result},
    models::*,
    repository::{postgres::PostgresRbacRepository, InMemoryRbacRepository, RbacRepository},
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Core RBAC engine: entity lifecycle, user/role assignment and permission checks.
///
/// Role and group operations live in [`crate::roles`] and [`crate::groups`].
pub struct RbacEngine {
    /// Storage for entities and pivots
    pub(crate) repository: Arc<dyn RbacRepository>,

    /// Resolves roles and effective permissions
    checker: Arc<PermissionChecker>,

    /// Cache for `user_can` results (optional)
    cache: Option<Arc<DashMap<(UserId, String), bool>>>,

    /// Bumped on every mutation; a check only caches its result if this did
    /// not move while it ran
    generation: Arc<AtomicU64>,

    config: RbacConfig,
}

impl RbacEngine {
    /// Create a new engine over the given repository
    pub fn new(repository: Arc<dyn RbacRepository>) -> Self {
        let checker = Arc::new(PermissionChecker::new(repository.clone()));

        Self {
            repository,
            checker,
            cache: None,
            generation: Arc::new(AtomicU64::new(0)),
            config: RbacConfig::default(),
        }
    }

    /// Engine over an empty in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRbacRepository::new()))
    }

    /// Build an engine from configuration: PostgreSQL when `database.url` is
    /// set, the in-memory store otherwise.
    pub async fn from_config(config: &RbacConfig) -> Result<Self> {
        config.validate()?;

        let engine = match config.database.url {
            Some(_) => {
                let repository =
                    PostgresRbacRepository::connect(&config.database, config.tables.clone()).await?;
                Self::new(Arc::new(repository))
            }
            None => {
                warn!("No database.url configured, using the in-memory RBAC store");
                Self::in_memory()
            }
        };

        let engine = engine.with_config(config.clone());
        Ok(if config.check_cache {
            engine.with_cache()
        } else {
            engine
        })
    }

    pub fn with_config(mut self, config: RbacConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RbacConfig {
        &self.config
    }

    /// Enable caching for permission checks
    pub fn with_cache(mut self) -> Self {
        self.cache = Some(Arc::new(DashMap::new()));
        self
    }

    pub fn repository(&self) -> Arc<dyn RbacRepository> {
        self.repository.clone()
    }

    /// Drop every cached check. Called after each mutation.
    pub(crate) fn invalidate_cache(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(ref cache) = self.cache {
            cache.clear();
        }
    }

    // =============================================================================
    // Users
    // =============================================================================

    pub async fn create_user(&self, user: NewUser) -> Result<User> {
        if user.username.trim().is_empty() {
            return Err(RbacError::InvalidInput("username must not be empty".to_string()));
        }

        let user = self.repository.insert_user(user).await?;
        info!(user_id = %user.id, username = %user.username, "Created user");
        Ok(user)
    }

    pub async fn find_user(&self, id: impl Into<UserId>) -> Result<User> {
        let id = id.into();
        self.repository
            .find_user(id)
            .await?
            .ok_or_else(|| RbacError::not_found("User", id))
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<User> {
        self.repository
            .find_user_by_username(username)
            .await?
            .ok_or_else(|| RbacError::not_found("User", username))
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.repository.list_users().await
    }

    /// Enable or disable a user. Disabled users hold no permissions.
    pub async fn set_user_active(&self, user: &mut User, active: bool) -> Result<()> {
        *user = self.repository.set_user_active(user.id, active).await?;
        self.invalidate_cache();

        info!(user_id = %user.id, active, "Updated user status");
        Ok(())
    }

    /// Delete the user along with its role assignments
    pub async fn delete_user(&self, id: impl Into<UserId>) -> Result<bool> {
        let id = id.into();
        let deleted = self.repository.delete_user(id).await?;
        self.invalidate_cache();

        if deleted {
            info!(user_id = %id, "Deleted user");
        }
        Ok(deleted)
    }

    // =============================================================================
    // User / Role assignment
    // =============================================================================

    /// Assign a role to a user. Returns false when the user already had it.
    pub async fn attach_role(
        &self,
        user: impl Into<UserId>,
        role: impl Into<RoleId>,
    ) -> Result<bool> {
        let (user, role) = (user.into(), role.into());
        let attached = self.repository.insert_role_user(role, user).await?;
        self.invalidate_cache();

        if attached {
            info!(user_id = %user, role_id = %role, "Attached role to user");
        } else {
            debug!(user_id = %user, role_id = %role, "Role already attached to user");
        }
        Ok(attached)
    }

    /// Remove a role from a user, returning the number of detached rows
    pub async fn detach_role(
        &self,
        user: impl Into<UserId>,
        role: impl Into<RoleId>,
    ) -> Result<u64> {
        let (user, role) = (user.into(), role.into());
        let detached = self.repository.delete_role_user(role, Some(user)).await?;
        self.invalidate_cache();

        info!(user_id = %user, role_id = %role, detached, "Detached role from user");
        Ok(detached)
    }

    pub async fn detach_all_roles(&self, user: impl Into<UserId>) -> Result<u64> {
        let user = user.into();
        let detached = self.repository.delete_user_roles(user).await?;
        self.invalidate_cache();

        info!(user_id = %user, detached, "Detached all roles from user");
        Ok(detached)
    }

    pub async fn user_roles(&self, user: impl Into<UserId>) -> Result<Vec<Role>> {
        self.checker.roles(user.into()).await
    }

    // =============================================================================
    // Checks
    // =============================================================================

    pub async fn has_role(&self, user: impl Into<UserId>, role_slug: &str) -> Result<bool> {
        self.checker.has_role(user.into(), role_slug).await
    }

    pub async fn has_any_role(&self, user: impl Into<UserId>, role_slugs: &[&str]) -> Result<bool> {
        self.checker.has_any_role(user.into(), role_slugs).await
    }

    pub async fn has_all_roles(
        &self,
        user: impl Into<UserId>,
        role_slugs: &[&str],
    ) -> Result<bool> {
        self.checker.has_all_roles(user.into(), role_slugs).await
    }

    pub async fn effective_permissions(&self, user: impl Into<UserId>) -> Result<Vec<Permission>> {
        self.checker.effective_permissions(user.into()).await
    }

    /// Check if the user holds a permission through any active role
    pub async fn user_can(&self, user: impl Into<UserId>, permission_slug: &str) -> Result<bool> {
        let user = user.into();
        let cache_key = (user, permission_slug.to_string());

        // Check cache first if enabled
        if let Some(ref cache) = self.cache {
            if let Some(result) = cache.get(&cache_key) {
                debug!(user_id = %user, permission = permission_slug, "Cache hit for permission check");
                return Ok(*result);
            }
        }

        let generation = self.generation.load(Ordering::Acquire);
        let result = self.checker.can(user, permission_slug).await?;

        if let Some(ref cache) = self.cache {
            // Compared under the shard lock: a clear racing with this insert
            // either sees the entry and drops it, or bumped the generation first.
            let entry = cache.entry(cache_key);
            if self.generation.load(Ordering::Acquire) == generation {
                entry.insert(result);
            } else {
                debug!(user_id = %user, permission = permission_slug, "Skipping cache fill after concurrent mutation");
            }
        }

        Ok(result)
    }

    pub async fn user_cannot(&self, user: impl Into<UserId>, permission_slug: &str) -> Result<bool> {
        Ok(!self.user_can(user, permission_slug).await?)
    }

    pub async fn user_can_any(
        &self,
        user: impl Into<UserId>,
        permission_slugs: &[&str],
    ) -> Result<bool> {
        self.checker.can_any(user.into(), permission_slugs).await
    }

    pub async fn user_can_all(
        &self,
        user: impl Into<UserId>,
        permission_slugs: &[&str],
    ) -> Result<bool> {
        self.checker.can_all(user.into(), permission_slugs).await
    }

    // =============================================================================
    // Permissions
    // =============================================================================

    pub async fn create_permission(&self, permission: NewPermission) -> Result<Permission> {
        require_slug("permission", &permission.slug)?;
        if !permission.group_id.is_none() {
            self.find_group(permission.group_id).await?;
        }

        let permission = self.repository.insert_permission(permission).await?;
        info!(permission_id = %permission.id, slug = %permission.slug, "Created permission");
        Ok(permission)
    }

    pub async fn find_permission(&self, id: impl Into<PermissionId>) -> Result<Permission> {
        let id = id.into();
        self.repository
            .find_permission(id)
            .await?
            .ok_or_else(|| RbacError::not_found("Permission", id))
    }

    pub async fn find_permission_by_slug(&self, slug: &str) -> Result<Permission> {
        self.repository
            .find_permission_by_slug(slug)
            .await?
            .ok_or_else(|| RbacError::not_found("Permission", slug))
    }

    pub async fn list_permissions(&self) -> Result<Vec<Permission>> {
        self.repository.list_permissions(None).await
    }

    /// Rename a permission, re-deriving its slug
    pub async fn rename_permission(&self, permission: &mut Permission, name: &str) -> Result<()> {
        let mut renamed = permission.clone();
        renamed.set_name(name);
        require_slug("permission", &renamed.slug)?;

        *permission = self
            .repository
            .rename_permission(permission.id, &renamed.name, &renamed.slug)
            .await?;
        self.invalidate_cache();
        Ok(())
    }

    /// Delete the permission and detach it from every role
    pub async fn delete_permission(&self, id: impl Into<PermissionId>) -> Result<bool> {
        let id = id.into();
        let deleted = self.repository.delete_permission(id).await?;
        self.invalidate_cache();

        if deleted {
            info!(permission_id = %id, "Deleted permission");
        }
        Ok(deleted)
    }
}

pub(crate) fn require_slug(entity: &str, slug: &str) -> Result<()> {
    if slug.is_empty() {
        return Err(RbacError::InvalidInput(format!(
            "{} name must contain at least one letter or digit",
            entity
        )));
    }
    Ok(())
}
