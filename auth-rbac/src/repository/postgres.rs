//! PostgreSQL-backed RBAC repository
//!
//! Table names come from [`TableNames`], so every statement is rendered at
//! call time. Pivot inserts use `ON CONFLICT DO NOTHING` and report whether a
//! row was written; unique and foreign key violations are mapped to
//! [`RbacError::Conflict`] and [`RbacError::NotFound`].

use crate::{
    config::{DatabaseConfig, TableNames},
    error::{RbacError, Result},
    models::*,
    repository::RbacRepository,
};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

const USER_COLUMNS: &str =
    "id, username, first_name, last_name, email, is_admin, is_active, created_at, updated_at";
const ROLE_COLUMNS: &str =
    "id, name, slug, description, is_active, is_locked, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "id, group_id, name, slug, description, created_at, updated_at";
const GROUP_COLUMNS: &str = "id, name, slug, description, created_at, updated_at";

/// PostgreSQL-backed RBAC repository
pub struct PostgresRbacRepository {
    pool: PgPool,
    tables: TableNames,
}

impl PostgresRbacRepository {
    /// Create a repository over an existing pool
    pub fn new(pool: PgPool, tables: TableNames) -> Result<Self> {
        tables.validate()?;
        Ok(Self { pool, tables })
    }

    /// Connect using the database section of the configuration
    pub async fn connect(database: &DatabaseConfig, tables: TableNames) -> Result<Self> {
        let url = database.url.as_deref().ok_or_else(|| {
            RbacError::InvalidInput("database.url is required for PostgreSQL".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(database.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await
            .map_err(|e| RbacError::StorageError(format!("Failed to connect: {}", e)))?;

        info!("RBAC database pool created");
        Self::new(pool, tables)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Update one boolean column of a role, leaving the rest of the row alone
    async fn set_role_flag(&self, id: RoleId, column: &'static str, value: bool) -> Result<Role> {
        let sql = format!(
            "UPDATE {} SET {} = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            self.tables.roles, column, ROLE_COLUMNS
        );

        sqlx::query_as::<_, Role>(&sql)
            .bind(id)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RbacError::not_found("Role", id))
    }

    /// Explain why a guarded role write touched no row
    async fn locked_or_missing(&self, id: RoleId) -> Result<RbacError> {
        Ok(match self.find_role(id).await? {
            Some(role) => RbacError::RoleLocked(role.slug),
            None => RbacError::not_found("Role", id),
        })
    }
}

/// Map driver errors for writes: constraint violations become domain errors.
fn map_write_error(err: sqlx::Error, what: &str) -> RbacError {
    if let sqlx::Error::Database(ref db) = err {
        match db.code().as_deref() {
            Some(UNIQUE_VIOLATION) => {
                return RbacError::Conflict(format!("{}: {}", what, db.message()));
            }
            Some(FOREIGN_KEY_VIOLATION) => {
                return RbacError::NotFound {
                    entity: "Related record",
                    key: db.constraint().unwrap_or(what).to_string(),
                };
            }
            _ => {}
        }
    }
    RbacError::DatabaseError(err)
}

#[async_trait]
impl RbacRepository for PostgresRbacRepository {
    // =========================================================================
    // Users
    // =========================================================================

    async fn insert_user(&self, user: NewUser) -> Result<User> {
        debug!(username = %user.username, "Inserting user");

        let sql = format!(
            "INSERT INTO {} (username, first_name, last_name, email, is_admin, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW()) \
             RETURNING {}",
            self.tables.users, USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&sql)
            .bind(&user.username)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(user.is_admin)
            .bind(user.is_active)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, "insert user"))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", USER_COLUMNS, self.tables.users);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE username = $1",
            USER_COLUMNS, self.tables.users
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn set_user_active(&self, id: UserId, active: bool) -> Result<User> {
        let sql = format!(
            "UPDATE {} SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            self.tables.users, USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(active)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RbacError::not_found("User", id))
    }

    async fn delete_user(&self, id: UserId) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.tables.users);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let sql = format!("SELECT {} FROM {} ORDER BY id", USER_COLUMNS, self.tables.users);
        Ok(sqlx::query_as::<_, User>(&sql).fetch_all(&self.pool).await?)
    }

    // =========================================================================
    // Roles
    // =========================================================================

    async fn insert_role(&self, role: NewRole) -> Result<Role> {
        debug!(slug = %role.slug, "Inserting role");

        let sql = format!(
            "INSERT INTO {} (name, slug, description, is_active, is_locked, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW()) \
             RETURNING {}",
            self.tables.roles, ROLE_COLUMNS
        );

        sqlx::query_as::<_, Role>(&sql)
            .bind(&role.name)
            .bind(&role.slug)
            .bind(&role.description)
            .bind(role.is_active)
            .bind(role.is_locked)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, "insert role"))
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", ROLE_COLUMNS, self.tables.roles);
        Ok(sqlx::query_as::<_, Role>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_role_by_slug(&self, slug: &str) -> Result<Option<Role>> {
        let sql = format!("SELECT {} FROM {} WHERE slug = $1", ROLE_COLUMNS, self.tables.roles);
        Ok(sqlx::query_as::<_, Role>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn rename_role(&self, id: RoleId, name: &str, slug: &str) -> Result<Role> {
        let sql = format!(
            "UPDATE {} SET name = $2, slug = $3, updated_at = NOW() \
             WHERE id = $1 AND is_locked = FALSE RETURNING {}",
            self.tables.roles, ROLE_COLUMNS
        );

        let renamed = sqlx::query_as::<_, Role>(&sql)
            .bind(id)
            .bind(name)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_write_error(e, "rename role"))?;

        match renamed {
            Some(role) => Ok(role),
            None => Err(self.locked_or_missing(id).await?),
        }
    }

    async fn set_role_active(&self, id: RoleId, active: bool) -> Result<Role> {
        self.set_role_flag(id, "is_active", active).await
    }

    async fn set_role_locked(&self, id: RoleId, locked: bool) -> Result<Role> {
        self.set_role_flag(id, "is_locked", locked).await
    }

    async fn delete_role(&self, id: RoleId) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE id = $1 AND is_locked = FALSE",
            self.tables.roles
        );
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }

        match self.locked_or_missing(id).await? {
            RbacError::NotFound { .. } => Ok(false),
            locked => Err(locked),
        }
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let sql = format!("SELECT {} FROM {} ORDER BY id", ROLE_COLUMNS, self.tables.roles);
        Ok(sqlx::query_as::<_, Role>(&sql).fetch_all(&self.pool).await?)
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    async fn insert_permission(&self, permission: NewPermission) -> Result<Permission> {
        debug!(slug = %permission.slug, group_id = %permission.group_id, "Inserting permission");

        let sql = format!(
            "INSERT INTO {} (group_id, name, slug, description, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, NOW(), NOW()) \
             RETURNING {}",
            self.tables.permissions, PERMISSION_COLUMNS
        );

        sqlx::query_as::<_, Permission>(&sql)
            .bind(permission.group_id)
            .bind(&permission.name)
            .bind(&permission.slug)
            .bind(&permission.description)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, "insert permission"))
    }

    async fn find_permission(&self, id: PermissionId) -> Result<Option<Permission>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            PERMISSION_COLUMNS, self.tables.permissions
        );
        Ok(sqlx::query_as::<_, Permission>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_permission_by_slug(&self, slug: &str) -> Result<Option<Permission>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE slug = $1",
            PERMISSION_COLUMNS, self.tables.permissions
        );
        Ok(sqlx::query_as::<_, Permission>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn rename_permission(&self, id: PermissionId, name: &str, slug: &str) -> Result<Permission> {
        let sql = format!(
            "UPDATE {} SET name = $2, slug = $3, updated_at = NOW() WHERE id = $1 RETURNING {}",
            self.tables.permissions, PERMISSION_COLUMNS
        );

        sqlx::query_as::<_, Permission>(&sql)
            .bind(id)
            .bind(name)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_write_error(e, "rename permission"))?
            .ok_or_else(|| RbacError::not_found("Permission", id))
    }

    async fn set_permission_group(&self, id: PermissionId, group: GroupId) -> Result<Permission> {
        let sql = format!(
            "UPDATE {} SET group_id = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            self.tables.permissions, PERMISSION_COLUMNS
        );

        sqlx::query_as::<_, Permission>(&sql)
            .bind(id)
            .bind(group)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RbacError::not_found("Permission", id))
    }

    async fn delete_permission(&self, id: PermissionId) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.tables.permissions);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_permissions(&self, group: Option<GroupId>) -> Result<Vec<Permission>> {
        let permissions = match group {
            Some(group) => {
                let sql = format!(
                    "SELECT {} FROM {} WHERE group_id = $1 ORDER BY id",
                    PERMISSION_COLUMNS, self.tables.permissions
                );
                sqlx::query_as::<_, Permission>(&sql)
                    .bind(group)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM {} ORDER BY id",
                    PERMISSION_COLUMNS, self.tables.permissions
                );
                sqlx::query_as::<_, Permission>(&sql).fetch_all(&self.pool).await?
            }
        };
        Ok(permissions)
    }

    // =========================================================================
    // Permission groups
    // =========================================================================

    async fn insert_group(&self, group: NewPermissionsGroup) -> Result<PermissionsGroup> {
        debug!(slug = %group.slug, "Inserting permissions group");

        let sql = format!(
            "INSERT INTO {} (name, slug, description, created_at, updated_at) \
             VALUES ($1, $2, $3, NOW(), NOW()) \
             RETURNING {}",
            self.tables.permissions_group, GROUP_COLUMNS
        );

        sqlx::query_as::<_, PermissionsGroup>(&sql)
            .bind(&group.name)
            .bind(&group.slug)
            .bind(&group.description)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, "insert permissions group"))
    }

    async fn find_group(&self, id: GroupId) -> Result<Option<PermissionsGroup>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            GROUP_COLUMNS, self.tables.permissions_group
        );
        Ok(sqlx::query_as::<_, PermissionsGroup>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_group_by_slug(&self, slug: &str) -> Result<Option<PermissionsGroup>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE slug = $1",
            GROUP_COLUMNS, self.tables.permissions_group
        );
        Ok(sqlx::query_as::<_, PermissionsGroup>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn rename_group(&self, id: GroupId, name: &str, slug: &str) -> Result<PermissionsGroup> {
        let sql = format!(
            "UPDATE {} SET name = $2, slug = $3, updated_at = NOW() WHERE id = $1 RETURNING {}",
            self.tables.permissions_group, GROUP_COLUMNS
        );

        sqlx::query_as::<_, PermissionsGroup>(&sql)
            .bind(id)
            .bind(name)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_write_error(e, "rename permissions group"))?
            .ok_or_else(|| RbacError::not_found("PermissionsGroup", id))
    }

    async fn delete_group(&self, id: GroupId) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            RbacError::StorageError(format!("Failed to start transaction: {}", e))
        })?;

        let reparent = format!(
            "UPDATE {} SET group_id = $2, updated_at = NOW() WHERE group_id = $1",
            self.tables.permissions
        );
        let moved = sqlx::query(&reparent)
            .bind(id)
            .bind(GroupId::NONE)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let delete = format!("DELETE FROM {} WHERE id = $1", self.tables.permissions_group);
        let deleted = sqlx::query(&delete)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await.map_err(|e| {
            RbacError::StorageError(format!("Failed to commit transaction: {}", e))
        })?;

        debug!(group_id = %id, moved, "Deleted permissions group");
        Ok(deleted > 0)
    }

    async fn list_groups(&self) -> Result<Vec<PermissionsGroup>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY id",
            GROUP_COLUMNS, self.tables.permissions_group
        );
        Ok(sqlx::query_as::<_, PermissionsGroup>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    // =========================================================================
    // role_user pivot
    // =========================================================================

    async fn insert_role_user(&self, role: RoleId, user: UserId) -> Result<bool> {
        let sql = format!(
            "INSERT INTO {} (role_id, user_id, created_at, updated_at) \
             VALUES ($1, $2, NOW(), NOW()) \
             ON CONFLICT (role_id, user_id) DO NOTHING",
            self.tables.role_user
        );

        let result = sqlx::query(&sql)
            .bind(role)
            .bind(user)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, "attach role to user"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_role_user(&self, role: RoleId, user: Option<UserId>) -> Result<u64> {
        let result = match user {
            Some(user) => {
                let sql = format!(
                    "DELETE FROM {} WHERE role_id = $1 AND user_id = $2",
                    self.tables.role_user
                );
                sqlx::query(&sql).bind(role).bind(user).execute(&self.pool).await?
            }
            None => {
                let sql = format!("DELETE FROM {} WHERE role_id = $1", self.tables.role_user);
                sqlx::query(&sql).bind(role).execute(&self.pool).await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn delete_user_roles(&self, user: UserId) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE user_id = $1", self.tables.role_user);
        let result = sqlx::query(&sql).bind(user).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn role_user_exists(&self, role: RoleId, user: UserId) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE role_id = $1 AND user_id = $2)",
            self.tables.role_user
        );
        Ok(sqlx::query_scalar::<_, bool>(&sql)
            .bind(role)
            .bind(user)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn roles_for_user(&self, user: UserId) -> Result<Vec<Role>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id IN (SELECT role_id FROM {} WHERE user_id = $1) ORDER BY id",
            ROLE_COLUMNS, self.tables.roles, self.tables.role_user
        );
        Ok(sqlx::query_as::<_, Role>(&sql)
            .bind(user)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn users_for_role(&self, role: RoleId) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id IN (SELECT user_id FROM {} WHERE role_id = $1) ORDER BY id",
            USER_COLUMNS, self.tables.users, self.tables.role_user
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(role)
            .fetch_all(&self.pool)
            .await?)
    }

    // =========================================================================
    // permission_role pivot
    // =========================================================================

    async fn insert_permission_role(&self, role: RoleId, permission: PermissionId) -> Result<bool> {
        let sql = format!(
            "INSERT INTO {} (permission_id, role_id, created_at, updated_at) \
             VALUES ($1, $2, NOW(), NOW()) \
             ON CONFLICT (permission_id, role_id) DO NOTHING",
            self.tables.permission_role
        );

        let result = sqlx::query(&sql)
            .bind(permission)
            .bind(role)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, "attach permission to role"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_permission_role(
        &self,
        role: RoleId,
        permission: Option<PermissionId>,
    ) -> Result<u64> {
        let result = match permission {
            Some(permission) => {
                let sql = format!(
                    "DELETE FROM {} WHERE role_id = $1 AND permission_id = $2",
                    self.tables.permission_role
                );
                sqlx::query(&sql)
                    .bind(role)
                    .bind(permission)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "DELETE FROM {} WHERE role_id = $1",
                    self.tables.permission_role
                );
                sqlx::query(&sql).bind(role).execute(&self.pool).await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn permission_role_exists(&self, role: RoleId, permission: PermissionId) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE role_id = $1 AND permission_id = $2)",
            self.tables.permission_role
        );
        Ok(sqlx::query_scalar::<_, bool>(&sql)
            .bind(role)
            .bind(permission)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn permissions_for_role(&self, role: RoleId) -> Result<Vec<Permission>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id IN (SELECT permission_id FROM {} WHERE role_id = $1) ORDER BY id",
            PERMISSION_COLUMNS, self.tables.permissions, self.tables.permission_role
        );
        Ok(sqlx::query_as::<_, Permission>(&sql)
            .bind(role)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn roles_for_permission(&self, permission: PermissionId) -> Result<Vec<Role>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id IN (SELECT role_id FROM {} WHERE permission_id = $1) ORDER BY id",
            ROLE_COLUMNS, self.tables.roles, self.tables.permission_role
        );
        Ok(sqlx::query_as::<_, Role>(&sql)
            .bind(permission)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn permissions_for_roles(&self, roles: &[RoleId]) -> Result<Vec<Permission>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM {} WHERE id IN (SELECT permission_id FROM {} WHERE role_id = ANY($1)) ORDER BY slug",
            PERMISSION_COLUMNS, self.tables.permissions, self.tables.permission_role
        );
        let role_ids: Vec<i64> = roles.iter().map(|role| role.get()).collect();

        let permissions = sqlx::query_as::<_, Permission>(&sql)
            .bind(role_ids)
            .fetch_all(&self.pool)
            .await?;

        debug!("Resolved {} permissions for {} roles", permissions.len(), roles.len());
        Ok(permissions)
    }
}
