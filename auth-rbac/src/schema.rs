use crate::{
    config::{RbacConfig, TableNames},
    error::Result,
};
use sqlx::PgPool;
use tracing::info;

/// DDL for the RBAC tables, rendered with the configured table names.
///
/// `permissions.group_id` carries no foreign key: ungrouped permissions store
/// `0`, which never matches a group row.
#[derive(Debug, Clone)]
pub struct Schema {
    tables: TableNames,
}

impl Schema {
    pub fn new(tables: TableNames) -> Result<Self> {
        tables.validate()?;
        Ok(Self { tables })
    }

    pub fn from_config(config: &RbacConfig) -> Result<Self> {
        Self::new(config.tables.clone())
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// `CREATE TABLE IF NOT EXISTS` statements in dependency order
    pub fn statements(&self) -> Vec<String> {
        let t = &self.tables;

        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {users} (\n\
                 \x20   id BIGSERIAL PRIMARY KEY,\n\
                 \x20   username VARCHAR(255) NOT NULL UNIQUE,\n\
                 \x20   first_name VARCHAR(255),\n\
                 \x20   last_name VARCHAR(255),\n\
                 \x20   email VARCHAR(255) NOT NULL UNIQUE,\n\
                 \x20   is_admin BOOLEAN NOT NULL DEFAULT FALSE,\n\
                 \x20   is_active BOOLEAN NOT NULL DEFAULT TRUE,\n\
                 \x20   created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
                 \x20   updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\n\
                 )",
                users = t.users
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {roles} (\n\
                 \x20   id BIGSERIAL PRIMARY KEY,\n\
                 \x20   name VARCHAR(255) NOT NULL,\n\
                 \x20   slug VARCHAR(255) NOT NULL UNIQUE,\n\
                 \x20   description TEXT,\n\
                 \x20   is_active BOOLEAN NOT NULL DEFAULT TRUE,\n\
                 \x20   is_locked BOOLEAN NOT NULL DEFAULT FALSE,\n\
                 \x20   created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
                 \x20   updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\n\
                 )",
                roles = t.roles
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {role_user} (\n\
                 \x20   role_id BIGINT NOT NULL REFERENCES {roles} (id) ON DELETE CASCADE,\n\
                 \x20   user_id BIGINT NOT NULL REFERENCES {users} (id) ON DELETE CASCADE,\n\
                 \x20   created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
                 \x20   updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
                 \x20   PRIMARY KEY (role_id, user_id)\n\
                 )",
                role_user = t.role_user,
                roles = t.roles,
                users = t.users
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {groups} (\n\
                 \x20   id BIGSERIAL PRIMARY KEY,\n\
                 \x20   name VARCHAR(255) NOT NULL,\n\
                 \x20   slug VARCHAR(255) NOT NULL UNIQUE,\n\
                 \x20   description TEXT,\n\
                 \x20   created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
                 \x20   updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\n\
                 )",
                groups = t.permissions_group
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {permissions} (\n\
                 \x20   id BIGSERIAL PRIMARY KEY,\n\
                 \x20   group_id BIGINT NOT NULL DEFAULT 0,\n\
                 \x20   name VARCHAR(255) NOT NULL,\n\
                 \x20   slug VARCHAR(255) NOT NULL UNIQUE,\n\
                 \x20   description TEXT,\n\
                 \x20   created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
                 \x20   updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\n\
                 )",
                permissions = t.permissions
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{permissions}_group_id ON {permissions} (group_id)",
                permissions = t.permissions
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {permission_role} (\n\
                 \x20   permission_id BIGINT NOT NULL REFERENCES {permissions} (id) ON DELETE CASCADE,\n\
                 \x20   role_id BIGINT NOT NULL REFERENCES {roles} (id) ON DELETE CASCADE,\n\
                 \x20   created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
                 \x20   updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
                 \x20   PRIMARY KEY (permission_id, role_id)\n\
                 )",
                permission_role = t.permission_role,
                permissions = t.permissions,
                roles = t.roles
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{role_user}_user_id ON {role_user} (user_id)",
                role_user = t.role_user
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{permission_role}_role_id ON {permission_role} (role_id)",
                permission_role = t.permission_role
            ),
        ]
    }

    /// Render the statements as a single migration script
    pub fn to_sql(&self) -> String {
        let mut sql = String::from("-- Role-based access control tables\n\n");
        for statement in self.statements() {
            sql.push_str(&statement);
            sql.push_str(";\n\n");
        }
        sql
    }

    /// Create any missing tables in one transaction
    pub async fn install(&self, pool: &PgPool) -> Result<()> {
        let mut tx = pool.begin().await?;
        for statement in self.statements() {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!(
            roles = %self.tables.roles,
            permissions = %self.tables.permissions,
            "RBAC schema installed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_use_configured_tables() {
        let tables = TableNames {
            roles: "acl_roles".to_string(),
            role_user: "acl_role_user".to_string(),
            ..TableNames::default()
        };
        let schema = Schema::new(tables).unwrap();
        let sql = schema.to_sql();

        assert!(sql.contains("CREATE TABLE IF NOT EXISTS acl_roles ("));
        assert!(sql.contains("REFERENCES acl_roles (id) ON DELETE CASCADE"));
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS acl_role_user ("));
        assert!(!sql.contains("EXISTS roles ("));
    }

    #[test]
    fn test_pivots_have_composite_keys() {
        let schema = Schema::new(TableNames::default()).unwrap();
        let sql = schema.to_sql();

        assert!(sql.contains("PRIMARY KEY (role_id, user_id)"));
        assert!(sql.contains("PRIMARY KEY (permission_id, role_id)"));
        assert!(sql.contains("group_id BIGINT NOT NULL DEFAULT 0"));
    }

    #[test]
    fn test_tables_created_before_pivots() {
        let schema = Schema::new(TableNames::default()).unwrap();
        let statements = schema.statements();
        let position = |needle: &str| {
            statements
                .iter()
                .position(|s| s.starts_with(&format!("CREATE TABLE IF NOT EXISTS {} (", needle)))
                .unwrap()
        };

        assert!(position("roles") < position("role_user"));
        assert!(position("users") < position("role_user"));
        assert!(position("permissions") < position("permission_role"));
    }
}
