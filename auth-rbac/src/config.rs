use crate::error::{RbacError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration shipped with the crate and written by `rbac publish config`.
pub const DEFAULT_CONFIG: &str = include_str!("../assets/rbac.toml");

/// Prefix for environment overrides, e.g. `RBAC__TABLES__ROLES=acl_roles`.
pub const ENV_PREFIX: &str = "RBAC";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacConfig {
    pub database: DatabaseConfig,
    pub tables: TableNames,
    /// Cache `user_can` results until the next mutation
    pub check_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string. The in-memory store is used when unset.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Table names for every entity and pivot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub users: String,
    pub roles: String,
    pub role_user: String,
    pub permissions: String,
    pub permission_role: String,
    pub permissions_group: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            users: "users".to_string(),
            roles: "roles".to_string(),
            role_user: "role_user".to_string(),
            permissions: "permissions".to_string(),
            permission_role: "permission_role".to_string(),
            permissions_group: "permissions_group".to_string(),
        }
    }
}

impl TableNames {
    fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("users", self.users.as_str()),
            ("roles", self.roles.as_str()),
            ("role_user", self.role_user.as_str()),
            ("permissions", self.permissions.as_str()),
            ("permission_role", self.permission_role.as_str()),
            ("permissions_group", self.permissions_group.as_str()),
        ]
        .into_iter()
    }

    /// Table names are interpolated into SQL, so only plain identifiers are accepted.
    pub fn validate(&self) -> Result<()> {
        let mut seen = Vec::new();
        for (key, name) in self.iter() {
            if !is_identifier(name) {
                return Err(RbacError::InvalidInput(format!(
                    "tables.{} is not a valid SQL identifier: {:?}",
                    key, name
                )));
            }
            if seen.contains(&name) {
                return Err(RbacError::InvalidInput(format!(
                    "tables.{} reuses table name {:?}",
                    key, name
                )));
            }
            seen.push(name);
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl RbacConfig {
    /// Load defaults, then the optional file, then `RBAC__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(File::from_str(
            DEFAULT_CONFIG,
            config::FileFormat::Toml,
        ));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: RbacConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults, without consulting the environment.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: RbacConfig = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(File::from_str(contents, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(RbacError::InvalidInput(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        self.tables.validate()
    }
}
