//! Writes the crate's publishable assets into an application tree.

use crate::{
    config::{RbacConfig, DEFAULT_CONFIG},
    error::{RbacError, Result},
    schema::Schema,
};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{info, warn};

pub const CONFIG_PATH: &str = "config/rbac.toml";
pub const MIGRATION_PATH: &str = "migrations/0001_create_rbac_tables.sql";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTag {
    Config,
    Migrations,
}

impl PublishTag {
    pub const ALL: [PublishTag; 2] = [PublishTag::Config, PublishTag::Migrations];

    /// Destination relative to the target directory
    pub fn relative_path(self) -> &'static str {
        match self {
            PublishTag::Config => CONFIG_PATH,
            PublishTag::Migrations => MIGRATION_PATH,
        }
    }

    fn render(self, config: &RbacConfig) -> Result<String> {
        match self {
            PublishTag::Config => Ok(DEFAULT_CONFIG.to_string()),
            PublishTag::Migrations => Ok(Schema::from_config(config)?.to_sql()),
        }
    }
}

impl fmt::Display for PublishTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishTag::Config => write!(f, "config"),
            PublishTag::Migrations => write!(f, "migrations"),
        }
    }
}

impl FromStr for PublishTag {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "config" => Ok(PublishTag::Config),
            "migrations" => Ok(PublishTag::Migrations),
            other => Err(RbacError::InvalidInput(format!(
                "unknown publish tag '{}', expected 'config' or 'migrations'",
                other
            ))),
        }
    }
}

/// Write the asset for `tag` under `target_dir` and return the written paths.
///
/// Existing files are left untouched unless `force` is set.
pub fn publish(
    config: &RbacConfig,
    tag: PublishTag,
    target_dir: &Path,
    force: bool,
) -> Result<Vec<PathBuf>> {
    let path = target_dir.join(tag.relative_path());

    if path.exists() && !force {
        warn!(path = %path.display(), "Refusing to overwrite published file");
        return Err(RbacError::PublishError(format!(
            "{} already exists, use --force to overwrite",
            path.display()
        )));
    }

    let contents = tag.render(config)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, contents)?;

    info!(tag = %tag, path = %path.display(), "Published RBAC asset");
    Ok(vec![path])
}

/// Publish every tag
pub fn publish_all(config: &RbacConfig, target_dir: &Path, force: bool) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for tag in PublishTag::ALL {
        written.extend(publish(config, tag, target_dir, force)?);
    }
    Ok(written)
}
