//! RBAC administration tool
//!
//! Usage:
//!   cargo run --bin rbac -- publish migrations --target .
//!   cargo run --bin rbac -- install
//!   cargo run --bin rbac -- grant alice editor
//!   cargo run --bin rbac -- check alice posts-publish
//!
//! Settings come from `--config` (or `RBAC_CONFIG`) and `RBAC__*` environment
//! variables. `install`, `grant`, `revoke` and `check` need `database.url`.

use anyhow::Context;
use auth_rbac::{
    publish::{publish, publish_all},
    PostgresRbacRepository, PublishTag, RbacConfig, RbacEngine, Schema,
};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rbac")]
#[command(about = "Manage roles, permissions and the RBAC schema")]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, env = "RBAC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy publishable assets into an application tree
    Publish {
        /// `config` or `migrations`. Publishes both when omitted
        tag: Option<PublishTag>,

        /// Directory to publish into
        #[arg(long, default_value = ".")]
        target: PathBuf,

        /// Overwrite files that already exist
        #[arg(long)]
        force: bool,
    },

    /// Create the RBAC tables in the configured database
    Install,

    /// Assign a role to a user
    Grant {
        /// Username
        user: String,
        /// Role slug
        role: String,
    },

    /// Remove a role from a user
    Revoke {
        /// Username
        user: String,
        /// Role slug
        role: String,
    },

    /// Check whether a user holds a permission
    Check {
        /// Username
        user: String,
        /// Permission slug
        permission: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = RbacConfig::load(args.config.as_deref()).context("failed to load RBAC configuration")?;

    match args.command {
        Command::Publish { tag, target, force } => {
            let written = match tag {
                Some(tag) => publish(&config, tag, &target, force)?,
                None => publish_all(&config, &target, force)?,
            };
            for path in written {
                println!("{}", path.display());
            }
        }
        Command::Install => {
            let repository = connect(&config).await?;
            Schema::from_config(&config)?.install(repository.pool()).await?;
            info!("RBAC tables are ready");
        }
        Command::Grant { user, role } => {
            let engine = engine(&config).await?;
            let user = engine.find_user_by_username(&user).await?;
            let role = engine.find_role_by_slug(&role).await?;

            if engine.attach_role(&user, &role).await? {
                println!("granted {} to {} ({})", role.slug, user.username, user.full_name());
            } else {
                println!("{} already has {}", user.username, role.slug);
            }
        }
        Command::Revoke { user, role } => {
            let engine = engine(&config).await?;
            let user = engine.find_user_by_username(&user).await?;
            let role = engine.find_role_by_slug(&role).await?;

            let detached = engine.detach_role(&user, &role).await?;
            if detached == 0 {
                warn!(user = %user.username, role = %role.slug, "User did not have the role");
            }
            println!("revoked {} from {} ({} row(s))", role.slug, user.username, detached);
        }
        Command::Check { user, permission } => {
            let engine = engine(&config).await?;
            let user = engine.find_user_by_username(&user).await?;

            let allowed = engine.user_can(&user, &permission).await?;
            println!("{}", if allowed { "allowed" } else { "denied" });
            if !allowed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn connect(config: &RbacConfig) -> anyhow::Result<PostgresRbacRepository> {
    if config.database.url.is_none() {
        anyhow::bail!("database.url is not configured (set RBAC__DATABASE__URL)");
    }
    let repository = PostgresRbacRepository::connect(&config.database, config.tables.clone())
        .await
        .context("failed to connect to database")?;
    Ok(repository)
}

async fn engine(config: &RbacConfig) -> anyhow::Result<RbacEngine> {
    let repository = connect(config).await?;
    Ok(RbacEngine::new(Arc::new(repository)).with_config(config.clone()))
}
