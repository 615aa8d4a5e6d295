//! Role-based access control for RustCare Engine
//!
//! Users receive permissions through the roles assigned to them. Permissions
//! can be organised into groups for presentation and administration.
//!
//! # Core Concepts
//!
//! - **Role**: a named, sluggable bundle of permissions that can be deactivated or locked
//! - **Permission**: a named capability checked by slug (e.g. `posts-create`)
//! - **PermissionsGroup**: owns zero or more permissions; `group_id = 0` means ungrouped
//! - **Pivot**: the `role_user` and `permission_role` join tables
//!
//! # Example
//!
//! ```rust
//! use auth_rbac::{NewPermission, NewRole, NewUser, RbacEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = RbacEngine::in_memory();
//!
//!     let alice = engine.create_user(NewUser::new("alice", "alice@example.com")).await?;
//!     let editor = engine.create_role(NewRole::new("Editor")).await?;
//!     let publish = engine.create_permission(NewPermission::new("Posts Publish")).await?;
//!
//!     engine.attach_permission(&editor, &publish).await?;
//!     engine.attach_role(&alice, &editor).await?;
//!
//!     assert!(engine.user_can(&alice, "posts-publish").await?);
//!     Ok(())
//! }
//! ```

pub mod check;
pub mod config;
pub mod engine;
pub mod error;
pub mod groups;
pub mod models;
pub mod publish;
pub mod repository;
pub mod roles;
pub mod schema;
pub mod slug;

pub use check::PermissionChecker;
pub use config::RbacConfig;
pub use engine::RbacEngine;
pub use error::*;
pub use models::*;
pub use publish::{publish, publish_all, PublishTag};
pub use repository::{postgres::PostgresRbacRepository, InMemoryRbacRepository, RbacRepository};
pub use schema::Schema;
pub use slug::slugify;
