use crate::slug::slugify;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident, $model:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<&$model> for $name {
            fn from(model: &$model) -> Self {
                model.id
            }
        }
    };
}

typed_id!(
    /// Primary key of a [`User`]
    UserId,
    User
);
typed_id!(
    /// Primary key of a [`Role`]
    RoleId,
    Role
);
typed_id!(
    /// Primary key of a [`Permission`]
    PermissionId,
    Permission
);
typed_id!(
    /// Primary key of a [`PermissionsGroup`]
    GroupId,
    PermissionsGroup
);

impl GroupId {
    /// Sentinel stored in `permissions.group_id` for ungrouped permissions
    pub const NONE: GroupId = GroupId(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::NONE
    }
}

/// Application actor. Users hold permissions only through their roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// First and last name, or the username when neither is set
    pub fn full_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.username.clone(),
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user:{}#{}", self.id, self.username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Set the name and re-derive the slug from it.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.slug = slugify(name);
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "role:{}#{}", self.id, self.slug)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Permission {
    pub id: PermissionId,
    pub group_id: GroupId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.slug = slugify(name);
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_id.is_none()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "permission:{}#{}", self.id, self.slug)
    }
}

/// Named container owning zero or more permissions through `group_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PermissionsGroup {
    pub id: GroupId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PermissionsGroup {
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.slug = slugify(name);
    }
}

impl fmt::Display for PermissionsGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group:{}#{}", self.id, self.slug)
    }
}

// =============================================================================
// Creation requests
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_admin: bool,
    pub is_active: bool,
}

impl NewUser {
    pub fn new(username: &str, email: &str) -> Self {
        Self {
            username: username.to_string(),
            email: email.to_string(),
            first_name: None,
            last_name: None,
            is_admin: false,
            is_active: true,
        }
    }

    pub fn with_names(mut self, first_name: &str, last_name: &str) -> Self {
        self.first_name = Some(first_name.to_string());
        self.last_name = Some(last_name.to_string());
        self
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub is_locked: bool,
}

impl NewRole {
    /// New active, unlocked role whose slug is derived from `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            slug: slugify(name),
            description: None,
            is_active: true,
            is_locked: false,
        }
    }

    /// Override the derived slug. The value is normalised like a name.
    pub fn with_slug(mut self, slug: &str) -> Self {
        self.slug = slugify(slug);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn locked(mut self) -> Self {
        self.is_locked = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPermission {
    pub group_id: GroupId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

impl NewPermission {
    pub fn new(name: &str) -> Self {
        Self {
            group_id: GroupId::NONE,
            name: name.to_string(),
            slug: slugify(name),
            description: None,
        }
    }

    pub fn with_slug(mut self, slug: &str) -> Self {
        self.slug = slugify(slug);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn in_group(mut self, group: impl Into<GroupId>) -> Self {
        self.group_id = group.into();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPermissionsGroup {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

impl NewPermissionsGroup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            slug: slugify(name),
            description: None,
        }
    }

    pub fn with_slug(mut self, slug: &str) -> Self {
        self.slug = slugify(slug);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}
