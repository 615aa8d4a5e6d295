use crate::{
    error::{RbacError, Result},
    models::*,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub mod postgres;

/// Storage interface for RBAC entities and the pivots between them.
///
/// Updates are column-targeted: each writes only the fields it names, so a
/// caller holding an outdated record cannot overwrite other columns.
/// Pivot inserts report whether a row was created, so callers can observe
/// idempotent attaches. Pivot deletes report how many rows were removed.
#[async_trait]
pub trait RbacRepository: Send + Sync {
    // Users
    async fn insert_user(&self, user: NewUser) -> Result<User>;
    async fn find_user(&self, id: UserId) -> Result<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn set_user_active(&self, id: UserId, active: bool) -> Result<User>;
    async fn delete_user(&self, id: UserId) -> Result<bool>;
    async fn list_users(&self) -> Result<Vec<User>>;

    // Roles
    async fn insert_role(&self, role: NewRole) -> Result<Role>;
    async fn find_role(&self, id: RoleId) -> Result<Option<Role>>;
    async fn find_role_by_slug(&self, slug: &str) -> Result<Option<Role>>;
    /// Set name and slug. Fails with `RoleLocked` when the stored role is locked.
    async fn rename_role(&self, id: RoleId, name: &str, slug: &str) -> Result<Role>;
    async fn set_role_active(&self, id: RoleId, active: bool) -> Result<Role>;
    async fn set_role_locked(&self, id: RoleId, locked: bool) -> Result<Role>;
    /// Fails with `RoleLocked` when the stored role is locked
    async fn delete_role(&self, id: RoleId) -> Result<bool>;
    async fn list_roles(&self) -> Result<Vec<Role>>;

    // Permissions
    async fn insert_permission(&self, permission: NewPermission) -> Result<Permission>;
    async fn find_permission(&self, id: PermissionId) -> Result<Option<Permission>>;
    async fn find_permission_by_slug(&self, slug: &str) -> Result<Option<Permission>>;
    async fn rename_permission(&self, id: PermissionId, name: &str, slug: &str) -> Result<Permission>;
    async fn set_permission_group(&self, id: PermissionId, group: GroupId) -> Result<Permission>;
    async fn delete_permission(&self, id: PermissionId) -> Result<bool>;
    /// All permissions, or only those whose `group_id` matches
    async fn list_permissions(&self, group: Option<GroupId>) -> Result<Vec<Permission>>;

    // Permission groups
    async fn insert_group(&self, group: NewPermissionsGroup) -> Result<PermissionsGroup>;
    async fn find_group(&self, id: GroupId) -> Result<Option<PermissionsGroup>>;
    async fn find_group_by_slug(&self, slug: &str) -> Result<Option<PermissionsGroup>>;
    async fn rename_group(&self, id: GroupId, name: &str, slug: &str) -> Result<PermissionsGroup>;
    /// Delete the group and move its permissions to `GroupId::NONE`
    async fn delete_group(&self, id: GroupId) -> Result<bool>;
    async fn list_groups(&self) -> Result<Vec<PermissionsGroup>>;

    // role_user pivot
    async fn insert_role_user(&self, role: RoleId, user: UserId) -> Result<bool>;
    /// Remove one user from the role, or every user when `user` is None
    async fn delete_role_user(&self, role: RoleId, user: Option<UserId>) -> Result<u64>;
    async fn delete_user_roles(&self, user: UserId) -> Result<u64>;
    async fn role_user_exists(&self, role: RoleId, user: UserId) -> Result<bool>;
    async fn roles_for_user(&self, user: UserId) -> Result<Vec<Role>>;
    async fn users_for_role(&self, role: RoleId) -> Result<Vec<User>>;

    // permission_role pivot
    async fn insert_permission_role(&self, role: RoleId, permission: PermissionId) -> Result<bool>;
    /// Remove one permission from the role, or every permission when `permission` is None
    async fn delete_permission_role(
        &self,
        role: RoleId,
        permission: Option<PermissionId>,
    ) -> Result<u64>;
    async fn permission_role_exists(&self, role: RoleId, permission: PermissionId) -> Result<bool>;
    async fn permissions_for_role(&self, role: RoleId) -> Result<Vec<Permission>>;
    async fn roles_for_permission(&self, permission: PermissionId) -> Result<Vec<Role>>;
    /// Distinct permissions granted by any of `roles`, ordered by slug
    async fn permissions_for_roles(&self, roles: &[RoleId]) -> Result<Vec<Permission>>;
}

#[derive(Default)]
struct Sequences {
    users: AtomicI64,
    roles: AtomicI64,
    permissions: AtomicI64,
    groups: AtomicI64,
}

fn next_id(sequence: &AtomicI64) -> i64 {
    sequence.fetch_add(1, Ordering::SeqCst) + 1
}

/// In-memory repository for testing and development
#[derive(Clone, Default)]
pub struct InMemoryRbacRepository {
    users: Arc<DashMap<UserId, User>>,
    roles: Arc<DashMap<RoleId, Role>>,
    permissions: Arc<DashMap<PermissionId, Permission>>,
    groups: Arc<DashMap<GroupId, PermissionsGroup>>,
    role_user: Arc<DashMap<(RoleId, UserId), DateTime<Utc>>>,
    permission_role: Arc<DashMap<(PermissionId, RoleId), DateTime<Utc>>>,
    sequences: Arc<Sequences>,
    /// Serializes writes so constraint checks and the write they guard are atomic
    writes: Arc<Mutex<()>>,
}

impl InMemoryRbacRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_user(&self, id: UserId) -> Result<()> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(RbacError::not_found("User", id))
        }
    }

    fn ensure_role(&self, id: RoleId) -> Result<()> {
        if self.roles.contains_key(&id) {
            Ok(())
        } else {
            Err(RbacError::not_found("Role", id))
        }
    }

    fn ensure_permission(&self, id: PermissionId) -> Result<()> {
        if self.permissions.contains_key(&id) {
            Ok(())
        } else {
            Err(RbacError::not_found("Permission", id))
        }
    }

    fn update_role_with(&self, id: RoleId, apply: impl FnOnce(&mut Role)) -> Result<Role> {
        let _guard = self.writes.lock();
        let mut stored = self
            .roles
            .get_mut(&id)
            .ok_or_else(|| RbacError::not_found("Role", id))?;
        apply(&mut *stored);
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    fn check_user_unique(&self, id: Option<UserId>, username: &str, email: &str) -> Result<()> {
        for entry in self.users.iter() {
            let user = entry.value();
            if Some(user.id) == id {
                continue;
            }
            if user.username == username {
                return Err(RbacError::Conflict(format!("username already taken: {}", username)));
            }
            if user.email == email {
                return Err(RbacError::Conflict(format!("email already taken: {}", email)));
            }
        }
        Ok(())
    }

    fn check_role_slug(&self, id: Option<RoleId>, slug: &str) -> Result<()> {
        let taken = self
            .roles
            .iter()
            .any(|entry| Some(entry.id) != id && entry.slug == slug);
        if taken {
            return Err(RbacError::Conflict(format!("role slug already taken: {}", slug)));
        }
        Ok(())
    }

    fn check_permission_slug(&self, id: Option<PermissionId>, slug: &str) -> Result<()> {
        let taken = self
            .permissions
            .iter()
            .any(|entry| Some(entry.id) != id && entry.slug == slug);
        if taken {
            return Err(RbacError::Conflict(format!(
                "permission slug already taken: {}",
                slug
            )));
        }
        Ok(())
    }

    fn check_group_slug(&self, id: Option<GroupId>, slug: &str) -> Result<()> {
        let taken = self
            .groups
            .iter()
            .any(|entry| Some(entry.id) != id && entry.slug == slug);
        if taken {
            return Err(RbacError::Conflict(format!("group slug already taken: {}", slug)));
        }
        Ok(())
    }
}

fn sorted_by_id<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items
}

#[async_trait]
impl RbacRepository for InMemoryRbacRepository {
    async fn insert_user(&self, user: NewUser) -> Result<User> {
        let _guard = self.writes.lock();
        self.check_user_unique(None, &user.username, &user.email)?;

        let now = Utc::now();
        let user = User {
            id: UserId(next_id(&self.sequences.users)),
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            is_admin: user.is_admin,
            is_active: user.is_active,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|entry| entry.username == username)
            .map(|entry| entry.value().clone()))
    }

    async fn set_user_active(&self, id: UserId, active: bool) -> Result<User> {
        let _guard = self.writes.lock();
        let mut stored = self
            .users
            .get_mut(&id)
            .ok_or_else(|| RbacError::not_found("User", id))?;
        stored.is_active = active;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete_user(&self, id: UserId) -> Result<bool> {
        let _guard = self.writes.lock();
        if self.users.remove(&id).is_none() {
            return Ok(false);
        }
        self.role_user.retain(|(_, user), _| *user != id);
        Ok(true)
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let users = self.users.iter().map(|entry| entry.value().clone()).collect();
        Ok(sorted_by_id(users, |user: &User| user.id))
    }

    async fn insert_role(&self, role: NewRole) -> Result<Role> {
        let _guard = self.writes.lock();
        self.check_role_slug(None, &role.slug)?;

        let now = Utc::now();
        let role = Role {
            id: RoleId(next_id(&self.sequences.roles)),
            name: role.name,
            slug: role.slug,
            description: role.description,
            is_active: role.is_active,
            is_locked: role.is_locked,
            created_at: now,
            updated_at: now,
        };
        self.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>> {
        Ok(self.roles.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_role_by_slug(&self, slug: &str) -> Result<Option<Role>> {
        Ok(self
            .roles
            .iter()
            .find(|entry| entry.slug == slug)
            .map(|entry| entry.value().clone()))
    }

    async fn rename_role(&self, id: RoleId, name: &str, slug: &str) -> Result<Role> {
        let _guard = self.writes.lock();
        self.check_role_slug(Some(id), slug)?;

        let mut stored = self
            .roles
            .get_mut(&id)
            .ok_or_else(|| RbacError::not_found("Role", id))?;
        if stored.is_locked {
            return Err(RbacError::RoleLocked(stored.slug.clone()));
        }
        stored.name = name.to_string();
        stored.slug = slug.to_string();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn set_role_active(&self, id: RoleId, active: bool) -> Result<Role> {
        self.update_role_with(id, |role| role.is_active = active)
    }

    async fn set_role_locked(&self, id: RoleId, locked: bool) -> Result<Role> {
        self.update_role_with(id, |role| role.is_locked = locked)
    }

    async fn delete_role(&self, id: RoleId) -> Result<bool> {
        let _guard = self.writes.lock();
        let locked = self
            .roles
            .get(&id)
            .map(|role| role.is_locked.then(|| role.slug.clone()));
        match locked {
            None => return Ok(false),
            Some(Some(slug)) => return Err(RbacError::RoleLocked(slug)),
            Some(None) => {}
        }

        self.roles.remove(&id);
        self.role_user.retain(|(role, _), _| *role != id);
        self.permission_role.retain(|(_, role), _| *role != id);
        Ok(true)
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let roles = self.roles.iter().map(|entry| entry.value().clone()).collect();
        Ok(sorted_by_id(roles, |role: &Role| role.id))
    }

    async fn insert_permission(&self, permission: NewPermission) -> Result<Permission> {
        let _guard = self.writes.lock();
        self.check_permission_slug(None, &permission.slug)?;

        let now = Utc::now();
        let permission = Permission {
            id: PermissionId(next_id(&self.sequences.permissions)),
            group_id: permission.group_id,
            name: permission.name,
            slug: permission.slug,
            description: permission.description,
            created_at: now,
            updated_at: now,
        };
        self.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn find_permission(&self, id: PermissionId) -> Result<Option<Permission>> {
        Ok(self.permissions.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_permission_by_slug(&self, slug: &str) -> Result<Option<Permission>> {
        Ok(self
            .permissions
            .iter()
            .find(|entry| entry.slug == slug)
            .map(|entry| entry.value().clone()))
    }

    async fn rename_permission(&self, id: PermissionId, name: &str, slug: &str) -> Result<Permission> {
        let _guard = self.writes.lock();
        self.check_permission_slug(Some(id), slug)?;

        let mut stored = self
            .permissions
            .get_mut(&id)
            .ok_or_else(|| RbacError::not_found("Permission", id))?;
        stored.name = name.to_string();
        stored.slug = slug.to_string();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn set_permission_group(&self, id: PermissionId, group: GroupId) -> Result<Permission> {
        let _guard = self.writes.lock();
        let mut stored = self
            .permissions
            .get_mut(&id)
            .ok_or_else(|| RbacError::not_found("Permission", id))?;
        stored.group_id = group;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete_permission(&self, id: PermissionId) -> Result<bool> {
        let _guard = self.writes.lock();
        if self.permissions.remove(&id).is_none() {
            return Ok(false);
        }
        self.permission_role.retain(|(permission, _), _| *permission != id);
        Ok(true)
    }

    async fn list_permissions(&self, group: Option<GroupId>) -> Result<Vec<Permission>> {
        let permissions = self
            .permissions
            .iter()
            .filter(|entry| group.map_or(true, |group| entry.group_id == group))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(sorted_by_id(permissions, |permission: &Permission| permission.id))
    }

    async fn insert_group(&self, group: NewPermissionsGroup) -> Result<PermissionsGroup> {
        let _guard = self.writes.lock();
        self.check_group_slug(None, &group.slug)?;

        let now = Utc::now();
        let group = PermissionsGroup {
            id: GroupId(next_id(&self.sequences.groups)),
            name: group.name,
            slug: group.slug,
            description: group.description,
            created_at: now,
            updated_at: now,
        };
        self.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn find_group(&self, id: GroupId) -> Result<Option<PermissionsGroup>> {
        Ok(self.groups.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_group_by_slug(&self, slug: &str) -> Result<Option<PermissionsGroup>> {
        Ok(self
            .groups
            .iter()
            .find(|entry| entry.slug == slug)
            .map(|entry| entry.value().clone()))
    }

    async fn rename_group(&self, id: GroupId, name: &str, slug: &str) -> Result<PermissionsGroup> {
        let _guard = self.writes.lock();
        self.check_group_slug(Some(id), slug)?;

        let mut stored = self
            .groups
            .get_mut(&id)
            .ok_or_else(|| RbacError::not_found("PermissionsGroup", id))?;
        stored.name = name.to_string();
        stored.slug = slug.to_string();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete_group(&self, id: GroupId) -> Result<bool> {
        let _guard = self.writes.lock();
        if self.groups.remove(&id).is_none() {
            return Ok(false);
        }

        let now = Utc::now();
        for mut entry in self.permissions.iter_mut() {
            if entry.group_id == id {
                entry.group_id = GroupId::NONE;
                entry.updated_at = now;
            }
        }
        Ok(true)
    }

    async fn list_groups(&self) -> Result<Vec<PermissionsGroup>> {
        let groups = self.groups.iter().map(|entry| entry.value().clone()).collect();
        Ok(sorted_by_id(groups, |group: &PermissionsGroup| group.id))
    }

    async fn insert_role_user(&self, role: RoleId, user: UserId) -> Result<bool> {
        let _guard = self.writes.lock();
        self.ensure_role(role)?;
        self.ensure_user(user)?;

        let mut inserted = false;
        self.role_user.entry((role, user)).or_insert_with(|| {
            inserted = true;
            Utc::now()
        });
        Ok(inserted)
    }

    async fn delete_role_user(&self, role: RoleId, user: Option<UserId>) -> Result<u64> {
        let _guard = self.writes.lock();
        match user {
            Some(user) => Ok(u64::from(self.role_user.remove(&(role, user)).is_some())),
            None => {
                let before = self.role_user.len();
                self.role_user.retain(|(r, _), _| *r != role);
                Ok(before.saturating_sub(self.role_user.len()) as u64)
            }
        }
    }

    async fn delete_user_roles(&self, user: UserId) -> Result<u64> {
        let _guard = self.writes.lock();
        let before = self.role_user.len();
        self.role_user.retain(|(_, u), _| *u != user);
        Ok(before.saturating_sub(self.role_user.len()) as u64)
    }

    async fn role_user_exists(&self, role: RoleId, user: UserId) -> Result<bool> {
        Ok(self.role_user.contains_key(&(role, user)))
    }

    async fn roles_for_user(&self, user: UserId) -> Result<Vec<Role>> {
        let role_ids: Vec<RoleId> = self
            .role_user
            .iter()
            .filter(|entry| entry.key().1 == user)
            .map(|entry| entry.key().0)
            .collect();

        let roles = role_ids
            .into_iter()
            .filter_map(|id| self.roles.get(&id).map(|entry| entry.value().clone()))
            .collect();
        Ok(sorted_by_id(roles, |role: &Role| role.id))
    }

    async fn users_for_role(&self, role: RoleId) -> Result<Vec<User>> {
        let user_ids: Vec<UserId> = self
            .role_user
            .iter()
            .filter(|entry| entry.key().0 == role)
            .map(|entry| entry.key().1)
            .collect();

        let users = user_ids
            .into_iter()
            .filter_map(|id| self.users.get(&id).map(|entry| entry.value().clone()))
            .collect();
        Ok(sorted_by_id(users, |user: &User| user.id))
    }

    async fn insert_permission_role(&self, role: RoleId, permission: PermissionId) -> Result<bool> {
        let _guard = self.writes.lock();
        self.ensure_role(role)?;
        self.ensure_permission(permission)?;

        let mut inserted = false;
        self.permission_role
            .entry((permission, role))
            .or_insert_with(|| {
                inserted = true;
                Utc::now()
            });
        Ok(inserted)
    }

    async fn delete_permission_role(
        &self,
        role: RoleId,
        permission: Option<PermissionId>,
    ) -> Result<u64> {
        let _guard = self.writes.lock();
        match permission {
            Some(permission) => Ok(u64::from(
                self.permission_role.remove(&(permission, role)).is_some(),
            )),
            None => {
                let before = self.permission_role.len();
                self.permission_role.retain(|(_, r), _| *r != role);
                Ok(before.saturating_sub(self.permission_role.len()) as u64)
            }
        }
    }

    async fn permission_role_exists(&self, role: RoleId, permission: PermissionId) -> Result<bool> {
        Ok(self.permission_role.contains_key(&(permission, role)))
    }

    async fn permissions_for_role(&self, role: RoleId) -> Result<Vec<Permission>> {
        let permission_ids: Vec<PermissionId> = self
            .permission_role
            .iter()
            .filter(|entry| entry.key().1 == role)
            .map(|entry| entry.key().0)
            .collect();

        let permissions = permission_ids
            .into_iter()
            .filter_map(|id| self.permissions.get(&id).map(|entry| entry.value().clone()))
            .collect();
        Ok(sorted_by_id(permissions, |permission: &Permission| permission.id))
    }

    async fn roles_for_permission(&self, permission: PermissionId) -> Result<Vec<Role>> {
        let role_ids: Vec<RoleId> = self
            .permission_role
            .iter()
            .filter(|entry| entry.key().0 == permission)
            .map(|entry| entry.key().1)
            .collect();

        let roles = role_ids
            .into_iter()
            .filter_map(|id| self.roles.get(&id).map(|entry| entry.value().clone()))
            .collect();
        Ok(sorted_by_id(roles, |role: &Role| role.id))
    }

    async fn permissions_for_roles(&self, roles: &[RoleId]) -> Result<Vec<Permission>> {
        let mut permission_ids: Vec<PermissionId> = self
            .permission_role
            .iter()
            .filter(|entry| roles.contains(&entry.key().1))
            .map(|entry| entry.key().0)
            .collect();
        permission_ids.sort();
        permission_ids.dedup();

        let mut permissions: Vec<Permission> = permission_ids
            .into_iter()
            .filter_map(|id| self.permissions.get(&id).map(|entry| entry.value().clone()))
            .collect();
        permissions.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_repository() {
        let repo = InMemoryRbacRepository::new();

        let user = repo.insert_user(NewUser::new("alice", "alice@example.com")).await.unwrap();
        let role = repo.insert_role(NewRole::new("Editor")).await.unwrap();

        // First insert creates the pivot row, the second is a no-op
        assert!(repo.insert_role_user(role.id, user.id).await.unwrap());
        assert!(!repo.insert_role_user(role.id, user.id).await.unwrap());
        assert!(repo.role_user_exists(role.id, user.id).await.unwrap());

        let roles = repo.roles_for_user(user.id).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].slug, "editor");

        assert_eq!(repo.delete_role_user(role.id, Some(user.id)).await.unwrap(), 1);
        assert_eq!(repo.delete_role_user(role.id, Some(user.id)).await.unwrap(), 0);
        assert!(!repo.role_user_exists(role.id, user.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_ids_are_sequential_per_table() {
        let repo = InMemoryRbacRepository::new();

        let admin = repo.insert_role(NewRole::new("Admin")).await.unwrap();
        let member = repo.insert_role(NewRole::new("Member")).await.unwrap();
        let permission = repo.insert_permission(NewPermission::new("Create Posts")).await.unwrap();

        assert_eq!(admin.id, RoleId(1));
        assert_eq!(member.id, RoleId(2));
        assert_eq!(permission.id, PermissionId(1));
    }

    #[tokio::test]
    async fn test_unique_constraints() {
        let repo = InMemoryRbacRepository::new();

        repo.insert_role(NewRole::new("Admin")).await.unwrap();
        let err = repo.insert_role(NewRole::new("admin")).await.unwrap_err();
        assert!(matches!(err, RbacError::Conflict(_)));

        repo.insert_user(NewUser::new("alice", "alice@example.com")).await.unwrap();
        let err = repo
            .insert_user(NewUser::new("alice2", "alice@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_pivot_requires_existing_records() {
        let repo = InMemoryRbacRepository::new();
        let role = repo.insert_role(NewRole::new("Admin")).await.unwrap();

        let err = repo.insert_permission_role(role.id, PermissionId(42)).await.unwrap_err();
        assert!(matches!(err, RbacError::NotFound { entity: "Permission", .. }));

        let err = repo.insert_role_user(role.id, UserId(42)).await.unwrap_err();
        assert!(matches!(err, RbacError::NotFound { entity: "User", .. }));
    }

    #[tokio::test]
    async fn test_delete_role_removes_pivot_rows() {
        let repo = InMemoryRbacRepository::new();
        let user = repo.insert_user(NewUser::new("bob", "bob@example.com")).await.unwrap();
        let role = repo.insert_role(NewRole::new("Moderator")).await.unwrap();
        let permission = repo.insert_permission(NewPermission::new("Ban Users")).await.unwrap();

        repo.insert_role_user(role.id, user.id).await.unwrap();
        repo.insert_permission_role(role.id, permission.id).await.unwrap();

        assert!(repo.delete_role(role.id).await.unwrap());
        assert!(!repo.delete_role(role.id).await.unwrap());
        assert!(repo.roles_for_user(user.id).await.unwrap().is_empty());
        assert!(repo.roles_for_permission(permission.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_group_reparents_permissions() {
        let repo = InMemoryRbacRepository::new();
        let group = repo.insert_group(NewPermissionsGroup::new("Blog")).await.unwrap();
        let permission = repo
            .insert_permission(NewPermission::new("Publish Posts").in_group(group.id))
            .await
            .unwrap();

        assert_eq!(repo.list_permissions(Some(group.id)).await.unwrap().len(), 1);
        assert!(repo.delete_group(group.id).await.unwrap());

        let permission = repo.find_permission(permission.id).await.unwrap().unwrap();
        assert_eq!(permission.group_id, GroupId::NONE);
        assert!(repo.list_permissions(Some(group.id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_permissions_for_roles_is_distinct_and_ordered() {
        let repo = InMemoryRbacRepository::new();
        let writer = repo.insert_role(NewRole::new("Writer")).await.unwrap();
        let editor = repo.insert_role(NewRole::new("Editor")).await.unwrap();
        let publish = repo.insert_permission(NewPermission::new("Publish")).await.unwrap();
        let draft = repo.insert_permission(NewPermission::new("Draft")).await.unwrap();

        repo.insert_permission_role(writer.id, publish.id).await.unwrap();
        repo.insert_permission_role(writer.id, draft.id).await.unwrap();
        repo.insert_permission_role(editor.id, publish.id).await.unwrap();

        let permissions = repo.permissions_for_roles(&[writer.id, editor.id]).await.unwrap();
        let slugs: Vec<&str> = permissions.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, vec!["draft", "publish"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_respect_unique_slug() {
        let repo = InMemoryRbacRepository::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.insert_role(NewRole::new("Editor")).await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(err) => assert!(matches!(err, RbacError::Conflict(_))),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(repo.list_roles().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_single_detach_counts_once() {
        let repo = InMemoryRbacRepository::new();
        let role = repo.insert_role(NewRole::new("Editor")).await.unwrap();
        let mut users = Vec::new();
        for i in 0..8 {
            let user = repo
                .insert_user(NewUser::new(&format!("user{}", i), &format!("user{}@example.com", i)))
                .await
                .unwrap();
            repo.insert_role_user(role.id, user.id).await.unwrap();
            users.push(user.id);
        }

        let handles: Vec<_> = users
            .iter()
            .map(|&user| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.delete_role_user(role.id, Some(user)).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }
        assert_eq!(repo.delete_role_user(role.id, Some(users[0])).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_targeted_role_writes() {
        let repo = InMemoryRbacRepository::new();
        let role = repo.insert_role(NewRole::new("Editor")).await.unwrap();

        let locked = repo.set_role_locked(role.id, true).await.unwrap();
        assert!(locked.is_locked);
        let inactive = repo.set_role_active(role.id, false).await.unwrap();
        assert!(inactive.is_locked, "flag writes leave other columns alone");
        assert!(!inactive.is_active);

        let err = repo.rename_role(role.id, "Writer", "writer").await.unwrap_err();
        assert!(matches!(err, RbacError::RoleLocked(_)));
        let err = repo.delete_role(role.id).await.unwrap_err();
        assert!(matches!(err, RbacError::RoleLocked(_)));

        repo.set_role_locked(role.id, false).await.unwrap();
        let renamed = repo.rename_role(role.id, "Writer", "writer").await.unwrap();
        assert_eq!(renamed.slug, "writer");
        assert!(!renamed.is_active);
        assert!(repo.delete_role(role.id).await.unwrap());
        assert!(matches!(
            repo.set_role_active(role.id, true).await,
            Err(RbacError::NotFound { entity: "Role", .. })
        ));
    }

    #[tokio::test]
    async fn test_set_permission_group_keeps_name() {
        let repo = InMemoryRbacRepository::new();
        let group = repo.insert_group(NewPermissionsGroup::new("Blog")).await.unwrap();
        let permission = repo.insert_permission(NewPermission::new("Publish")).await.unwrap();

        repo.rename_permission(permission.id, "Publish Posts", "publish-posts")
            .await
            .unwrap();
        let moved = repo.set_permission_group(permission.id, group.id).await.unwrap();
        assert_eq!(moved.slug, "publish-posts");
        assert_eq!(moved.group_id, group.id);
    }
}
