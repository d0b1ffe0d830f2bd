//! Privilege store backends.
//!
//! The authorization engine decides against a single consistent view. Both
//! backends therefore hand out a per-check [`PrivilegeCatalog`] slice:
//! the in-memory store copies it under one read lock, the Postgres store loads
//! it inside one `REPEATABLE READ` transaction.

use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{instrument, warn};

use escrowdesk_auth::{
    Privilege, PrivilegeCatalog, PrivilegeName, PrivilegeStore, Role, RoleKind, RolePrivilege,
    StoreError, UserRole,
};
use escrowdesk_core::{DomainError, PrivilegeId, RecordStatus, RoleId, UserId};

/// Source of consistent per-check snapshots.
#[async_trait]
pub trait PrivilegeSnapshots: Send + Sync {
    /// Everything needed to decide `(user_id, action)`.
    async fn snapshot(&self, user_id: UserId, action: &str) -> Result<PrivilegeCatalog, StoreError>;
}

/// Write side for user-role links, fed by the users projection.
pub trait UserRoleLinks: Send + Sync {
    fn set_user_role(&self, user_id: UserId, role: RoleKind, status: RecordStatus) -> Result<(), StoreError>;
}

impl<T> UserRoleLinks for std::sync::Arc<T>
where
    T: UserRoleLinks + ?Sized,
{
    fn set_user_role(&self, user_id: UserId, role: RoleKind, status: RecordStatus) -> Result<(), StoreError> {
        (**self).set_user_role(user_id, role, status)
    }
}

/// In-memory privilege store for tests/dev and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryPrivilegeStore {
    catalog: RwLock<PrivilegeCatalog>,
}

impl InMemoryPrivilegeStore {
    pub fn new(catalog: PrivilegeCatalog) -> Self {
        Self {
            catalog: RwLock::new(catalog),
        }
    }

    /// Copy of the slice needed for one `(user, action)` decision.
    pub fn slice_for(&self, user_id: UserId, action: &str) -> Result<PrivilegeCatalog, StoreError> {
        Ok(self.read()?.slice_for(user_id, action))
    }

    pub fn grant(&self, role: RoleKind, privilege: &str) -> Result<(), DomainError> {
        self.write_domain()?.grant(role, privilege)
    }

    /// Soft-revoke; effective for the next decision.
    pub fn revoke(&self, role: RoleKind, privilege: &str) -> Result<(), DomainError> {
        self.write_domain()?.revoke(role, privilege)
    }

    pub fn set_privilege_status(&self, privilege: &str, status: RecordStatus) -> Result<(), DomainError> {
        self.write_domain()?.set_privilege_status(privilege, status)
    }

    pub fn register_privilege(&self, name: PrivilegeName) -> Result<PrivilegeId, DomainError> {
        Ok(self.write_domain()?.register_privilege(name))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, PrivilegeCatalog>, StoreError> {
        self.catalog
            .read()
            .map_err(|_| StoreError::Unavailable("privilege catalog lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, PrivilegeCatalog>, StoreError> {
        self.catalog
            .write()
            .map_err(|_| StoreError::Unavailable("privilege catalog lock poisoned".to_string()))
    }

    fn write_domain(&self) -> Result<std::sync::RwLockWriteGuard<'_, PrivilegeCatalog>, DomainError> {
        self.write().map_err(|e| DomainError::conflict(e.to_string()))
    }
}

impl PrivilegeStore for InMemoryPrivilegeStore {
    fn find_privilege_by_name(&self, name: &str) -> Result<Option<Privilege>, StoreError> {
        self.read()?.find_privilege_by_name(name)
    }

    fn find_roles_for_user(&self, user_id: UserId) -> Result<Vec<Role>, StoreError> {
        self.read()?.find_roles_for_user(user_id)
    }

    fn find_active_role_privileges(&self, role_id: RoleId) -> Result<Vec<RolePrivilege>, StoreError> {
        self.read()?.find_active_role_privileges(role_id)
    }
}

#[async_trait]
impl PrivilegeSnapshots for InMemoryPrivilegeStore {
    async fn snapshot(&self, user_id: UserId, action: &str) -> Result<PrivilegeCatalog, StoreError> {
        self.slice_for(user_id, action)
    }
}

impl UserRoleLinks for InMemoryPrivilegeStore {
    fn set_user_role(&self, user_id: UserId, role: RoleKind, status: RecordStatus) -> Result<(), StoreError> {
        let mut catalog = self.write()?;
        if status.is_active() {
            catalog.assign_role(user_id, role);
        } else {
            catalog.unassign_role(user_id, role);
        }
        Ok(())
    }
}

/// Postgres-backed privilege store (schema: `migrations/0001_init.sql`).
#[derive(Debug, Clone)]
pub struct PostgresPrivilegeStore {
    pool: PgPool,
    runtime: tokio::runtime::Handle,
}

impl PostgresPrivilegeStore {
    /// `runtime` drives the blocking [`UserRoleLinks`] bridge from worker threads.
    pub fn new(pool: PgPool, runtime: tokio::runtime::Handle) -> Self {
        Self { pool, runtime }
    }

    /// Load the `(user, action)` slice in one repeatable-read transaction.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn load_snapshot(&self, user_id: UserId, action: &str) -> Result<PrivilegeCatalog, StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        let mut catalog = PrivilegeCatalog::new();

        let privilege = sqlx::query("SELECT id, name, status FROM privileges WHERE name = $1")
            .bind(action)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unavailable)?;
        if let Some(row) = privilege {
            catalog.insert_privilege(Privilege {
                id: PrivilegeId::from_uuid(row.try_get("id").map_err(corrupt)?),
                name: privilege_name(row.try_get("name").map_err(corrupt)?)?,
                status: record_status(row.try_get("status").map_err(corrupt)?),
            });
        }

        let roles = sqlx::query(
            r#"
            SELECT ur.role_id, ur.status AS link_status, r.code, r.status AS role_status
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(unavailable)?;
        for row in roles {
            let role_id = RoleId::from_uuid(row.try_get("role_id").map_err(corrupt)?);
            let code: i16 = row.try_get("code").map_err(corrupt)?;
            let kind = u8::try_from(code)
                .ok()
                .and_then(RoleKind::from_code)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown role code {code}")))?;
            catalog.insert_role(Role {
                id: role_id,
                kind,
                status: record_status(row.try_get("role_status").map_err(corrupt)?),
            });
            catalog.insert_user_role(UserRole {
                user_id,
                role_id,
                status: record_status(row.try_get("link_status").map_err(corrupt)?),
            });
        }

        let links = sqlx::query(
            r#"
            SELECT rp.role_id, rp.privilege_id, rp.status, p.name
            FROM role_privileges rp
            JOIN privileges p ON p.id = rp.privilege_id
            JOIN user_roles ur ON ur.role_id = rp.role_id
            WHERE ur.user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(unavailable)?;
        for row in links {
            catalog.insert_role_privilege(RolePrivilege {
                role_id: RoleId::from_uuid(row.try_get("role_id").map_err(corrupt)?),
                privilege_id: PrivilegeId::from_uuid(row.try_get("privilege_id").map_err(corrupt)?),
                privilege_name: privilege_name(row.try_get("name").map_err(corrupt)?)?,
                status: record_status(row.try_get("status").map_err(corrupt)?),
            });
        }

        tx.commit().await.map_err(unavailable)?;
        Ok(catalog)
    }

    /// Insert the seed catalog. Existing rows keep their status, so running
    /// this on every start does not undo revocations.
    #[instrument(skip_all, err)]
    pub async fn seed(&self, catalog: &PrivilegeCatalog) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        for role in catalog.roles() {
            sqlx::query(
                "INSERT INTO roles (id, code, status) VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING",
            )
            .bind(role.id.as_uuid())
            .bind(i16::from(role.kind.code()))
            .bind(status_code(role.status))
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        for privilege in catalog.privileges() {
            sqlx::query(
                "INSERT INTO privileges (id, name, status) VALUES ($1, $2, $3) ON CONFLICT (name) DO NOTHING",
            )
            .bind(privilege.id.as_uuid())
            .bind(privilege.name.as_str())
            .bind(status_code(privilege.status))
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        for link in catalog.role_privileges() {
            sqlx::query(
                r#"
                INSERT INTO role_privileges (role_id, privilege_id, status)
                SELECT $1, p.id, $3 FROM privileges p WHERE p.name = $2
                ON CONFLICT (role_id, privilege_id) DO NOTHING
                "#,
            )
            .bind(link.role_id.as_uuid())
            .bind(link.privilege_name.as_str())
            .bind(status_code(link.status))
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        tx.commit().await.map_err(unavailable)
    }

    #[instrument(skip(self), err)]
    pub async fn upsert_user_role(
        &self,
        user_id: UserId,
        role: RoleKind,
        status: RecordStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id, status) VALUES ($1, $2, $3)
            ON CONFLICT (user_id, role_id) DO UPDATE SET status = EXCLUDED.status
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(role.role_id().as_uuid())
        .bind(status_code(status))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl PrivilegeSnapshots for PostgresPrivilegeStore {
    async fn snapshot(&self, user_id: UserId, action: &str) -> Result<PrivilegeCatalog, StoreError> {
        self.load_snapshot(user_id, action).await
    }
}

impl UserRoleLinks for PostgresPrivilegeStore {
    fn set_user_role(&self, user_id: UserId, role: RoleKind, status: RecordStatus) -> Result<(), StoreError> {
        self.runtime
            .block_on(self.upsert_user_role(user_id, role, status))
    }
}

fn status_code(status: RecordStatus) -> i16 {
    match status {
        RecordStatus::Active => 1,
        RecordStatus::Inactive => 0,
    }
}

fn record_status(code: i16) -> RecordStatus {
    if code == 1 {
        RecordStatus::Active
    } else {
        RecordStatus::Inactive
    }
}

fn privilege_name(name: String) -> Result<PrivilegeName, StoreError> {
    PrivilegeName::parse(name).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn unavailable(err: sqlx::Error) -> StoreError {
    warn!(error = %err, "privilege store query failed");
    StoreError::Unavailable(err.to_string())
}

fn corrupt(err: sqlx::Error) -> StoreError {
    StoreError::Corrupt(err.to_string())
}
