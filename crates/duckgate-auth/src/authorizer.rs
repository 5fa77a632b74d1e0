//! API-key authentication and per-table permission checks.
//!
//! Decisions are cached with a TTL so the hot path rarely touches the
//! credential store; every administrative mutation purges the affected
//! cache so revocations and permission edits take effect on the next call
//! rather than after the TTL.

use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::{params, Connection, DuckdbConnectionManager};
use duckgate_commons::{validate_identifier, ApiKey, Operation, Permission, Role};
use duckgate_configs::AuthSettings;
use moka::sync::Cache;
use r2d2::{Pool, PooledConnection};
use std::time::Duration;

use crate::error::{AuthError, Result};

/// Separator inside permission-cache keys; cannot appear in validated
/// identifiers or operation names.
const CACHE_KEY_SEP: char = '\u{1}';

/// Permission flags for one role/table grant, without the row identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionFlags {
    pub can_create: bool,
    pub can_read: bool,
    pub can_update: bool,
    pub can_delete: bool,
    pub can_query: bool,
}

impl PermissionFlags {
    pub const ALL: Self = Self {
        can_create: true,
        can_read: true,
        can_update: true,
        can_delete: true,
        can_query: true,
    };

    pub const READ_ONLY: Self = Self {
        can_create: false,
        can_read: true,
        can_update: false,
        can_delete: false,
        can_query: true,
    };
}

/// Authenticates API keys and answers permission checks against the
/// credential store.
pub struct Authorizer {
    pool: Pool<DuckdbConnectionManager>,
    /// "{role}\u{1}{table}\u{1}{operation}" -> allow/deny.
    permissions: Cache<String, bool>,
    api_keys: Cache<String, ApiKey>,
}

impl Authorizer {
    pub fn new(pool: Pool<DuckdbConnectionManager>) -> Self {
        Self::with_settings(pool, &AuthSettings::default())
    }

    pub fn with_settings(pool: Pool<DuckdbConnectionManager>, settings: &AuthSettings) -> Self {
        let ttl = Duration::from_secs(settings.cache_ttl_secs);
        Self {
            pool,
            permissions: Cache::builder()
                .max_capacity(settings.permission_cache_capacity)
                .time_to_live(ttl)
                .build(),
            api_keys: Cache::builder()
                .max_capacity(settings.api_key_cache_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    fn conn(&self) -> Result<PooledConnection<DuckdbConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Resolve an API key to its record.
    ///
    /// Unknown and revoked keys both surface as [`AuthError::InvalidApiKey`].
    /// Expiration is re-checked on every call, including cache hits, so a
    /// key cached just before its deadline cannot outlive it.
    pub fn authenticate(&self, key: &str) -> Result<ApiKey> {
        if let Some(cached) = self.api_keys.get(key) {
            if cached.is_expired(Utc::now()) {
                self.api_keys.invalidate(key);
                return Err(AuthError::ApiKeyExpired);
            }
            return Ok(cached);
        }

        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT key, role_name, created_at, expires_at, is_active \
                 FROM api_keys WHERE key = ? AND is_active = true",
                params![key],
                |row| {
                    let created_at: NaiveDateTime = row.get(2)?;
                    let expires_at: Option<NaiveDateTime> = row.get(3)?;
                    Ok(ApiKey {
                        key: row.get(0)?,
                        role_name: row.get(1)?,
                        created_at: created_at.and_utc(),
                        expires_at: expires_at.map(|at| at.and_utc()),
                        is_active: row.get(4)?,
                    })
                },
            )
            .map_err(|e| match e {
                duckdb::Error::QueryReturnedNoRows => AuthError::InvalidApiKey,
                other => AuthError::Database(other),
            })?;

        if record.is_expired(Utc::now()) {
            return Err(AuthError::ApiKeyExpired);
        }

        self.api_keys.insert(key.to_string(), record.clone());
        Ok(record)
    }

    /// Whether `role` may perform `operation` on `table`.
    ///
    /// An exact-table grant always beats the role's wildcard grant, and a
    /// role with no matching grant is denied rather than erred, so missing
    /// configuration fails closed.
    pub fn check_permission(&self, role: &str, table: &str, operation: Operation) -> Result<bool> {
        validate_identifier(table)?;

        let cache_key = format!("{role}{CACHE_KEY_SEP}{table}{CACHE_KEY_SEP}{operation}");
        if let Some(allowed) = self.permissions.get(&cache_key) {
            return Ok(allowed);
        }

        let conn = self.conn()?;
        let allowed = match conn.query_row(
            "SELECT can_create, can_read, can_update, can_delete, can_query \
             FROM permissions \
             WHERE role_name = ? AND (table_name = ? OR table_name = '*') \
             ORDER BY CASE WHEN table_name = ? THEN 1 ELSE 2 END \
             LIMIT 1",
            params![role, table, table],
            |row| {
                Ok(match operation {
                    Operation::Create => row.get::<_, bool>(0)?,
                    Operation::Read => row.get::<_, bool>(1)?,
                    Operation::Update => row.get::<_, bool>(2)?,
                    Operation::Delete => row.get::<_, bool>(3)?,
                    Operation::Query => row.get::<_, bool>(4)?,
                })
            },
        ) {
            Ok(allowed) => allowed,
            Err(duckdb::Error::QueryReturnedNoRows) => false,
            Err(e) => return Err(AuthError::Database(e)),
        };

        log::debug!("Permission check {role}/{table}/{operation}: {allowed}");
        self.permissions.insert(cache_key, allowed);
        Ok(allowed)
    }

    /// Authenticate a key and check one permission in a single call.
    pub fn authorize(&self, key: &str, table: &str, operation: Operation) -> Result<ApiKey> {
        let api_key = self.authenticate(key)?;
        if self.check_permission(&api_key.role_name, table, operation)? {
            Ok(api_key)
        } else {
            Err(AuthError::PermissionNotFound {
                role: api_key.role_name,
                table: table.to_string(),
            })
        }
    }

    pub fn create_role(&self, role_name: &str, description: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO roles (role_name, description) VALUES (?, ?)",
            params![role_name, description],
        )?;
        log::info!("Created role '{role_name}'");
        Ok(())
    }

    /// Delete a role along with its grants and keys.
    pub fn delete_role(&self, role_name: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM permissions WHERE role_name = ?",
            params![role_name],
        )?;
        tx.execute(
            "DELETE FROM api_keys WHERE role_name = ?",
            params![role_name],
        )?;
        let removed = tx.execute("DELETE FROM roles WHERE role_name = ?", params![role_name])?;
        if removed == 0 {
            // Transaction drops here and rolls back the cascade.
            return Err(AuthError::RoleNotFound(role_name.to_string()));
        }
        tx.commit()?;

        // Keys for this role may still be cached; drop everything rather
        // than track which entries belong to the role.
        self.permissions.invalidate_all();
        self.api_keys.invalidate_all();
        log::info!("Deleted role '{role_name}' and its keys and grants");
        Ok(())
    }

    pub fn list_roles(&self) -> Result<Vec<Role>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT role_name, description FROM roles ORDER BY role_name")?;
        let roles = stmt
            .query_map([], |row| {
                Ok(Role {
                    role_name: row.get(0)?,
                    description: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(roles)
    }

    pub fn create_api_key(
        &self,
        key: &str,
        role_name: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn()?;
        if !role_exists(&conn, role_name)? {
            return Err(AuthError::RoleNotFound(role_name.to_string()));
        }
        conn.execute(
            "INSERT INTO api_keys (key, role_name, expires_at) VALUES (?, ?, ?)",
            params![key, role_name, expires_at.map(|at| at.naive_utc())],
        )?;
        log::info!("Created API key for role '{role_name}'");
        Ok(())
    }

    /// Deactivate a key. The row is kept for auditability.
    pub fn revoke_api_key(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE api_keys SET is_active = false WHERE key = ?",
            params![key],
        )?;
        if updated == 0 {
            return Err(AuthError::ApiKeyNotFound);
        }
        self.api_keys.invalidate(key);
        log::info!("Revoked an API key");
        Ok(())
    }

    /// List keys, optionally narrowed to one role.
    pub fn list_api_keys(&self, role: Option<&str>) -> Result<Vec<ApiKey>> {
        let conn = self.conn()?;
        let map_row = |row: &duckdb::Row<'_>| -> duckdb::Result<ApiKey> {
            let created_at: NaiveDateTime = row.get(2)?;
            let expires_at: Option<NaiveDateTime> = row.get(3)?;
            Ok(ApiKey {
                key: row.get(0)?,
                role_name: row.get(1)?,
                created_at: created_at.and_utc(),
                expires_at: expires_at.map(|at| at.and_utc()),
                is_active: row.get(4)?,
            })
        };

        let keys = match role {
            Some(role) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT key, role_name, created_at, expires_at, is_active \
                     FROM api_keys WHERE role_name = ? ORDER BY created_at",
                )?;
                stmt.query_map(params![role], map_row)?
                    .collect::<duckdb::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT key, role_name, created_at, expires_at, is_active \
                     FROM api_keys ORDER BY created_at",
                )?;
                stmt.query_map([], map_row)?
                    .collect::<duckdb::Result<Vec<_>>>()?
            }
        };
        Ok(keys)
    }

    /// Grant `role` the given flags on `table` (`"*"` for all tables).
    pub fn create_permission(&self, role: &str, table: &str, flags: PermissionFlags) -> Result<()> {
        if table != "*" {
            validate_identifier(table)?;
        }
        let conn = self.conn()?;
        if !role_exists(&conn, role)? {
            return Err(AuthError::RoleNotFound(role.to_string()));
        }
        conn.execute(
            "INSERT INTO permissions \
             (role_name, table_name, can_create, can_read, can_update, can_delete, can_query) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                role,
                table,
                flags.can_create,
                flags.can_read,
                flags.can_update,
                flags.can_delete,
                flags.can_query
            ],
        )?;
        self.permissions.invalidate_all();
        log::info!("Created permission for role '{role}' on table '{table}'");
        Ok(())
    }

    pub fn update_permission(&self, role: &str, table: &str, flags: PermissionFlags) -> Result<()> {
        if table != "*" {
            validate_identifier(table)?;
        }
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE permissions \
             SET can_create = ?, can_read = ?, can_update = ?, can_delete = ?, can_query = ? \
             WHERE role_name = ? AND table_name = ?",
            params![
                flags.can_create,
                flags.can_read,
                flags.can_update,
                flags.can_delete,
                flags.can_query,
                role,
                table
            ],
        )?;
        if updated == 0 {
            return Err(AuthError::PermissionNotFound {
                role: role.to_string(),
                table: table.to_string(),
            });
        }
        self.permissions.invalidate_all();
        log::info!("Updated permission for role '{role}' on table '{table}'");
        Ok(())
    }

    pub fn delete_permission(&self, role: &str, table: &str) -> Result<()> {
        if table != "*" {
            validate_identifier(table)?;
        }
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM permissions WHERE role_name = ? AND table_name = ?",
            params![role, table],
        )?;
        if removed == 0 {
            return Err(AuthError::PermissionNotFound {
                role: role.to_string(),
                table: table.to_string(),
            });
        }
        self.permissions.invalidate_all();
        log::info!("Deleted permission for role '{role}' on table '{table}'");
        Ok(())
    }

    pub fn get_permissions(&self, role: &str) -> Result<Vec<Permission>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, role_name, table_name, can_create, can_read, can_update, can_delete, can_query \
             FROM permissions WHERE role_name = ? ORDER BY table_name",
        )?;
        let permissions = stmt
            .query_map(params![role], |row| {
                Ok(Permission {
                    id: row.get(0)?,
                    role_name: row.get(1)?,
                    table_name: row.get(2)?,
                    can_create: row.get(3)?,
                    can_read: row.get(4)?,
                    can_update: row.get(5)?,
                    can_delete: row.get(6)?,
                    can_query: row.get(7)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(permissions)
    }

    /// Drop every cached permission decision.
    pub fn invalidate_permission_cache(&self) {
        self.permissions.invalidate_all();
    }

    /// Drop one cached API key.
    pub fn invalidate_api_key(&self, key: &str) {
        self.api_keys.invalidate(key);
    }

    /// Drop every cached API key.
    pub fn invalidate_api_key_cache(&self) {
        self.api_keys.invalidate_all();
    }
}

fn role_exists(conn: &Connection, role: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM roles WHERE role_name = ?",
        params![role],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
