//! Dual-pool connection manager.
//!
//! One pool fronts the main database (file-backed or in-memory), a second
//! fronts the file-backed credential store. Every call that borrows a
//! connection arms a per-call watchdog which interrupts the engine if the
//! call outlives the configured timeout, so a runaway query can never pin a
//! pooled connection forever.

use duckdb::{params_from_iter, types::Value, AccessMode, Connection, DuckdbConnectionManager};
use duckgate_configs::DatabaseSettings;
use r2d2::Pool;
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use crate::error::{map_engine_error, DbError, Result};
use crate::schema_cache::SchemaCache;
use crate::statement_cache::StatementCache;

const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(3600);
const WARMUP_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bootstrap DDL and default rows for the credential store. Applied only by
/// [`Manager::open_for_testing`]; production opens validate the store and
/// refuse to create it.
const AUTH_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS roles (
    role_name VARCHAR PRIMARY KEY,
    description VARCHAR
);

CREATE TABLE IF NOT EXISTS api_keys (
    key VARCHAR PRIMARY KEY,
    role_name VARCHAR NOT NULL REFERENCES roles(role_name),
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    expires_at TIMESTAMP,
    is_active BOOLEAN DEFAULT true
);

CREATE SEQUENCE IF NOT EXISTS permissions_id_seq;

CREATE TABLE IF NOT EXISTS permissions (
    id INTEGER PRIMARY KEY DEFAULT nextval('permissions_id_seq'),
    role_name VARCHAR NOT NULL,
    table_name VARCHAR NOT NULL,
    can_create BOOLEAN DEFAULT false,
    can_read BOOLEAN DEFAULT false,
    can_update BOOLEAN DEFAULT false,
    can_delete BOOLEAN DEFAULT false,
    can_query BOOLEAN DEFAULT false,
    UNIQUE (role_name, table_name)
);

INSERT INTO roles (role_name, description) VALUES
    ('admin', 'Full access to all tables'),
    ('editor', 'Create, read, update and query on all tables'),
    ('reader', 'Read and query on all tables')
ON CONFLICT DO NOTHING;

INSERT INTO permissions (role_name, table_name, can_create, can_read, can_update, can_delete, can_query) VALUES
    ('admin', '*', true, true, true, true, true),
    ('editor', '*', true, true, true, false, true),
    ('reader', '*', false, true, false, false, true)
ON CONFLICT DO NOTHING;
"#;

/// Pooled access to the main database and the credential store, plus the
/// schema and statement caches shared by the mutation executors.
pub struct Manager {
    main: Pool<DuckdbConnectionManager>,
    auth: Pool<DuckdbConnectionManager>,
    query_timeout: Duration,
    pub(crate) schemas: SchemaCache,
    pub(crate) statements: StatementCache,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("query_timeout", &self.query_timeout)
            .field("schemas", &self.schemas)
            .field("statements", &self.statements)
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Open both pools against an existing credential store.
    ///
    /// Fails fast if the store is missing any of its required tables or has
    /// no roles defined, since a half-provisioned store would deny every
    /// request in confusing ways later.
    pub fn open(settings: &DatabaseSettings) -> Result<Self> {
        Self::open_internal(settings, false)
    }

    /// Open both pools, bootstrapping the credential store schema and its
    /// default roles first. Test-only convenience so suites can start from
    /// an empty temp file.
    pub fn open_for_testing(settings: &DatabaseSettings) -> Result<Self> {
        Self::open_internal(settings, true)
    }

    fn open_internal(settings: &DatabaseSettings, seed: bool) -> Result<Self> {
        if settings.auth_database_path.is_empty() {
            return Err(DbError::Configuration(
                "auth_database_path is required; the credential store must be file-backed".to_string(),
            ));
        }

        // The credential store is always opened read-write so the
        // authorizer's administrative mutations work regardless of the main
        // database's access mode.
        let auth_config = engine_config(settings, AccessMode::ReadWrite)?;
        let auth_manager =
            DuckdbConnectionManager::file_with_flags(&settings.auth_database_path, auth_config)?;
        let auth = build_pool(auth_manager, settings)?;

        if seed {
            let conn = auth.get()?;
            conn.execute_batch(AUTH_SCHEMA_SQL)?;
        }
        validate_auth_schema(&*auth.get()?)?;

        let main = if settings.database_path.is_empty() {
            // In-memory databases reject read-only mode, and there is
            // nothing pre-existing to protect anyway.
            let config = engine_config(settings, AccessMode::ReadWrite)?;
            let manager = DuckdbConnectionManager::memory_with_flags(config)?;
            build_pool(manager, settings)?
        } else {
            let mode = parse_access_mode(&settings.access_mode)?;
            let config = engine_config(settings, mode)?;
            let manager =
                DuckdbConnectionManager::file_with_flags(&settings.database_path, config)?;
            build_pool(manager, settings)?
        };

        warm_connections(&main, settings.threads * 2);
        warm_connections(&auth, settings.threads);

        log::info!(
            "Opened database pools (main: {}, auth: {}, {} threads, {}ms query timeout)",
            if settings.database_path.is_empty() {
                "in-memory"
            } else {
                settings.database_path.as_str()
            },
            settings.auth_database_path,
            settings.threads,
            settings.query_timeout_ms
        );

        Ok(Self {
            main,
            auth,
            query_timeout: Duration::from_millis(settings.query_timeout_ms),
            schemas: SchemaCache::new(),
            statements: StatementCache::new(),
        })
    }

    /// The credential-store pool, for the authorizer.
    pub fn auth_pool(&self) -> Pool<DuckdbConnectionManager> {
        self.auth.clone()
    }

    pub(crate) fn main_pool(&self) -> &Pool<DuckdbConnectionManager> {
        &self.main
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Run a statement against the main database, returning affected rows.
    pub fn exec_main(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.exec_on(&self.main, sql, params)
    }

    /// Run a statement against the credential store, returning affected rows.
    pub fn exec_auth(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.exec_on(&self.auth, sql, params)
    }

    /// Run a query against the main database, handing the live row cursor to
    /// `f`. The watchdog stays armed until `f` returns, so slow consumers
    /// are interrupted just like slow queries.
    pub fn query_main<T, F>(&self, sql: &str, params: &[Value], f: F) -> Result<T>
    where
        F: FnOnce(duckdb::Rows<'_>) -> Result<T>,
    {
        self.query_on(&self.main, sql, params, f)
    }

    /// Run a query against the credential store, handing the row cursor to `f`.
    pub fn query_auth<T, F>(&self, sql: &str, params: &[Value], f: F) -> Result<T>
    where
        F: FnOnce(duckdb::Rows<'_>) -> Result<T>,
    {
        self.query_on(&self.auth, sql, params, f)
    }

    /// Run a single-row query against the main database. `Ok(None)` means
    /// the query matched nothing.
    pub fn query_row_main<T, F>(&self, sql: &str, params: &[Value], f: F) -> Result<Option<T>>
    where
        F: FnOnce(&duckdb::Row<'_>) -> duckdb::Result<T>,
    {
        self.query_row_on(&self.main, sql, params, f)
    }

    /// Run a single-row query against the credential store.
    pub fn query_row_auth<T, F>(&self, sql: &str, params: &[Value], f: F) -> Result<Option<T>>
    where
        F: FnOnce(&duckdb::Row<'_>) -> duckdb::Result<T>,
    {
        self.query_row_on(&self.auth, sql, params, f)
    }

    fn exec_on(
        &self,
        pool: &Pool<DuckdbConnectionManager>,
        sql: &str,
        params: &[Value],
    ) -> Result<usize> {
        let conn = pool.get()?;
        let _watchdog = Watchdog::arm(&conn, self.query_timeout);
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| map_engine_error(e, self.query_timeout))?;
        stmt.execute(params_from_iter(params.iter()))
            .map_err(|e| map_engine_error(e, self.query_timeout))
    }

    fn query_on<T, F>(
        &self,
        pool: &Pool<DuckdbConnectionManager>,
        sql: &str,
        params: &[Value],
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(duckdb::Rows<'_>) -> Result<T>,
    {
        let conn = pool.get()?;
        let _watchdog = Watchdog::arm(&conn, self.query_timeout);
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| map_engine_error(e, self.query_timeout))?;
        let rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| map_engine_error(e, self.query_timeout))?;
        f(rows)
    }

    fn query_row_on<T, F>(
        &self,
        pool: &Pool<DuckdbConnectionManager>,
        sql: &str,
        params: &[Value],
        f: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce(&duckdb::Row<'_>) -> duckdb::Result<T>,
    {
        let conn = pool.get()?;
        let _watchdog = Watchdog::arm(&conn, self.query_timeout);
        match conn.query_row(sql, params_from_iter(params.iter()), f) {
            Ok(value) => Ok(Some(value)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(map_engine_error(e, self.query_timeout)),
        }
    }

    /// Column names of `table` in catalog order, from cache or the catalog.
    pub fn table_columns(&self, table: &str) -> Result<Arc<[String]>> {
        duckgate_commons::validate_identifier(table)?;

        if let Some(columns) = self.schemas.get(table) {
            return Ok(columns);
        }

        let columns: Vec<String> = self.query_main(
            "SELECT column_name FROM information_schema.columns WHERE table_name = ? ORDER BY ordinal_position",
            &[Value::Text(table.to_string())],
            |mut rows| {
                let mut columns = Vec::new();
                while let Some(row) = rows.next().map_err(DbError::Engine)? {
                    columns.push(row.get(0).map_err(DbError::Engine)?);
                }
                Ok(columns)
            },
        )?;

        if columns.is_empty() {
            return Err(DbError::TableNotFound(table.to_string()));
        }

        log::debug!("Cached schema for table '{}' ({} columns)", table, columns.len());
        Ok(self.schemas.insert(table, columns))
    }

    /// Drop the cached schema and statements for `table`. Call after DDL
    /// that changes the table's shape.
    pub fn invalidate_table(&self, table: &str) {
        let had_schema = self.schemas.invalidate(table);
        let statements = self.statements.invalidate_table(table);
        log::debug!(
            "Invalidated caches for table '{table}' (schema: {had_schema}, statements: {statements})"
        );
    }

    /// Close both pools. Connections are returned and torn down as their
    /// handles drop.
    pub fn close(self) {
        log::info!("Closing database pools");
    }
}

/// Per-call timeout watchdog.
///
/// Arming spawns a thread that waits for either the guard to drop
/// (call finished) or the timeout to elapse, in which case it interrupts
/// the engine; the interrupted call surfaces as [`DbError::Timeout`]
/// through [`map_engine_error`].
pub(crate) struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
}

impl Watchdog {
    pub(crate) fn arm(conn: &Connection, timeout: Duration) -> Self {
        let handle = conn.interrupt_handle();
        let (cancel, armed) = mpsc::channel::<()>();
        let spawned = thread::Builder::new()
            .name("duckgate-watchdog".to_string())
            .spawn(move || {
                // Sender dropped = call completed in time; do nothing.
                if let Err(mpsc::RecvTimeoutError::Timeout) = armed.recv_timeout(timeout) {
                    handle.interrupt();
                }
            });
        if let Err(e) = spawned {
            log::warn!("Failed to spawn timeout watchdog; call will run unbounded: {e}");
        }
        Self {
            cancel: Some(cancel),
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // Dropping the sender wakes the watchdog thread with Disconnected.
        self.cancel.take();
    }
}

fn engine_config(settings: &DatabaseSettings, mode: AccessMode) -> Result<duckdb::Config> {
    let mut config = duckdb::Config::default()
        .access_mode(mode)?
        .threads(settings.threads as i64)?
        .enable_object_cache(settings.enable_object_cache)?;
    if !settings.memory_limit.is_empty() {
        config = config.max_memory(&settings.memory_limit)?;
    }
    Ok(config)
}

fn parse_access_mode(mode: &str) -> Result<AccessMode> {
    match mode {
        "read_only" => Ok(AccessMode::ReadOnly),
        "read_write" => Ok(AccessMode::ReadWrite),
        other => Err(DbError::Configuration(format!(
            "invalid access_mode '{other}' (expected read_only or read_write)"
        ))),
    }
}

/// Applies per-connection session settings that the engine config struct
/// does not cover.
#[derive(Debug)]
struct TempDirCustomizer {
    temp_directory: String,
}

impl r2d2::CustomizeConnection<Connection, duckdb::Error> for TempDirCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), duckdb::Error> {
        let dir = self.temp_directory.replace('\'', "''");
        conn.execute_batch(&format!("SET temp_directory = '{dir}'"))
    }
}

fn build_pool(
    manager: DuckdbConnectionManager,
    settings: &DatabaseSettings,
) -> Result<Pool<DuckdbConnectionManager>> {
    let mut builder = Pool::builder()
        .max_size((settings.threads * 2) as u32)
        .min_idle(Some(settings.threads as u32))
        .max_lifetime(Some(POOL_MAX_LIFETIME))
        .connection_timeout(POOL_CONNECTION_TIMEOUT);
    if !settings.temp_directory.is_empty() {
        builder = builder.connection_customizer(Box::new(TempDirCustomizer {
            temp_directory: settings.temp_directory.clone(),
        }));
    }
    Ok(builder.build(manager)?)
}

/// Open `count` connections concurrently and ping each one, so the first
/// real requests do not pay connection setup cost. Failures are logged and
/// tolerated; warm-up is best effort.
fn warm_connections(pool: &Pool<DuckdbConnectionManager>, count: usize) {
    if count == 0 {
        return;
    }
    let barrier = Arc::new(Barrier::new(count));
    let mut handles = Vec::with_capacity(count);
    for _ in 0..count {
        let pool = pool.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            match pool.get_timeout(WARMUP_ACQUIRE_TIMEOUT) {
                Ok(conn) => {
                    if let Err(e) = conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0)) {
                        log::warn!("Connection warm-up ping failed: {e}");
                    }
                    // Hold the connection until every warmer has one, so the
                    // pool actually opens `count` distinct connections.
                    barrier.wait();
                }
                Err(e) => {
                    log::warn!("Connection warm-up could not acquire a connection: {e}");
                    barrier.wait();
                }
            }
        }));
    }
    for handle in handles {
        let _ = handle.join();
    }
}

fn validate_auth_schema(conn: &Connection) -> Result<()> {
    for table in ["roles", "api_keys", "permissions"] {
        let present: i64 = conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            [table],
            |row| row.get(0),
        )?;
        if present == 0 {
            return Err(DbError::SchemaValidation(format!(
                "required table '{table}' is missing from the credential store"
            )));
        }
    }

    let roles: i64 = conn.query_row("SELECT COUNT(*) FROM roles", [], |row| row.get(0))?;
    if roles == 0 {
        return Err(DbError::SchemaValidation(
            "credential store has no roles defined".to_string(),
        ));
    }
    Ok(())
}
