//! Lifecycle tests: opening the dual pools, credential-store validation,
//! schema discovery and cache invalidation.

use duckgate_configs::DatabaseSettings;
use duckgate_db::{DbError, Manager, Value};

fn test_settings(dir: &tempfile::TempDir) -> DatabaseSettings {
    DatabaseSettings {
        auth_database_path: dir
            .path()
            .join("auth.db")
            .to_string_lossy()
            .into_owned(),
        threads: 2,
        ..Default::default()
    }
}

#[test]
fn open_for_testing_bootstraps_credential_store() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = Manager::open_for_testing(&test_settings(&dir)).expect("open should succeed");

    let roles: Option<i64> = manager
        .query_row_auth("SELECT COUNT(*) FROM roles", &[], |row| row.get(0))
        .expect("roles query should succeed");
    assert!(roles.unwrap_or(0) >= 3, "default roles should be seeded");

    let wildcard: Option<i64> = manager
        .query_row_auth(
            "SELECT COUNT(*) FROM permissions WHERE table_name = '*'",
            &[],
            |row| row.get(0),
        )
        .expect("permissions query should succeed");
    assert_eq!(wildcard, Some(3), "each default role gets a wildcard grant");
}

#[test]
fn open_refuses_unprovisioned_credential_store() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = Manager::open(&test_settings(&dir)).unwrap_err();
    assert!(
        matches!(err, DbError::SchemaValidation(_)),
        "expected schema validation failure, got {err:?}"
    );
}

#[test]
fn open_requires_auth_database_path() {
    let settings = DatabaseSettings {
        threads: 2,
        ..Default::default()
    };
    let err = Manager::open(&settings).unwrap_err();
    assert!(matches!(err, DbError::Configuration(_)));
}

#[test]
fn open_rejects_unknown_access_mode() {
    let dir = tempfile::tempdir().expect("temp dir");
    let settings = DatabaseSettings {
        database_path: dir.path().join("main.db").to_string_lossy().into_owned(),
        access_mode: "append_only".to_string(),
        ..test_settings(&dir)
    };
    let err = Manager::open_for_testing(&settings).unwrap_err();
    assert!(matches!(err, DbError::Configuration(_)));
}

#[test]
fn table_columns_come_back_in_catalog_order() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = Manager::open_for_testing(&test_settings(&dir)).expect("open should succeed");
    manager
        .exec_main(
            "CREATE TABLE events (id INTEGER, kind VARCHAR, \"at\" TIMESTAMP)",
            &[],
        )
        .expect("create table");

    let columns = manager.table_columns("events").expect("columns");
    assert_eq!(
        &*columns,
        &["id".to_string(), "kind".to_string(), "at".to_string()]
    );
}

#[test]
fn unknown_table_is_reported_not_cached() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = Manager::open_for_testing(&test_settings(&dir)).expect("open should succeed");

    let err = manager.table_columns("no_such_table").unwrap_err();
    assert!(matches!(err, DbError::TableNotFound(_)));

    // The table can be created afterwards and discovered normally.
    manager
        .exec_main("CREATE TABLE no_such_table (id INTEGER)", &[])
        .expect("create table");
    let columns = manager.table_columns("no_such_table").expect("columns");
    assert_eq!(columns.len(), 1);
}

#[test]
fn invalidation_picks_up_altered_shape() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = Manager::open_for_testing(&test_settings(&dir)).expect("open should succeed");
    manager
        .exec_main("CREATE TABLE plans (id INTEGER)", &[])
        .expect("create table");

    let before = manager.table_columns("plans").expect("columns");
    assert_eq!(before.len(), 1);

    manager
        .exec_main("ALTER TABLE plans ADD COLUMN name VARCHAR", &[])
        .expect("alter table");

    // Stale until told otherwise.
    assert_eq!(manager.table_columns("plans").expect("columns").len(), 1);

    manager.invalidate_table("plans");
    let after = manager.table_columns("plans").expect("columns");
    assert_eq!(
        &*after,
        &["id".to_string(), "name".to_string()],
        "invalidation must force rediscovery"
    );
}

#[test]
fn queries_bind_positional_parameters() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = Manager::open_for_testing(&test_settings(&dir)).expect("open should succeed");
    manager
        .exec_main("CREATE TABLE kv (k VARCHAR, v INTEGER)", &[])
        .expect("create table");
    manager
        .exec_main(
            "INSERT INTO kv VALUES (?, ?)",
            &[Value::Text("answer".to_string()), Value::Int(42)],
        )
        .expect("insert");

    let v: Option<i32> = manager
        .query_row_main(
            "SELECT v FROM kv WHERE k = ?",
            &[Value::Text("answer".to_string())],
            |row| row.get(0),
        )
        .expect("query");
    assert_eq!(v, Some(42));

    let missing: Option<i32> = manager
        .query_row_main(
            "SELECT v FROM kv WHERE k = ?",
            &[Value::Text("nope".to_string())],
            |row| row.get(0),
        )
        .expect("query");
    assert_eq!(missing, None, "no match surfaces as None, not an error");
}

#[test]
fn close_consumes_the_manager() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = Manager::open_for_testing(&test_settings(&dir)).expect("open should succeed");
    manager.close();
}
