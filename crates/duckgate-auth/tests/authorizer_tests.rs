//! Authorizer behavior against a real credential store: key lifecycle,
//! exact-over-wildcard precedence, fail-closed denials, and cache
//! invalidation on administrative changes.

use chrono::{Duration, Utc};
use duckgate_auth::{AuthError, Authorizer, Operation, PermissionFlags};
use duckgate_configs::{AuthSettings, DatabaseSettings};
use duckgate_db::Manager;

fn open_authorizer() -> (tempfile::TempDir, Manager, Authorizer) {
    let dir = tempfile::tempdir().expect("temp dir");
    let settings = DatabaseSettings {
        auth_database_path: dir
            .path()
            .join("auth.db")
            .to_string_lossy()
            .into_owned(),
        threads: 2,
        ..Default::default()
    };
    let manager = Manager::open_for_testing(&settings).expect("open should succeed");
    let authorizer = Authorizer::new(manager.auth_pool());
    (dir, manager, authorizer)
}

#[test]
fn key_lifecycle_authenticates_then_revokes() {
    let (_dir, _manager, authorizer) = open_authorizer();

    authorizer
        .create_api_key("k-reader-1", "reader", None)
        .expect("create key");

    let key = authorizer.authenticate("k-reader-1").expect("authenticate");
    assert_eq!(key.role_name, "reader");
    assert!(key.is_active);
    assert!(key.expires_at.is_none());

    authorizer.revoke_api_key("k-reader-1").expect("revoke");

    // Revocation evicts the cached entry, so the very next call fails.
    let err = authorizer.authenticate("k-reader-1").unwrap_err();
    assert!(matches!(err, AuthError::InvalidApiKey));
}

#[test]
fn unknown_key_is_invalid() {
    let (_dir, _manager, authorizer) = open_authorizer();
    let err = authorizer.authenticate("never-issued").unwrap_err();
    assert!(matches!(err, AuthError::InvalidApiKey));
}

#[test]
fn expired_key_is_rejected_on_first_use() {
    let (_dir, _manager, authorizer) = open_authorizer();

    authorizer
        .create_api_key(
            "k-expired",
            "reader",
            Some(Utc::now() - Duration::hours(1)),
        )
        .expect("create key");

    let err = authorizer.authenticate("k-expired").unwrap_err();
    assert!(matches!(err, AuthError::ApiKeyExpired));
}

#[test]
fn key_for_unknown_role_is_refused() {
    let (_dir, _manager, authorizer) = open_authorizer();
    let err = authorizer
        .create_api_key("k-x", "no_such_role", None)
        .unwrap_err();
    assert!(matches!(err, AuthError::RoleNotFound(_)));
}

#[test]
fn exact_table_grant_beats_wildcard() {
    let (_dir, _manager, authorizer) = open_authorizer();

    authorizer
        .create_role("analyst", "Read-mostly analytics role")
        .expect("create role");
    authorizer
        .create_permission("analyst", "*", PermissionFlags::READ_ONLY)
        .expect("wildcard grant");
    authorizer
        .create_permission(
            "analyst",
            "orders",
            PermissionFlags {
                can_read: false,
                ..PermissionFlags::READ_ONLY
            },
        )
        .expect("exact grant");

    // Wildcard applies to tables without an exact grant.
    assert!(authorizer
        .check_permission("analyst", "customers", Operation::Read)
        .expect("check"));

    // The exact orders row wins even though the wildcard would allow it.
    assert!(!authorizer
        .check_permission("analyst", "orders", Operation::Read)
        .expect("check"));
    assert!(authorizer
        .check_permission("analyst", "orders", Operation::Query)
        .expect("check"));
}

#[test]
fn missing_grant_denies_instead_of_erring() {
    let (_dir, _manager, authorizer) = open_authorizer();

    authorizer
        .create_role("lonely", "Role with no grants")
        .expect("create role");

    assert!(!authorizer
        .check_permission("lonely", "orders", Operation::Read)
        .expect("check"));
    // The denial is cached like any other decision.
    assert!(!authorizer
        .check_permission("lonely", "orders", Operation::Read)
        .expect("check"));
}

#[test]
fn permission_edits_take_effect_immediately() {
    let (_dir, _manager, authorizer) = open_authorizer();

    authorizer
        .create_role("analyst", "Analytics role")
        .expect("create role");
    authorizer
        .create_permission("analyst", "orders", PermissionFlags::READ_ONLY)
        .expect("grant");

    assert!(authorizer
        .check_permission("analyst", "orders", Operation::Read)
        .expect("check"));

    authorizer
        .update_permission(
            "analyst",
            "orders",
            PermissionFlags {
                can_read: false,
                ..PermissionFlags::READ_ONLY
            },
        )
        .expect("update grant");

    // The cached allow must not survive the edit.
    assert!(!authorizer
        .check_permission("analyst", "orders", Operation::Read)
        .expect("check"));

    authorizer
        .delete_permission("analyst", "orders")
        .expect("delete grant");
    assert!(!authorizer
        .check_permission("analyst", "orders", Operation::Query)
        .expect("check"));
}

#[test]
fn editing_missing_grants_is_an_error() {
    let (_dir, _manager, authorizer) = open_authorizer();

    let err = authorizer
        .update_permission("reader", "orders", PermissionFlags::ALL)
        .unwrap_err();
    assert!(matches!(err, AuthError::PermissionNotFound { .. }));

    let err = authorizer.delete_permission("reader", "orders").unwrap_err();
    assert!(matches!(err, AuthError::PermissionNotFound { .. }));

    let err = authorizer.revoke_api_key("never-issued").unwrap_err();
    assert!(matches!(err, AuthError::ApiKeyNotFound));
}

#[test]
fn delete_role_cascades_keys_and_grants() {
    let (_dir, _manager, authorizer) = open_authorizer();

    authorizer
        .create_role("temp", "Short-lived role")
        .expect("create role");
    authorizer
        .create_permission("temp", "orders", PermissionFlags::ALL)
        .expect("grant");
    authorizer
        .create_api_key("k-temp", "temp", None)
        .expect("create key");

    assert!(authorizer
        .check_permission("temp", "orders", Operation::Delete)
        .expect("check"));

    authorizer.delete_role("temp").expect("delete role");

    assert!(matches!(
        authorizer.authenticate("k-temp").unwrap_err(),
        AuthError::InvalidApiKey
    ));
    assert!(!authorizer
        .check_permission("temp", "orders", Operation::Delete)
        .expect("check"));
    assert!(authorizer.get_permissions("temp").expect("list").is_empty());

    let err = authorizer.delete_role("temp").unwrap_err();
    assert!(matches!(err, AuthError::RoleNotFound(_)));
}

#[test]
fn authorize_combines_both_checks() {
    let (_dir, _manager, authorizer) = open_authorizer();

    authorizer
        .create_api_key("k-reader", "reader", None)
        .expect("create key");

    // Seeded reader role: read and query everywhere, nothing else.
    let key = authorizer
        .authorize("k-reader", "orders", Operation::Read)
        .expect("authorize");
    assert_eq!(key.role_name, "reader");

    let err = authorizer
        .authorize("k-reader", "orders", Operation::Delete)
        .unwrap_err();
    assert!(matches!(err, AuthError::PermissionNotFound { .. }));
}

#[test]
fn listings_reflect_the_store() {
    let (_dir, _manager, authorizer) = open_authorizer();

    let roles = authorizer.list_roles().expect("list roles");
    let names: Vec<&str> = roles.iter().map(|r| r.role_name.as_str()).collect();
    assert!(names.contains(&"admin"));
    assert!(names.contains(&"editor"));
    assert!(names.contains(&"reader"));

    authorizer
        .create_api_key("k-a", "admin", None)
        .expect("create key");
    authorizer
        .create_api_key("k-b", "reader", Some(Utc::now() + Duration::days(30)))
        .expect("create key");

    let keys = authorizer.list_api_keys(None).expect("list keys");
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().any(|k| k.key == "k-b" && k.expires_at.is_some()));

    let reader_keys = authorizer
        .list_api_keys(Some("reader"))
        .expect("list reader keys");
    assert_eq!(reader_keys.len(), 1);
    assert_eq!(reader_keys[0].key, "k-b");

    let grants = authorizer.get_permissions("admin").expect("grants");
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].table_name, "*");
    assert!(grants[0].allows(Operation::Delete));
}

#[test]
fn custom_cache_settings_are_honored() {
    let (_dir, manager, _default) = open_authorizer();

    let authorizer = Authorizer::with_settings(
        manager.auth_pool(),
        &AuthSettings {
            cache_ttl_secs: 1,
            permission_cache_capacity: 10,
            api_key_cache_capacity: 10,
        },
    );
    assert!(authorizer
        .check_permission("reader", "orders", Operation::Read)
        .expect("check"));
}
