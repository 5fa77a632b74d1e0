//! Cache of canonical mutation SQL keyed by table, statement kind, and the
//! set of columns involved.
//!
//! Two calls that touch the same columns of the same table produce the same
//! canonical text regardless of the order the caller supplied the columns
//! in: update and delete column sets are sorted before the SQL is built, and
//! the cached entry records the resulting bind order so executors can line
//! values up positionally. Insert statements always cover the table's full
//! column list and so are already canonical.
//!
//! Keys embed control characters between segments so that table names which
//! are prefixes of one another ("t" / "t2") can never collide.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

const KEY_KIND_SEP: char = '\u{1}';
const KEY_COLUMN_SEP: char = '\u{2}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
        })
    }
}

/// A canonical mutation statement plus the positional bind order executors
/// must supply values in: `set_columns` first, then `where_columns`.
#[derive(Debug)]
pub struct CachedStatement {
    pub sql: String,
    pub set_columns: Vec<String>,
    pub where_columns: Vec<String>,
}

#[derive(Debug, Default)]
pub struct StatementCache {
    statements: DashMap<String, Arc<CachedStatement>>,
}

fn cache_key(table: &str, kind: StatementKind, columns: &[String]) -> String {
    let mut key = String::with_capacity(table.len() + 16);
    key.push_str(table);
    key.push(KEY_KIND_SEP);
    key.push_str(&kind.to_string());
    for column in columns {
        key.push(KEY_COLUMN_SEP);
        key.push_str(column);
    }
    key
}

impl StatementCache {
    pub fn new() -> Self {
        Self {
            statements: DashMap::new(),
        }
    }

    /// Insert over the table's full column list, in catalog order.
    pub fn get_or_build_insert(&self, table: &str, columns: &[String]) -> Arc<CachedStatement> {
        let key = cache_key(table, StatementKind::Insert, columns);
        if let Some(entry) = self.statements.get(&key) {
            return Arc::clone(entry.value());
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let statement = Arc::new(CachedStatement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders
            ),
            set_columns: columns.to_vec(),
            where_columns: Vec::new(),
        });
        self.statements.insert(key, Arc::clone(&statement));
        statement
    }

    /// Update with equality predicates, canonicalized by sorting both
    /// column sets.
    pub fn get_or_build_update(
        &self,
        table: &str,
        set_columns: &[String],
        where_columns: &[String],
    ) -> Arc<CachedStatement> {
        let mut set_columns = set_columns.to_vec();
        set_columns.sort();
        let mut where_columns = where_columns.to_vec();
        where_columns.sort();

        let mut key_columns = set_columns.clone();
        key_columns.push(KEY_KIND_SEP.to_string());
        key_columns.extend(where_columns.iter().cloned());
        let key = cache_key(table, StatementKind::Update, &key_columns);
        if let Some(entry) = self.statements.get(&key) {
            return Arc::clone(entry.value());
        }

        let assignments = set_columns
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let predicates = where_columns
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let statement = Arc::new(CachedStatement {
            sql: format!("UPDATE {table} SET {assignments} WHERE {predicates}"),
            set_columns,
            where_columns,
        });
        self.statements.insert(key, Arc::clone(&statement));
        statement
    }

    /// Delete with equality predicates, canonicalized by sorting the
    /// predicate columns.
    pub fn get_or_build_delete(&self, table: &str, where_columns: &[String]) -> Arc<CachedStatement> {
        let mut where_columns = where_columns.to_vec();
        where_columns.sort();

        let key = cache_key(table, StatementKind::Delete, &where_columns);
        if let Some(entry) = self.statements.get(&key) {
            return Arc::clone(entry.value());
        }

        let predicates = where_columns
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let statement = Arc::new(CachedStatement {
            sql: format!("DELETE FROM {table} WHERE {predicates}"),
            set_columns: Vec::new(),
            where_columns,
        });
        self.statements.insert(key, Arc::clone(&statement));
        statement
    }

    /// Drop every statement for `table`. Returns how many were removed.
    pub fn invalidate_table(&self, table: &str) -> usize {
        let prefix = format!("{table}{KEY_KIND_SEP}");
        let before = self.statements.len();
        self.statements.retain(|key, _| !key.starts_with(&prefix));
        before - self.statements.len()
    }

    pub fn clear(&self) {
        self.statements.clear();
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}
