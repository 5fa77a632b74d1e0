//! Concurrent cache of table column lists.
//!
//! Column lists are discovered from the catalog on first use and reused on
//! every subsequent mutation against the same table. Entries are shared as
//! `Arc<[String]>` so readers never clone the list itself. The cache never
//! expires on its own; callers invalidate a table after DDL changes its
//! shape.

use dashmap::DashMap;
use std::sync::Arc;

/// Table name -> column names in catalog ordinal order.
#[derive(Debug, Default)]
pub struct SchemaCache {
    tables: DashMap<String, Arc<[String]>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    /// Look up the cached column list for `table`.
    pub fn get(&self, table: &str) -> Option<Arc<[String]>> {
        self.tables.get(table).map(|entry| Arc::clone(entry.value()))
    }

    /// Cache the column list for `table`, replacing any previous entry.
    pub fn insert(&self, table: &str, columns: Vec<String>) -> Arc<[String]> {
        let columns: Arc<[String]> = columns.into();
        self.tables.insert(table.to_string(), Arc::clone(&columns));
        columns
    }

    /// Drop the entry for `table`. Returns true if an entry was present.
    pub fn invalidate(&self, table: &str) -> bool {
        self.tables.remove(table).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let cache = SchemaCache::new();
        assert!(cache.get("users").is_none());

        cache.insert("users", vec!["id".to_string(), "name".to_string()]);
        let columns = cache.get("users").expect("entry should be cached");
        assert_eq!(&*columns, &["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn entries_are_shared_not_cloned() {
        let cache = SchemaCache::new();
        let inserted = cache.insert("users", vec!["id".to_string()]);
        let fetched = cache.get("users").expect("entry should be cached");
        assert!(Arc::ptr_eq(&inserted, &fetched));
    }

    #[test]
    fn invalidate_removes_only_that_table() {
        let cache = SchemaCache::new();
        cache.insert("users", vec!["id".to_string()]);
        cache.insert("orders", vec!["id".to_string()]);

        assert!(cache.invalidate("users"));
        assert!(!cache.invalidate("users"), "second invalidation is a no-op");
        assert!(cache.get("users").is_none());
        assert!(cache.get("orders").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn insert_replaces_stale_entry() {
        let cache = SchemaCache::new();
        cache.insert("users", vec!["id".to_string()]);
        cache.insert("users", vec!["id".to_string(), "email".to_string()]);

        let columns = cache.get("users").expect("entry should be cached");
        assert_eq!(columns.len(), 2);
        assert_eq!(cache.len(), 1);
    }
}
