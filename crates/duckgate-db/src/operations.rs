//! Row-level operations against the main database.
//!
//! Mutations run in explicit transactions and are retried when the engine
//! reports an optimistic write-write conflict, since a second attempt
//! usually lands after the competing transaction commits. Reads go through
//! the filter translator so every caller value is bound positionally.

use duckdb::{params_from_iter, types::Value};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use crate::error::{map_engine_error, DbError, Result};
use crate::filter::{order_by_clause, where_clause, Filter, Sort};
use crate::manager::{Manager, Watchdog};

/// A row as callers see it: column name to bound value.
pub type RowMap = HashMap<String, Value>;

/// Total attempts per mutation, including the first.
const MAX_RETRIES: u32 = 3;
/// Delay before the second attempt; doubles for each attempt after that.
const BASE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Whether an engine error is an optimistic concurrency conflict worth
/// retrying. Matched on message text because the engine reports conflicts
/// as generic transaction errors.
fn is_transaction_conflict(err: &duckdb::Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("transaction conflict")
        || message.contains("conflict on table")
        || message.contains("write-write conflict")
}

/// Run `attempt` up to [`MAX_RETRIES`] times, backing off between attempts
/// that fail with a transaction conflict. Non-conflict errors propagate
/// immediately.
fn retry_on_conflict<T, F>(mut attempt: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut delay = BASE_RETRY_DELAY;
    let mut last_error = String::new();

    for tries in 1..=MAX_RETRIES {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(DbError::Engine(e)) if is_transaction_conflict(&e) => {
                last_error = e.to_string();
                log::warn!(
                    "Transaction conflict (attempt {tries}/{MAX_RETRIES}): {last_error}"
                );
                if tries < MAX_RETRIES {
                    thread::sleep(delay);
                    delay *= 2;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(DbError::ConflictRetriesExhausted {
        attempts: MAX_RETRIES,
        last_error,
    })
}

impl Manager {
    /// Insert one row. Missing columns are backfilled with NULL so the
    /// statement always covers the table's full column list; keys that are
    /// not columns of the table are dropped.
    ///
    /// Returns the number of rows inserted.
    pub fn insert(&self, table: &str, row: &RowMap) -> Result<usize> {
        duckgate_commons::validate_identifier(table)?;
        if row.is_empty() {
            return Err(DbError::EmptyInsert);
        }

        let columns = self.table_columns(table)?;
        for key in row.keys() {
            if !columns.contains(key) {
                log::debug!("Dropping unknown column '{key}' from insert into '{table}'");
            }
        }

        let stmt = self.statements.get_or_build_insert(table, &columns);
        let values: Vec<Value> = stmt
            .set_columns
            .iter()
            .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
            .collect();

        self.run_mutation(&stmt.sql, &values)
    }

    /// Update rows matching equality predicates. Returns the number of rows
    /// changed.
    pub fn update(&self, table: &str, set: &RowMap, conditions: &RowMap) -> Result<usize> {
        duckgate_commons::validate_identifier(table)?;
        if set.is_empty() {
            return Err(DbError::EmptySet);
        }
        if conditions.is_empty() {
            return Err(DbError::EmptyWhere("update"));
        }
        for column in set.keys().chain(conditions.keys()) {
            duckgate_commons::validate_identifier(column)?;
        }

        let set_columns: Vec<String> = set.keys().cloned().collect();
        let where_columns: Vec<String> = conditions.keys().cloned().collect();
        let stmt = self
            .statements
            .get_or_build_update(table, &set_columns, &where_columns);

        // Bind order is the canonical one recorded on the statement, not
        // the caller's map order.
        let mut values = Vec::with_capacity(set.len() + conditions.len());
        for column in &stmt.set_columns {
            values.push(set[column].clone());
        }
        for column in &stmt.where_columns {
            values.push(conditions[column].clone());
        }

        self.run_mutation(&stmt.sql, &values)
    }

    /// Update rows matching arbitrary filter terms.
    pub fn update_with_filters(&self, table: &str, set: &RowMap, filters: &[Filter]) -> Result<usize> {
        duckgate_commons::validate_identifier(table)?;
        if set.is_empty() {
            return Err(DbError::EmptySet);
        }
        if filters.is_empty() {
            return Err(DbError::EmptyWhere("update"));
        }
        for column in set.keys() {
            duckgate_commons::validate_identifier(column)?;
        }
        for filter in filters {
            duckgate_commons::validate_identifier(&filter.column)?;
        }

        let mut set_columns: Vec<String> = set.keys().cloned().collect();
        set_columns.sort();
        let assignments = set_columns
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut values: Vec<Value> = set_columns.iter().map(|c| set[c].clone()).collect();
        let predicate = where_clause(filters, &mut values)?;
        let sql = format!("UPDATE {table} SET {assignments} WHERE {predicate}");

        self.run_mutation(&sql, &values)
    }

    /// Delete rows matching equality predicates. Returns the number of rows
    /// deleted.
    pub fn delete(&self, table: &str, conditions: &RowMap) -> Result<usize> {
        duckgate_commons::validate_identifier(table)?;
        if conditions.is_empty() {
            return Err(DbError::EmptyWhere("delete"));
        }
        for column in conditions.keys() {
            duckgate_commons::validate_identifier(column)?;
        }

        let where_columns: Vec<String> = conditions.keys().cloned().collect();
        let stmt = self.statements.get_or_build_delete(table, &where_columns);
        let values: Vec<Value> = stmt
            .where_columns
            .iter()
            .map(|column| conditions[column].clone())
            .collect();

        self.run_mutation(&stmt.sql, &values)
    }

    /// Delete rows matching arbitrary filter terms.
    pub fn delete_with_filters(&self, table: &str, filters: &[Filter]) -> Result<usize> {
        duckgate_commons::validate_identifier(table)?;
        if filters.is_empty() {
            return Err(DbError::EmptyWhere("delete"));
        }
        for filter in filters {
            duckgate_commons::validate_identifier(&filter.column)?;
        }

        let mut values = Vec::new();
        let predicate = where_clause(filters, &mut values)?;
        let sql = format!("DELETE FROM {table} WHERE {predicate}");

        self.run_mutation(&sql, &values)
    }

    /// Count rows, optionally narrowed by filter terms.
    pub fn count(&self, table: &str, filters: &[Filter]) -> Result<i64> {
        duckgate_commons::validate_identifier(table)?;
        for filter in filters {
            duckgate_commons::validate_identifier(&filter.column)?;
        }

        let mut values = Vec::new();
        let sql = if filters.is_empty() {
            format!("SELECT COUNT(*) FROM {table}")
        } else {
            let predicate = where_clause(filters, &mut values)?;
            format!("SELECT COUNT(*) FROM {table} WHERE {predicate}")
        };

        let count = self.query_row_main(&sql, &values, |row| row.get(0))?;
        // COUNT(*) always returns one row.
        Ok(count.unwrap_or(0))
    }

    /// Select rows, handing the live cursor to `f`.
    ///
    /// Filters, sorts, limit and offset compose in SQL order. Sort columns
    /// go through the same identifier allow-list as filter columns since
    /// both appear verbatim in the statement.
    pub fn select<T, F>(
        &self,
        table: &str,
        filters: &[Filter],
        sorts: &[Sort],
        limit: Option<u64>,
        offset: Option<u64>,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(duckdb::Rows<'_>) -> Result<T>,
    {
        duckgate_commons::validate_identifier(table)?;
        for filter in filters {
            duckgate_commons::validate_identifier(&filter.column)?;
        }
        for sort in sorts {
            duckgate_commons::validate_identifier(&sort.column)?;
        }

        let mut values = Vec::new();
        let mut sql = format!("SELECT * FROM {table}");
        if !filters.is_empty() {
            let predicate = where_clause(filters, &mut values)?;
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }
        if !sorts.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by_clause(sorts));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        self.query_main(&sql, &values, f)
    }

    /// Whether `table` exists in the main database's catalog.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        duckgate_commons::validate_identifier(table)?;
        let count: Option<i64> = self.query_row_main(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            &[Value::Text(table.to_string())],
            |row| row.get(0),
        )?;
        Ok(count.unwrap_or(0) > 0)
    }

    /// Execute one mutation in its own transaction, retrying on conflict.
    /// Each attempt gets a fresh connection, transaction and watchdog.
    fn run_mutation(&self, sql: &str, values: &[Value]) -> Result<usize> {
        let timeout = self.query_timeout();
        let result = retry_on_conflict(|| {
            let mut conn = self.main_pool().get()?;
            let _watchdog = Watchdog::arm(&conn, timeout);
            let tx = conn.transaction()?;
            let affected = {
                let mut stmt = tx.prepare_cached(sql)?;
                stmt.execute(params_from_iter(values.iter()))?
            };
            tx.commit()?;
            Ok(affected)
        });
        match result {
            Err(DbError::Engine(e)) => Err(map_engine_error(e, timeout)),
            other => other,
        }
    }
}
