//! Access to the relational store.
//!
//! [`Store`] owns the connection and the transaction lifecycle. The analysis
//! and migration code only talks to it through the narrow [`RowQuery`]
//! surface, which is implemented for plain connections and, through deref,
//! for open transactions.

use crate::db;
use crate::error::DbopsResult;
use rusqlite::types::FromSql;
use rusqlite::{Connection, OptionalExtension, Params, Row, Transaction};
use std::path::{Path, PathBuf};

pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = db::open_db(path)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Wraps an existing connection; the schema is created if missing.
    pub fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        db::ensure_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// File backing the store, if it was opened from disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn begin(&mut self) -> DbopsResult<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }
}

pub trait RowQuery {
    fn fetch_all<T, P, F>(&self, sql: &str, params: P, f: F) -> rusqlite::Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>;

    /// First column of the first row, or `None` when no row matches.
    fn fetch_single<T, P>(&self, sql: &str, params: P) -> rusqlite::Result<Option<T>>
    where
        T: FromSql,
        P: Params;

    /// Two-column result as key/value pairs, in row order.
    fn fetch_pairs<P>(&self, sql: &str, params: P) -> rusqlite::Result<Vec<(String, Option<String>)>>
    where
        P: Params;

    /// `UPDATE table SET column = new WHERE column = old`, returning the number
    /// of rows changed.
    fn update_where(&self, table: &str, column: &str, new: &str, old: &str) -> rusqlite::Result<usize>;
}

impl RowQuery for Connection {
    fn fetch_all<T, P, F>(&self, sql: &str, params: P, f: F) -> rusqlite::Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.prepare(sql)?;
        let rows = stmt
            .query_map(params, f)?
            .collect::<rusqlite::Result<Vec<T>>>()?;
        Ok(rows)
    }

    fn fetch_single<T, P>(&self, sql: &str, params: P) -> rusqlite::Result<Option<T>>
    where
        T: FromSql,
        P: Params,
    {
        self.query_row(sql, params, |r| r.get::<_, T>(0)).optional()
    }

    fn fetch_pairs<P>(&self, sql: &str, params: P) -> rusqlite::Result<Vec<(String, Option<String>)>>
    where
        P: Params,
    {
        self.fetch_all(sql, params, |r| Ok((r.get(0)?, r.get(1)?)))
    }

    fn update_where(&self, table: &str, column: &str, new: &str, old: &str) -> rusqlite::Result<usize> {
        for ident in [table, column] {
            if !is_plain_identifier(ident) {
                return Err(rusqlite::Error::InvalidParameterName(ident.to_string()));
            }
        }
        let sql = format!("UPDATE \"{table}\" SET \"{column}\" = ?1 WHERE \"{column}\" = ?2");
        self.execute(&sql, (new, old))
    }
}

fn is_plain_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::from_connection(Connection::open_in_memory().expect("open memory db"))
            .expect("schema")
    }

    #[test]
    fn update_where_rewrites_matching_rows_only() {
        let store = store();
        let conn = store.conn();
        conn.execute_batch(
            "INSERT INTO solution(id, runtime_environment_id) VALUES
                ('s1', 'py2'), ('s2', 'py2'), ('s3', 'java')",
        )
        .expect("seed");

        let changed = conn
            .update_where("solution", "runtime_environment_id", "py3", "py2")
            .expect("update");
        assert_eq!(changed, 2);

        let pairs = conn
            .fetch_pairs("SELECT id, runtime_environment_id FROM solution ORDER BY id", [])
            .expect("pairs");
        assert_eq!(
            pairs,
            vec![
                ("s1".to_string(), Some("py3".to_string())),
                ("s2".to_string(), Some("py3".to_string())),
                ("s3".to_string(), Some("java".to_string())),
            ]
        );
    }

    #[test]
    fn update_where_rejects_odd_identifiers() {
        let store = store();
        let res = store
            .conn()
            .update_where("solution; DROP TABLE user", "runtime_environment_id", "a", "b");
        assert!(res.is_err());
    }

    #[test]
    fn fetch_single_distinguishes_missing_row_from_null() {
        let store = store();
        let conn = store.conn();
        conn.execute("INSERT INTO exercise_config(id, config) VALUES('c1', NULL)", [])
            .expect("seed");

        let missing: Option<Option<String>> = conn
            .fetch_single("SELECT config FROM exercise_config WHERE id = ?", ["nope"])
            .expect("query");
        assert_eq!(missing, None);

        let null: Option<Option<String>> = conn
            .fetch_single("SELECT config FROM exercise_config WHERE id = ?", ["c1"])
            .expect("query");
        assert_eq!(null, Some(None));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let mut store = store();
        {
            let tx = store.begin().expect("begin");
            tx.execute("INSERT INTO solution(id, runtime_environment_id) VALUES('s1', 'py2')", [])
                .expect("insert");
        }
        let count: Option<i64> = store
            .conn()
            .fetch_single("SELECT COUNT(*) FROM solution", [])
            .expect("count");
        assert_eq!(count, Some(0));
    }
}
