use crate::error::AppError;
use chrono::{SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Location of the ledger database plus the settings every connection gets.
#[derive(Debug, Clone)]
pub struct DbState {
    path: PathBuf,
    busy_timeout: Duration,
}

impl DbState {
    pub fn initialize(path: &Path, busy_timeout: Duration) -> Result<Self, AppError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        // journal_mode reports the resulting mode as a row
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        Self::run_migrations(&mut conn)?;

        Ok(Self {
            path: path.to_path_buf(),
            busy_timeout,
        })
    }

    pub fn open(&self) -> Result<Connection, AppError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        Ok(conn)
    }

    fn run_migrations(conn: &mut Connection) -> Result<(), AppError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('admin', 'staff')),
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                refresh_hash TEXT NOT NULL UNIQUE,
                expires_at INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                revoked_at TEXT,
                FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                unit TEXT NOT NULL,
                buy_price TEXT NOT NULL DEFAULT '0',
                sell_price TEXT NOT NULL DEFAULT '0',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stock_movements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('masuk', 'keluar')),
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                balance_before INTEGER NOT NULL,
                balance_after INTEGER NOT NULL CHECK (balance_after >= 0),
                note TEXT,
                reference_id INTEGER,
                reference_type TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(item_id, seq),
                FOREIGN KEY(item_id) REFERENCES items(id) ON DELETE RESTRICT
            );

            CREATE TABLE IF NOT EXISTS purchases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                invoice_no TEXT NOT NULL UNIQUE,
                doc_date TEXT NOT NULL,
                counterparty TEXT NOT NULL,
                total TEXT NOT NULL,
                note TEXT NOT NULL DEFAULT '',
                created_by INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY(created_by) REFERENCES users(id) ON DELETE RESTRICT
            );

            CREATE TABLE IF NOT EXISTS purchase_lines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                header_id INTEGER NOT NULL,
                item_id INTEGER NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                unit_price TEXT NOT NULL,
                subtotal TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY(header_id) REFERENCES purchases(id) ON DELETE CASCADE,
                FOREIGN KEY(item_id) REFERENCES items(id) ON DELETE RESTRICT
            );

            CREATE TABLE IF NOT EXISTS sales (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                invoice_no TEXT NOT NULL UNIQUE,
                doc_date TEXT NOT NULL,
                counterparty TEXT NOT NULL,
                total TEXT NOT NULL,
                note TEXT NOT NULL DEFAULT '',
                created_by INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY(created_by) REFERENCES users(id) ON DELETE RESTRICT
            );

            CREATE TABLE IF NOT EXISTS sale_lines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                header_id INTEGER NOT NULL,
                item_id INTEGER NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                unit_price TEXT NOT NULL,
                subtotal TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY(header_id) REFERENCES sales(id) ON DELETE CASCADE,
                FOREIGN KEY(item_id) REFERENCES items(id) ON DELETE RESTRICT
            );

            CREATE TABLE IF NOT EXISTS idempotency_keys (
                scope TEXT NOT NULL,
                key TEXT NOT NULL,
                request_hash TEXT NOT NULL,
                reference_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (scope, key)
            );

            CREATE INDEX IF NOT EXISTS idx_items_name ON items(name);
            CREATE INDEX IF NOT EXISTS idx_movements_created ON stock_movements(created_at);
            CREATE INDEX IF NOT EXISTS idx_purchase_lines_header ON purchase_lines(header_id);
            CREATE INDEX IF NOT EXISTS idx_sale_lines_header ON sale_lines(header_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            ",
        )?;
        // soft-delete flag and low-stock threshold came after the first schema
        ensure_column(
            conn,
            "items",
            "archived",
            "ALTER TABLE items ADD COLUMN archived INTEGER NOT NULL DEFAULT 0",
        )?;
        ensure_column(
            conn,
            "items",
            "low_stock_threshold",
            "ALTER TABLE items ADD COLUMN low_stock_threshold INTEGER NOT NULL DEFAULT 5",
        )?;
        Ok(())
    }
}

/// Starts a write unit of work. `IMMEDIATE` takes the write lock before the first
/// balance read, so concurrent postings cannot observe the same chain head.
pub fn begin_write(conn: &mut Connection) -> Result<Transaction<'_>, AppError> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ensure_column(
    conn: &mut Connection,
    table: &str,
    column: &str,
    alter_sql: &str,
) -> Result<(), AppError> {
    let pragma = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(());
        }
    }
    drop(rows);
    drop(stmt);
    conn.execute(alter_sql, [])?;
    Ok(())
}
