//! Purchase and sale documents.
//!
//! A document is posted as one unit of work: header, lines, one ledger movement per
//! line and the idempotency record commit together or not at all. Purchases move
//! stock in, sales move it out.

use crate::db::{begin_write, decimal_at, now_iso};
use crate::error::{is_unique_violation, AppError};
use crate::ledger;
use crate::models::{
    Counterparty, Invoice, InvoiceDraft, InvoiceHeader, InvoiceLine, Page, Reference,
    ReferenceType, TransactionKind,
};
use chrono::{Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// How long an idempotency key is remembered before it can start a new document.
pub const IDEMPOTENCY_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Purchase,
    Sale,
}

impl DocumentKind {
    fn header_table(&self) -> &'static str {
        match self {
            DocumentKind::Purchase => "purchases",
            DocumentKind::Sale => "sales",
        }
    }

    fn line_table(&self) -> &'static str {
        match self {
            DocumentKind::Purchase => "purchase_lines",
            DocumentKind::Sale => "sale_lines",
        }
    }

    fn invoice_prefix(&self) -> &'static str {
        match self {
            DocumentKind::Purchase => "BL",
            DocumentKind::Sale => "JL",
        }
    }

    pub fn movement_kind(&self) -> TransactionKind {
        match self {
            DocumentKind::Purchase => TransactionKind::In,
            DocumentKind::Sale => TransactionKind::Out,
        }
    }

    pub fn reference_type(&self) -> ReferenceType {
        match self {
            DocumentKind::Purchase => ReferenceType::Purchase,
            DocumentKind::Sale => ReferenceType::Sale,
        }
    }

    fn counterparty(&self, name: String) -> Counterparty {
        match self {
            DocumentKind::Purchase => Counterparty::Supplier(name),
            DocumentKind::Sale => Counterparty::Customer(name),
        }
    }

    fn counterparty_field(&self) -> &'static str {
        match self {
            DocumentKind::Purchase => "supplier",
            DocumentKind::Sale => "customer",
        }
    }

    fn movement_note(&self, invoice_no: &str) -> String {
        match self {
            DocumentKind::Purchase => format!("Pembelian - {invoice_no}"),
            DocumentKind::Sale => format!("Penjualan - {invoice_no}"),
        }
    }

    pub fn label(&self) -> &'static str {
        self.reference_type().as_str()
    }
}

/// Outcome of a post: a new document, or the one an earlier request with the same
/// idempotency key created.
#[derive(Debug)]
pub enum Posted<T> {
    Created(T),
    Replayed(T),
}

impl<T> Posted<T> {
    pub fn is_replay(&self) -> bool {
        matches!(self, Posted::Replayed(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Posted::Created(value) | Posted::Replayed(value) => value,
        }
    }
}

struct PricedLine {
    item_id: i64,
    quantity: i64,
    unit_price: Decimal,
    subtotal: Decimal,
}

struct CheckedDraft {
    date: NaiveDate,
    counterparty: String,
    invoice_no: Option<String>,
    note: String,
    lines: Vec<PricedLine>,
    total: Decimal,
}

fn check_draft(kind: DocumentKind, draft: &InvoiceDraft) -> Result<CheckedDraft, AppError> {
    if draft.lines.is_empty() {
        return Err(AppError::Validation("details must contain at least one line".into()));
    }
    let counterparty = draft.counterparty.trim();
    if counterparty.is_empty() {
        return Err(AppError::Validation(format!(
            "{} is required",
            kind.counterparty_field()
        )));
    }
    let date = NaiveDate::parse_from_str(draft.date.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::Validation(format!("tanggal must be YYYY-MM-DD, got {:?}", draft.date))
    })?;

    let mut lines = Vec::with_capacity(draft.lines.len());
    let mut total = Decimal::ZERO;
    for line in &draft.lines {
        ledger::check_quantity(line.quantity)?;
        if line.unit_price <= Decimal::ZERO {
            return Err(AppError::InvalidPrice(format!(
                "harga must be greater than zero, got {}",
                line.unit_price
            )));
        }
        let subtotal = line
            .unit_price
            .checked_mul(Decimal::from(line.quantity))
            .ok_or_else(|| AppError::Validation("line subtotal overflow".into()))?;
        total = total
            .checked_add(subtotal)
            .ok_or_else(|| AppError::Validation("document total overflow".into()))?;
        lines.push(PricedLine {
            item_id: line.item_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
            subtotal,
        });
    }

    Ok(CheckedDraft {
        date,
        counterparty: counterparty.to_string(),
        invoice_no: draft
            .invoice_no
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        note: draft.note.trim().to_string(),
        lines,
        total,
    })
}

fn purge_stale_keys(conn: &Connection, kind: DocumentKind) -> Result<(), AppError> {
    let cutoff = (Utc::now() - Duration::hours(IDEMPOTENCY_RETENTION_HOURS))
        .to_rfc3339_opts(SecondsFormat::Micros, true);
    let purged = conn.execute(
        "DELETE FROM idempotency_keys WHERE scope = ? AND created_at < ?",
        params![kind.label(), cutoff],
    )?;
    if purged > 0 {
        debug!(kind = kind.label(), purged, "expired idempotency keys removed");
    }
    Ok(())
}

fn request_hash(draft: &InvoiceDraft) -> Result<String, AppError> {
    let canonical =
        serde_json::to_vec(draft).map_err(|e| AppError::Internal(format!("hash request: {e}")))?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

/// Next `PREFIX/YYYYMMDD/NNN` number for the document date.
pub fn generate_invoice_no(
    conn: &Connection,
    kind: DocumentKind,
    date: NaiveDate,
) -> Result<String, AppError> {
    let prefix = format!("{}/{}/", kind.invoice_prefix(), date.format("%Y%m%d"));
    let sql = format!(
        "SELECT invoice_no FROM {} WHERE substr(invoice_no, 1, ?1) = ?2",
        kind.header_table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![prefix.len() as i64, prefix], |row| {
        row.get::<_, String>(0)
    })?;

    let mut highest = 0_u64;
    for row in rows {
        let invoice_no = row?;
        if let Some(n) = invoice_no
            .strip_prefix(&prefix)
            .and_then(|suffix| suffix.parse::<u64>().ok())
        {
            highest = highest.max(n);
        }
    }
    Ok(format!("{prefix}{:03}", highest + 1))
}

pub fn post(
    conn: &mut Connection,
    kind: DocumentKind,
    draft: &InvoiceDraft,
    user_id: i64,
    idempotency_key: Option<&str>,
) -> Result<Posted<Invoice>, AppError> {
    let checked = check_draft(kind, draft)?;
    let idempotency = match idempotency_key.map(str::trim).filter(|k| !k.is_empty()) {
        Some(key) => Some((key, request_hash(draft)?)),
        None => None,
    };

    let tx = begin_write(conn)?;
    purge_stale_keys(&tx, kind)?;

    if let Some((key, hash)) = &idempotency {
        let seen: Option<(String, i64)> = tx
            .query_row(
                "SELECT request_hash, reference_id FROM idempotency_keys WHERE scope = ? AND key = ?",
                params![kind.label(), key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((stored_hash, document_id)) = seen {
            if &stored_hash != hash {
                warn!(kind = kind.label(), key = %key, "idempotency key reused with a different request");
                return Err(AppError::IdempotencyConflict((*key).to_string()));
            }
            let invoice = find_invoice(&tx, kind, document_id)?;
            info!(
                kind = kind.label(),
                invoice_no = %invoice.header.invoice_no,
                "replayed idempotent post"
            );
            return Ok(Posted::Replayed(invoice));
        }
    }

    for line in &checked.lines {
        ledger::ensure_active_item(&tx, line.item_id)?;
    }

    let invoice_no = match checked.invoice_no {
        Some(no) => no,
        None => generate_invoice_no(&tx, kind, checked.date)?,
    };

    let ts = now_iso();
    let header_sql = format!(
        "INSERT INTO {} (invoice_no, doc_date, counterparty, total, note, created_by, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        kind.header_table()
    );
    let inserted = tx.execute(
        &header_sql,
        params![
            invoice_no,
            checked.date.format("%Y-%m-%d").to_string(),
            checked.counterparty,
            checked.total.to_string(),
            checked.note,
            user_id,
            ts,
            ts
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::DuplicateInvoice(invoice_no));
        }
        Err(err) => return Err(err.into()),
    }
    let header_id = tx.last_insert_rowid();

    let line_sql = format!(
        "INSERT INTO {} (header_id, item_id, quantity, unit_price, subtotal, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        kind.line_table()
    );
    let note = kind.movement_note(&invoice_no);
    let reference = Reference::new(kind.reference_type(), Some(header_id));
    for line in &checked.lines {
        tx.execute(
            &line_sql,
            params![
                header_id,
                line.item_id,
                line.quantity,
                line.unit_price.to_string(),
                line.subtotal.to_string(),
                ts
            ],
        )?;
        if let Err(err) = ledger::record(
            &tx,
            line.item_id,
            kind.movement_kind(),
            line.quantity,
            reference,
            Some(note.as_str()),
        ) {
            warn!(
                kind = kind.label(),
                invoice_no = %invoice_no,
                item_id = line.item_id,
                error = %err,
                "document rejected, rolling back"
            );
            return Err(err);
        }
    }

    if let Some((key, hash)) = &idempotency {
        tx.execute(
            "INSERT INTO idempotency_keys (scope, key, request_hash, reference_id, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![kind.label(), key, hash, header_id, ts],
        )?;
    }

    let invoice = find_invoice(&tx, kind, header_id)?;
    tx.commit()?;

    info!(
        kind = kind.label(),
        invoice_no = %invoice.header.invoice_no,
        lines = invoice.details.len(),
        total = %invoice.header.total,
        "document posted"
    );
    Ok(Posted::Created(invoice))
}

fn header_from_row(kind: DocumentKind, row: &Row<'_>) -> rusqlite::Result<InvoiceHeader> {
    Ok(InvoiceHeader {
        id: row.get(0)?,
        invoice_no: row.get(1)?,
        date: row.get(2)?,
        counterparty: kind.counterparty(row.get(3)?),
        total: decimal_at(row, 4)?,
        note: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const HEADER_COLUMNS: &str =
    "id, invoice_no, doc_date, counterparty, total, note, created_by, created_at, updated_at";

pub fn list_invoices(
    conn: &Connection,
    kind: DocumentKind,
    page: Page,
) -> Result<(Vec<InvoiceHeader>, i64), AppError> {
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", kind.header_table()),
        [],
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT {HEADER_COLUMNS} FROM {} ORDER BY doc_date DESC, id DESC LIMIT ? OFFSET ?",
        kind.header_table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![i64::from(page.limit), page.offset()], |row| {
        header_from_row(kind, row)
    })?;

    let mut headers = Vec::new();
    for row in rows {
        headers.push(row?);
    }
    Ok((headers, total))
}

pub fn find_invoice(conn: &Connection, kind: DocumentKind, id: i64) -> Result<Invoice, AppError> {
    let sql = format!(
        "SELECT {HEADER_COLUMNS} FROM {} WHERE id = ?",
        kind.header_table()
    );
    let header = conn
        .query_row(&sql, params![id], |row| header_from_row(kind, row))
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("{} {id}", kind.label())))?;

    let sql = format!(
        "SELECT l.id, l.header_id, l.item_id, l.quantity, l.unit_price, l.subtotal, l.created_at,
                i.code, i.name, i.unit
         FROM {} l
         JOIN items i ON i.id = l.item_id
         WHERE l.header_id = ?
         ORDER BY l.id ASC",
        kind.line_table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![id], |row| {
        Ok(InvoiceLine {
            id: row.get(0)?,
            header_id: row.get(1)?,
            item_id: row.get(2)?,
            quantity: row.get(3)?,
            unit_price: decimal_at(row, 4)?,
            subtotal: decimal_at(row, 5)?,
            created_at: row.get(6)?,
            item_code: row.get(7)?,
            item_name: row.get(8)?,
            unit: row.get(9)?,
        })
    })?;

    let mut details = Vec::new();
    for row in rows {
        details.push(row?);
    }
    Ok(Invoice { header, details })
}
