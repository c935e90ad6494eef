//! Append-only stock ledger.
//!
//! Every item owns a chain of movements ordered by `seq`. Each movement stores the
//! balance it started from and the balance it produced, so the current balance of an
//! item is the `balance_after` of its highest `seq`. Appends must run inside a write
//! transaction from [`crate::db::begin_write`]; the chain head is read and extended
//! under the same lock.

use crate::db::{begin_write, now_iso};
use crate::error::AppError;
use crate::models::{
    AdjustmentForm, LedgerAudit, Page, Reference, ReferenceType, StockBalance, StockMovement,
    TransactionKind,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::{debug, info, warn};

/// Largest quantity a single movement or document line may carry.
pub const MAX_QUANTITY: i64 = 1_000_000_000_000;

pub(crate) fn check_quantity(quantity: i64) -> Result<(), AppError> {
    if quantity <= 0 || quantity > MAX_QUANTITY {
        return Err(AppError::InvalidQuantity(quantity));
    }
    Ok(())
}

/// Balance after applying one movement to `balance_before`.
///
/// Stock may never go negative: an `out` larger than the balance is rejected.
pub fn apply_movement(
    item_id: i64,
    balance_before: i64,
    kind: TransactionKind,
    quantity: i64,
) -> Result<i64, AppError> {
    check_quantity(quantity)?;
    match kind {
        TransactionKind::In => balance_before
            .checked_add(quantity)
            .ok_or_else(|| AppError::Validation("stock balance overflow".into())),
        TransactionKind::Out => {
            if quantity > balance_before {
                return Err(AppError::InsufficientStock {
                    item_id,
                    requested: quantity,
                    available: balance_before,
                });
            }
            Ok(balance_before - quantity)
        }
    }
}

/// Latest `balance_after` for the item, 0 when it has no movements.
pub fn current_balance(conn: &Connection, item_id: i64) -> Result<i64, AppError> {
    Ok(chain_head(conn, item_id)?.map(|(_, balance)| balance).unwrap_or(0))
}

fn chain_head(conn: &Connection, item_id: i64) -> Result<Option<(i64, i64)>, AppError> {
    let head = conn
        .query_row(
            "SELECT seq, balance_after FROM stock_movements WHERE item_id = ? ORDER BY seq DESC LIMIT 1",
            params![item_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    Ok(head)
}

/// Appends one movement to the item's chain.
pub fn record(
    tx: &Transaction<'_>,
    item_id: i64,
    kind: TransactionKind,
    quantity: i64,
    reference: Reference,
    note: Option<&str>,
) -> Result<StockMovement, AppError> {
    check_quantity(quantity)?;
    ensure_active_item(tx, item_id)?;

    let (last_seq, balance_before) = chain_head(tx, item_id)?.unwrap_or((0, 0));
    let balance_after = apply_movement(item_id, balance_before, kind, quantity)?;
    let seq = last_seq + 1;

    tx.execute(
        "INSERT INTO stock_movements (item_id, seq, kind, quantity, balance_before, balance_after, note, reference_id, reference_type, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            item_id,
            seq,
            kind.as_str(),
            quantity,
            balance_before,
            balance_after,
            note,
            reference.reference_id,
            reference.reference_type.as_str(),
            now_iso()
        ],
    )?;
    let id = tx.last_insert_rowid();
    debug!(
        item_id,
        seq,
        kind = kind.as_str(),
        quantity,
        balance_before,
        balance_after,
        "stock movement recorded"
    );

    fetch_movement(tx, id)
}

pub(crate) fn ensure_active_item(conn: &Connection, item_id: i64) -> Result<(), AppError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM items WHERE id = ? AND archived = 0",
            params![item_id],
            |_| Ok(()),
        )
        .optional()?;
    exists.ok_or_else(|| AppError::NotFound(format!("item {item_id}")))
}

/// Like `ensure_active_item`, but archived items still count: their ledger stays readable.
pub(crate) fn ensure_known_item(conn: &Connection, item_id: i64) -> Result<(), AppError> {
    let exists = conn
        .query_row("SELECT 1 FROM items WHERE id = ?", params![item_id], |_| Ok(()))
        .optional()?;
    exists.ok_or_else(|| AppError::NotFound(format!("item {item_id}")))
}

/// Manual correction, posted as a new movement with reference type `koreksi`.
pub fn adjust(conn: &mut Connection, form: &AdjustmentForm) -> Result<StockMovement, AppError> {
    check_quantity(form.quantity)?;
    let note = form
        .note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("Koreksi stok");

    let tx = begin_write(conn)?;
    let movement = match record(
        &tx,
        form.item_id,
        form.kind,
        form.quantity,
        Reference::new(ReferenceType::Adjustment, None),
        Some(note),
    ) {
        Ok(movement) => movement,
        Err(err) => {
            warn!(item_id = form.item_id, error = %err, "stock adjustment rejected");
            return Err(err);
        }
    };
    tx.commit()?;

    info!(
        item_id = movement.item_id,
        kind = movement.kind.as_str(),
        quantity = movement.quantity,
        balance_after = movement.balance_after,
        "stock adjusted"
    );
    Ok(movement)
}

const MOVEMENT_COLUMNS: &str = "
    m.id,
    m.item_id,
    m.seq,
    m.kind,
    m.quantity,
    m.balance_before,
    m.balance_after,
    m.note,
    m.reference_id,
    m.reference_type,
    m.created_at,
    i.code,
    i.name";

fn movement_from_row(row: &Row<'_>) -> rusqlite::Result<StockMovement> {
    let kind_str: String = row.get(3)?;
    let kind = TransactionKind::from_db(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown movement kind {kind_str}").into(),
        )
    })?;
    let reference_type: Option<String> = row.get(9)?;
    Ok(StockMovement {
        id: row.get(0)?,
        item_id: row.get(1)?,
        seq: row.get(2)?,
        kind,
        quantity: row.get(4)?,
        balance_before: row.get(5)?,
        balance_after: row.get(6)?,
        note: row.get(7)?,
        reference_id: row.get(8)?,
        reference_type: reference_type.as_deref().and_then(ReferenceType::from_db),
        created_at: row.get(10)?,
        item_code: row.get(11)?,
        item_name: row.get(12)?,
    })
}

fn fetch_movement(conn: &Connection, id: i64) -> Result<StockMovement, AppError> {
    let sql = format!(
        "SELECT {MOVEMENT_COLUMNS}
         FROM stock_movements m
         JOIN items i ON i.id = m.item_id
         WHERE m.id = ?"
    );
    Ok(conn.query_row(&sql, params![id], movement_from_row)?)
}

/// Movements newest first, optionally for one item, with the total count.
pub fn history(
    conn: &Connection,
    item_id: Option<i64>,
    page: Page,
) -> Result<(Vec<StockMovement>, i64), AppError> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM stock_movements WHERE ?1 IS NULL OR item_id = ?1",
        params![item_id],
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT {MOVEMENT_COLUMNS}
         FROM stock_movements m
         JOIN items i ON i.id = m.item_id
         WHERE ?1 IS NULL OR m.item_id = ?1
         ORDER BY m.id DESC
         LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![item_id, i64::from(page.limit), page.offset()],
        movement_from_row,
    )?;

    let mut movements = Vec::new();
    for row in rows {
        movements.push(row?);
    }
    Ok((movements, total))
}

// TOTAL() never raises on overflow, and the CAST saturates at i64::MAX.
const BALANCE_SELECT: &str = "
    SELECT
        i.id,
        i.code,
        i.name,
        i.unit,
        (SELECT CAST(TOTAL(m.quantity) AS INTEGER) FROM stock_movements m WHERE m.item_id = i.id AND m.kind = 'masuk'),
        (SELECT CAST(TOTAL(m.quantity) AS INTEGER) FROM stock_movements m WHERE m.item_id = i.id AND m.kind = 'keluar'),
        IFNULL((SELECT m.balance_after FROM stock_movements m WHERE m.item_id = i.id ORDER BY m.seq DESC LIMIT 1), 0)
    FROM items i";

fn balance_from_row(row: &Row<'_>) -> rusqlite::Result<StockBalance> {
    Ok(StockBalance {
        item_id: row.get(0)?,
        item_code: row.get(1)?,
        item_name: row.get(2)?,
        unit: row.get(3)?,
        qty_masuk: row.get(4)?,
        qty_keluar: row.get(5)?,
        qty_akhir: row.get(6)?,
    })
}

/// Totals for one item, archived or not.
pub fn balance(conn: &Connection, item_id: i64) -> Result<StockBalance, AppError> {
    let sql = format!("{BALANCE_SELECT} WHERE i.id = ?");
    conn.query_row(&sql, params![item_id], balance_from_row)
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("item {item_id}")))
}

pub fn balances(conn: &Connection) -> Result<Vec<StockBalance>, AppError> {
    let sql = format!("{BALANCE_SELECT} WHERE i.archived = 0 ORDER BY i.id DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], balance_from_row)?;

    let mut balances = Vec::new();
    for row in rows {
        balances.push(row?);
    }
    Ok(balances)
}

/// Walks the item's chain in order and checks every link.
pub fn audit(conn: &Connection, item_id: i64) -> Result<LedgerAudit, AppError> {
    ensure_known_item(conn, item_id)?;

    let mut stmt = conn.prepare(
        "SELECT seq, kind, quantity, balance_before, balance_after
         FROM stock_movements
         WHERE item_id = ?
         ORDER BY seq ASC",
    )?;
    let mut rows = stmt.query(params![item_id])?;

    let mut report = LedgerAudit {
        item_id,
        transactions: 0,
        qty_masuk: 0,
        qty_keluar: 0,
        qty_akhir: 0,
        first_broken_seq: None,
        consistent: true,
    };
    let mut expected_seq = 1;
    let mut running = 0_i64;
    let mut totals_overflowed = false;
    while let Some(row) = rows.next()? {
        let seq: i64 = row.get(0)?;
        let kind: String = row.get(1)?;
        let quantity: i64 = row.get(2)?;
        let before: i64 = row.get(3)?;
        let after: i64 = row.get(4)?;

        let expected_after = match TransactionKind::from_db(&kind) {
            Some(TransactionKind::In) => {
                match report.qty_masuk.checked_add(quantity) {
                    Some(total) => report.qty_masuk = total,
                    None => totals_overflowed = true,
                }
                before.checked_add(quantity)
            }
            Some(TransactionKind::Out) => {
                match report.qty_keluar.checked_add(quantity) {
                    Some(total) => report.qty_keluar = total,
                    None => totals_overflowed = true,
                }
                before.checked_sub(quantity)
            }
            None => None,
        };
        let link_ok = seq == expected_seq && before == running && expected_after == Some(after);
        if !link_ok && report.first_broken_seq.is_none() {
            report.first_broken_seq = Some(seq);
        }

        report.transactions += 1;
        report.qty_akhir = after;
        running = after;
        expected_seq = seq.saturating_add(1);
    }

    if totals_overflowed {
        warn!(item_id, "ledger totals exceed the integer range");
    }
    report.consistent = report.first_broken_seq.is_none()
        && !totals_overflowed
        && report.qty_masuk.checked_sub(report.qty_keluar) == Some(report.qty_akhir);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::fresh_db;
    use crate::db::DbState;
    use rstest::rstest;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};

    fn add_item(conn: &Connection, code: &str) -> i64 {
        conn.execute(
            "INSERT INTO items (code, name, unit, created_at, updated_at) VALUES (?, ?, 'pcs', ?, ?)",
            params![code, format!("Item {code}"), now_iso(), now_iso()],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn post(
        db: &DbState,
        item_id: i64,
        kind: TransactionKind,
        quantity: i64,
    ) -> Result<StockMovement, AppError> {
        let mut conn = db.open().unwrap();
        let tx = begin_write(&mut conn)?;
        let movement = record(
            &tx,
            item_id,
            kind,
            quantity,
            Reference::new(ReferenceType::Adjustment, None),
            None,
        )?;
        tx.commit()?;
        Ok(movement)
    }

    fn movement_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM stock_movements", [], |row| row.get(0))
            .unwrap()
    }

    #[rstest]
    #[case(0, TransactionKind::In, 50, 50)]
    #[case(50, TransactionKind::Out, 20, 30)]
    #[case(30, TransactionKind::Out, 30, 0)]
    fn applies_movements(
        #[case] before: i64,
        #[case] kind: TransactionKind,
        #[case] quantity: i64,
        #[case] after: i64,
    ) {
        assert_eq!(apply_movement(1, before, kind, quantity).unwrap(), after);
    }

    #[rstest]
    #[case(0, TransactionKind::In)]
    #[case(-5, TransactionKind::In)]
    #[case(MAX_QUANTITY + 1, TransactionKind::In)]
    #[case(i64::MAX, TransactionKind::In)]
    #[case(i64::MAX, TransactionKind::Out)]
    fn rejects_quantity_outside_range(#[case] quantity: i64, #[case] kind: TransactionKind) {
        assert!(matches!(
            apply_movement(1, 10, kind, quantity),
            Err(AppError::InvalidQuantity(q)) if q == quantity
        ));
    }

    #[test]
    fn accepts_quantity_at_the_ceiling() {
        assert_eq!(
            apply_movement(1, 0, TransactionKind::In, MAX_QUANTITY).unwrap(),
            MAX_QUANTITY
        );
    }

    #[test]
    fn rejects_out_beyond_balance() {
        let err = apply_movement(9, 30, TransactionKind::Out, 100).unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientStock {
                item_id: 9,
                requested: 100,
                available: 30
            }
        ));
    }

    #[test]
    fn in_fifty_out_twenty_then_overdraw_is_rejected() {
        let (_dir, db) = fresh_db();
        let conn = db.open().unwrap();
        let item = add_item(&conn, "BRG001");
        assert_eq!(current_balance(&conn, item).unwrap(), 0);

        let first = post(&db, item, TransactionKind::In, 50).unwrap();
        assert_eq!((first.seq, first.balance_before, first.balance_after), (1, 0, 50));

        let second = post(&db, item, TransactionKind::Out, 20).unwrap();
        assert_eq!((second.seq, second.balance_before, second.balance_after), (2, 50, 30));

        let err = post(&db, item, TransactionKind::Out, 100).unwrap_err();
        assert!(matches!(err, AppError::InsufficientStock { available: 30, .. }));
        assert_eq!(current_balance(&conn, item).unwrap(), 30);
        assert_eq!(movement_count(&conn), 2);
    }

    #[test]
    fn zero_quantity_leaves_no_entry() {
        let (_dir, db) = fresh_db();
        let conn = db.open().unwrap();
        let item = add_item(&conn, "BRG001");

        assert!(matches!(
            post(&db, item, TransactionKind::In, 0),
            Err(AppError::InvalidQuantity(0))
        ));
        assert_eq!(movement_count(&conn), 0);
    }

    #[test]
    fn oversized_posts_and_adjustments_leave_no_entry() {
        let (_dir, db) = fresh_db();
        let mut conn = db.open().unwrap();
        let item = add_item(&conn, "BRG001");

        assert!(matches!(
            post(&db, item, TransactionKind::In, i64::MAX),
            Err(AppError::InvalidQuantity(i64::MAX))
        ));
        let err = adjust(
            &mut conn,
            &AdjustmentForm {
                item_id: item,
                kind: TransactionKind::In,
                quantity: MAX_QUANTITY + 1,
                note: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidQuantity(_)));
        assert_eq!(movement_count(&conn), 0);
    }

    #[test]
    fn huge_stored_totals_do_not_break_reads() {
        let (_dir, db) = fresh_db();
        let conn = db.open().unwrap();
        let item = add_item(&conn, "BRG001");
        // rows written before quantities were capped
        let rows = [
            (1, "masuk", i64::MAX, 0, i64::MAX),
            (2, "keluar", i64::MAX, i64::MAX, 0),
            (3, "masuk", 1, 0, 1),
        ];
        for (seq, kind, quantity, before, after) in rows {
            conn.execute(
                "INSERT INTO stock_movements (item_id, seq, kind, quantity, balance_before, balance_after, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![item, seq, kind, quantity, before, after, now_iso()],
            )
            .unwrap();
        }

        let report = audit(&conn, item).unwrap();
        assert_eq!(report.transactions, 3);
        assert_eq!(report.first_broken_seq, None);
        assert_eq!(report.qty_akhir, 1);
        assert!(!report.consistent);

        let bal = balance(&conn, item).unwrap();
        assert_eq!(bal.qty_akhir, 1);
        assert_eq!(bal.qty_masuk, i64::MAX);
        assert_eq!(balances(&conn).unwrap().len(), 1);
    }

    #[test]
    fn archived_item_keeps_history_and_balance() {
        let (_dir, db) = fresh_db();
        let conn = db.open().unwrap();
        let item = add_item(&conn, "BRG001");
        post(&db, item, TransactionKind::In, 12).unwrap();
        post(&db, item, TransactionKind::Out, 5).unwrap();
        conn.execute("UPDATE items SET archived = 1 WHERE id = ?", params![item])
            .unwrap();

        ensure_known_item(&conn, item).unwrap();
        let (rows, total) = history(&conn, Some(item), Page { page: 1, limit: 10 }).unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows[0].seq, 2);
        assert_eq!(balance(&conn, item).unwrap().qty_akhir, 7);
        assert!(balances(&conn).unwrap().is_empty());
        assert!(matches!(
            ensure_known_item(&conn, 999),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn unknown_and_archived_items_are_not_found() {
        let (_dir, db) = fresh_db();
        let conn = db.open().unwrap();
        let item = add_item(&conn, "BRG001");
        conn.execute("UPDATE items SET archived = 1 WHERE id = ?", params![item])
            .unwrap();

        assert!(matches!(
            post(&db, 999, TransactionKind::In, 1),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            post(&db, item, TransactionKind::In, 1),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn final_balance_equals_total_in_minus_total_out() {
        let (_dir, db) = fresh_db();
        let conn = db.open().unwrap();
        let item = add_item(&conn, "BRG001");

        let script = [
            (TransactionKind::In, 12),
            (TransactionKind::Out, 5),
            (TransactionKind::Out, 9),
            (TransactionKind::In, 40),
            (TransactionKind::Out, 7),
            (TransactionKind::Out, 40),
            (TransactionKind::In, 3),
        ];
        let (mut total_in, mut total_out) = (0, 0);
        for (kind, qty) in script {
            if post(&db, item, kind, qty).is_ok() {
                match kind {
                    TransactionKind::In => total_in += qty,
                    TransactionKind::Out => total_out += qty,
                }
            }
        }

        assert_eq!(current_balance(&conn, item).unwrap(), total_in - total_out);
        let report = audit(&conn, item).unwrap();
        assert!(report.consistent);
        assert_eq!(report.qty_masuk, total_in);
        assert_eq!(report.qty_keluar, total_out);
    }

    #[test]
    fn concurrent_mixed_posts_keep_the_chain_intact() {
        let (_dir, db) = fresh_db();
        let conn = db.open().unwrap();
        let item = add_item(&conn, "BRG001");
        post(&db, item, TransactionKind::In, 1_000).unwrap();

        let workers = 8;
        let per_worker = 10;
        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|w| {
                let db = db.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    for i in 0..per_worker {
                        let kind = if (w + i) % 3 == 0 {
                            TransactionKind::In
                        } else {
                            TransactionKind::Out
                        };
                        post(&db, item, kind, 3).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // balances can revisit a value after an in, so check the whole chain
        let report = audit(&conn, item).unwrap();
        assert!(report.consistent, "{report:?}");
        assert_eq!(report.transactions as usize, 1 + workers * per_worker);
        assert_eq!(
            current_balance(&conn, item).unwrap(),
            report.qty_masuk - report.qty_keluar
        );
    }

    #[test]
    fn concurrent_outs_on_same_item_have_distinct_balance_before() {
        let (_dir, db) = fresh_db();
        let conn = db.open().unwrap();
        let item = add_item(&conn, "BRG001");
        post(&db, item, TransactionKind::In, 100).unwrap();

        // strictly decreasing chain: any duplicate balance_before means a lost update
        let workers = 10;
        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let db = db.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..5 {
                        post(&db, item, TransactionKind::Out, 2).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut stmt = conn
            .prepare("SELECT balance_before FROM stock_movements WHERE item_id = ? AND kind = 'keluar'")
            .unwrap();
        let befores: Vec<i64> = stmt
            .query_map(params![item], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        let unique: HashSet<_> = befores.iter().copied().collect();
        assert_eq!(befores.len(), 50);
        assert_eq!(unique.len(), befores.len());
        assert_eq!(current_balance(&conn, item).unwrap(), 0);
    }

    #[test]
    fn adjustment_records_koreksi_reference() {
        let (_dir, db) = fresh_db();
        let mut conn = db.open().unwrap();
        let item = add_item(&conn, "BRG001");

        let movement = adjust(
            &mut conn,
            &AdjustmentForm {
                item_id: item,
                kind: TransactionKind::In,
                quantity: 7,
                note: Some("  ".into()),
            },
        )
        .unwrap();
        assert_eq!(movement.reference_type, Some(ReferenceType::Adjustment));
        assert_eq!(movement.note.as_deref(), Some("Koreksi stok"));
        assert_eq!(movement.balance_after, 7);

        let err = adjust(
            &mut conn,
            &AdjustmentForm {
                item_id: item,
                kind: TransactionKind::Out,
                quantity: 8,
                note: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InsufficientStock { .. }));
    }

    #[test]
    fn history_pages_newest_first_and_filters_by_item() {
        let (_dir, db) = fresh_db();
        let conn = db.open().unwrap();
        let a = add_item(&conn, "BRG001");
        let b = add_item(&conn, "BRG002");
        for qty in 1..=5 {
            post(&db, a, TransactionKind::In, qty).unwrap();
        }
        post(&db, b, TransactionKind::In, 9).unwrap();

        let (all, total) = history(&conn, None, Page { page: 1, limit: 4 }).unwrap();
        assert_eq!(total, 6);
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].item_id, b);

        let (only_a, total_a) = history(&conn, Some(a), Page { page: 2, limit: 3 }).unwrap();
        assert_eq!(total_a, 5);
        assert_eq!(only_a.len(), 2);
        assert_eq!(only_a[0].seq, 2);
        assert_eq!(only_a[1].seq, 1);
    }

    #[test]
    fn history_order_follows_insertion_not_the_clock() {
        let (_dir, db) = fresh_db();
        let conn = db.open().unwrap();
        let item = add_item(&conn, "BRG001");
        post(&db, item, TransactionKind::In, 4).unwrap();
        post(&db, item, TransactionKind::Out, 1).unwrap();
        // clock stepped back between the two writes
        conn.execute(
            "UPDATE stock_movements SET created_at = '2999-01-01T00:00:00.000000Z' WHERE seq = 1",
            [],
        )
        .unwrap();

        let (rows, _) = history(&conn, Some(item), Page { page: 1, limit: 10 }).unwrap();
        let seqs: Vec<i64> = rows.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![2, 1]);
    }

    #[test]
    fn balance_reports_in_out_and_final() {
        let (_dir, db) = fresh_db();
        let conn = db.open().unwrap();
        let item = add_item(&conn, "BRG001");
        post(&db, item, TransactionKind::In, 50).unwrap();
        post(&db, item, TransactionKind::Out, 20).unwrap();

        let bal = balance(&conn, item).unwrap();
        assert_eq!((bal.qty_masuk, bal.qty_keluar, bal.qty_akhir), (50, 20, 30));
        assert_eq!(balances(&conn).unwrap(), vec![bal]);
        assert!(matches!(balance(&conn, 404), Err(AppError::NotFound(_))));
    }

    #[test]
    fn audit_flags_a_broken_link() {
        let (_dir, db) = fresh_db();
        let conn = db.open().unwrap();
        let item = add_item(&conn, "BRG001");
        post(&db, item, TransactionKind::In, 10).unwrap();
        post(&db, item, TransactionKind::In, 10).unwrap();
        conn.execute(
            "UPDATE stock_movements SET balance_before = 3 WHERE item_id = ? AND seq = 2",
            params![item],
        )
        .unwrap();

        let report = audit(&conn, item).unwrap();
        assert!(!report.consistent);
        assert_eq!(report.first_broken_seq, Some(2));
    }
}
