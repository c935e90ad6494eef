use crate::db::{begin_write, decimal_at, now_iso};
use crate::error::{is_unique_violation, AppError};
use crate::models::{like_pattern, Item, ItemForm, ItemUpdateForm, ItemWithStock, Page};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::info;

const CODE_PREFIX: &str = "BRG";
const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 5;

const ITEM_COLUMNS: &str = "
    i.id,
    i.code,
    i.name,
    i.category,
    i.unit,
    i.buy_price,
    i.sell_price,
    i.low_stock_threshold,
    i.created_at,
    i.updated_at";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        category: row.get(3)?,
        unit: row.get(4)?,
        buy_price: decimal_at(row, 5)?,
        sell_price: decimal_at(row, 6)?,
        low_stock_threshold: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

struct Fields<'a> {
    name: &'a str,
    category: &'a str,
    unit: &'a str,
    buy_price: Decimal,
    sell_price: Decimal,
    low_stock_threshold: i64,
}

fn validate<'a>(
    name: &'a str,
    category: &'a str,
    unit: &'a str,
    buy_price: Decimal,
    sell_price: Decimal,
    low_stock_threshold: Option<i64>,
) -> Result<Fields<'a>, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("nama_barang is required".into()));
    }
    let unit = unit.trim();
    if unit.is_empty() {
        return Err(AppError::Validation("satuan is required".into()));
    }
    if buy_price < Decimal::ZERO {
        return Err(AppError::InvalidPrice(format!("harga_beli must be >= 0, got {buy_price}")));
    }
    if sell_price < Decimal::ZERO {
        return Err(AppError::InvalidPrice(format!("harga_jual must be >= 0, got {sell_price}")));
    }
    let low_stock_threshold = low_stock_threshold.unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);
    if low_stock_threshold < 0 {
        return Err(AppError::Validation("stok_minimum must be >= 0".into()));
    }
    Ok(Fields {
        name,
        category: category.trim(),
        unit,
        buy_price,
        sell_price,
        low_stock_threshold,
    })
}

/// Next `BRG` code, one above the highest numeric suffix in use (archived items included).
pub fn generate_code(conn: &Connection) -> Result<String, AppError> {
    let mut stmt = conn.prepare("SELECT code FROM items WHERE code LIKE 'BRG%'")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut highest = 0_u64;
    for row in rows {
        let code = row?;
        if let Some(n) = code
            .strip_prefix(CODE_PREFIX)
            .and_then(|suffix| suffix.parse::<u64>().ok())
        {
            highest = highest.max(n);
        }
    }
    Ok(format!("{CODE_PREFIX}{:03}", highest + 1))
}

pub fn create_item(conn: &mut Connection, form: &ItemForm) -> Result<Item, AppError> {
    let fields = validate(
        &form.name,
        &form.category,
        &form.unit,
        form.buy_price,
        form.sell_price,
        form.low_stock_threshold,
    )?;
    let requested_code = form
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let tx = begin_write(conn)?;
    let code = match requested_code {
        Some(code) => code.to_string(),
        None => generate_code(&tx)?,
    };

    let ts = now_iso();
    let inserted = tx.execute(
        "INSERT INTO items (code, name, category, unit, buy_price, sell_price, low_stock_threshold, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            code,
            fields.name,
            fields.category,
            fields.unit,
            fields.buy_price.to_string(),
            fields.sell_price.to_string(),
            fields.low_stock_threshold,
            ts,
            ts
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => return Err(AppError::DuplicateCode(code)),
        Err(err) => return Err(err.into()),
    }
    let id = tx.last_insert_rowid();
    let item = fetch_item(&tx, id)?.ok_or_else(|| AppError::Internal(format!("item {id} vanished")))?;
    tx.commit()?;

    info!(item_id = item.id, code = %item.code, "item created");
    Ok(item)
}

pub fn update_item(conn: &mut Connection, id: i64, form: &ItemUpdateForm) -> Result<Item, AppError> {
    let fields = validate(
        &form.name,
        &form.category,
        &form.unit,
        form.buy_price,
        form.sell_price,
        form.low_stock_threshold,
    )?;

    let tx = begin_write(conn)?;
    let changed = tx.execute(
        "UPDATE items
         SET name = ?, category = ?, unit = ?, buy_price = ?, sell_price = ?, low_stock_threshold = ?, updated_at = ?
         WHERE id = ? AND archived = 0",
        params![
            fields.name,
            fields.category,
            fields.unit,
            fields.buy_price.to_string(),
            fields.sell_price.to_string(),
            fields.low_stock_threshold,
            now_iso(),
            id
        ],
    )?;
    if changed == 0 {
        return Err(AppError::NotFound(format!("item {id}")));
    }
    let item = fetch_item(&tx, id)?.ok_or_else(|| AppError::NotFound(format!("item {id}")))?;
    tx.commit()?;

    info!(item_id = id, "item updated");
    Ok(item)
}

/// Soft delete: the row and its movements stay, the code stays reserved.
pub fn archive_item(conn: &mut Connection, id: i64) -> Result<(), AppError> {
    let tx = begin_write(conn)?;
    let changed = tx.execute(
        "UPDATE items SET archived = 1, updated_at = ? WHERE id = ? AND archived = 0",
        params![now_iso(), id],
    )?;
    if changed == 0 {
        return Err(AppError::NotFound(format!("item {id}")));
    }
    tx.commit()?;

    info!(item_id = id, "item archived");
    Ok(())
}

fn fetch_item(conn: &Connection, id: i64) -> Result<Option<Item>, AppError> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM items i WHERE i.id = ? AND i.archived = 0");
    Ok(conn.query_row(&sql, params![id], item_from_row).optional()?)
}

pub fn find_item(conn: &Connection, id: i64) -> Result<Item, AppError> {
    fetch_item(conn, id)?.ok_or_else(|| AppError::NotFound(format!("item {id}")))
}

const SEARCH_FILTER: &str =
    "i.archived = 0 AND (i.name LIKE ?1 ESCAPE '\\' OR i.code LIKE ?1 ESCAPE '\\')";

fn count_items(conn: &Connection, pattern: &str) -> Result<i64, AppError> {
    let sql = format!("SELECT COUNT(*) FROM items i WHERE {SEARCH_FILTER}");
    Ok(conn.query_row(&sql, params![pattern], |row| row.get(0))?)
}

pub fn list_items(
    conn: &Connection,
    search: Option<&str>,
    page: Page,
) -> Result<(Vec<Item>, i64), AppError> {
    let pattern = like_pattern(search);
    let total = count_items(conn, &pattern)?;

    let sql = format!(
        "SELECT {ITEM_COLUMNS}
         FROM items i
         WHERE {SEARCH_FILTER}
         ORDER BY i.id DESC
         LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![pattern, i64::from(page.limit), page.offset()],
        item_from_row,
    )?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok((items, total))
}

pub fn list_items_with_stock(
    conn: &Connection,
    search: Option<&str>,
    page: Page,
) -> Result<(Vec<ItemWithStock>, i64), AppError> {
    let pattern = like_pattern(search);
    let total = count_items(conn, &pattern)?;

    let sql = format!(
        "SELECT {ITEM_COLUMNS},
            (SELECT CAST(TOTAL(m.quantity) AS INTEGER) FROM stock_movements m WHERE m.item_id = i.id AND m.kind = 'masuk'),
            (SELECT CAST(TOTAL(m.quantity) AS INTEGER) FROM stock_movements m WHERE m.item_id = i.id AND m.kind = 'keluar'),
            IFNULL((SELECT m.balance_after FROM stock_movements m WHERE m.item_id = i.id ORDER BY m.seq DESC LIMIT 1), 0)
         FROM items i
         WHERE {SEARCH_FILTER}
         ORDER BY i.id DESC
         LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![pattern, i64::from(page.limit), page.offset()],
        |row| {
            let item = item_from_row(row)?;
            let qty_akhir: i64 = row.get(12)?;
            Ok(ItemWithStock {
                is_low_stock: qty_akhir <= item.low_stock_threshold,
                item,
                qty_masuk: row.get(10)?,
                qty_keluar: row.get(11)?,
                qty_akhir,
            })
        },
    )?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok((items, total))
}
