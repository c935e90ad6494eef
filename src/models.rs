use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    #[serde(rename = "masuk")]
    In,
    #[serde(rename = "keluar")]
    Out,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::In => "masuk",
            TransactionKind::Out => "keluar",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "masuk" => Some(TransactionKind::In),
            "keluar" => Some(TransactionKind::Out),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceType {
    #[serde(rename = "pembelian")]
    Purchase,
    #[serde(rename = "penjualan")]
    Sale,
    #[serde(rename = "koreksi")]
    Adjustment,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Purchase => "pembelian",
            ReferenceType::Sale => "penjualan",
            ReferenceType::Adjustment => "koreksi",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "pembelian" => Some(ReferenceType::Purchase),
            "penjualan" => Some(ReferenceType::Sale),
            "koreksi" => Some(ReferenceType::Adjustment),
            _ => None,
        }
    }
}

/// Origin of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub reference_type: ReferenceType,
    pub reference_id: Option<i64>,
}

impl Reference {
    pub fn new(reference_type: ReferenceType, reference_id: Option<i64>) -> Self {
        Self {
            reference_type,
            reference_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Item {
    pub id: i64,
    #[serde(rename = "kode_barang")]
    pub code: String,
    #[serde(rename = "nama_barang")]
    pub name: String,
    #[serde(rename = "kategori")]
    pub category: String,
    #[serde(rename = "satuan")]
    pub unit: String,
    #[serde(rename = "harga_beli")]
    pub buy_price: Decimal,
    #[serde(rename = "harga_jual")]
    pub sell_price: Decimal,
    #[serde(rename = "stok_minimum")]
    pub low_stock_threshold: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemWithStock {
    #[serde(flatten)]
    pub item: Item,
    pub qty_masuk: i64,
    pub qty_keluar: i64,
    pub qty_akhir: i64,
    pub is_low_stock: bool,
}

#[derive(Debug, Deserialize)]
pub struct ItemForm {
    #[serde(rename = "kode_barang", default)]
    pub code: Option<String>,
    #[serde(rename = "nama_barang")]
    pub name: String,
    #[serde(rename = "kategori", default)]
    pub category: String,
    #[serde(rename = "satuan")]
    pub unit: String,
    #[serde(rename = "harga_beli")]
    pub buy_price: Decimal,
    #[serde(rename = "harga_jual")]
    pub sell_price: Decimal,
    #[serde(rename = "stok_minimum", default)]
    pub low_stock_threshold: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ItemUpdateForm {
    #[serde(rename = "nama_barang")]
    pub name: String,
    #[serde(rename = "kategori", default)]
    pub category: String,
    #[serde(rename = "satuan")]
    pub unit: String,
    #[serde(rename = "harga_beli")]
    pub buy_price: Decimal,
    #[serde(rename = "harga_jual")]
    pub sell_price: Decimal,
    #[serde(rename = "stok_minimum", default)]
    pub low_stock_threshold: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StockMovement {
    pub id: i64,
    #[serde(rename = "barang_id")]
    pub item_id: i64,
    pub seq: i64,
    #[serde(rename = "jenis_transaksi")]
    pub kind: TransactionKind,
    #[serde(rename = "qty")]
    pub quantity: i64,
    #[serde(rename = "stok_sebelum")]
    pub balance_before: i64,
    #[serde(rename = "stok_sesudah")]
    pub balance_after: i64,
    #[serde(rename = "keterangan")]
    pub note: Option<String>,
    #[serde(rename = "referensi_id")]
    pub reference_id: Option<i64>,
    #[serde(rename = "referensi_tipe")]
    pub reference_type: Option<ReferenceType>,
    pub created_at: String,
    #[serde(rename = "kode_barang")]
    pub item_code: String,
    #[serde(rename = "nama_barang")]
    pub item_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockBalance {
    #[serde(rename = "barang_id")]
    pub item_id: i64,
    #[serde(rename = "kode_barang")]
    pub item_code: String,
    #[serde(rename = "nama_barang")]
    pub item_name: String,
    #[serde(rename = "satuan")]
    pub unit: String,
    pub qty_masuk: i64,
    pub qty_keluar: i64,
    pub qty_akhir: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerAudit {
    #[serde(rename = "barang_id")]
    pub item_id: i64,
    pub transactions: i64,
    pub qty_masuk: i64,
    pub qty_keluar: i64,
    pub qty_akhir: i64,
    /// First `seq` whose link breaks the chain, if any.
    pub first_broken_seq: Option<i64>,
    pub consistent: bool,
}

#[derive(Debug, Deserialize)]
pub struct AdjustmentForm {
    #[serde(rename = "barang_id")]
    pub item_id: i64,
    #[serde(rename = "jenis_transaksi")]
    pub kind: TransactionKind,
    #[serde(rename = "qty")]
    pub quantity: i64,
    #[serde(rename = "keterangan", default)]
    pub note: Option<String>,
}

/// Supplier on purchases, customer on sales.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Counterparty {
    #[serde(rename = "supplier")]
    Supplier(String),
    #[serde(rename = "customer")]
    Customer(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceHeader {
    pub id: i64,
    #[serde(rename = "no_faktur")]
    pub invoice_no: String,
    #[serde(rename = "tanggal")]
    pub date: String,
    #[serde(flatten)]
    pub counterparty: Counterparty,
    pub total: Decimal,
    #[serde(rename = "keterangan")]
    pub note: String,
    pub created_by: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceLine {
    pub id: i64,
    pub header_id: i64,
    #[serde(rename = "barang_id")]
    pub item_id: i64,
    #[serde(rename = "qty")]
    pub quantity: i64,
    #[serde(rename = "harga")]
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub created_at: String,
    #[serde(rename = "kode_barang")]
    pub item_code: String,
    #[serde(rename = "nama_barang")]
    pub item_name: String,
    #[serde(rename = "satuan")]
    pub unit: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    #[serde(flatten)]
    pub header: InvoiceHeader,
    pub details: Vec<InvoiceLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineForm {
    #[serde(rename = "barang_id")]
    pub item_id: i64,
    #[serde(rename = "qty")]
    pub quantity: i64,
    #[serde(rename = "harga")]
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseForm {
    #[serde(default)]
    pub no_faktur: Option<String>,
    pub tanggal: String,
    pub supplier: String,
    #[serde(default)]
    pub keterangan: String,
    pub details: Vec<LineForm>,
}

#[derive(Debug, Deserialize)]
pub struct SaleForm {
    #[serde(default)]
    pub no_faktur: Option<String>,
    pub tanggal: String,
    pub customer: String,
    #[serde(default)]
    pub keterangan: String,
    pub details: Vec<LineForm>,
}

/// A purchase or sale before posting, independent of its wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDraft {
    pub invoice_no: Option<String>,
    pub date: String,
    pub counterparty: String,
    pub note: String,
    pub lines: Vec<LineForm>,
}

impl From<PurchaseForm> for InvoiceDraft {
    fn from(form: PurchaseForm) -> Self {
        Self {
            invoice_no: form.no_faktur,
            date: form.tanggal,
            counterparty: form.supplier,
            note: form.keterangan,
            lines: form.details,
        }
    }
}

impl From<SaleForm> for InvoiceDraft {
    fn from(form: SaleForm) -> Self {
        Self {
            invoice_no: form.no_faktur,
            date: form.tanggal,
            counterparty: form.customer,
            note: form.keterangan,
            lines: form.details,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    /// Pages start at 1; `limit` falls back to `default_limit` and is clamped to `max_limit`.
    pub fn resolve(params: &PageParams, default_limit: u32, max_limit: u32) -> Self {
        let page = params
            .page
            .filter(|p| *p >= 1)
            .map(|p| p.min(i64::from(u32::MAX)) as u32)
            .unwrap_or(1);
        let limit = params
            .limit
            .filter(|l| *l >= 1)
            .map(|l| l.min(i64::from(max_limit)) as u32)
            .unwrap_or(default_limit);
        Self { page, limit }
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.limit)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Meta {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
}

impl Meta {
    pub fn new(page: Page, total: i64) -> Self {
        Self {
            page: page.page,
            limit: page.limit,
            total,
        }
    }
}

/// `%term%` for LIKE, with LIKE wildcards in the term escaped by `\`.
pub(crate) fn like_pattern(search: Option<&str>) -> String {
    let term = search.map(str::trim).unwrap_or("");
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn dec(raw: &str) -> Decimal {
        raw.parse().unwrap()
    }

    #[rstest]
    #[case(None, None, 1, 10)]
    #[case(Some(0), Some(0), 1, 10)]
    #[case(Some(-3), Some(-1), 1, 10)]
    #[case(Some(4), Some(25), 4, 25)]
    #[case(Some(2), Some(5000), 2, 100)]
    fn resolves_page_params(
        #[case] page: Option<i64>,
        #[case] limit: Option<i64>,
        #[case] want_page: u32,
        #[case] want_limit: u32,
    ) {
        let params = PageParams {
            page,
            limit,
            search: None,
        };
        let resolved = Page::resolve(&params, 10, 100);
        assert_eq!(resolved, Page { page: want_page, limit: want_limit });
    }

    #[test]
    fn offset_follows_page_and_limit() {
        assert_eq!(Page { page: 3, limit: 20 }.offset(), 40);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(Some(" 50%_off ")), "%50\\%\\_off%");
        assert_eq!(like_pattern(None), "%%");
    }

    #[test]
    fn invoice_header_serializes_counterparty_by_role() {
        let header = InvoiceHeader {
            id: 1,
            invoice_no: "BL/20240105/001".into(),
            date: "2024-01-05".into(),
            counterparty: Counterparty::Supplier("PT Sumber".into()),
            total: dec("1500.50"),
            note: String::new(),
            created_by: 1,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["supplier"], "PT Sumber");
        assert_eq!(json["no_faktur"], "BL/20240105/001");
        assert_eq!(json["total"], 1500.5);
        assert!(json.get("customer").is_none());
    }

    #[test]
    fn line_form_accepts_integer_and_fractional_prices() {
        let line: LineForm =
            serde_json::from_str(r#"{"barang_id": 2, "qty": 3, "harga": 12500}"#).unwrap();
        assert_eq!(line.unit_price, dec("12500"));
        let line: LineForm =
            serde_json::from_str(r#"{"barang_id": 2, "qty": 3, "harga": 12.75}"#).unwrap();
        assert_eq!(line.unit_price, dec("12.75"));
    }
}
