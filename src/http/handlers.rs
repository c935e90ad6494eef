use crate::auth::{self, LoginForm, LoginResponse, NewUserForm, RefreshForm, User};
use crate::catalog;
use crate::error::AppError;
use crate::http::extract::{idempotency_key, AdminUser, AuthUser, IdPath, JsonBody, PageQuery};
use crate::http::response::ApiResponse;
use crate::ledger;
use crate::models::{
    AdjustmentForm, Invoice, InvoiceDraft, InvoiceHeader, Item, ItemForm, ItemUpdateForm,
    ItemWithStock, LedgerAudit, Meta, PageParams, PurchaseForm, SaleForm, StockBalance, StockMovement,
};
use crate::posting::{self, DocumentKind, Posted};
use crate::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

type ApiResult<T> = Result<ApiResponse<T>, AppError>;

pub(crate) async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn not_found() -> AppError {
    AppError::NotFound("route".into())
}

pub(crate) async fn login(
    State(state): State<AppState>,
    JsonBody(form): JsonBody<LoginForm>,
) -> ApiResult<LoginResponse> {
    let signer = state.signer().clone();
    let session = state
        .with_conn(move |conn| auth::login(conn, &signer, &form))
        .await?;
    Ok(ApiResponse::ok("Login successful", session))
}

pub(crate) async fn refresh_token(
    State(state): State<AppState>,
    JsonBody(form): JsonBody<RefreshForm>,
) -> ApiResult<LoginResponse> {
    let signer = state.signer().clone();
    let session = state
        .with_conn(move |conn| auth::refresh(conn, &signer, &form.refresh_token))
        .await?;
    Ok(ApiResponse::ok("Token refreshed", session))
}

pub(crate) async fn logout(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> ApiResult<()> {
    state
        .with_conn(move |conn| auth::logout(conn, &claims.sid))
        .await?;
    Ok(ApiResponse::<()>::message("Logged out"))
}

pub(crate) async fn profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> ApiResult<User> {
    let user = state
        .with_conn(move |conn| auth::find_user(conn, claims.sub))
        .await?;
    Ok(ApiResponse::ok("Profile retrieved", user))
}

pub(crate) async fn create_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    JsonBody(form): JsonBody<NewUserForm>,
) -> ApiResult<User> {
    let user = state
        .with_conn(move |conn| auth::create_user(conn, &form))
        .await?;
    Ok(ApiResponse::created("User created", user))
}

pub(crate) async fn list_items(
    State(state): State<AppState>,
    _user: AuthUser,
    PageQuery(params): PageQuery,
) -> ApiResult<Vec<Item>> {
    let page = state.page(&params);
    let (items, total) = state
        .with_conn(move |conn| catalog::list_items(conn, params.search.as_deref(), page))
        .await?;
    Ok(ApiResponse::paged("Items retrieved", items, Meta::new(page, total)))
}

pub(crate) async fn list_items_with_stock(
    State(state): State<AppState>,
    _user: AuthUser,
    PageQuery(params): PageQuery,
) -> ApiResult<Vec<ItemWithStock>> {
    let page = state.page(&params);
    let (items, total) = state
        .with_conn(move |conn| {
            catalog::list_items_with_stock(conn, params.search.as_deref(), page)
        })
        .await?;
    Ok(ApiResponse::paged(
        "Item stock retrieved",
        items,
        Meta::new(page, total),
    ))
}

pub(crate) async fn get_item(
    State(state): State<AppState>,
    _user: AuthUser,
    IdPath(id): IdPath,
) -> ApiResult<Item> {
    let item = state
        .with_conn(move |conn| catalog::find_item(conn, id))
        .await?;
    Ok(ApiResponse::ok("Item retrieved", item))
}

pub(crate) async fn create_item(
    State(state): State<AppState>,
    _admin: AdminUser,
    JsonBody(form): JsonBody<ItemForm>,
) -> ApiResult<Item> {
    let item = state
        .with_conn(move |conn| catalog::create_item(conn, &form))
        .await?;
    Ok(ApiResponse::created("Item created", item))
}

pub(crate) async fn update_item(
    State(state): State<AppState>,
    _admin: AdminUser,
    IdPath(id): IdPath,
    JsonBody(form): JsonBody<ItemUpdateForm>,
) -> ApiResult<Item> {
    let item = state
        .with_conn(move |conn| catalog::update_item(conn, id, &form))
        .await?;
    Ok(ApiResponse::ok("Item updated", item))
}

pub(crate) async fn delete_item(
    State(state): State<AppState>,
    _admin: AdminUser,
    IdPath(id): IdPath,
) -> ApiResult<()> {
    state
        .with_conn(move |conn| catalog::archive_item(conn, id))
        .await?;
    Ok(ApiResponse::<()>::message("Item deleted"))
}

pub(crate) async fn balances(
    State(state): State<AppState>,
    _user: AuthUser,
) -> ApiResult<Vec<StockBalance>> {
    let balances = state.with_conn(|conn| ledger::balances(conn)).await?;
    Ok(ApiResponse::ok("Stock retrieved", balances))
}

pub(crate) async fn balance(
    State(state): State<AppState>,
    _user: AuthUser,
    IdPath(item_id): IdPath,
) -> ApiResult<StockBalance> {
    let balance = state
        .with_conn(move |conn| ledger::balance(conn, item_id))
        .await?;
    Ok(ApiResponse::ok("Stock retrieved", balance))
}

async fn history_page(
    state: AppState,
    item_id: Option<i64>,
    params: PageParams,
) -> ApiResult<Vec<StockMovement>> {
    let page = state.page(&params);
    let (movements, total) = state
        .with_conn(move |conn| {
            if let Some(id) = item_id {
                ledger::ensure_known_item(conn, id)?;
            }
            ledger::history(conn, item_id, page)
        })
        .await?;
    Ok(ApiResponse::paged(
        "Stock history retrieved",
        movements,
        Meta::new(page, total),
    ))
}

pub(crate) async fn history(
    State(state): State<AppState>,
    _user: AuthUser,
    PageQuery(params): PageQuery,
) -> ApiResult<Vec<StockMovement>> {
    history_page(state, None, params).await
}

pub(crate) async fn item_history(
    State(state): State<AppState>,
    _user: AuthUser,
    IdPath(item_id): IdPath,
    PageQuery(params): PageQuery,
) -> ApiResult<Vec<StockMovement>> {
    history_page(state, Some(item_id), params).await
}

pub(crate) async fn adjust_stock(
    State(state): State<AppState>,
    _admin: AdminUser,
    JsonBody(form): JsonBody<AdjustmentForm>,
) -> ApiResult<StockMovement> {
    let movement = state
        .with_conn(move |conn| ledger::adjust(conn, &form))
        .await?;
    Ok(ApiResponse::created("Stock adjusted", movement))
}

pub(crate) async fn audit(
    State(state): State<AppState>,
    _user: AuthUser,
    IdPath(item_id): IdPath,
) -> ApiResult<LedgerAudit> {
    let report = state
        .with_conn(move |conn| ledger::audit(conn, item_id))
        .await?;
    Ok(ApiResponse::ok("Ledger audited", report))
}

async fn post_document(
    state: AppState,
    kind: DocumentKind,
    user_id: i64,
    headers: &HeaderMap,
    draft: InvoiceDraft,
) -> ApiResult<Invoice> {
    let key = idempotency_key(headers)?;
    let posted = state
        .with_conn(move |conn| posting::post(conn, kind, &draft, user_id, key.as_deref()))
        .await?;
    let message = match kind {
        DocumentKind::Purchase => "Purchase recorded",
        DocumentKind::Sale => "Sale recorded",
    };
    Ok(match posted {
        Posted::Created(invoice) => ApiResponse::created(message, invoice),
        Posted::Replayed(invoice) => ApiResponse::ok(format!("{message} (replayed)"), invoice),
    })
}

async fn list_documents(
    state: AppState,
    kind: DocumentKind,
    params: PageParams,
) -> ApiResult<Vec<InvoiceHeader>> {
    let page = state.page(&params);
    let (headers, total) = state
        .with_conn(move |conn| posting::list_invoices(conn, kind, page))
        .await?;
    Ok(ApiResponse::paged(
        "Documents retrieved",
        headers,
        Meta::new(page, total),
    ))
}

async fn get_document(state: AppState, kind: DocumentKind, id: i64) -> ApiResult<Invoice> {
    let invoice = state
        .with_conn(move |conn| posting::find_invoice(conn, kind, id))
        .await?;
    Ok(ApiResponse::ok("Document retrieved", invoice))
}

pub(crate) async fn create_purchase(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    headers: HeaderMap,
    JsonBody(form): JsonBody<PurchaseForm>,
) -> ApiResult<Invoice> {
    post_document(state, DocumentKind::Purchase, claims.sub, &headers, form.into()).await
}

pub(crate) async fn list_purchases(
    State(state): State<AppState>,
    _user: AuthUser,
    PageQuery(params): PageQuery,
) -> ApiResult<Vec<InvoiceHeader>> {
    list_documents(state, DocumentKind::Purchase, params).await
}

pub(crate) async fn get_purchase(
    State(state): State<AppState>,
    _user: AuthUser,
    IdPath(id): IdPath,
) -> ApiResult<Invoice> {
    get_document(state, DocumentKind::Purchase, id).await
}

pub(crate) async fn create_sale(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    headers: HeaderMap,
    JsonBody(form): JsonBody<SaleForm>,
) -> ApiResult<Invoice> {
    post_document(state, DocumentKind::Sale, claims.sub, &headers, form.into()).await
}

pub(crate) async fn list_sales(
    State(state): State<AppState>,
    _user: AuthUser,
    PageQuery(params): PageQuery,
) -> ApiResult<Vec<InvoiceHeader>> {
    list_documents(state, DocumentKind::Sale, params).await
}

pub(crate) async fn get_sale(
    State(state): State<AppState>,
    _user: AuthUser,
    IdPath(id): IdPath,
) -> ApiResult<Invoice> {
    get_document(state, DocumentKind::Sale, id).await
}
