pub mod extract;
mod handlers;
mod middleware;
pub mod response;

use crate::state::AppState;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;

/// Full application router; every endpoint lives under `/api`.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/login", post(handlers::login))
        .route("/token/refresh", post(handlers::refresh_token))
        .route("/logout", post(handlers::logout))
        .route("/profile", get(handlers::profile))
        .route("/users", post(handlers::create_user))
        .route(
            "/barang",
            get(handlers::list_items).post(handlers::create_item),
        )
        .route("/barang/stok", get(handlers::list_items_with_stock))
        .route(
            "/barang/:id",
            get(handlers::get_item)
                .put(handlers::update_item)
                .delete(handlers::delete_item),
        )
        .route("/stok", get(handlers::balances))
        .route("/stok/history", get(handlers::history))
        .route("/stok/history/:barang_id", get(handlers::item_history))
        .route("/stok/koreksi", post(handlers::adjust_stock))
        .route("/stok/audit/:barang_id", get(handlers::audit))
        .route("/stok/:barang_id", get(handlers::balance))
        .route(
            "/pembelian",
            get(handlers::list_purchases).post(handlers::create_purchase),
        )
        .route("/pembelian/:id", get(handlers::get_purchase))
        .route(
            "/penjualan",
            get(handlers::list_sales).post(handlers::create_sale),
        )
        .route("/penjualan/:id", get(handlers::get_sale));

    Router::new()
        .nest("/api", api)
        .fallback(handlers::not_found)
        .layer(from_fn(middleware::method_not_allowed))
        .layer(from_fn_with_state(state.clone(), middleware::cors))
        .layer(from_fn_with_state(state.clone(), middleware::request_tracing))
        .with_state(state)
}
