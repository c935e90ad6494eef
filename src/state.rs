use crate::auth::{self, TokenSigner};
use crate::config::Config;
use crate::db::DbState;
use crate::error::AppError;
use crate::models::{Page, PageParams};
use rusqlite::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared handle passed to every handler.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    db: DbState,
    signer: TokenSigner,
    config: Config,
    request_seq: AtomicU64,
}

impl AppState {
    /// Opens (and migrates) the database and bootstraps the first admin if needed.
    pub fn new(config: Config) -> Result<Self, AppError> {
        config.validate()?;
        let db = DbState::initialize(&config.database_path, config.busy_timeout)?;
        let mut conn = db.open()?;
        auth::ensure_admin(
            &mut conn,
            &config.admin_username,
            config.admin_password.as_deref(),
        )?;

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Ok(Self {
            inner: Arc::new(Inner {
                signer: TokenSigner::from_config(&config),
                db,
                config,
                request_seq: AtomicU64::new(seed),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.inner.signer
    }

    pub fn page(&self, params: &PageParams) -> Page {
        Page::resolve(
            params,
            self.inner.config.default_page_limit,
            self.inner.config.max_page_limit,
        )
    }

    pub(crate) fn next_request_id(&self) -> String {
        let n = self.inner.request_seq.fetch_add(1, Ordering::Relaxed);
        format!("req-{n:016x}")
    }

    /// Runs blocking SQLite work on the blocking pool with a fresh connection.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.inner.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.open()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| AppError::Internal(format!("blocking task failed: {e}")))?
    }
}
