use crate::error::AppError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const MIN_TOKEN_SECRET_BYTES: usize = 32;
/// Ten years; keeps `iat + ttl` well inside an i64 timestamp.
pub const MAX_TOKEN_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub token_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub admin_username: String,
    pub admin_password: Option<String>,
    pub default_page_limit: u32,
    pub max_page_limit: u32,
    pub busy_timeout: Duration,
    pub cors_origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_path: PathBuf::from("data/warehouse.db"),
            token_secret: String::new(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            admin_username: "admin".to_string(),
            admin_password: None,
            default_page_limit: 10,
            max_page_limit: 100,
            busy_timeout: Duration::from_millis(5000),
            cors_origin: "*".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        let config = Self {
            bind_addr: env::var("WAREHOUSE_BIND").unwrap_or(defaults.bind_addr),
            database_path: env::var("WAREHOUSE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            token_secret: env::var("WAREHOUSE_TOKEN_SECRET").unwrap_or_default(),
            access_token_ttl: Duration::from_secs(env_u64(
                "WAREHOUSE_ACCESS_TOKEN_TTL_SECS",
                defaults.access_token_ttl.as_secs(),
            )?),
            refresh_token_ttl: Duration::from_secs(env_u64(
                "WAREHOUSE_REFRESH_TOKEN_TTL_SECS",
                defaults.refresh_token_ttl.as_secs(),
            )?),
            admin_username: env::var("WAREHOUSE_ADMIN_USERNAME")
                .unwrap_or(defaults.admin_username),
            admin_password: env::var("WAREHOUSE_ADMIN_PASSWORD")
                .ok()
                .filter(|v| !v.is_empty()),
            default_page_limit: env_u32("WAREHOUSE_DEFAULT_PAGE_LIMIT", defaults.default_page_limit)?,
            max_page_limit: env_u32("WAREHOUSE_MAX_PAGE_LIMIT", defaults.max_page_limit)?,
            busy_timeout: Duration::from_millis(env_u64(
                "WAREHOUSE_BUSY_TIMEOUT_MS",
                defaults.busy_timeout.as_millis() as u64,
            )?),
            cors_origin: env::var("WAREHOUSE_CORS_ORIGIN").unwrap_or(defaults.cors_origin),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.token_secret.len() < MIN_TOKEN_SECRET_BYTES {
            return Err(AppError::Config(format!(
                "WAREHOUSE_TOKEN_SECRET must be at least {MIN_TOKEN_SECRET_BYTES} bytes"
            )));
        }
        if self.access_token_ttl.is_zero() || self.refresh_token_ttl.is_zero() {
            return Err(AppError::Config("token lifetimes must be non-zero".into()));
        }
        if self.access_token_ttl.as_secs() > MAX_TOKEN_TTL_SECS
            || self.refresh_token_ttl.as_secs() > MAX_TOKEN_TTL_SECS
        {
            return Err(AppError::Config(format!(
                "token lifetimes must not exceed {MAX_TOKEN_TTL_SECS} seconds"
            )));
        }
        if self.default_page_limit == 0 || self.max_page_limit < self.default_page_limit {
            return Err(AppError::Config(
                "page limits must satisfy 0 < default <= max".into(),
            ));
        }
        Ok(())
    }
}

pub fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> Result<u64, AppError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| AppError::Config(format!("{name}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32, AppError> {
    narrow_u32(name, env_u64(name, u64::from(default))?)
}

fn narrow_u32(name: &str, value: u64) -> Result<u32, AppError> {
    u32::try_from(value).map_err(|_| AppError::Config(format!("{name}: {value} is out of range")))
}
