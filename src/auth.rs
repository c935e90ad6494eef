//! Users, sessions and signed access tokens.
//!
//! Access tokens are `v1.<payload>.<signature>` where the payload is base64url JSON
//! claims and the signature an HMAC-SHA256 over the payload part. Every token names
//! the session it was issued for; revoking the session invalidates its tokens
//! before they expire. Refresh tokens are random, stored only as SHA-256 hashes and
//! replaced on every use.

use crate::config::Config;
use crate::db::{begin_write, now_iso};
use crate::error::{is_unique_violation, AppError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION_V1: &str = "v1";
const MAX_TOKEN_LEN: usize = 2048;
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Role::Admin),
            "staff" => Some(Role::Staff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub role: Role,
    pub sid: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshForm {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct NewUserForm {
    pub username: String,
    pub password: String,
    pub role: Role,
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("hash password: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    bcrypt::verify(password, hash).map_err(|e| AppError::Internal(format!("verify password: {e}")))
}

fn sha256_hex(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            secret: secret.to_vec(),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.token_secret.as_bytes(),
            config.access_token_ttl,
            config.refresh_token_ttl,
        )
    }

    fn mac(&self) -> Result<HmacSha256, AppError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(format!("token key: {e}")))
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, AppError> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| AppError::Internal(format!("encode claims: {e}")))?;
        let payload_part = URL_SAFE_NO_PAD.encode(payload);
        let mut mac = self.mac()?;
        mac.update(payload_part.as_bytes());
        let sig_part = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{TOKEN_VERSION_V1}.{payload_part}.{sig_part}"))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    fn verify_at(&self, token: &str, now: i64) -> Result<Claims, AppError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(AppError::Unauthorized("token too long".into()));
        }
        let parts: Vec<&str> = token.split('.').collect();
        let (payload_part, sig_part) = match parts.as_slice() {
            [version, payload, sig] if *version == TOKEN_VERSION_V1 => (*payload, *sig),
            _ => return Err(AppError::Unauthorized("malformed token".into())),
        };

        let expected = URL_SAFE_NO_PAD
            .decode(sig_part)
            .map_err(|_| AppError::Unauthorized("malformed token".into()))?;
        let mut mac = self.mac()?;
        mac.update(payload_part.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| AppError::Unauthorized("token signature mismatch".into()))?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_part)
            .map_err(|_| AppError::Unauthorized("malformed token".into()))?;
        let claims: Claims = serde_json::from_slice(&payload)
            .map_err(|_| AppError::Unauthorized("malformed token".into()))?;
        if claims.exp <= now {
            return Err(AppError::Unauthorized("token expired".into()));
        }
        Ok(claims)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(2)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        role: Role::from_db(&role).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown role {role}").into(),
            )
        })?,
        created_at: row.get(3)?,
    })
}

pub fn find_user(conn: &Connection, id: i64) -> Result<User, AppError> {
    conn.query_row(
        "SELECT id, username, role, created_at FROM users WHERE id = ?",
        params![id],
        user_from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound(format!("user {id}")))
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

/// Drops sessions that can no longer authenticate anything.
fn prune_sessions(conn: &Connection, now: i64) -> Result<(), AppError> {
    let pruned = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ? OR revoked_at IS NOT NULL",
        params![now],
    )?;
    if pruned > 0 {
        debug!(pruned, "dead sessions removed");
    }
    Ok(())
}

fn issue_tokens(
    signer: &TokenSigner,
    user: User,
    session_id: &str,
    refresh_token: String,
) -> Result<LoginResponse, AppError> {
    let iat = Utc::now().timestamp();
    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        role: user.role,
        sid: session_id.to_string(),
        iat,
        exp: iat.saturating_add(ttl_secs(signer.access_ttl)),
    };
    Ok(LoginResponse {
        token: signer.issue(&claims)?,
        refresh_token,
        expires_in: signer.access_ttl.as_secs(),
        user,
    })
}

fn new_refresh_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

pub fn login(
    conn: &mut Connection,
    signer: &TokenSigner,
    form: &LoginForm,
) -> Result<LoginResponse, AppError> {
    let username = form.username.trim();
    let found = conn
        .query_row(
            "SELECT id, username, role, created_at, password_hash FROM users WHERE username = ?",
            params![username],
            |row| Ok((user_from_row(row)?, row.get::<_, String>(4)?)),
        )
        .optional()?;
    let Some((user, password_hash)) = found else {
        warn!(username = %username, "login failed: unknown user");
        return Err(AppError::AuthFailed);
    };
    if !verify_password(&form.password, &password_hash)? {
        warn!(username = %username, "login failed: wrong password");
        return Err(AppError::AuthFailed);
    }

    let session_id = Uuid::new_v4().to_string();
    let refresh_token = new_refresh_token();
    let now = Utc::now().timestamp();
    let expires_at = now.saturating_add(ttl_secs(signer.refresh_ttl));
    let tx = begin_write(conn)?;
    prune_sessions(&tx, now)?;
    tx.execute(
        "INSERT INTO sessions (id, user_id, refresh_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        params![session_id, user.id, sha256_hex(&refresh_token), expires_at, now_iso()],
    )?;
    tx.commit()?;

    info!(user_id = user.id, session_id = %session_id, "login");
    issue_tokens(signer, user, &session_id, refresh_token)
}

/// Exchanges a refresh token for a new access token and a new refresh token.
pub fn refresh(
    conn: &mut Connection,
    signer: &TokenSigner,
    refresh_token: &str,
) -> Result<LoginResponse, AppError> {
    let now = Utc::now().timestamp();
    let tx = begin_write(conn)?;
    prune_sessions(&tx, now)?;
    let session: Option<(String, i64)> = tx
        .query_row(
            "SELECT id, user_id FROM sessions
             WHERE refresh_hash = ? AND revoked_at IS NULL AND expires_at > ?",
            params![sha256_hex(refresh_token.trim()), now],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((session_id, user_id)) = session else {
        return Err(AppError::Unauthorized("invalid refresh token".into()));
    };

    let rotated = new_refresh_token();
    tx.execute(
        "UPDATE sessions SET refresh_hash = ?, expires_at = ? WHERE id = ?",
        params![
            sha256_hex(&rotated),
            now.saturating_add(ttl_secs(signer.refresh_ttl)),
            session_id
        ],
    )?;
    let user = find_user(&tx, user_id)?;
    tx.commit()?;

    info!(user_id, session_id = %session_id, "session refreshed");
    issue_tokens(signer, user, &session_id, rotated)
}

pub fn logout(conn: &mut Connection, session_id: &str) -> Result<(), AppError> {
    let tx = begin_write(conn)?;
    tx.execute(
        "UPDATE sessions SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL",
        params![now_iso(), session_id],
    )?;
    tx.commit()?;
    info!(session_id = %session_id, "logout");
    Ok(())
}

/// Verifies the bearer token and that its session is still live.
pub fn authenticate(
    conn: &Connection,
    signer: &TokenSigner,
    token: &str,
) -> Result<Claims, AppError> {
    let claims = signer.verify(token)?;
    let live = conn
        .query_row(
            "SELECT 1 FROM sessions
             WHERE id = ? AND user_id = ? AND revoked_at IS NULL AND expires_at > ?",
            params![claims.sid, claims.sub, Utc::now().timestamp()],
            |_| Ok(()),
        )
        .optional()?;
    if live.is_none() {
        return Err(AppError::Unauthorized("session is no longer active".into()));
    }
    Ok(claims)
}

pub fn create_user(conn: &mut Connection, form: &NewUserForm) -> Result<User, AppError> {
    let username = form.username.trim();
    if username.is_empty() {
        return Err(AppError::Validation("username is required".into()));
    }
    if form.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let password_hash = hash_password(&form.password)?;

    let tx = begin_write(conn)?;
    let inserted = tx.execute(
        "INSERT INTO users (username, password_hash, role, created_at) VALUES (?, ?, ?, ?)",
        params![username, password_hash, form.role.as_str(), now_iso()],
    );
    match inserted {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::Validation(format!(
                "username {username} is already taken"
            )));
        }
        Err(err) => return Err(err.into()),
    }
    let user = find_user(&tx, tx.last_insert_rowid())?;
    tx.commit()?;

    info!(user_id = user.id, role = user.role.as_str(), "user created");
    Ok(user)
}

/// Creates the first admin when the user table is empty and a password is configured.
pub fn ensure_admin(
    conn: &mut Connection,
    username: &str,
    password: Option<&str>,
) -> Result<Option<User>, AppError> {
    let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    if users > 0 {
        return Ok(None);
    }
    let Some(password) = password else {
        warn!("no users exist and no admin password is configured");
        return Ok(None);
    };

    let password_hash = hash_password(password)?;
    let tx = begin_write(conn)?;
    tx.execute(
        "INSERT INTO users (username, password_hash, role, created_at) VALUES (?, ?, 'admin', ?)",
        params![username, password_hash, now_iso()],
    )?;
    let user = find_user(&tx, tx.last_insert_rowid())?;
    tx.commit()?;

    info!(username = %user.username, "bootstrapped admin user");
    Ok(Some(user))
}
