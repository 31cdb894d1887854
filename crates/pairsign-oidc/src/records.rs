//! Stored record types and their storage keys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::password;

/// Lifetime of an authorization code in milliseconds
pub const CODE_TTL_MS: i64 = 600_000;

/// Lifetime of an access token in milliseconds
pub const ACCESS_TOKEN_TTL_MS: i64 = 3_600_000;

/// Storage key of the singleton signing key
pub const SIGNING_KEY_KEY: &str = "signing-key.json";

pub const USERS_PREFIX: &str = "users/";
pub const CLIENTS_PREFIX: &str = "clients/";
pub const CODES_PREFIX: &str = "codes/";
pub const ACCESS_TOKENS_PREFIX: &str = "access_tokens/";

pub fn user_key(email: &str) -> String {
    format!("{}{}.json", USERS_PREFIX, email)
}

pub fn client_key(client_id: &str) -> String {
    format!("{}{}.json", CLIENTS_PREFIX, client_id)
}

pub fn code_key(code: &str) -> String {
    format!("{}{}.json", CODES_PREFIX, code)
}

pub fn access_token_key(token: &str) -> String {
    format!("{}{}.json", ACCESS_TOKENS_PREFIX, token)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A registered user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub sub: String,
    #[serde(rename = "passwordHash")]
    pub password_hash: String,
    pub email: String,
}

impl UserRecord {
    /// Create a user, generating a subject identifier when none is given
    pub fn new(email: &str, password: &str, sub: Option<String>) -> Self {
        Self {
            sub: sub.unwrap_or_else(|| Uuid::new_v4().to_string()),
            password_hash: password::hash_password(password),
            email: email.to_string(),
        }
    }

    pub fn verify_password(&self, password: &str) -> bool {
        password::verify_password(password, &self.password_hash)
    }
}

/// A registered OAuth client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub redirect_uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ClientRecord {
    pub fn new(client_id: &str, client_secret: Option<String>, redirect_uris: Vec<String>) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret,
            redirect_uris,
            created_at: Some(Utc::now()),
        }
    }
}

/// A pending authorization code, bound to the request that minted it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRecord {
    pub client_id: String,
    pub redirect_uri: String,
    pub sub: String,
    pub email: String,
    /// Expiry in unix milliseconds
    pub expires: i64,
}

impl CodeRecord {
    pub fn new(client_id: &str, redirect_uri: &str, sub: &str, email: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            sub: sub.to_string(),
            email: email.to_string(),
            expires: now_ms() + CODE_TTL_MS,
        }
    }

    pub fn is_expired(&self) -> bool {
        now_ms() > self.expires
    }
}

/// An issued bearer access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    pub sub: String,
    pub email: String,
    /// Expiry in unix milliseconds
    pub expires: i64,
}

impl AccessTokenRecord {
    pub fn new(sub: &str, email: &str) -> Self {
        Self {
            sub: sub.to_string(),
            email: email.to_string(),
            expires: now_ms() + ACCESS_TOKEN_TTL_MS,
        }
    }

    pub fn is_expired(&self) -> bool {
        now_ms() > self.expires
    }
}
