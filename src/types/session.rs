//! Session Types
//!
//! Credential state held by the session store, and the server-side session
//! listing returned by the session-management endpoints.

use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::token::TokenCodec;
use crate::types::Claims;

/// Authenticated session.
///
/// Only the two tokens are stored. Tenant, admin flag and expiry are decoded
/// from the access token on every read so they can never drift from it.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "StoredCredentials", into = "StoredCredentials")]
pub struct Session {
    access_token: SecretString,
    refresh_token: Option<SecretString>,
}

impl Session {
    /// Create a session from a token pair.
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            refresh_token: refresh_token.map(SecretString::new),
        }
    }

    /// Access token value (for the Authorization header).
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.expose_secret().as_str())
    }

    /// Decode the access token's claims.
    pub fn claims(&self) -> Result<Claims, TokenError> {
        TokenCodec::decode(self.access_token())
    }

    /// Gym id from the current access token.
    pub fn tenant_id(&self) -> Option<String> {
        self.claims()
            .ok()
            .and_then(|claims| TokenCodec::extract_tenant_id(&claims))
    }

    /// Admin flag from the current access token. Malformed tokens are never admin.
    pub fn is_admin(&self) -> bool {
        self.claims()
            .map(|claims| TokenCodec::extract_is_admin(&claims))
            .unwrap_or(false)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.claims()
            .ok()?
            .expires_at_epoch_seconds()
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// Whether the access token is expired at `now`. Malformed tokens count as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.claims() {
            Ok(claims) => TokenCodec::validate_at(&claims, now).expired,
            Err(_) => true,
        }
    }

    /// Format as Authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("tenant_id", &self.tenant_id())
            .field("is_admin", &self.is_admin())
            .field("expires_at", &self.expires_at())
            .finish()
    }
}

/// Persisted form of a session.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCredentials {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

impl From<StoredCredentials> for Session {
    fn from(stored: StoredCredentials) -> Self {
        Session::new(stored.access_token, stored.refresh_token)
    }
}

impl From<Session> for StoredCredentials {
    fn from(session: Session) -> Self {
        Self {
            access_token: session.access_token().to_string(),
            refresh_token: session.refresh_token().map(str::to_string),
        }
    }
}

/// Token pair returned by the login and refresh endpoints.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    #[serde(alias = "token", alias = "access_token")]
    pub access_token: String,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
}

impl From<TokenPair> for Session {
    fn from(pair: TokenPair) -> Self {
        Session::new(pair.access_token, pair.refresh_token)
    }
}

/// Active server-side session, as listed by the session-management endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current: bool,
}
