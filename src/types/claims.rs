//! Claim Types
//!
//! Decoded token payload. Claim shapes vary between backend releases, so the
//! payload is held as a raw JSON object and read through typed accessors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical claim field names.
pub mod fields {
    pub const SUBJECT: &str = "sub";
    pub const GYM_ID: &str = "gymId";
    pub const IS_ADMIN: &str = "isAdmin";
    pub const IS_ADMIN_ALIASES: &[&str] = &["is_admin", "admin", "isAdministrator"];
    pub const ROLE_LABELS: &[&str] = &["role", "userRole"];
    pub const EXPIRES_AT: &str = "exp";
    pub const ISSUED_AT: &str = "iat";
    pub const FIRST_NAME: &str = "firstName";
    pub const LAST_NAME: &str = "lastName";
    pub const MEMBER_ID: &str = "memberId";
}

/// Decoded token claims.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims {
    fields: Map<String, Value>,
}

impl Claims {
    /// Wrap a decoded JSON object.
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Raw claim value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// Set a claim. Used when minting tokens.
    pub fn insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn subject_id(&self) -> Option<String> {
        self.get_string(fields::SUBJECT)
    }

    pub fn member_id(&self) -> Option<String> {
        self.get_string(fields::MEMBER_ID)
    }

    pub fn first_name(&self) -> Option<String> {
        self.get_string(fields::FIRST_NAME)
    }

    pub fn last_name(&self) -> Option<String> {
        self.get_string(fields::LAST_NAME)
    }

    pub fn expires_at_epoch_seconds(&self) -> Option<i64> {
        self.get_epoch(fields::EXPIRES_AT)
    }

    pub fn issued_at_epoch_seconds(&self) -> Option<i64> {
        self.get_epoch(fields::ISSUED_AT)
    }

    /// Read a claim as a non-empty string; numbers are stringified.
    pub(crate) fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn get_epoch(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<Value> for Claims {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from_map(map),
            _ => Self::default(),
        }
    }
}
