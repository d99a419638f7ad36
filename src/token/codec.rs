//! Token Codec
//!
//! Structural decoding of bearer tokens and tolerant claim extraction.
//! Signatures are not verified here; the backend is the authority.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::TokenError;
use crate::types::{fields, Claims};

/// Result of validating decoded claims.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenValidity {
    pub valid: bool,
    pub expired: bool,
}

/// Bearer token codec.
pub struct TokenCodec;

impl TokenCodec {
    /// Decode `header.payload.signature` into claims.
    pub fn decode(token: &str) -> Result<Claims, TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(malformed("token is empty"));
        }

        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(malformed(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        }

        let payload = segments[1].trim_end_matches('=');
        if payload.is_empty() {
            return Err(malformed("payload segment is empty"));
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| malformed(format!("payload is not base64url: {}", e)))?;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(Claims::from_map(map)),
            Ok(_) => Err(malformed("payload is not a JSON object")),
            Err(e) => Err(malformed(format!("payload is not JSON: {}", e))),
        }
    }

    /// Validate claims against the current time.
    pub fn validate(claims: &Claims) -> TokenValidity {
        Self::validate_at(claims, Utc::now())
    }

    /// Validate claims against `now`. Tokens without `exp` never expire.
    pub fn validate_at(claims: &Claims, now: DateTime<Utc>) -> TokenValidity {
        let expired = match claims.expires_at_epoch_seconds() {
            Some(exp) => now.timestamp_millis() >= exp.saturating_mul(1000),
            None => false,
        };

        TokenValidity {
            valid: !expired,
            expired,
        }
    }

    /// Gym id from the canonical claim; `None` when absent.
    pub fn extract_tenant_id(claims: &Claims) -> Option<String> {
        claims.get_string(fields::GYM_ID)
    }

    /// Resolve the admin flag. Unknown representations resolve to `false`.
    pub fn extract_is_admin(claims: &Claims) -> bool {
        if let Some(flag) = claims.get(fields::IS_ADMIN).and_then(parse_flag) {
            return flag;
        }

        for alias in fields::IS_ADMIN_ALIASES {
            if let Some(flag) = claims.get(alias).and_then(parse_flag) {
                return flag;
            }
        }

        fields::ROLE_LABELS.iter().any(|field| {
            claims
                .get(field)
                .and_then(Value::as_str)
                .map(|role| {
                    let role = role.trim().to_ascii_lowercase();
                    role == "admin" || role == "administrator"
                })
                .unwrap_or(false)
        })
    }

    /// Display name from `firstName`/`lastName`.
    pub fn extract_full_name(claims: &Claims) -> Option<String> {
        let parts: Vec<String> = [claims.first_name(), claims.last_name()]
            .into_iter()
            .flatten()
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    /// Produce a structurally valid, unsigned token carrying `claims`.
    pub fn encode_unsigned(claims: &Claims) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap_or_default());
        format!("{}.{}.unsigned", header, payload)
    }
}

fn malformed(reason: impl Into<String>) -> TokenError {
    TokenError::Malformed {
        reason: reason.into(),
    }
}

/// Known flag representations; anything else is indefinite.
fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn claims(value: Value) -> Claims {
        Claims::from(value)
    }

    #[test]
    fn test_round_trip() {
        let exp = Utc::now().timestamp() + 3600;
        let token = TokenCodec::encode_unsigned(&claims(json!({
            "gymId": "g1",
            "isAdmin": true,
            "exp": exp
        })));

        let decoded = TokenCodec::decode(&token).unwrap();
        assert_eq!(TokenCodec::extract_tenant_id(&decoded), Some("g1".to_string()));
        assert!(TokenCodec::extract_is_admin(&decoded));
        assert!(TokenCodec::validate(&decoded).valid);
    }

    #[test]
    fn test_decode_rejects_wrong_segment_count() {
        let token = TokenCodec::encode_unsigned(&claims(json!({"gymId": "g1"})));
        let two_segments = token.rsplit_once('.').unwrap().0;

        assert!(matches!(
            TokenCodec::decode(two_segments),
            Err(TokenError::Malformed { .. })
        ));
        assert!(matches!(
            TokenCodec::decode("a.b.c.d"),
            Err(TokenError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_payload() {
        assert!(TokenCodec::decode("").is_err());
        assert!(TokenCodec::decode("   ").is_err());
        assert!(TokenCodec::decode("a.!!!.c").is_err());
        // base64url of `[1]` — valid JSON, but not an object
        assert!(TokenCodec::decode("a.WzFd.c").is_err());
        // base64url of `nope`
        assert!(TokenCodec::decode("a.bm9wZQ.c").is_err());
    }

    #[test]
    fn test_decode_tolerates_padding() {
        // {"gymId":"g"} padded
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"gymId":"g"}"#);
        let decoded = TokenCodec::decode(&format!("h.{}.s", payload)).unwrap();
        assert_eq!(TokenCodec::extract_tenant_id(&decoded), Some("g".to_string()));
    }

    #[test]
    fn test_validate() {
        let now = Utc::now();

        let no_exp = claims(json!({}));
        assert!(!TokenCodec::validate_at(&no_exp, now).expired);

        let at_boundary = claims(json!({"exp": now.timestamp()}));
        let boundary_now = DateTime::from_timestamp(now.timestamp(), 0).unwrap();
        assert!(TokenCodec::validate_at(&at_boundary, boundary_now).expired);

        let future = claims(json!({"exp": (now + Duration::seconds(60)).timestamp()}));
        assert!(TokenCodec::validate_at(&future, now).valid);
    }

    #[test]
    fn test_extract_tenant_id() {
        assert_eq!(TokenCodec::extract_tenant_id(&claims(json!({}))), None);
        assert_eq!(TokenCodec::extract_tenant_id(&claims(json!({"gymId": ""}))), None);
        assert_eq!(
            TokenCodec::extract_tenant_id(&claims(json!({"gymId": 7}))),
            Some("7".to_string())
        );
        // Only the canonical field is read
        assert_eq!(TokenCodec::extract_tenant_id(&claims(json!({"gym_id": "g1"}))), None);
    }

    #[test]
    fn test_is_admin_canonical_values() {
        for value in [json!(true), json!("true"), json!("TRUE"), json!("1"), json!(1)] {
            assert!(TokenCodec::extract_is_admin(&claims(json!({"isAdmin": value}))));
        }
        for value in [json!(false), json!("False"), json!("0"), json!(0)] {
            assert!(!TokenCodec::extract_is_admin(&claims(json!({
                "isAdmin": value,
                "role": "admin"
            }))));
        }
    }

    #[test]
    fn test_is_admin_aliases_and_roles() {
        assert!(TokenCodec::extract_is_admin(&claims(json!({"is_admin": "yes", "admin": 1}))));
        assert!(TokenCodec::extract_is_admin(&claims(json!({"role": " Administrator "}))));
        assert!(TokenCodec::extract_is_admin(&claims(json!({"userRole": "ADMIN"}))));
        assert!(!TokenCodec::extract_is_admin(&claims(json!({"role": "trainer"}))));
    }

    #[test]
    fn test_is_admin_fails_closed() {
        assert!(!TokenCodec::extract_is_admin(&claims(json!({}))));
        assert!(!TokenCodec::extract_is_admin(&claims(json!({"isAdmin": "maybe"}))));
        assert!(!TokenCodec::extract_is_admin(&claims(json!({"isAdmin": null}))));
        assert!(!TokenCodec::extract_is_admin(&claims(json!({"isAdmin": 2}))));
        assert!(!TokenCodec::extract_is_admin(&claims(json!({"isAdmin": ["true"]}))));
    }

    #[test]
    fn test_extract_full_name() {
        let named = claims(json!({"firstName": "Ada", "lastName": "Lovelace"}));
        assert_eq!(TokenCodec::extract_full_name(&named), Some("Ada Lovelace".to_string()));
        assert_eq!(TokenCodec::extract_full_name(&claims(json!({}))), None);
    }
}
