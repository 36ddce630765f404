use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::TokenError;
use crate::helpers::time::datetime_from_unix;

/// Validity assumed when the grant does not say.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;
/// Share of the validity window reserved before expiry.
pub const FRESHNESS_MARGIN_RATIO: f64 = 0.1;

/// OAuth2 access grant as returned by the token endpoint and persisted per backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Absolute unix timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Whatever else the endpoint returned, kept for the next refresh.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Token {
    pub fn new(access_token: impl Into<String>, expires_in: u64, fetched_at: f64) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_owned(),
            expires_in: Some(expires_in),
            expires_at: Some(fetched_at + expires_in as f64),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_empty()
    }

    /// Fresh iff `now <= expires_at - 0.1 * expires_in`.
    pub fn is_fresh(&self, now: f64) -> bool {
        now <= self.refresh_due_at()
    }

    /// Moment after which the token is no longer fresh.
    pub fn refresh_due_at(&self) -> f64 {
        let expires_in = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS) as f64;
        self.expires_at.unwrap_or(0.0) - FRESHNESS_MARGIN_RATIO * expires_in
    }

    pub fn expiration_datetime(&self) -> Option<DateTime<Utc>> {
        self.expires_at.and_then(datetime_from_unix)
    }

    pub fn bearer_value(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Strict parse of a persisted value; `None` and blank strings are the empty token.
    pub fn parse_persisted(backend: &str, raw: Option<&str>) -> Result<Token, TokenError> {
        let raw = match raw.map(str::trim) {
            None | Some("") => return Ok(Token::default()),
            Some(raw) => raw,
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Null) => Ok(Token::default()),
            Ok(Value::Object(map)) if map.is_empty() => Ok(Token::default()),
            Ok(value @ Value::Object(_)) => {
                serde_json::from_value(value).map_err(|e| TokenError::malformed(backend, e))
            }
            Ok(other) => Err(TokenError::malformed(
                backend,
                format!("expected a JSON object, got {}", other),
            )),
            Err(e) => Err(TokenError::malformed(backend, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in: Option<u64>, expires_at: Option<f64>) -> Token {
        Token {
            access_token: "abc".into(),
            token_type: "Bearer".into(),
            expires_in,
            expires_at,
            ..Default::default()
        }
    }

    #[test]
    fn fresh_until_margin_boundary_inclusive() {
        let t = token(Some(3600), Some(10_000.0));
        // 10_000 - 360
        assert!(t.is_fresh(9_640.0));
        assert!(!t.is_fresh(9_641.0));
        assert!(t.is_fresh(0.0));
    }

    #[test]
    fn missing_expires_in_defaults_to_an_hour() {
        let t = token(None, Some(10_000.0));
        assert!(t.is_fresh(9_640.0));
        assert!(!t.is_fresh(9_640.5));
        assert_eq!(t.refresh_due_at(), 9_640.0);
    }

    #[test]
    fn empty_token_is_never_fresh() {
        assert!(!Token::default().is_fresh(0.0));
        assert!(!Token::default().is_fresh(1_700_000_000.0));
    }

    #[test]
    fn scenario_one_hour_token() {
        let t0 = 1_700_000_000.0;
        let t = Token::new("cool_token", 3600, t0);
        assert!(t.is_fresh(t0 + 3000.0));
        // deadline minus 360s margin
        assert!(t.is_fresh(t0 + 3240.0));
        assert!(!t.is_fresh(t0 + 3241.0));
        assert!(!t.is_fresh(t0 + 3599.0));
    }

    #[test]
    fn unknown_fields_survive_persistence() {
        let raw = r#"{"access_token":"x","token_type":"Bearer","expires_in":60,"expires_at":100.5,"id_token":"jwt"}"#;
        let t = Token::parse_persisted("b", Some(raw)).unwrap();
        assert_eq!(t.extra.get("id_token"), Some(&Value::from("jwt")));
        let back: Value = serde_json::from_str(&t.to_json().unwrap()).unwrap();
        assert_eq!(back["id_token"], "jwt");
        assert_eq!(back["expires_at"], 100.5);
    }

    #[test]
    fn persisted_values_that_are_not_tokens() {
        assert_eq!(Token::parse_persisted("b", None).unwrap(), Token::default());
        assert_eq!(Token::parse_persisted("b", Some("{}")).unwrap(), Token::default());
        assert!(matches!(
            Token::parse_persisted("b", Some("not json")),
            Err(TokenError::MalformedPersistedToken { .. })
        ));
        assert!(matches!(
            Token::parse_persisted("b", Some("[1,2]")),
            Err(TokenError::MalformedPersistedToken { .. })
        ));
    }

    #[test]
    fn expiration_datetime_follows_expires_at() {
        let t = token(Some(3600), Some(1_700_000_000.0));
        assert_eq!(t.expiration_datetime().unwrap().timestamp(), 1_700_000_000);
        assert!(Token::default().expiration_datetime().is_none());
    }
}
