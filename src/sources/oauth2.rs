use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::cache::token::Token;
use crate::config::backends::OAuth2Params;
use crate::errors::TokenError;
use crate::helpers::time::{default_clock, Clock};
use crate::observability::metrics::get_metrics;
use crate::sources::{GrantType, TokenFetcher};

/// Form-encoded POST to the backend's token URL.
#[derive(Clone)]
pub struct ClientCredentialsFetcher {
    client: Client,
    timeout: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl ClientCredentialsFetcher {
    pub fn new(client: Client, timeout: Option<Duration>) -> Self {
        Self {
            client,
            timeout,
            clock: default_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn form(params: &OAuth2Params, grant: GrantType, old_token: Option<&Token>) -> Vec<(&'static str, String)> {
        let mut form = vec![("grant_type", grant.as_str().to_owned())];
        if grant == GrantType::RefreshToken {
            if let Some(refresh_token) = old_token.and_then(|t| t.refresh_token.clone()) {
                form.push(("refresh_token", refresh_token));
            }
        }
        form.push(("client_id", params.client_id.clone()));
        form.push(("client_secret", params.client_secret.clone()));
        if let Some(audience) = &params.audience {
            form.push(("audience", audience.clone()));
        }
        if let Some(scope) = &params.scope {
            form.push(("scope", scope.clone()));
        }
        form
    }

    async fn request(
        &self,
        params: &OAuth2Params,
        grant: GrantType,
        old_token: Option<&Token>,
    ) -> Result<Token, TokenError> {
        let backend = params.backend.as_str();
        let mut request = self
            .client
            .post(&params.token_url)
            .header(http::header::ACCEPT, "application/json")
            .form(&Self::form(params, grant, old_token));
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TokenError::fetch_failure(backend, describe_reqwest_error(&e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenError::fetch_failure(backend, describe_reqwest_error(&e)))?;
        if !status.is_success() {
            return Err(TokenError::fetch_failure(
                backend,
                format!("token endpoint returned {}: {}", status, truncate(&body, 256)),
            ));
        }

        let mut token = parse_token_response(&body, self.clock.now())
            .map_err(|reason| TokenError::fetch_failure(backend, reason))?;
        if grant == GrantType::RefreshToken && token.refresh_token.is_none() {
            token.refresh_token = old_token.and_then(|t| t.refresh_token.clone());
        }
        Ok(token)
    }
}

impl TokenFetcher for ClientCredentialsFetcher {
    async fn fetch_token(&self, params: &OAuth2Params, old_token: Option<&Token>) -> Result<Token, TokenError> {
        let metrics = get_metrics().await;
        let backend = params.backend.as_str();
        let grant = GrantType::select(params, old_token);
        let start = Instant::now();
        metrics
            .token_fetch_requests
            .with_label_values(&[backend, grant.as_str()])
            .inc();
        info!(backend = %backend, grant_type = grant.as_str(), token_url = %params.token_url, "fetching token");

        let result = self.request(params, grant, old_token).await;
        metrics
            .token_fetch_duration
            .with_label_values(&[backend])
            .observe(start.elapsed().as_secs_f64());

        match &result {
            Ok(token) => info!(
                backend = %backend,
                expires_in = ?token.expires_in,
                expires_at = ?token.expiration_datetime(),
                "token fetched"
            ),
            Err(e) => {
                metrics
                    .token_fetch_failures
                    .with_label_values(&[backend, e.reason_label()])
                    .inc();
                error!(backend = %backend, error = %e, "token fetch failed");
            }
        }
        result
    }
}

/// Token endpoint JSON → [`Token`], deriving `expires_at` from `fetched_at`.
pub fn parse_token_response(body: &str, fetched_at: f64) -> Result<Token, String> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| format!("token response is not valid JSON: {}", e))?;
    let Value::Object(mut map) = value else {
        return Err("token response is not a JSON object".to_owned());
    };

    let access_token = match map.remove("access_token") {
        Some(Value::String(s)) if !s.is_empty() => s,
        _ => return Err("token response has no access_token".to_owned()),
    };
    let token_type = match map.remove("token_type") {
        Some(Value::String(s)) => s,
        _ => "Bearer".to_owned(),
    };
    let expires_in = match map.remove("expires_in") {
        None | Some(Value::Null) => None,
        Some(v) => Some(as_seconds(&v).ok_or_else(|| format!("invalid expires_in: {}", v))?),
    };
    let body_expires_at = map.remove("expires_at").as_ref().and_then(as_f64);
    let expires_at = match expires_in {
        Some(secs) => Some(fetched_at + secs as f64),
        None => body_expires_at,
    };
    let refresh_token = take_string(&mut map, "refresh_token");
    let scope = take_string(&mut map, "scope");

    Ok(Token {
        access_token,
        token_type,
        expires_in,
        expires_at,
        refresh_token,
        scope,
        extra: map,
    })
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// some providers send "3600"
fn as_seconds(v: &Value) -> Option<u64> {
    as_f64(v).filter(|n| *n >= 0.0).map(|n| n as u64)
}

fn describe_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::backends::fixtures::oauth2_backend;
    use crate::helpers::time::ManualClock;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    fn fetcher(clock: &ManualClock, timeout: Option<Duration>) -> ClientCredentialsFetcher {
        ClientCredentialsFetcher::new(Client::new(), timeout).with_clock(Arc::new(clock.clone()))
    }

    #[test]
    fn expires_at_is_derived_from_expires_in() {
        let token = parse_token_response(
            r#"{"access_token":"cool_token","token_type":"Bearer","expires_in":3600,"expires_at":1}"#,
            1_000.0,
        )
        .unwrap();
        assert_eq!(token.expires_at, Some(4_600.0));
        assert_eq!(token.expires_in, Some(3600));
    }

    #[test]
    fn body_expires_at_is_kept_without_expires_in() {
        let token = parse_token_response(r#"{"access_token":"t","expires_at":"99.5"}"#, 0.0).unwrap();
        assert_eq!(token.expires_at, Some(99.5));
        assert_eq!(token.token_type, "Bearer");
    }

    #[test]
    fn rejects_responses_without_access_token() {
        assert!(parse_token_response(r#"{"token_type":"Bearer"}"#, 0.0).is_err());
        assert!(parse_token_response("<html/>", 0.0).is_err());
        assert!(parse_token_response(r#"{"access_token":"x","expires_in":"soon"}"#, 0.0).is_err());
    }

    #[tokio::test]
    async fn posts_client_credentials_form() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth2/token")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body_includes("grant_type=client_credentials")
                    .body_includes("client_id=some_client_id")
                    .body_includes("client_secret=shh_secret")
                    .body_includes("audience=");
                then.status(200).json_body(json!({
                    "access_token": "cool_token",
                    "expires_in": 3600,
                    "token_type": "Bearer",
                }));
            })
            .await;

        let clock = ManualClock::at(1_700_000_000.0);
        let params = oauth2_backend("svc", &server.url("/oauth2/token")).oauth2_params();
        let token = fetcher(&clock, None).fetch_token(&params, None).await.unwrap();

        assert_eq!(mock.hits_async().await, 1);
        assert_eq!(token.access_token, "cool_token");
        assert_eq!(token.expires_at, Some(1_700_003_600.0));
    }

    #[tokio::test]
    async fn uses_refresh_grant_when_enabled() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth2/token")
                    .body_includes("grant_type=refresh_token")
                    .body_includes("refresh_token=old-refresh");
                then.status(200).json_body(json!({
                    "access_token": "renewed",
                    "expires_in": 600,
                }));
            })
            .await;

        let mut backend = oauth2_backend("svc", &server.url("/oauth2/token"));
        backend.oauth2_use_refresh_token = true;
        let mut old = Token::new("stale", 600, 0.0);
        old.refresh_token = Some("old-refresh".into());

        let clock = ManualClock::at(10.0);
        let token = fetcher(&clock, None)
            .fetch_token(&backend.oauth2_params(), Some(&old))
            .await
            .unwrap();

        assert_eq!(mock.hits_async().await, 1);
        assert_eq!(token.access_token, "renewed");
        // kept from the old grant
        assert_eq!(token.refresh_token.as_deref(), Some("old-refresh"));
    }

    #[tokio::test]
    async fn non_success_status_is_a_fetch_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(401).json_body(json!({"error": "invalid_client"}));
            })
            .await;

        let clock = ManualClock::at(0.0);
        let params = oauth2_backend("svc", &server.url("/oauth2/token")).oauth2_params();
        let err = fetcher(&clock, None).fetch_token(&params, None).await.unwrap_err();

        match err {
            TokenError::FetchFailure { backend, reason } => {
                assert_eq!(backend, "svc");
                assert!(reason.contains("401"), "{}", reason);
                assert!(reason.contains("invalid_client"), "{}", reason);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn timeout_is_a_fetch_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .json_body(json!({"access_token": "late", "expires_in": 60}));
            })
            .await;

        let clock = ManualClock::at(0.0);
        let params = oauth2_backend("svc", &server.url("/oauth2/token")).oauth2_params();
        let err = fetcher(&clock, Some(Duration::from_millis(50)))
            .fetch_token(&params, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::FetchFailure { ref reason, .. } if reason.contains("timed out")));
    }
}
