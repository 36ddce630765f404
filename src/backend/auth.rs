//! What each auth type adds to an outbound request.

use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use http::HeaderMap;

use crate::cache::token::Token;
use crate::config::backends::{AuthType, BackendConfig};
use crate::errors::RequestError;

#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
        }
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Basic credentials for `user_pwd` backends that have both parts set.
pub fn build_auth(backend: &BackendConfig) -> Option<BasicAuth> {
    match backend.auth_type {
        AuthType::UserPwd => match (backend.username.as_deref(), backend.password.as_deref()) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(BasicAuth::new(username, password))
            }
            _ => None,
        },
        AuthType::None | AuthType::ApiKey | AuthType::OAuth2 => None,
    }
}

/// Auth headers; `token` is required for OAuth2 backends.
pub fn build_headers(backend: &BackendConfig, token: Option<&Token>) -> Result<HeaderMap, RequestError> {
    let mut headers = HeaderMap::new();
    match backend.auth_type {
        AuthType::None | AuthType::UserPwd => {}
        AuthType::ApiKey => {
            let (Some(name), Some(key)) = (backend.api_key_header.as_deref(), backend.api_key.as_deref()) else {
                return Err(config_error(backend, "api_key and api_key_header must be set"));
            };
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| config_error(backend, format!("invalid api_key_header '{}': {}", name, e)))?;
            let mut value = HeaderValue::from_str(key)
                .map_err(|e| config_error(backend, format!("invalid api_key: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }
        AuthType::OAuth2 => {
            let token = token.ok_or_else(|| config_error(backend, "no OAuth2 token available"))?;
            let mut value = HeaderValue::from_str(&token.bearer_value())
                .map_err(|e| config_error(backend, format!("token is not a valid header value: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
    }
    Ok(headers)
}

fn config_error(backend: &BackendConfig, reason: impl ToString) -> RequestError {
    RequestError::Config {
        backend: backend.tech_name.clone(),
        reason: reason.to_string(),
    }
}
