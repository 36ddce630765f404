use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::config::settings::SettingsConfig;
use crate::errors::TokenError;

/// ================================
/// Full service configuration
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default)]
    pub settings: SettingsConfig,
    pub backends: HashMap<String, BackendConfig>,
}

/// ================================
/// Backends
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Stable id; filled from the map key.
    #[serde(default)]
    pub tech_name: String,
    pub name: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub url: String,
    pub auth_type: AuthType,
    pub content_type: ContentType,

    // user_pwd
    pub username: Option<String>,
    pub password: Option<String>,

    // api_key
    pub api_key: Option<String>,
    pub api_key_header: Option<String>,

    // oauth2
    pub oauth2_flow: Option<OAuth2Flow>,
    pub oauth2_clientid: Option<String>,
    pub oauth2_client_secret: Option<String>,
    pub oauth2_token_url: Option<String>,
    pub oauth2_audience: Option<String>,
    pub oauth2_scope: Option<String>,
    /// reuse the old token's refresh_token when there is one
    #[serde(default)]
    pub oauth2_use_refresh_token: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    None,
    UserPwd,
    ApiKey,
    #[serde(rename = "oauth2")]
    OAuth2,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "none",
            AuthType::UserPwd => "user_pwd",
            AuthType::ApiKey => "api_key",
            AuthType::OAuth2 => "oauth2",
        }
    }

    /// Human readable label, as shown to operators.
    pub fn label(&self) -> &'static str {
        match self {
            AuthType::None => "Public",
            AuthType::UserPwd => "Username & password",
            AuthType::ApiKey => "API Key",
            AuthType::OAuth2 => "OAuth2",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OAuth2Flow {
    /// Client credentials grant.
    BackendApplication,
    /// Authorization code grant; needs a redirect endpoint, not supported here.
    WebApplication,
}

impl OAuth2Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuth2Flow::BackendApplication => "backend_application",
            OAuth2Flow::WebApplication => "web_application",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    #[serde(rename = "application/json")]
    Json,
    #[serde(rename = "application/xml")]
    Xml,
    #[serde(rename = "application/x-www-form-urlencoded")]
    Form,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Xml => "application/xml",
            ContentType::Form => "application/x-www-form-urlencoded",
        }
    }
}

/// Fields required by an auth type, with their operator-facing labels.
pub struct RequiredField {
    pub label: &'static str,
    pub is_set: fn(&BackendConfig) -> bool,
}

fn valued(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl BackendConfig {
    pub fn required_fields(auth_type: AuthType) -> &'static [RequiredField] {
        const USER_PWD: &[RequiredField] = &[
            RequiredField { label: "Username", is_set: |b| valued(&b.username) },
            RequiredField { label: "Password", is_set: |b| valued(&b.password) },
        ];
        const API_KEY: &[RequiredField] = &[
            RequiredField { label: "API Key", is_set: |b| valued(&b.api_key) },
            RequiredField { label: "API Key header", is_set: |b| valued(&b.api_key_header) },
        ];
        const OAUTH2: &[RequiredField] = &[
            RequiredField { label: "Client ID", is_set: |b| valued(&b.oauth2_clientid) },
            RequiredField { label: "Client Secret", is_set: |b| valued(&b.oauth2_client_secret) },
            RequiredField { label: "Token URL", is_set: |b| valued(&b.oauth2_token_url) },
        ];
        match auth_type {
            AuthType::None => &[],
            AuthType::UserPwd => USER_PWD,
            AuthType::ApiKey => API_KEY,
            AuthType::OAuth2 => OAUTH2,
        }
    }

    /// Labels of the fields this backend's auth type needs but lacks.
    pub fn missing_auth_fields(&self) -> Vec<&'static str> {
        self.missing_fields_for(self.auth_type)
    }

    pub fn missing_fields_for(&self, auth_type: AuthType) -> Vec<&'static str> {
        Self::required_fields(auth_type)
            .iter()
            .filter(|field| !(field.is_set)(self))
            .map(|field| field.label)
            .collect()
    }

    /// Fields `auth_type` needs, as a [`TokenError::MissingCredentials`].
    pub fn check_auth_fields(&self, auth_type: AuthType) -> Result<(), TokenError> {
        let missing = self.missing_fields_for(auth_type);
        if missing.is_empty() {
            return Ok(());
        }
        Err(TokenError::MissingCredentials {
            backend: self.name.clone(),
            auth_type: auth_type.label().to_owned(),
            fields: missing.join(", "),
        })
    }

    /// `http`, or `http+oauth2-<flow>` for OAuth2 backends.
    pub fn adapter_protocol(&self) -> String {
        let protocol = self.protocol.as_str();
        match (self.auth_type, self.oauth2_flow) {
            (AuthType::OAuth2, Some(flow)) => format!("{}+oauth2-{}", protocol, flow.as_str()),
            (AuthType::OAuth2, None) => format!("{}+oauth2", protocol),
            _ => protocol.to_owned(),
        }
    }

    pub fn oauth2_params(&self) -> OAuth2Params {
        OAuth2Params {
            backend: self.tech_name.clone(),
            client_id: self.oauth2_clientid.clone().unwrap_or_default(),
            client_secret: self.oauth2_client_secret.clone().unwrap_or_default(),
            token_url: self.oauth2_token_url.clone().unwrap_or_default(),
            audience: self.oauth2_audience.clone().filter(|a| !a.is_empty()),
            scope: self.oauth2_scope.clone().filter(|s| !s.is_empty()),
            use_refresh_token: self.oauth2_use_refresh_token,
        }
    }
}

/// What the token endpoint needs to know about a backend.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuth2Params {
    pub backend: String,
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub audience: Option<String>,
    pub scope: Option<String>,
    pub use_refresh_token: bool,
}

impl fmt::Debug for OAuth2Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Params")
            .field("backend", &self.backend)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .field("audience", &self.audience)
            .field("scope", &self.scope)
            .field("use_refresh_token", &self.use_refresh_token)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn oauth2_backend(tech_name: &str, token_url: &str) -> BackendConfig {
        BackendConfig {
            tech_name: tech_name.to_owned(),
            name: format!("WebService {}", tech_name),
            protocol: Protocol::Http,
            url: "https://localhost.demo/".to_owned(),
            auth_type: AuthType::OAuth2,
            content_type: ContentType::Xml,
            username: None,
            password: None,
            api_key: None,
            api_key_header: None,
            oauth2_flow: Some(OAuth2Flow::BackendApplication),
            oauth2_clientid: Some("some_client_id".to_owned()),
            oauth2_client_secret: Some("shh_secret".to_owned()),
            oauth2_token_url: Some(token_url.to_owned()),
            oauth2_audience: Some("https://localhost.demo/".to_owned()),
            oauth2_scope: None,
            oauth2_use_refresh_token: false,
        }
    }

    pub fn plain_backend(tech_name: &str, url: &str, auth_type: AuthType) -> BackendConfig {
        BackendConfig {
            auth_type,
            url: url.to_owned(),
            content_type: ContentType::Json,
            oauth2_flow: None,
            oauth2_clientid: None,
            oauth2_client_secret: None,
            oauth2_token_url: None,
            oauth2_audience: None,
            ..oauth2_backend(tech_name, "")
        }
    }
}
