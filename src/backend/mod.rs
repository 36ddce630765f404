//! Outbound calls through a configured backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method};
use reqwest::Client;
use tracing::{debug, error};

use crate::cache::token::Token;
use crate::cache::token_cache::TokenCache;
use crate::config::backends::{AuthType, BackendConfig, ServiceConfig};
use crate::errors::RequestError;
use crate::observability::metrics::get_metrics;
use crate::sources::{ClientCredentialsFetcher, TokenFetcher};
use crate::store::{ConfiguredStore, TokenStore};

pub mod auth;
pub mod request;

pub use request::RequestOptions;

/// One backend: its config, auth strategy and (for OAuth2) token cache.
pub struct WebserviceBackend<S: TokenStore, F: TokenFetcher> {
    config: Arc<BackendConfig>,
    client: Client,
    timeout: Option<Duration>,
    token_cache: Option<TokenCache<S, F>>,
}

impl<S: TokenStore, F: TokenFetcher> WebserviceBackend<S, F> {
    pub fn new(
        config: Arc<BackendConfig>,
        client: Client,
        timeout: Option<Duration>,
        store: Arc<S>,
        fetcher: F,
    ) -> Self {
        let token_cache = match config.auth_type {
            AuthType::OAuth2 => Some(TokenCache::new(config.clone(), store, fetcher)),
            _ => None,
        };
        Self {
            config,
            client,
            timeout,
            token_cache,
        }
    }

    /// Wraps an existing cache, e.g. one built with a test clock.
    pub fn with_token_cache(config: Arc<BackendConfig>, client: Client, cache: TokenCache<S, F>) -> Self {
        Self {
            config,
            client,
            timeout: None,
            token_cache: Some(cache),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn token_cache(&self) -> Option<&TokenCache<S, F>> {
        self.token_cache.as_ref()
    }

    pub fn adapter_protocol(&self) -> String {
        self.config.adapter_protocol()
    }

    pub async fn get(&self, options: RequestOptions) -> Result<Vec<u8>, RequestError> {
        self.call(Method::GET, options).await
    }

    pub async fn post(&self, options: RequestOptions) -> Result<Vec<u8>, RequestError> {
        self.call(Method::POST, options).await
    }

    pub async fn put(&self, options: RequestOptions) -> Result<Vec<u8>, RequestError> {
        self.call(Method::PUT, options).await
    }

    /// Sends one request and returns the body of a 2xx response.
    pub async fn call(&self, method: Method, options: RequestOptions) -> Result<Vec<u8>, RequestError> {
        let metrics = get_metrics().await;
        let backend = self.config.tech_name.as_str();
        debug!(backend = %backend, method = %method, url = ?options.url, "backend call");

        let result = self.send(method.clone(), options).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(RequestError::Authentication(_)) => "auth",
            Err(RequestError::Status { .. }) => "status",
            Err(_) => "error",
        };
        metrics
            .backend_requests
            .with_label_values(&[backend, method.as_str(), outcome])
            .inc();
        match &result {
            Ok(body) => debug!(backend = %backend, bytes = body.len(), "backend response"),
            Err(e) => error!(backend = %backend, error = %e, "backend call failed"),
        }
        result
    }

    /// Operator "force refresh" of the OAuth2 token.
    pub async fn force_refresh_token(&self) -> Result<Token, RequestError> {
        let cache = self.oauth2_cache()?;
        Ok(cache.refresh_token(None).await?)
    }

    /// Current token, fetching if needed.
    pub async fn token(&self) -> Result<Token, RequestError> {
        let cache = self.oauth2_cache()?;
        Ok(cache.get_token().await?)
    }

    fn oauth2_cache(&self) -> Result<&TokenCache<S, F>, RequestError> {
        self.token_cache.as_ref().ok_or_else(|| RequestError::Config {
            backend: self.config.tech_name.clone(),
            reason: format!("auth type '{}' has no OAuth2 token", self.config.auth_type),
        })
    }

    async fn send(&self, method: Method, options: RequestOptions) -> Result<Vec<u8>, RequestError> {
        let url = request::resolve_url(&self.config.url, options.url.as_deref(), &options.url_params)?;

        let token = match &self.token_cache {
            Some(cache) => Some(cache.get_token().await?),
            None => None,
        };
        let headers = self.headers(&options, token.as_ref())?;

        let mut builder = self.client.request(method, &url).headers(headers);
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(basic) = options.auth.clone().or_else(|| auth::build_auth(&self.config)) {
            builder = builder.basic_auth(basic.username, basic.password);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = options.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RequestError::Status { status, url });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Content type, then auth headers, then the caller's own.
    fn headers(&self, options: &RequestOptions, token: Option<&Token>) -> Result<HeaderMap, RequestError> {
        let mut headers = HeaderMap::new();
        let content_type = options
            .content_type
            .as_deref()
            .unwrap_or(self.config.content_type.as_str());
        headers.insert(CONTENT_TYPE, self.header_value(content_type)?);

        for (name, value) in auth::build_headers(&self.config, token)? {
            if let Some(name) = name {
                headers.insert(name, value);
            }
        }

        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| RequestError::Config {
                backend: self.config.tech_name.clone(),
                reason: format!("invalid header name '{}': {}", name, e),
            })?;
            headers.insert(name, self.header_value(value)?);
        }
        Ok(headers)
    }

    fn header_value(&self, value: &str) -> Result<HeaderValue, RequestError> {
        HeaderValue::from_str(value).map_err(|e| RequestError::Config {
            backend: self.config.tech_name.clone(),
            reason: format!("invalid header value: {}", e),
        })
    }
}

/// Backend as built from a loaded config.
pub type ConfiguredBackend = WebserviceBackend<ConfiguredStore, ClientCredentialsFetcher>;

/// Backends of a loaded config, sharing one HTTP client and one record store.
pub struct BackendRegistry {
    backends: HashMap<String, ConfiguredBackend>,
}

impl BackendRegistry {
    pub fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        let client = Client::builder().build()?;
        let timeout = config.settings.http.timeout();
        let store = Arc::new(ConfiguredStore::from_config(&config.settings.store));
        let fetcher = ClientCredentialsFetcher::new(client.clone(), timeout);

        let backends = config
            .backends
            .iter()
            .map(|(tech_name, backend)| {
                let backend = WebserviceBackend::new(
                    Arc::new(backend.clone()),
                    client.clone(),
                    timeout,
                    store.clone(),
                    fetcher.clone(),
                );
                (tech_name.to_owned(), backend)
            })
            .collect();
        Ok(Self { backends })
    }

    pub fn get(&self, tech_name: &str) -> Option<&ConfiguredBackend> {
        self.backends.get(tech_name)
    }

    /// Tech names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
