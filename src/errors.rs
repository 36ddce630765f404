use http::StatusCode;
use thiserror::Error;

/// Failures of the record store holding persisted tokens.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token record io error for backend '{backend}': {source}")]
    Io {
        backend: String,
        #[source]
        source: std::io::Error,
    },

    #[error("token record for backend '{backend}' is unreadable: {reason}")]
    Corrupted { backend: String, reason: String },
}

/// Errors of the OAuth2 token lifecycle.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Network error, timeout, non-2xx status or unparseable token response.
    #[error("token fetch failed for backend '{backend}': {reason}")]
    FetchFailure { backend: String, reason: String },

    /// Logged and absorbed by the cache; the token is then treated as absent.
    #[error("persisted token for backend '{backend}' is malformed: {reason}")]
    MalformedPersistedToken { backend: String, reason: String },

    #[error("Webservice '{backend}' requires '{auth_type}' authentication. However, the following field(s) are not valued: {fields}")]
    MissingCredentials {
        backend: String,
        auth_type: String,
        fields: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TokenError {
    pub fn fetch_failure(backend: impl Into<String>, reason: impl ToString) -> Self {
        TokenError::FetchFailure {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(backend: impl Into<String>, reason: impl ToString) -> Self {
        TokenError::MalformedPersistedToken {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    /// Short label used for the failure metric.
    pub fn reason_label(&self) -> &'static str {
        match self {
            TokenError::FetchFailure { .. } => "fetch",
            TokenError::MalformedPersistedToken { .. } => "malformed",
            TokenError::MissingCredentials { .. } => "credentials",
            TokenError::Store(_) => "store",
        }
    }
}

/// Errors of an outbound call made through a backend.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("authentication/token fetch failed: {0}")]
    Authentication(#[source] TokenError),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request to '{url}' returned {status}")]
    Status { status: StatusCode, url: String },

    #[error("url '{url}' references unknown parameter '{param}'")]
    UrlParam { url: String, param: String },

    #[error("backend '{backend}' is misconfigured: {reason}")]
    Config { backend: String, reason: String },
}

impl From<TokenError> for RequestError {
    fn from(err: TokenError) -> Self {
        RequestError::Authentication(err)
    }
}
