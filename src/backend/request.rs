use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::backend::auth::BasicAuth;
use crate::errors::RequestError;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern compiles"));

/// Per-call options of [`super::WebserviceBackend::call`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Absolute url, or a path relative to the backend url.
    pub url: Option<String>,
    /// Values for `{name}` placeholders in the url.
    pub url_params: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    /// Override of the backend's content type.
    pub content_type: Option<String>,
    /// Win over backend and auth headers.
    pub headers: Vec<(String, String)>,
    /// Replaces the backend's auth strategy.
    pub auth: Option<BasicAuth>,
    pub body: Option<Vec<u8>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn url_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.url_params.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn auth(mut self, auth: BasicAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Final url of a call.
///
/// - no url: the backend url
/// - a url under the backend url, or another absolute `http…` url: as given
/// - anything else: a path joined to the backend url
///
/// `{name}` placeholders are then filled from `url_params`.
pub fn resolve_url(
    backend_url: &str,
    url: Option<&str>,
    url_params: &HashMap<String, String>,
) -> Result<String, RequestError> {
    let url = match url {
        None | Some("") => backend_url.to_owned(),
        Some(url) if url.starts_with(backend_url) || url.starts_with("http") => url.to_owned(),
        Some(path) => format!(
            "{}/{}",
            backend_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        ),
    };
    fill_placeholders(&url, url_params)
}

fn fill_placeholders(url: &str, params: &HashMap<String, String>) -> Result<String, RequestError> {
    let mut missing: Option<String> = None;
    let filled = PLACEHOLDER.replace_all(url, |caps: &Captures| match params.get(&caps[1]) {
        Some(value) => value.to_owned(),
        None => {
            missing.get_or_insert_with(|| caps[1].to_owned());
            caps[0].to_owned()
        }
    });
    match missing {
        Some(param) => Err(RequestError::UrlParam {
            url: url.to_owned(),
            param,
        }),
        None => Ok(filled.into_owned()),
    }
}
