//! Configuration validation with aggregated errors.
//! - Aggregates all issues into Vec<String>
//! - settings: retry, logging level, timeout, store path
//! - backends: tech name shape, url scheme, auth fields per auth type,
//!   supported OAuth2 flow

use std::sync::LazyLock;

use regex::Regex;
use tracing::{error, info};

use crate::config::backends::{AuthType, BackendConfig, OAuth2Flow, ServiceConfig};
use crate::config::settings::{RetryConfig, SettingsConfig, StoreConfig};
use crate::errors::TokenError;
use crate::observability::metrics::get_metrics;

// tech name doubles as a file name in the file store
static TECH_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("tech name pattern compiles"));

/// Public entrypoint: returns Ok(()) or Err(Vec<String>) containing all issues.
pub async fn validate_service_config(cfg: &ServiceConfig) -> Result<(), Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    validate_settings(&cfg.settings, &mut errors);

    if cfg.backends.is_empty() {
        errors.push("config: 'backends' is empty; at least one backend required".to_string());
    }

    let mut names: Vec<&String> = cfg.backends.keys().collect();
    names.sort();
    for tech_name in names {
        validate_backend(tech_name, &cfg.backends[tech_name], &mut errors);
    }

    if errors.is_empty() {
        info!("config valid");
        Ok(())
    } else {
        error!("configuration validation errors ({}):", errors.len());
        for e in &errors {
            error!(" - {}", e);
        }
        get_metrics().await.config_validation_errors.inc();
        Err(errors)
    }
}

/// Auth parameters of one backend, as a typed error.
pub fn check_auth_type(backend: &BackendConfig) -> Result<(), TokenError> {
    backend.check_auth_fields(backend.auth_type)
}

/// SETTINGS VALIDATION
fn validate_settings(settings: &SettingsConfig, errors: &mut Vec<String>) {
    if let Some(retry) = &settings.retry {
        validate_retry("settings.retry", retry, errors);
    }

    if settings.http.timeout_ms == Some(0) {
        errors.push("settings.http.timeout_ms must be > 0 (omit it to disable timeouts)".to_string());
    }

    if let StoreConfig::File { path } = &settings.store {
        if path.as_os_str().is_empty() {
            errors.push("settings.store.path must not be empty".to_string());
        }
    }

    if let Some(logging) = &settings.logging {
        let valid = ["trace", "debug", "info", "warn", "error"];
        if !valid.contains(&logging.level.to_lowercase().as_str()) {
            errors.push(format!(
                "settings.logging.level '{}' invalid; allowed: {:?}",
                logging.level, valid
            ));
        }
    }
}

fn validate_retry(path: &str, retry: &RetryConfig, errors: &mut Vec<String>) {
    if let Some(attempts) = retry.attempts {
        if attempts == 0 {
            errors.push(format!("{}.attempts must be > 0", path));
        }
    }
    if let (Some(base), Some(max)) = (retry.base_delay_ms, retry.max_delay_ms) {
        if max < base {
            errors.push(format!(
                "{}.max_delay_ms ({}) must be >= base_delay_ms ({})",
                path, max, base
            ));
        }
    }
}

/// BACKEND BASICS & AUTH INVARIANTS
fn validate_backend(tech_name: &str, backend: &BackendConfig, errors: &mut Vec<String>) {
    if !TECH_NAME.is_match(tech_name) || tech_name.starts_with('.') {
        errors.push(format!(
            "backend['{}']: tech name may only contain letters, digits, '_', '-', '.'",
            tech_name
        ));
    }

    if backend.name.trim().is_empty() {
        errors.push(format!("backend['{}'].name must not be empty", tech_name));
    }

    if !(backend.url.starts_with("http://") || backend.url.starts_with("https://")) {
        errors.push(format!(
            "backend['{}'].url '{}' must start with http:// or https://",
            tech_name, backend.url
        ));
    }

    if let Err(e) = check_auth_type(backend) {
        errors.push(format!("backend['{}']: {}", tech_name, e));
    }

    if backend.auth_type == AuthType::OAuth2 {
        match backend.oauth2_flow {
            Some(OAuth2Flow::BackendApplication) => {}
            Some(OAuth2Flow::WebApplication) => errors.push(format!(
                "backend['{}'].oauth2_flow 'web_application' is not supported; use 'backend_application'",
                tech_name
            )),
            None => errors.push(format!(
                "backend['{}'].oauth2_flow is required when auth_type is 'oauth2'",
                tech_name
            )),
        }
        if let Some(token_url) = &backend.oauth2_token_url {
            if !token_url.is_empty()
                && !(token_url.starts_with("http://") || token_url.starts_with("https://"))
            {
                errors.push(format!(
                    "backend['{}'].oauth2_token_url '{}' must start with http:// or https://",
                    tech_name, token_url
                ));
            }
        }
    }

    if backend.auth_type == AuthType::ApiKey {
        if let Some(header) = &backend.api_key_header {
            if !header.is_empty() && http::HeaderName::from_bytes(header.as_bytes()).is_err() {
                errors.push(format!(
                    "backend['{}'].api_key_header '{}' is not a valid header name",
                    tech_name, header
                ));
            }
        }
    }
}
