use std::path::Path;
use std::sync::LazyLock;

use anyhow::{anyhow, Result};
use regex::Regex;
use tokio::fs;
use tracing::{debug, error};

use crate::config::proc_initiator::initiate_default_values;
use crate::config::proc_validator;
use crate::ServiceConfig;

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)(?::([^\}]*))?\}").expect("env var pattern compiles"));

/// Load and validate config from YAML file
pub async fn file_to_config(path: &Path) -> Result<ServiceConfig> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| anyhow!("cannot read config '{}': {}", path.display(), e))?;
    let expanded = expand_env_vars(&content);
    parse_config(expanded).await
}

pub async fn parse_config(content: String) -> Result<ServiceConfig> {
    let service_config: ServiceConfig = serde_yaml::from_str(&content)
        .inspect_err(|e| error!("parse config error: {}", e))?;

    let service_config = initiate_default_values(service_config);
    debug!("validation config ...");
    proc_validator::validate_service_config(&service_config)
        .await
        .map_err(|errors| {
            anyhow!(
                "config is not valid, total errors: {}\n{}",
                errors.len(),
                errors.join("\n")
            )
        })?;

    Ok(service_config)
}

/// `${VAR}` and `${VAR:default}`; unset without default becomes empty.
pub fn expand_env_vars(input: &str) -> String {
    ENV_VAR.replace_all(input, |caps: &regex::Captures| {
        let var = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::backends::{AuthType, ContentType, OAuth2Flow};
    use crate::config::settings::{LogFormat, StoreConfig};
    use serial_test::serial;

    const CONFIG: &str = r#"
settings:
  logging:
    level: debug
    format: json
  http:
    timeout_ms: 2500
  store:
    kind: file
    path: /var/lib/webservice-agent/tokens
backends:
  test_oauth2:
    name: WebService OAuth2
    url: https://localhost.demo.odoo/
    auth_type: oauth2
    content_type: application/xml
    oauth2_flow: backend_application
    oauth2_clientid: some_client_id
    oauth2_client_secret: ${WS_TEST_SECRET:shh_secret}
    oauth2_token_url: https://localhost.demo.odoo/oauth2/token
    oauth2_audience: https://localhost.demo.odoo/
  public:
    name: Public
    url: https://public.example/
    auth_type: none
    content_type: application/json
    oauth2_flow: web_application
"#;

    #[tokio::test]
    #[serial]
    async fn parses_defaults_and_propagates_tech_names() {
        std::env::remove_var("WS_TEST_SECRET");
        let cfg = parse_config(expand_env_vars(CONFIG)).await.unwrap();

        let logging = cfg.settings.logging.as_ref().unwrap();
        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, LogFormat::Json);
        assert_eq!(cfg.settings.http.timeout_ms, Some(2500));
        assert_eq!(
            cfg.settings.store,
            StoreConfig::File { path: "/var/lib/webservice-agent/tokens".into() }
        );

        let oauth = &cfg.backends["test_oauth2"];
        assert_eq!(oauth.tech_name, "test_oauth2");
        assert_eq!(oauth.auth_type, AuthType::OAuth2);
        assert_eq!(oauth.content_type, ContentType::Xml);
        assert_eq!(oauth.oauth2_flow, Some(OAuth2Flow::BackendApplication));
        assert_eq!(oauth.oauth2_client_secret.as_deref(), Some("shh_secret"));

        // flow is reset for non-oauth2 backends
        assert_eq!(cfg.backends["public"].oauth2_flow, None);
    }

    #[tokio::test]
    #[serial]
    async fn env_vars_override_defaults() {
        std::env::set_var("WS_TEST_SECRET", "from-env");
        let cfg = parse_config(expand_env_vars(CONFIG)).await.unwrap();
        std::env::remove_var("WS_TEST_SECRET");
        assert_eq!(
            cfg.backends["test_oauth2"].oauth2_client_secret.as_deref(),
            Some("from-env")
        );
    }

    #[tokio::test]
    async fn invalid_config_reports_all_errors() {
        let content = r#"
backends:
  broken:
    name: Broken
    url: https://x/
    auth_type: user_pwd
    content_type: application/json
"#;
        let err = parse_config(content.to_owned()).await.unwrap_err().to_string();
        assert!(err.contains("total errors: 1"), "{}", err);
        assert!(err.contains("Username, Password"), "{}", err);
    }

    #[tokio::test]
    async fn file_loading_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.yaml");
        std::fs::write(
            &path,
            "backends:\n  pub:\n    name: Pub\n    url: https://p/\n    auth_type: none\n    content_type: application/json\n",
        )
        .unwrap();
        let cfg = file_to_config(&path).await.unwrap();
        assert!(cfg.backends.contains_key("pub"));
        assert!(file_to_config(&dir.path().join("missing.yaml")).await.is_err());
    }
}
