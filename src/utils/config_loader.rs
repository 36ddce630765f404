use std::path::Path;

use anyhow::{anyhow, Result};

use crate::config::proc_loader::file_to_config;
use crate::config::proc_validator::validate_service_config;
use crate::ServiceConfig;

pub async fn run(config_path: &str) -> Result<ServiceConfig> {
    let path = Path::new(config_path);
    file_to_config(path)
        .await
        .map_err(|e| anyhow!("Invalid config '{}': {}", config_path, e))
}

/// Re-validates a loaded config; returns the number of backends.
pub async fn check(service_config: &ServiceConfig) -> Result<usize> {
    validate_service_config(service_config)
        .await
        .map_err(|errors| anyhow!("config is not valid, total errors: {}", errors.len()))?;
    Ok(service_config.backends.len())
}
