//! Shared constants

pub const DEFAULT_CONFIG_PATH: &str = "webservice-agent.yaml";

pub const ENV_CONFIG: &str = "CONFIG";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
