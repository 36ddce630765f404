use crate::config::backends::AuthType;
use crate::config::settings::LoggingConfig;
use crate::ServiceConfig;

pub fn initiate_default_values(mut config: ServiceConfig) -> ServiceConfig {
    if config.settings.logging.is_none() {
        config.settings.logging = Some(LoggingConfig::default());
    }

    config.backends = config
        .backends
        .into_iter()
        .map(|(tech_name, mut backend)| {
            // propagate map key as the backend's stable id
            backend.tech_name = tech_name.to_owned();
            // oauth2_flow only means something for oauth2 backends
            if backend.auth_type != AuthType::OAuth2 {
                backend.oauth2_flow = None;
            }
            (tech_name, backend)
        })
        .collect();

    config
}
