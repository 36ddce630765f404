use std::io::Write;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use http::Method;
use tracing::info;

use webservice_agent::backend::{BackendRegistry, ConfiguredBackend, RequestOptions};
use webservice_agent::cache::token::Token;
use webservice_agent::helpers::time::datetime_from_unix;
use webservice_agent::observability::metrics;
use webservice_agent::resilience::retry::RetrySettings;
use webservice_agent::ServiceConfig;
use webservice_agent::utils::config_loader;
use webservice_agent::utils::constants::{DEFAULT_CONFIG_PATH, ENV_CONFIG, ENV_LOG_LEVEL};
use webservice_agent::utils::logging::{self, LogLevel};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, env = ENV_CONFIG, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    #[arg(long, env = ENV_LOG_LEVEL, value_enum)]
    log_level: Option<LogLevel>,
    /// Dump prometheus metrics to stderr before exiting
    #[arg(long)]
    print_metrics: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Call a backend and print the response body
    Call {
        backend: String,
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Absolute url or a path under the backend url
        #[arg(long)]
        url: Option<String>,
        /// url placeholder value, name=value
        #[arg(long = "param", value_parser = parse_pair)]
        params: Vec<(String, String)>,
        /// query parameter, name=value
        #[arg(long = "query", value_parser = parse_pair)]
        query: Vec<(String, String)>,
        /// extra header, name=value
        #[arg(short = 'H', long = "header", value_parser = parse_pair)]
        headers: Vec<(String, String)>,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Print the current OAuth2 token, fetching one if needed
    Token { backend: String },
    /// Fetch a new OAuth2 token even if the current one is fresh
    RefreshToken { backend: String },
    /// Persisted token state of every OAuth2 backend
    Status,
    /// Load and validate the config, then exit
    Validate,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_owned(), v.to_owned()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    // -------------------------------
    // 1. Load YAML config, set up logging
    // -------------------------------

    let args = Args::parse();
    let service_config = {
        // validation errors are logged before the configured subscriber exists
        let _bootstrap = logging::bootstrap(args.log_level);
        config_loader::run(&args.config).await?
    };
    logging::run(&service_config, args.log_level);
    info!(config = %args.config, backends = service_config.backends.len(), "config loaded");

    let print_metrics = args.print_metrics || service_config.settings.metrics.is_enabled;

    // -------------------------------
    // 2. Build backends
    // -------------------------------

    let registry = BackendRegistry::from_config(&service_config)?;

    // -------------------------------
    // 3. Run the command
    // -------------------------------

    let outcome = run_command(args.command, &args.config, &service_config, &registry).await;

    if print_metrics {
        eprintln!("{}", metrics::render().await);
    }
    outcome
}

async fn run_command(
    command: Command,
    config_path: &str,
    service_config: &ServiceConfig,
    registry: &BackendRegistry,
) -> Result<()> {
    match command {
        Command::Validate => {
            // loading already validated; re-run to report the summary
            let backends = config_loader::check(service_config).await?;
            println!("config '{}' is valid: {} backend(s)", config_path, backends);
            Ok(())
        }
        Command::Status => {
            for name in registry.names() {
                let Some(cache) = registry.get(name).and_then(|b| b.token_cache()) else {
                    continue;
                };
                let record = cache.status().await?;
                let expires = record
                    .oauth2_token_expiration_datetime
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| "-".to_owned());
                let (state, refresh_due) = match Token::parse_persisted(name, record.oauth2_token.as_deref()) {
                    Ok(token) if token.is_empty() => ("absent", None),
                    Ok(token) => ("persisted", datetime_from_unix(token.refresh_due_at())),
                    Err(_) => ("malformed", None),
                };
                let refresh_due = refresh_due
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| "-".to_owned());
                println!("{name}\t{state}\texpires {expires}\trefresh due {refresh_due}");
            }
            Ok(())
        }
        Command::Token { backend } => {
            let token = lookup(registry, &backend)?.token().await?;
            print_token(&token)
        }
        Command::RefreshToken { backend } => {
            let token = lookup(registry, &backend)?.force_refresh_token().await?;
            print_token(&token)
        }
        Command::Call {
            backend,
            method,
            url,
            params,
            query,
            headers,
            content_type,
            body,
        } => {
            let backend = lookup(registry, &backend)?;
            let retry = RetrySettings::from_config(service_config.settings.retry.as_ref());
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("invalid method '{}'", method))?;

            let mut options = RequestOptions::new();
            options.url = url;
            options.url_params = params.into_iter().collect();
            options.query = query;
            options.headers = headers;
            options.content_type = content_type;
            options.body = body.map(String::into_bytes);

            let response = retry
                .run_with_retry(|| backend.call(method.clone(), options.clone()))
                .await?;
            std::io::stdout().write_all(&response)?;
            Ok(())
        }
    }
}

fn lookup<'a>(registry: &'a BackendRegistry, name: &str) -> Result<&'a ConfiguredBackend> {
    match registry.get(name) {
        Some(backend) => Ok(backend),
        None => bail!("unknown backend '{}', known: {}", name, registry.names().join(", ")),
    }
}

fn print_token(token: &Token) -> Result<()> {
    println!("{}", token.to_json()?);
    Ok(())
}
