//! Pupil CLI
//!
//! Main entry point for serving the simulated student over HTTP.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use pupil_orchestrator::{create_router, AppState, Config};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 8000;

/// Pupil - Teaching Practice Partner
///
/// Serves a simulated elementary-school student that asks questions about a
/// problem instead of answering it, so teachers can practice explaining.
#[derive(Parser, Debug)]
#[command(name = "pupil")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: pupil.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Address to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port for the HTTP API server
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Model identifier to request from the generation endpoint
    #[arg(short, long)]
    model: Option<String>,

    /// URL of the streaming generation endpoint
    #[arg(long, value_name = "URL")]
    upstream_url: Option<String>,

    /// Seconds to wait for the generation endpoint before giving up
    #[arg(short, long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Pupil starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run_server(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration, then serves the API until Ctrl+C.
async fn run_server(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    // Re-validate after overrides
    config.validate()?;

    print_config(&config);

    let state = AppState::new(config)?;

    if state.turns.client().is_reachable().await {
        tracing::info!(url = %state.config.upstream_url, "Generation endpoint reachable");
    } else {
        tracing::warn!(
            url = %state.config.upstream_url,
            "Generation endpoint not reachable; turns will fail until it is up (try 'ollama serve')"
        );
    }

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .map_err(|e| {
            anyhow::anyhow!(
                "Invalid listen address '{}:{}': {e}\n\nSuggestion: Pass an IP address to --host, e.g. 127.0.0.1",
                args.host,
                args.port
            )
        })?;

    let router = create_router(state);

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("Pupil running on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves when Ctrl+C is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Applies command-line overrides on top of file values.
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(ref model) = args.model {
        config.model.clone_from(model);
    }
    if let Some(ref url) = args.upstream_url {
        config.upstream_url.clone_from(url);
    }
    if let Some(timeout) = args.timeout {
        config.timeout_seconds = timeout;
    }
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Model: {}", config.model);
    println!("  Upstream: {}", config.upstream_url);
    println!("  Timeout: {}s", config.timeout_seconds);
    println!("  Persona: {}", config.persona.identity);
}
