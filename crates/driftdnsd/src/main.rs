//! driftdnsd - the DDNS reconciliation daemon.
//!
//! Thin integration layer only: parse flags, set up logging, register
//! the built-in providers, load the configuration and hand everything
//! to the engine. All reconciliation logic lives in driftdns-core.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use driftdns_core::{AddressTable, Config, Discovery, Reconciler, ServiceRegistry};
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "driftdnsd", version, disable_version_flag = true)]
struct Args {
    /// Path to the configuration file
    #[arg(long = "config_file", default_value = "config.yaml")]
    config_file: String,

    /// Logging level (debug, info, warn, error, fatal, panic)
    #[arg(long = "log_level", default_value = "info")]
    log_level: String,

    /// Time to keep a discovered host entry after it was last seen
    #[arg(long, default_value = "1h", value_parser = humantime::parse_duration)]
    lifetime: Duration,

    /// Render the current state live on the terminal
    #[arg(long, default_value_t = false)]
    live: bool,

    /// Serve the same state as text/plain on this port (0 disables)
    #[arg(long = "webserver_port", default_value_t = 0)]
    webserver_port: u16,

    /// Show the current version
    #[arg(long, default_value_t = false)]
    version: bool,
}

fn log_level(level: &str, live: bool) -> Option<tracing::Level> {
    // live mode owns the terminal, so logging is squelched
    if live {
        return Some(tracing::Level::ERROR);
    }
    match level {
        "debug" => Some(tracing::Level::DEBUG),
        "info" => Some(tracing::Level::INFO),
        "warn" => Some(tracing::Level::WARN),
        // fatal/panic map onto the coarsest level tracing has
        "error" | "fatal" | "panic" => Some(tracing::Level::ERROR),
        _ => None,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.version {
        println!("driftdnsd {VERSION}");
        return ExitCode::SUCCESS;
    }

    let Some(level) = log_level(&args.log_level, args.live) else {
        eprintln!("invalid log level: {}", args.log_level);
        return ExitCode::FAILURE;
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set up logging: {e}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to create runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(&args.config_file)
        .with_context(|| format!("error reading config {}", args.config_file))?;

    let registry = ServiceRegistry::new();
    driftdns_providers::register_builtin(&registry);

    // The discovery collaborator feeds this table; the engine only ever
    // reads snapshots from it.
    let table = Arc::new(AddressTable::new());

    let reconciler = Arc::new(
        Reconciler::new(config, Arc::clone(&table) as Arc<dyn Discovery>, &registry)
            .context("cannot start reconciler")?,
    );
    info!(version = VERSION, lifetime = %humantime::format_duration(args.lifetime), "starting");
    let worker = Arc::clone(&reconciler).spawn();

    if args.webserver_port > 0 {
        let reconciler = Arc::clone(&reconciler);
        let router = axum::Router::new().route(
            "/",
            axum::routing::get(move || {
                let reconciler = Arc::clone(&reconciler);
                async move { render(&reconciler, "", true) }
            }),
        );
        let listener = tokio::net::TcpListener::bind(("::", args.webserver_port))
            .await
            .with_context(|| format!("cannot bind web server port {}", args.webserver_port))?;
        info!(port = args.webserver_port, "starting web server");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("web server failed: {e}");
            }
        });
    }

    if args.live {
        loop {
            // redraw in place once a second
            print!("\x1b[2J\x1b[H{}", render(&reconciler, "    ", false));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    worker.abort();
    Ok(())
}

fn render(reconciler: &Reconciler, prefix: &str, redact: bool) -> String {
    format!(
        "{prefix}driftdns {VERSION} Time: {}\n{}",
        humantime::format_rfc3339_seconds(std::time::SystemTime::now()),
        reconciler.pretty_print(prefix, redact)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_cover_legacy_names() {
        assert_eq!(log_level("debug", false), Some(tracing::Level::DEBUG));
        assert_eq!(log_level("fatal", false), Some(tracing::Level::ERROR));
        assert_eq!(log_level("panic", false), Some(tracing::Level::ERROR));
        assert_eq!(log_level("nope", false), None);
        // live mode forces quiet logging
        assert_eq!(log_level("debug", true), Some(tracing::Level::ERROR));
    }

    #[test]
    fn args_have_documented_defaults() {
        let args = Args::parse_from(["driftdnsd"]);
        assert_eq!(args.config_file, "config.yaml");
        assert_eq!(args.log_level, "info");
        assert_eq!(args.lifetime, Duration::from_secs(3600));
        assert_eq!(args.webserver_port, 0);
        assert!(!args.live);
    }
}
