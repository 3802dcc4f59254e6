//! ROS Graph Cache
//!
//! Polls a ROS master and serves the cached computation graph over HTTP.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rosgraph_cache::{ApiServer, FileConfig, GraphCache, MasterApiRef, Result, XmlRpcMaster};

// =============================================================================
// CLI Arguments
// =============================================================================

/// ROS Graph Cache - periodically refreshed view of a ROS master's graph
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags override its values
    #[arg(long, env = "GRAPH_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Master XML-RPC endpoint
    #[arg(long, env = "ROS_MASTER_URI")]
    master_uri: Option<String>,

    /// Caller id presented to the master
    #[arg(long, env = "GRAPH_CACHE_CALLER_ID")]
    caller_id: Option<String>,

    /// REST API bind address
    #[arg(long, env = "GRAPH_CACHE_API_ADDR")]
    api_addr: Option<String>,

    /// Refresh interval in milliseconds
    #[arg(long, env = "GRAPH_CACHE_REFRESH_MS")]
    refresh_interval_ms: Option<u64>,

    /// Timeout for each master call in milliseconds
    #[arg(long, env = "GRAPH_CACHE_CALL_TIMEOUT_MS")]
    call_timeout_ms: Option<u64>,

    /// Maximum concurrent participant lookups per refresh
    #[arg(long, env = "GRAPH_CACHE_LOOKUP_CONCURRENCY")]
    lookup_concurrency: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn overrides(&self) -> FileConfig {
        FileConfig {
            master_uri: self.master_uri.clone(),
            caller_id: self.caller_id.clone(),
            refresh_interval_ms: self.refresh_interval_ms,
            call_timeout_ms: self.call_timeout_ms,
            lookup_concurrency: self.lookup_concurrency,
            event_channel_capacity: None,
            api_addr: self.api_addr.clone(),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let file = match &args.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    let settings = file.overlay(args.overrides()).resolve()?;

    info!(
        version = rosgraph_cache::VERSION,
        master = %settings.master.master_uri,
        api = %settings.api.rest_addr,
        interval_ms = settings.cache.refresh_interval.as_millis() as u64,
        "Starting ROS graph cache"
    );

    let master: MasterApiRef = Arc::new(XmlRpcMaster::new(settings.master)?);
    let cache = GraphCache::new(settings.cache, master.clone())?;

    match cache.start().await {
        Ok(report) => info!(
            participants = report.participants,
            resolved = report.resolved,
            "Initial graph loaded"
        ),
        Err(e) => warn!(error = %e, "Initial refresh failed, will retry on schedule"),
    }

    let server = Arc::new(ApiServer::new(settings.api, cache.clone(), master));
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        let _ = shutdown.send(());
    });

    let served = server.run().await;
    cache.stop().await;
    served?;

    info!("Graph cache shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "tower_http=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
