use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use error::AppError;
use relay_engine::{
    IpBlock, ProxyConfig, RoutePlanner, RoutePlannerConfig, RoutePlannerStrategy, Transport,
    TransportConfig,
};
use tracing::{Level, debug, error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod commands;
mod error;
mod utils;

use cli::{CliArgs, Command, GlobalArgs};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();
    init_logging(&args.global)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Relay toolkit starting"
    );

    match args.command {
        Command::Track(command) => commands::track::run(command),
        Command::Fetch(fetch) => {
            let transport = build_transport(&args.global)?;
            commands::fetch::run(&transport, fetch).await
        }
        Command::Hls(hls) => {
            let transport = build_transport(&args.global)?;
            commands::hls::run(Arc::new(transport), hls).await
        }
        Command::Serve(serve) => {
            let planner = build_route_planner(&args.global)?.ok_or_else(|| {
                AppError::InvalidInput("serve needs at least one --ip-block".to_string())
            })?;
            commands::serve::run(planner, serve).await
        }
    }
}

fn init_logging(global: &GlobalArgs) -> Result<(), AppError> {
    let log_level = if global.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_ascii_lowercase()));

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&global.log_file)?;

    // stdout carries command output, so logs go to stderr.
    let multi_writer = MakeWriterExt::and(std::io::stderr, log_file);

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(multi_writer)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))
}

fn build_route_planner(global: &GlobalArgs) -> Result<Option<Arc<RoutePlanner>>, AppError> {
    if global.ip_blocks.is_empty() {
        return Ok(None);
    }

    let blocks = global
        .ip_blocks
        .iter()
        .map(|block| block.parse::<IpBlock>())
        .collect::<Result<Vec<_>, _>>()?;
    let excluded = global
        .excluded_ips
        .iter()
        .map(|addr| {
            addr.parse::<IpAddr>()
                .map_err(|_| AppError::InvalidInput(format!("invalid --exclude-ip '{addr}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let strategy: RoutePlannerStrategy = global
        .strategy
        .parse()
        .map_err(AppError::InvalidInput)?;

    let config = RoutePlannerConfig::new(blocks)
        .with_strategy(strategy)
        .with_excluded(excluded)
        .with_ban_cooldown(Duration::from_millis(global.ban_cooldown_ms));
    let planner = RoutePlanner::new(config)?;

    info!(
        strategy = %strategy,
        pool_size = planner.pool_size(),
        "Route planner enabled"
    );
    Ok(Some(Arc::new(planner)))
}

fn build_transport(global: &GlobalArgs) -> Result<Transport, AppError> {
    let mut headers = TransportConfig::get_default_headers();
    headers.extend(utils::parse_headers(&global.headers)?);

    let mut builder = TransportConfig::builder()
        .with_timeout(Duration::from_secs(global.timeout))
        .with_connect_timeout(Duration::from_secs(global.connect_timeout))
        .with_max_retries(global.retries)
        .with_headers(headers)
        .with_http2(!global.no_http2);

    if let Some(proxy_url) = &global.proxy {
        let proxy = ProxyConfig::from_url(proxy_url)?;
        info!(
            proxy_url = %proxy.url,
            proxy_type = ?proxy.proxy_type,
            has_auth = proxy.auth.is_some(),
            "Using explicit proxy configuration"
        );
        builder = builder.with_proxy(proxy);
    }

    let config = builder.build();
    debug!(
        timeout = ?config.timeout,
        connect_timeout = ?config.connect_timeout,
        http2 = config.http2_enabled,
        "Transport configured"
    );

    let mut transport = Transport::new(config);
    if let Some(planner) = build_route_planner(global)? {
        transport = transport.with_route_planner(planner);
    }
    Ok(transport)
}
