mod admin;
mod config;
mod error;
mod policy;
mod proxy;
mod route;
mod upstream;

use admin::{admin_router, AdminState};
use axum::Router;
use bff_cache::{ResponseStore, Sweeper};
use config::Config;
use proxy::{proxy_router, AppState};
use route::RouteTable;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use upstream::Connector;

const DEFAULT_CONFIG_PATH: &str = "bff.toml";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = load_config();

    let prometheus = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "prometheus recorder unavailable, /metrics will be empty");
            None
        }
    };

    let routes = RouteTable::from_env();
    if routes.is_empty() {
        tracing::warn!("no *_API_URL variables set, every request will get 502");
    }
    let route_names: Vec<String> = routes.names().into_iter().map(String::from).collect();

    let shutdown = CancellationToken::new();

    let store = Arc::new(ResponseStore::new(config.freshness()));
    let sweeper =
        Sweeper::start_with_token(Arc::clone(&store), config.sweep_interval(), shutdown.clone());

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        routes,
        connector: Connector::new(),
        query_mode: config.upstream.query_mode,
        timeout: config.upstream_timeout(),
    });

    let admin = admin_router(AdminState {
        store,
        routes: Arc::new(route_names.clone()),
        prometheus,
        started: Instant::now(),
    });

    let proxy_addr = config.listen_addr();
    let admin_addr = config.server.admin_addr.clone();

    tracing::info!(
        proxy = %proxy_addr,
        admin = %admin_addr,
        routes = ?route_names,
        freshness_secs = config.cache.freshness_seconds,
        sweep_secs = config.cache.sweep_interval_seconds,
        timeout_ms = config.upstream.timeout_ms,
        query_mode = ?config.upstream.query_mode,
        "bff gateway starting"
    );

    let proxy_listener = match tokio::net::TcpListener::bind(&proxy_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %proxy_addr, error = %e, "failed to bind proxy listener");
            std::process::exit(1);
        }
    };
    spawn_admin(&admin_addr, admin, shutdown.clone()).await;

    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(shutdown_clone).await;
    });

    let proxy_future = axum::serve(
        proxy_listener,
        proxy_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    if let Err(e) = proxy_future.await {
        tracing::error!(error = %e, "proxy server error");
    }

    shutdown.cancel();
    sweeper.shutdown().await;
    tracing::info!("bff gateway shut down");
}

/// Serve the admin router on its own task. A bind failure leaves the proxy
/// running without it.
async fn spawn_admin(
    addr: &str,
    admin: Router,
    token: CancellationToken,
) -> Option<JoinHandle<()>> {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!(
                addr = %addr,
                error = %e,
                "failed to bind admin listener, serving proxy traffic without it"
            );
            return None;
        }
    };

    Some(tokio::spawn(async move {
        let result = axum::serve(listener, admin)
            .with_graceful_shutdown(token.cancelled_owned())
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "admin server error");
        }
    }))
}

/// `bff.toml` (or `$BFF_CONFIG`) if readable, defaults otherwise, then env overrides.
fn load_config() -> Config {
    let path = std::env::var_os("BFF_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = if path.exists() {
        match Config::load(&path) {
            Ok(c) => {
                tracing::info!(path = %path.display(), "loaded config");
                c
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load config, using defaults");
                Config::default()
            }
        }
    } else {
        tracing::info!(path = %path.display(), "no config file found, using defaults");
        Config::default()
    };

    if let Err(e) = config.apply_env(|key| std::env::var(key).ok()) {
        tracing::error!(error = %e, port = config.server.port, "ignoring BFF_PORT");
    }

    config
}

/// Listen for SIGINT (Ctrl+C) or SIGTERM and cancel the shutdown token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    tracing::info!("shutdown signal received, draining connections...");
    token.cancel();
}
