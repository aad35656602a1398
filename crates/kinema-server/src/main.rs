//! Kinema video generation server - HTTP and gRPC front ends over one
//! shared Stable Video Diffusion pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod rpc;
mod state;

use kinema_core::{Device, EngineConfig, InferenceExecutor, LifecycleManager, SidecarLoader};
use state::AppState;

/// Transport configuration, read once from the environment.
#[derive(Debug, Clone)]
struct ServerConfig {
    http_addr: SocketAddr,
    rpc_addr: SocketAddr,
    rpc_workers: usize,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            http_addr: env_parsed("KINEMA_HTTP_ADDR", SocketAddr::from(([0, 0, 0, 0], 8001))),
            rpc_addr: env_parsed(
                "KINEMA_RPC_ADDR",
                SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 50051)),
            ),
            rpc_workers: env_parsed("KINEMA_RPC_WORKERS", 10),
        }
    }
}

fn env_parsed<T>(var: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Debug,
{
    match std::env::var(var) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid {var}='{raw}', falling back to {default:?}");
                default
            }
        },
        Err(_) => default,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kinema_server=debug,kinema_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting kinema video generation server");

    let engine_config = EngineConfig::default();
    let server_config = ServerConfig::from_env();
    let device = Device::from_use_cpu(engine_config.use_cpu);
    info!(%device, model = %engine_config.model_id, "selected execution device");

    let lifecycle = Arc::new(LifecycleManager::new());
    let executor = Arc::new(InferenceExecutor::new(lifecycle.clone()));
    let state = AppState::new(lifecycle.clone(), executor);

    // Load off the request path: both transports come up immediately
    // and reject generation with NotReady until the load completes.
    let loader = SidecarLoader::new(engine_config);
    let load_lifecycle = lifecycle.clone();
    let load_task = tokio::task::spawn_blocking(move || load_lifecycle.begin_load(&loader));

    let (shutdown_tx, _) = tokio::sync::watch::channel(false);
    let (fail_tx, mut fail_rx) = tokio::sync::mpsc::channel::<anyhow::Error>(2);

    let listener = tokio::net::TcpListener::bind(server_config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", server_config.http_addr))?;
    info!("HTTP server listening on http://{}", server_config.http_addr);

    let http_task = {
        let app = api::create_router(state.clone());
        let shutdown = wait_for_shutdown(shutdown_tx.subscribe());
        let fail_tx = fail_tx.clone();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(shutdown);
            if let Err(e) = server.await {
                let _ = fail_tx.send(anyhow::Error::new(e).context("http server error")).await;
            }
        })
    };

    let rpc_task = {
        let state = state.clone();
        let shutdown = wait_for_shutdown(shutdown_tx.subscribe());
        let fail_tx = fail_tx.clone();
        let config = server_config.clone();
        tokio::spawn(async move {
            if let Err(e) = rpc::serve(state, config.rpc_addr, config.rpc_workers, shutdown).await {
                let _ = fail_tx.send(anyhow::Error::new(e).context("rpc server error")).await;
            }
        })
    };
    drop(fail_tx);

    // A failed load is fatal: the process must not keep serving with no
    // model behind it.
    let load_monitor = async {
        match load_task.await {
            Ok(Ok(())) => std::future::pending::<anyhow::Error>().await,
            Ok(Err(e)) => anyhow::Error::new(e),
            Err(e) => anyhow::anyhow!("load task panicked: {e}"),
        }
    };

    info!("Server ready. Press Ctrl+C to stop.");

    let fatal = tokio::select! {
        _ = shutdown_signal() => None,
        err = load_monitor => Some(err),
        err = fail_rx.recv() => err,
    };

    let _ = shutdown_tx.send(true);
    let _ = http_task.await;
    let _ = rpc_task.await;

    match fatal {
        None => {
            info!("Server stopped");
            Ok(())
        }
        Some(err) => {
            error!(error = %err, "shutting down after fatal error");
            Err(err)
        }
    }
}

async fn wait_for_shutdown(mut rx: tokio::sync::watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
}
