use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use storehub_core::StorehubConfig;
use storehub_hub::Hub;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod app;
mod http;
mod ws;

/// Storefront gateway: product API plus live WebSocket event push.
#[derive(Parser)]
#[command(name = "storehub-gateway", version)]
struct Cli {
    /// Path to storehub.toml (falls back to STOREHUB_CONFIG, then ~/.storehub/storehub.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "storehub_gateway=info,storehub_hub=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > STOREHUB_CONFIG env > ~/.storehub/storehub.toml
    let config_path = cli.config.or_else(|| std::env::var("STOREHUB_CONFIG").ok());
    let config = StorehubConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        StorehubConfig::default()
    });

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;

    // hub event loop must be running before the listener accepts traffic
    let (hub, engine) = Hub::new(&config.hub);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_handle = tokio::spawn(engine.run(shutdown_rx.clone()));

    let state = Arc::new(app::AppState::new(config, hub));
    let router = app::build_router(state);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => {
                // keep the sender alive; dropping it would stop the hub
                error!("cannot listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        }
        let _ = shutdown_tx.send(true);
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Storehub gateway listening on {}", addr);

    let mut server_shutdown = shutdown_rx;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await;
    })
    .await?;

    // let write loops flush their last frames before exiting
    engine_handle.await?;
    info!("Storehub gateway stopped");
    Ok(())
}
