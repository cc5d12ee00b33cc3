use clap::Parser;
use dotenvy::dotenv;
use std::net::{IpAddr, SocketAddr};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use trade_dashboard_backend::config::AppConfig;
use trade_dashboard_backend::infrastructure::{processor, storage};
use trade_dashboard_backend::services::worker::BackgroundWorker;
use trade_dashboard_backend::{AppState, create_app};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the HTTP server
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & logging
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trade_dashboard_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Trade Dashboard Backend...");

    let config = AppConfig::from_env();
    info!(
        "🛡️  Config: Max Upload={}MB, Extensions={}, Upload Retention={:?}, Output Retention={:?}",
        config.max_upload_size / 1024 / 1024,
        config.allowed_extensions.join(","),
        config.retention.uploads.max_age,
        config.retention.outputs.max_age
    );

    // 2. Storage & processor
    let (uploads, outputs) = storage::setup_storage(&config).await?;
    let processor = processor::setup_processor(&config.processor);

    let shutdown = CancellationToken::new();
    let state = AppState::new(config.clone(), uploads, outputs, processor, shutdown.clone());

    // 3. Startup sweep, before any request can touch the storage areas
    state.retention.startup_sweep().await;

    // 4. Optional periodic sweep
    let worker_handle = config.sweep_interval.map(|interval| {
        let worker = BackgroundWorker::new(state.retention.clone(), interval, shutdown.clone());
        tokio::spawn(worker.run())
    });

    // 5. HTTP server
    let app = create_app(state);
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ Server listening on: http://{}", addr);
    info!("📍 Open browser: http://localhost:{}", args.port);
    info!("📖 Swagger UI documentation: http://localhost:{}/swagger-ui", args.port);

    let server_shutdown = shutdown.clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Stop running jobs so in-flight requests can finish
            server_shutdown.cancel();
        })
        .await
    {
        error!("❌ Server runtime error: {}", e);
    }

    shutdown.cancel();
    if let Some(handle) = worker_handle {
        let _ = handle.await;
    }

    info!("👋 Backend exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
