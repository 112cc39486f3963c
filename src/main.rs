use clap::Parser;
use dotenvy::dotenv;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload_server::api::middleware::request_id::REQUEST_ID_HEADER;
use upload_server::config::cli::Args;
use upload_server::{AppState, create_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment, arguments & logging
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upload_server=info,upload=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Configuration, refuses to start when invalid
    let config = args.into_config()?;

    info!("🚀 Starting upload server...");
    info!("maxSizeMB is set to {}", config.max_size_mb);
    info!("port is set to {}", config.port);
    info!("uploadDir is set to {}", config.upload_dir.display());
    info!(
        "postProcessing is set to {}",
        config
            .post_processing
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_default()
    );
    if let Some(timeout) = config.post_processing_timeout {
        info!("postProcessingTimeout is set to {:?}", timeout);
    }
    info!("indexFile is set to {}", config.index_file.display());

    if !tokio::fs::metadata(&config.upload_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        warn!(
            "⚠️  Upload directory {} is not an existing directory, uploads will fail",
            config.upload_dir.display()
        );
    }

    // 3. HTTP server
    let addr = config.socket_addr();
    let state = AppState::new(config);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>, latency: Duration, _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    let app = create_app(state).layer(trace_layer);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ Server listening on: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server exited cleanly.");
    Ok(())
}

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
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
