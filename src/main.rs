use clap::Parser;
use dotenvy::dotenv;
use std::net::SocketAddr;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vflow_upscaler::api::error::AppError;
use vflow_upscaler::api::middleware::request_id::REQUEST_ID_HEADER;
use vflow_upscaler::api::handlers::upscale::UpscaleResponse;
use vflow_upscaler::config::PipelineConfig;
use vflow_upscaler::create_app;
use vflow_upscaler::infrastructure::build_state;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port for the HTTP server
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Run the URL pipeline once for this source and print the JSON result
    #[arg(long)]
    source_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vflow_upscaler=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting vflow upscaler...");

    let config = PipelineConfig::from_env();
    info!(
        "🎬 Pipeline Config: Raw={}, Upscaled={}, URL Max={}MB, Event Max={}MB, Mode={:?}",
        config.raw_bucket,
        config.upscaled_bucket,
        config.max_url_download_size / 1024 / 1024,
        config.max_event_file_size / 1024 / 1024,
        config.upscale_mode
    );

    let state = build_state(config).await?;

    if let Some(source_url) = args.source_url {
        return run_once(&state.pipeline, &source_url).await;
    }

    let app = create_app(state).layer(
        TraceLayer::new_for_http()
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
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            ),
    );

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn run_once(
    pipeline: &vflow_upscaler::services::pipeline::UpscalePipeline,
    source_url: &str,
) -> anyhow::Result<()> {
    match pipeline.process_source_url(source_url).await {
        Ok(outcome) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&UpscaleResponse::from(outcome))?
            );
            Ok(())
        }
        Err(e) => {
            let (status, body) = AppError::from(e).classify();
            println!("{}", serde_json::to_string_pretty(&body)?);
            anyhow::bail!("upscale failed with status {}", status)
        }
    }
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
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
