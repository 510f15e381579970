//! Surveillance Agent
//!
//! Main entry point: wires the pipeline, starts monitoring and serves the
//! status API until Ctrl-C.

use clap::Parser;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use surveillance_agent::{
    ai_client::{AiMode, AnalysisBackend, LocalModelBackend, OllamaBackend},
    alert_dispatcher::{broadcast_addresses, local_ipv4, AlertDispatcher, NetworkChannels},
    analysis_pipeline::AnalysisPipeline,
    capture_orchestrator::{CaptureOrchestrator, Repositories},
    detection_gate::RemoteDetector,
    media::{FfmpegFrameExtractor, FfmpegRecorder},
    repository::MemoryStore,
    state::{AppConfig, AppState},
    stream_ingestor::{FfmpegStreamSource, StreamIngestor},
    web_api,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "surveillance-agent", version, about = "Capture-triggered surveillance pipeline")]
struct Args {
    /// Analysis backend: ollama | local (overrides AI_MODE)
    #[arg(long)]
    mode: Option<AiMode>,

    /// Send a test notification and exit
    #[arg(long)]
    test_notification: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "surveillance_agent=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Starting Surveillance Agent v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = AppConfig::default();
    if let Some(mode) = args.mode {
        config.ai_mode = mode;
    }
    tracing::info!(
        rtsp_url = %config.rtsp_url,
        ai_mode = config.ai_mode.as_str(),
        clip_duration_sec = config.clip_duration_sec,
        clip_dir = %config.clip_output_dir.display(),
        detector_url = %config.detector_url,
        min_threat_level = %config.notification_min_threat_level,
        "Configuration loaded"
    );

    // Notifications
    let local_ip = local_ipv4().await;
    let server_ip = config
        .server_ip
        .clone()
        .or_else(|| local_ip.map(|ip| ip.to_string()))
        .unwrap_or_else(|| "localhost".to_string());
    let advertised = server_ip.parse::<Ipv4Addr>().ok().or(local_ip);
    let channels = Arc::new(NetworkChannels::new(broadcast_addresses(advertised)));
    let dispatcher = Arc::new(AlertDispatcher::new(config.alert_config(server_ip), channels));
    tracing::info!("AlertDispatcher initialized");

    if args.test_notification {
        if dispatcher.send_test_notification().await {
            return Ok(());
        }
        anyhow::bail!("test notification could not be delivered");
    }

    // Analysis backend
    let backend: Arc<dyn AnalysisBackend> = match config.ai_mode {
        AiMode::Ollama => Arc::new(OllamaBackend::new(
            config.ollama_url.clone(),
            config.ollama_model.clone(),
            config.ollama_text_model.clone(),
        )),
        AiMode::Local => Arc::new(LocalModelBackend::new(
            config.local_model_url.clone(),
            config.local_model_name.clone(),
            config.local_model_resolution,
        )),
    };
    if backend.health_check().await {
        tracing::info!(mode = config.ai_mode.as_str(), "Analysis backend healthy");
    } else {
        tracing::warn!(mode = config.ai_mode.as_str(), "Analysis backend not reachable, analyses will degrade");
    }

    let pipeline = Arc::new(AnalysisPipeline::new(
        backend.clone(),
        Arc::new(FfmpegFrameExtractor::new()),
        config.pipeline_config(),
    ));
    tracing::info!("AnalysisPipeline initialized");

    let detector = Arc::new(RemoteDetector::new(config.detector_url.clone(), config.detection_criteria()));
    let recorder = Arc::new(FfmpegRecorder::new(config.rtsp_url.clone()));
    let ingestor = Arc::new(StreamIngestor::new(Box::new(FfmpegStreamSource::new(
        config.rtsp_url.clone(),
        config.stream_fps,
    ))));
    tracing::info!("StreamIngestor initialized");

    let store = Arc::new(MemoryStore::default());
    let orchestrator = Arc::new(CaptureOrchestrator::new(
        config.orchestrator_config(),
        ingestor,
        detector,
        recorder,
        pipeline,
        dispatcher,
        Repositories::in_memory(store),
    ));
    tracing::info!("CaptureOrchestrator initialized");

    // Stream loss or session failure at startup is fatal
    orchestrator.start().await?;

    let state = AppState {
        orchestrator: orchestrator.clone(),
        backend,
        started_at: Instant::now(),
    };

    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Status server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    orchestrator.stop().await;
    tracing::info!("Surveillance Agent stopped");
    Ok(())
}
