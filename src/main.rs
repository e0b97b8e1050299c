//! HomeSystem Pipeline Server
//!
//! Serves the submission API and runs the OCR/LLM pipeline workers.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use sqlx::SqlitePool;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use homesystem_pipeline::config::Config;
use homesystem_pipeline::db::{self, SqliteDocumentStore};
use homesystem_pipeline::llm::LlmService;
use homesystem_pipeline::ocr::OcrService;
use homesystem_pipeline::pipeline::{LlmStage, OcrStage, Orchestrator, OrchestratorSettings, WorkerPool};
use homesystem_pipeline::queue::{InMemoryQueue, JobQueue, QueueError, SqliteQueue};
use homesystem_pipeline::routes;
use homesystem_pipeline::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "homesystem_pipeline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Invalid configuration")?;

    tracing::info!("Starting HomeSystem pipeline v{}", env!("CARGO_PKG_VERSION"));

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    let queue = open_queue(&config, &db_pool).await?;

    // Remote providers
    let ocr = OcrService::from_config(&config.ocr).context("Failed to build OCR client")?;
    let llm = LlmService::from_config(&config.llm).context("Failed to build LLM client")?;
    tracing::info!(
        ocr_backend = ocr.kind().as_str(),
        ocr_timeout_secs = ocr.timeout().as_secs(),
        llm_backend = llm.kind().as_str(),
        llm_model = llm.model(),
        "Providers configured"
    );
    if !ocr.is_available().await {
        tracing::warn!("OCR backend is not reachable; documents will retry until it is");
    }

    let ocr_backend = ocr.kind();
    let llm_backend = llm.kind();

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(SqliteDocumentStore::new(db_pool.clone())),
        queue,
        Arc::new(OcrStage::new(ocr)),
        Arc::new(LlmStage::new(llm)),
        OrchestratorSettings::from_config(&config),
    ));

    orchestrator
        .resume_pending()
        .await
        .context("Failed to resume unfinished documents")?;

    let workers = WorkerPool::spawn(
        orchestrator.clone(),
        config.pipeline.workers,
        config.pipeline.idle_poll,
    );

    let app = routes::app(AppState::new(orchestrator, ocr_backend, llm_backend));

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid SERVER_HOST/SERVER_PORT")?;
    tracing::info!("HomeSystem pipeline listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    workers.shutdown().await;
    db_pool.close().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Pick the queue named by `QUEUE_URL`
async fn open_queue(config: &Config, db_pool: &SqlitePool) -> anyhow::Result<Arc<dyn JobQueue>> {
    let url = config.queue.url.as_str();

    if url == "memory" {
        tracing::warn!("Using in-memory queue; pending work is rebuilt from the database on restart");
        return Ok(Arc::new(InMemoryQueue::new()));
    }

    if url.starts_with("sqlite:") {
        let pool = if url == config.database.url {
            db_pool.clone()
        } else {
            db::create_pool(url)
                .await
                .context("Failed to initialize queue database")?
        };
        tracing::info!("Using SQLite queue at {}", url);
        return Ok(Arc::new(SqliteQueue::new(pool)));
    }

    Err(QueueError::UnsupportedUrl(url.to_string()).into())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
