//! hdm-ingest - Home document ingestion service
//!
//! **Module Identity:**
//! - Name: hdm-ingest
//! - Port: 8080 (configurable)
//!
//! Receives change notifications and manual triggers, classifies each new
//! inbox document, files it and runs the downstream side effects.

use anyhow::{Context, Result};
use clap::Parser;
use hdm_common::config::{parse_toml_config, read_config_text, ConfigResolver};
use hdm_ingest::config::IngestSettings;
use hdm_ingest::providers::{
    CalendarClient, DocsClient, DriveClient, GeminiClient, OAuthCredentials, PdftoppmConverter,
    PhotosClient, TasksClient, TokenSource,
};
use hdm_ingest::services::{ChangeFeedTracker, IngestionPipeline, PipelineProviders};
use hdm_ingest::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "hdm-ingest", version, about = "Home document ingestion service")]
struct Args {
    /// Config file (overrides HDM_CONFIG and the platform default)
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP port (overrides the config file)
    #[arg(long, env = "HDM_PORT")]
    port: Option<u16>,

    /// SQLite database for watch-state persistence
    #[arg(long, env = "HDM_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Step 1: Resolve and read the config file (missing file → defaults)
    let config_path = ConfigResolver::new("hdm-ingest").resolve(args.config.as_deref());
    let config_text = read_config_text(config_path.as_deref());
    let bootstrap = parse_toml_config(config_text.as_deref())?;

    hdm_common::logging::init_tracing(&bootstrap.logging)?;

    info!("Starting hdm-ingest (Home Document Ingestion)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("Config: built-in defaults"),
    }

    // Step 2: Runtime settings
    let mut settings = IngestSettings::from_toml_str(config_text.as_deref())?;
    settings.resolve_secrets();
    settings.validate()?;
    let settings = Arc::new(settings);

    // Step 3: Providers
    let creds = &settings.credentials;
    let tokens: Arc<dyn TokenSource> = Arc::new(
        OAuthCredentials::new(
            creds.oauth_client_id.clone().unwrap_or_default(),
            creds.oauth_client_secret.clone().unwrap_or_default(),
            creds
                .oauth_refresh_token
                .clone()
                .context("OAuth refresh token not configured (HDM_OAUTH_REFRESH_TOKEN)")?,
        )
        .context("Failed to build OAuth credentials")?,
    );
    let api_key = creds
        .gemini_api_key
        .clone()
        .context("Gemini API key not configured (HDM_GEMINI_API_KEY)")?;

    let drive = Arc::new(DriveClient::new(Arc::clone(&tokens))?);
    let calendar = CalendarClient::new(
        Arc::clone(&tokens),
        settings.calendar.calendar_id.clone(),
        settings.calendar.time_zone.clone(),
        settings.calendar.utc_offset_minutes,
    )?;
    let providers = PipelineProviders {
        storage: drive.clone(),
        documents: Arc::new(DocsClient::new(Arc::clone(&tokens))?),
        model: Arc::new(GeminiClient::new(api_key, settings.router.requests_per_minute)?),
        converter: Arc::new(PdftoppmConverter::new(
            settings.photos.converter_command.clone(),
        )),
        calendar: Some(Arc::new(calendar)),
        tasks: Some(Arc::new(TasksClient::new(
            Arc::clone(&tokens),
            settings.tasks.task_list.clone(),
        )?)),
        photos: Some(Arc::new(PhotosClient::new(Arc::clone(&tokens))?)),
    };

    // Step 4: Services
    let pipeline = Arc::new(IngestionPipeline::new(Arc::clone(&settings), providers));
    let mut tracker = ChangeFeedTracker::new(
        drive,
        settings.watch.clone(),
        settings.supported_mime_types.clone(),
    );

    let database = args.database.or(bootstrap.database_path);
    if let Some(db_path) = database {
        info!("Database: {}", db_path.display());
        let pool = hdm_ingest::db::init_database_pool(&db_path).await?;
        tracker = tracker.with_store(pool);
    }
    let tracker = Arc::new(tracker);
    if !tracker.restore().await && settings.watch.webhook_url.is_some() {
        info!("No saved watch; start one with POST /admin/watch/start");
    }
    if settings.watch.webhook_url.is_none() {
        warn!("Webhook URL not configured; watch administration is unavailable");
    }

    let state = AppState::new(pipeline, tracker, Arc::clone(&settings));
    let shutdown = state.shutdown.clone();
    let app = hdm_ingest::build_router(state);

    // Step 5: Serve
    let port = args.port.unwrap_or(bootstrap.port);
    let addr = format!("{}:{}", bootstrap.bind_address, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    info!("hdm-ingest stopped");
    Ok(())
}
