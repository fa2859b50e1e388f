//! cardscan - card identification microservice entry point

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use cardscan::config::Config;
use cardscan::db::{self, CatalogStore};
use cardscan::services::catalog_client::CatalogClient;
use cardscan::services::embedder::OnnxEmbedder;
use cardscan::services::ingestor::Ingestor;
use cardscan::services::pipeline::ScanPipeline;
use cardscan::services::reconciler;
use cardscan::services::title_reader::TesseractReader;
use cardscan::types::{ArtEmbedder, TitleReader};
use cardscan::{build_router, AppState};

fn parse_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("cardscan {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config_path
}

fn print_help() {
    println!(
        r#"cardscan - card identification microservice

USAGE:
    cardscan [OPTIONS]

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    CARDSCAN_CONFIG     Path to config file
    CARDSCAN_BIND       Listen address (overrides config)
    DATABASE_URL        Postgres URL (overrides config)

Config file location: ./cardscan.toml"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = parse_args();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting cardscan (card identification) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    let pool = db::init_pool(&config.database)
        .await
        .context("database initialization failed")?;
    let store = CatalogStore::new(pool);
    info!("Database connection established");

    let embedder: Arc<dyn ArtEmbedder> = Arc::new(
        OnnxEmbedder::load(&config.model.path).context("embedding model load failed")?,
    );
    let reader: Arc<dyn TitleReader> = Arc::new(
        TesseractReader::new(config.ocr.data_path.clone(), &config.ocr.language)
            .context("OCR engine initialization failed")?,
    );
    let client = CatalogClient::new(&config.catalog.base_url, &config.catalog.user_agent)?;

    let pipeline = Arc::new(ScanPipeline::new(
        Arc::clone(&embedder),
        reader,
        store.clone(),
        config.fuser.clone(),
        config.pipeline.ocr_inject_threshold,
    ));
    let ingestor = Arc::new(Ingestor::new(client, store, embedder));

    let shutdown = CancellationToken::new();
    let reconciler_handle = if config.reconciler.enabled {
        Some(tokio::spawn(reconciler::run(
            Arc::clone(&ingestor),
            config.reconciler.clone(),
            shutdown.clone(),
        )))
    } else {
        info!("reconciler disabled by configuration");
        None
    };

    let bind = config.server.bind.clone();
    let state = AppState::new(pipeline, ingestor, Arc::new(config));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", bind);

    let shutdown_trigger = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_trigger.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = reconciler_handle {
        let _ = handle.await;
    }
    info!("cardscan stopped");

    Ok(())
}
