use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;

use atelier_core::events::GenerationEvent;
use atelier_core::synthesis::SynthesisEngine;
use atelier_engine::Generator;
use atelier_server::AppConfig;
use atelier_store::{ImageStore, SessionStore};
use atelier_synth::{HttpEngine, MockEngine, MockRender};

/// Conversational image generation server.
#[derive(Parser, Debug)]
#[command(name = "atelier", version)]
struct Args {
    /// Port to listen on (overrides ATELIER_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for session state and images (overrides ATELIER_DATA_DIR)
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,

    /// Base URL of the diffusion engine sidecar (overrides ATELIER_ENGINE_URL)
    #[arg(long)]
    engine_url: Option<String>,

    /// Use the built-in mock engine instead of a real backend
    #[arg(long)]
    mock_engine: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = AppConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(engine_url) = args.engine_url {
        config.engine_url = engine_url;
    }

    tracing::info!(data_dir = %config.data_dir.display(), "Starting Atelier server");

    let sessions =
        SessionStore::open(&config.session_path()).expect("Failed to open session store");
    let images = ImageStore::open(&config.images_dir()).expect("Failed to open image store");

    let engine: Arc<dyn SynthesisEngine> = if args.mock_engine {
        tracing::warn!("Using mock synthesis engine; renders are placeholders");
        Arc::new(MockEngine::new(
            std::iter::repeat_with(MockRender::image).take(1024).collect(),
        ))
    } else {
        Arc::new(
            HttpEngine::new(config.engine_url.clone()).expect("Failed to build engine client"),
        )
    };
    tracing::info!(engine = engine.name(), url = %config.engine_url, "Synthesis engine ready");

    let (event_tx, _) = broadcast::channel::<GenerationEvent>(1024);

    let mut generator = Generator::new(engine, sessions, images, event_tx.clone());
    if config.enable_thumbnails {
        generator = generator.with_thumbnails(config.thumbnail_size);
    }
    let generator = Arc::new(generator);

    let port = config.port;
    let _handle = atelier_server::start(config, generator, event_tx)
        .await
        .expect("Failed to start server");

    tracing::info!(port, "Atelier server ready");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}
