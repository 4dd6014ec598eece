use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use clap::Parser;
use neurogram_core::{RecordingReader, RecordingReaderFactory, SessionService};
use neurogram_server::{
    cli::{Cli, Commands, KeyCommands},
    config::ServerConfig,
    create_router,
    state::ServerState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "neurogram_server=info,neurogram_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::from_env()?;

    match cli.command {
        Some(Commands::Key(command)) => {
            let sessions = SessionService::new(config.session_config())?;
            match command {
                KeyCommands::Generate { path } => {
                    println!("{}", sessions.generate_key(&path)?);
                }
                KeyCommands::Resolve { token } => {
                    println!("{}", sessions.resolve(&token)?.display());
                }
            }
            return Ok(());
        }
        Some(Commands::Inspect { path }) => {
            let recording = RecordingReaderFactory
                .read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;

            println!("File:        {}", path.display());
            println!("Channels:    {}", recording.num_channels());
            println!("Sample rate: {} Hz", recording.sample_rate);
            println!("Samples:     {}", recording.num_samples());
            println!("Duration:    {:.3} s", recording.duration());
            println!("Labels:      {}", recording.labels.join(", "));
            println!("Annotations: {}", recording.annotations.len());
            for annotation in &recording.annotations {
                println!(
                    "  {:>10.3} s  {:>8.3} s  {}",
                    annotation.onset, annotation.duration, annotation.description
                );
            }
            return Ok(());
        }
        Some(Commands::Serve) | None => {}
    }

    info!("Starting Neurogram Server v{}", VERSION);
    info!("Configuration loaded:");
    info!("   Port: {}", config.port);
    info!("   Bind address: {}", config.bind_addr);
    info!("   Cache directory: {:?}", config.cache_directory);
    info!("   Upload directory: {:?}", config.upload_directory);
    info!("   Server files directory: {:?}", config.server_files_directory);
    info!("   Model sample rate: {:?}", config.model_sample_rate);
    info!("   Montage policy: {:?}", config.montage_policy);

    let state = Arc::new(ServerState::new(config.clone())?);

    let cors_origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    info!("   CORS origins: {:?}", config.cors_origins);
    let cors = CorsLayer::new()
        .allow_origin(cors_origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("Listening on http://{}", addr);
    info!("Health endpoint: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
