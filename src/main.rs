use respimg::{config::RespImgConfig, router, AppState};
use std::net::SocketAddr;

/// Responsive image server entry point.
///
/// Initializes tracing, loads and validates configuration, and serves
/// versioned variants generated on demand.
///
/// # Configuration
/// Environment variables:
/// - `RESPIMG_CONFIG`: path to a TOML config file (defaults apply when unset)
/// - `PORT`: HTTP listen port (default: 8080)
/// - `RUST_LOG`: Logging verbosity (default: "respimg=debug,tower_http=debug")
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "respimg=debug,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting respimg server");

    let cfg = match std::env::var("RESPIMG_CONFIG") {
        Ok(path) => {
            tracing::info!("Loading configuration from {}", path);
            RespImgConfig::load(std::path::Path::new(&path))?
        }
        Err(_) => RespImgConfig::default(),
    };
    cfg.validate()?;
    tokio::fs::create_dir_all(&cfg.cache_dir).await?;
    tracing::info!(
        "Sources in {}, cache in {}, versioning {:?}",
        cfg.source_dir.display(),
        cfg.cache_dir.display(),
        cfg.versioning
    );

    let app = router(AppState::new(cfg));

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);

    // Bind to 0.0.0.0 for external access (required for containerized deployment)
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
