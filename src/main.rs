use anyhow::Context;
use dotenvy::dotenv;
use tracing_subscriber::{fmt, EnvFilter};

use telemost_bridge::{build_router, build_state, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Config::from_env().context("Invalid configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_log_filter()));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let _guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(config.environment.clone().into()),
                ..Default::default()
            },
        ))
    });

    let state = build_state(&config).context("Failed to initialize application state")?;
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Starting server on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
