use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use sonance_engine::config::EngineConfig;
use sonance_engine::groups::{spawn_engine, HttpRemote};
use sonance_web::state::AppState;
use sonance_web::WebConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let engine_config = EngineConfig::from_env()?;
    let web_config = WebConfig::from_env();
    info!(api_url = %engine_config.api_url, "sonance starting");

    // Recorder first so the engine's first refresh is counted.
    let prometheus = sonance_web::install_metrics()?;

    let remote = Arc::new(HttpRemote::new(
        &engine_config.api_url,
        engine_config.request_timeout,
    )?);
    let (engine, engine_task) = spawn_engine(remote, engine_config);

    let state = AppState::new(engine.clone()).with_prometheus(prometheus);
    let app = sonance_web::build_router(state, &web_config.static_dir);
    let listener = TcpListener::bind(&web_config.addr).await?;

    sonance_web::serve(listener, app, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received, shutting down");
    })
    .await?;

    engine.shutdown();
    engine_task.await?;
    Ok(())
}
