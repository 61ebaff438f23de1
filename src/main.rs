use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gate_bypass::api::{self, AppState};
use gate_bypass::chromium::ChromeLauncher;
use gate_bypass::config::Config;
use gate_bypass::engine::Resolver;
use gate_bypass::notifications::Notifier;
use gate_bypass::visitors::GeoLocator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let launcher = ChromeLauncher::new(
        config.chrome_path.clone(),
        config.headless,
        config.resolver.idle_budget(),
    );
    let resolver = Resolver::new(Arc::new(launcher), config.resolver.clone());
    let notifier = Notifier::new(config.telegram.clone());
    if !notifier.is_enabled() {
        info!("📭 Telegram credentials not set, visit notifications disabled");
    }

    let state = Arc::new(AppState::new(
        resolver,
        config.max_sessions,
        GeoLocator::new(config.geo_lookup),
        notifier,
    ));
    let app = api::router(state, &config.static_dir);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(
        max_sessions = config.max_sessions,
        "🚀 Listening on {}",
        listener.local_addr()?
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
