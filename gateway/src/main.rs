use std::sync::Arc;

use gateway::{auth, clock, config, links, router, AppState};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    info!(
        port = config.port,
        work_root = %config.work_root.display(),
        "gateway starting"
    );
    if config.authorized_users.is_empty() {
        warn!("AUTHORIZED_USERS is empty; nobody can log in");
    }
    if config.login_password_hash.is_none() {
        info!("no LOGIN_PASSWORD_HASH configured, password login disabled");
    }

    let sweep_interval = config.sweep_interval;
    let port = config.port;
    let state = Arc::new(AppState::new(config, clock::system())?);

    // Letter records written by earlier link-generation runs.
    match links::import::import_all(
        &state.letters,
        &state.config.work_root,
        state.letter_defaults(),
        state.clock.now(),
    )
    .await
    {
        Ok(adopted) => info!(adopted, "letter links loaded"),
        Err(e) => warn!("could not load letter links: {e}"),
    }

    tokio::spawn(auth::run_expiry_sweep(
        Arc::clone(&state.auth),
        sweep_interval,
    ));

    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
