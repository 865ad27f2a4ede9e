use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vibeterm::auth::{Authenticator, DisabledAuthenticator, LocalAuthenticator, RateLimiter};
use vibeterm::cli::Args;
use vibeterm::container::{ContainerClient, ContainerRuntime, DockerRuntime};
use vibeterm::owners::OwnerStore;
use vibeterm::reconcile::Reconciler;
use vibeterm::session::SessionManager;
use vibeterm::transport::PollingStation;
use vibeterm::web::{AppState, build_router};
use vibeterm::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vibeterm=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    info!("Starting vibeterm broker");

    // Authentication: a credential table enables it; without one the broker
    // must stay on loopback.
    let auth: Arc<dyn Authenticator> = match args.resolve_auth_config() {
        Some(path) => {
            let authenticator = LocalAuthenticator::from_file(&path)
                .with_context(|| format!("loading auth config {}", path.display()))?;
            Arc::new(authenticator)
        }
        None => {
            info!("No auth config found; authentication disabled (loopback-only mode)");
            Arc::new(DisabledAuthenticator)
        }
    };

    if !auth.is_enabled() && !args.bind.ip().is_loopback() {
        anyhow::bail!(
            "authentication is disabled; refusing to bind non-loopback address {}",
            args.bind
        );
    }

    let client = ContainerClient::new()
        .await
        .context("connecting to container runtime")?;
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::new(client));

    let owners = Arc::new(
        OwnerStore::load(env::owners_file_path(&args.data_dir))
            .await
            .context("loading ownership store")?,
    );

    let manager = Arc::new(SessionManager::new(
        args.manager_config(),
        runtime,
        owners,
    ));

    // Reassociate containers that survived the last broker lifetime before
    // serving any request.
    manager.recover().await;

    let polling = Arc::new(PollingStation::new(manager.clone()));
    Reconciler::new(manager.clone(), polling.clone(), auth.clone()).spawn();

    let state = AppState {
        manager,
        polling,
        auth,
        limiter: Arc::new(RateLimiter::default()),
        secure_cookies: !args.insecure_cookies,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!("Listening on {}", args.bind);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
