use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use email_operator::config::OperatorConfig;
use email_operator::controller::{
    Controller, EmailReconciler, HttpDispatcher, SenderConfigObserver, StoreResolver,
    build_http_client,
};
use email_operator::store::{LibSqlStore, ResourceStore, load_manifests};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = OperatorConfig::from_env().context("invalid configuration")?;

    eprintln!("📬 Email Operator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.store.db_path.display());
    eprintln!("   Provider: {}", config.provider.url);
    eprintln!(
        "   Concurrency: {}",
        config.controller.max_concurrent_reconciles
    );

    // ── Store ────────────────────────────────────────────────────────────
    let store = LibSqlStore::new_local(&config.store.db_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.store.db_path.display()))?
        .with_poll_interval(config.store.watch_poll_interval);
    let store: Arc<dyn ResourceStore> = Arc::new(store);

    if let Some(dir) = &config.store.manifest_dir {
        let applied = load_manifests(dir, store.as_ref())
            .await
            .context("failed to load manifests")?;
        eprintln!("   Manifests: {} resources from {}", applied, dir.display());
    }

    // ── Controllers ──────────────────────────────────────────────────────
    let client = build_http_client(&config.provider).context("failed to build HTTP client")?;
    let dispatcher = Arc::new(HttpDispatcher::new(client, &config.provider));
    let resolver = Arc::new(StoreResolver::new(Arc::clone(&store)));

    let email_controller = Controller::new(
        Arc::clone(&store),
        Arc::new(EmailReconciler::new(Arc::clone(&store), resolver, dispatcher)),
        config.controller.clone(),
    );
    let sender_config_controller = Controller::new(
        Arc::clone(&store),
        Arc::new(SenderConfigObserver::new(Arc::clone(&store))),
        config.controller.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let email_handle = tokio::spawn(email_controller.run(shutdown_rx.clone()));
    let sender_config_handle = tokio::spawn(sender_config_controller.run(shutdown_rx));

    info!("Email operator running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    for (name, handle) in [
        ("Email", email_handle),
        ("EmailSenderConfig", sender_config_handle),
    ] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(controller = name, error = %e, "Controller failed"),
            Err(e) => error!(controller = name, error = %e, "Controller task panicked"),
        }
    }

    Ok(())
}
