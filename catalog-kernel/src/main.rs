/**
 * CATALOG KERNEL - Point d'entrée du registre IoT
 *
 * RÔLE : Bootstrap du Catalog : config, store + snapshot, éviction, listener
 * MQTT, API REST, arrêt propre.
 *
 * ARCHITECTURE : un seul Catalog partagé (Arc) entre les handlers HTTP, le
 * listener MQTT et la tâche d'éviction ; un signal watch pour l'arrêt.
 */

mod bus;
mod config;
mod error;
mod eviction;
mod health;
mod http;
mod models;
mod snapshot;
mod state;
mod store;

use crate::config::{load_config, CatalogConfig};
use crate::eviction::EvictionScheduler;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::models::BrokerConfig;
use crate::snapshot::SnapshotPersister;
use crate::state::{new_catalog, shutdown_channel};
use crate::store::Catalog;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Snapshot illisible : mis de côté avant le premier persist, puis catalog vide
fn open_catalog(cfg: &CatalogConfig) -> Catalog {
    let broker = BrokerConfig { url: cfg.broker.host.clone(), port: cfg.broker.port };
    match Catalog::restore(broker.clone(), SnapshotPersister::new(&cfg.snapshot.path)) {
        Ok(catalog) => catalog,
        Err(e) => {
            let persister = SnapshotPersister::new(&cfg.snapshot.path);
            match persister.quarantine() {
                Ok(aside) => warn!(
                    path = %cfg.snapshot.path,
                    moved_to = %aside.display(),
                    error = %e,
                    "unreadable snapshot moved aside, starting with an empty catalog"
                ),
                Err(mv) => warn!(
                    path = %cfg.snapshot.path,
                    error = %e,
                    rename_error = %mv,
                    "unreadable snapshot could not be moved aside, starting with an empty catalog"
                ),
            }
            Catalog::new(broker, persister)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;

    let catalog = new_catalog(open_catalog(&cfg));
    // snapshot initial : le fichier reflète l'état de démarrage
    catalog.persist_best_effort();

    let health_tracker = HealthTracker::new();
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let eviction = EvictionScheduler::new(catalog.clone(), &cfg.eviction, shutdown_rx.clone()).spawn();
    let listener_task = bus::spawn_registration_listener(
        catalog.clone(),
        cfg.broker.clone(),
        cfg.bus.clone(),
        health_tracker.clone(),
        shutdown_rx,
    );

    let app = http::build_router(AppState { catalog, health_tracker });

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    info!(addr = %cfg.http.bind, "catalog listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("HTTP server error")?;

    // les tâches de fond finissent leur passe en cours puis sortent
    if let Err(e) = eviction.await {
        error!(error = %e, "eviction task panicked");
    }
    if let Err(e) = listener_task.await {
        error!(error = %e, "MQTT listener task panicked");
    }

    info!("catalog stopped");
    Ok(())
}
