use crate::store::Catalog;
use std::sync::Arc;
use tokio::sync::watch;

pub type SharedCatalog = Arc<Catalog>;

/// Côté récepteur du signal d'arrêt, cloné dans chaque tâche de fond
pub type Shutdown = watch::Receiver<bool>;

pub fn new_catalog(catalog: Catalog) -> SharedCatalog {
    Arc::new(catalog)
}

pub fn shutdown_channel() -> (watch::Sender<bool>, Shutdown) {
    watch::channel(false)
}

/// Rend la main quand l'arrêt est demandé, ou quand l'émetteur a disparu
pub async fn shutdown_requested(rx: &mut Shutdown) {
    let _ = rx.wait_for(|stop| *stop).await;
}
