/**
 * EVICTION SCHEDULER - Nettoyage périodique des devices/services périmés
 *
 * RÔLE : Supprime toute entrée dont le dernier refresh date de plus de `timeout`.
 *
 * FONCTIONNEMENT :
 * - Idle -> Scanning -> Idle toutes les `period` ; Stopped sur signal d'arrêt
 * - L'arrêt n'est pris en compte qu'entre deux passes, jamais au milieu d'un scan
 * - Un seul snapshot par passe, quel que soit le nombre de suppressions
 * - Les users ne sont jamais scannés
 */

use crate::config::EvictionConf;
use crate::models::EntityKind;
use crate::state::{shutdown_requested, SharedCatalog, Shutdown};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct EvictionScheduler {
    catalog: SharedCatalog,
    timeout: time::Duration,
    period: std::time::Duration,
    shutdown: Shutdown,
}

impl EvictionScheduler {
    pub fn new(catalog: SharedCatalog, conf: &EvictionConf, shutdown: Shutdown) -> Self {
        Self {
            catalog,
            // au-delà d'i64 : borné, jamais négatif
            timeout: time::Duration::seconds(i64::try_from(conf.timeout_secs).unwrap_or(i64::MAX)),
            period: std::time::Duration::from_secs(conf.period_secs),
            shutdown,
        }
    }

    /// Une passe complète. Retourne le nombre d'entrées supprimées.
    pub fn scan(&self, now: OffsetDateTime) -> usize {
        let mut removed = 0;

        for kind in [EntityKind::Device, EntityKind::Service] {
            for id in self.catalog.ids(kind) {
                if self.catalog.remove_if_stale(kind, &id, now, self.timeout) {
                    info!(%kind, %id, "evicted stale entry");
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            self.catalog.persist_best_effort();
        }
        removed
    }

    pub async fn run(mut self) {
        info!(
            timeout_secs = self.timeout.whole_seconds(),
            period_secs = self.period.as_secs(),
            "eviction scheduler started"
        );

        while !*self.shutdown.borrow() {
            let removed = self.scan(OffsetDateTime::now_utc());
            if removed > 0 {
                debug!(removed, "eviction pass done");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                _ = shutdown_requested(&mut self.shutdown) => break,
            }
        }

        info!("eviction scheduler stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
