use crate::models::EntityKind;
use crate::store::Catalog;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct CatalogHealth {
    pub uptime_seconds: u64,
    pub devices: usize,
    pub services: usize,
    pub users: usize,
    pub bus_status: String,
    pub bus_reconnects: u32,
    pub snapshot_writes: u64,
    pub snapshot_failures: u64,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    bus_reconnects: Arc<AtomicU32>,
    bus_status: Arc<parking_lot::Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            bus_reconnects: Arc::new(AtomicU32::new(0)),
            bus_status: Arc::new(parking_lot::Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_bus_connected(&self) {
        *self.bus_status.lock() = "connected".to_string();
    }

    pub fn mark_bus_stopped(&self) {
        *self.bus_status.lock() = "stopped".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.bus_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.bus_status.lock() = "reconnecting".to_string();
    }

    pub fn bus_status(&self) -> String {
        self.bus_status.lock().clone()
    }

    pub fn get_health(&self, catalog: &Catalog) -> CatalogHealth {
        let snapshot = catalog.snapshot_stats();
        CatalogHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            devices: catalog.count(EntityKind::Device),
            services: catalog.count(EntityKind::Service),
            users: catalog.count(EntityKind::User),
            bus_status: self.bus_status(),
            bus_reconnects: self.bus_reconnects.load(Ordering::Relaxed),
            snapshot_writes: snapshot.writes,
            snapshot_failures: snapshot.failures,
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
