/**
 * RECORD STORE - Registre central devices / services / users
 *
 * RÔLE :
 * Une seule instance partagée par les handlers HTTP, le listener MQTT et la
 * tâche d'éviction. Toute mutation passe par le RwLock interne.
 *
 * FONCTIONNEMENT :
 * - Upsert = insert-or-replace par ID, lastSeen remis à "now" (lu sous le lock)
 * - remove_if_stale = test + suppression dans la même section critique
 * - register_* = upsert puis snapshot (best effort, l'échec est loggé)
 * - Lectures concurrentes autorisées, bloquées seulement pendant une mutation
 */

use crate::error::{CatalogError, PersistenceError};
use crate::models::{BrokerConfig, Device, EntityKind, Registered, Service, User};
use crate::snapshot::{SnapshotPersister, SnapshotStats};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

/// Contenu complet du Catalog, tel qu'il est écrit dans le snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    #[serde(rename = "MQTTGlobalMessageBrokerURL")]
    pub broker_url: String,
    #[serde(rename = "MQTTGlobalMessageBrokerPort")]
    pub broker_port: u16,
    #[serde(default)]
    pub devices: IndexMap<String, Registered<Device>>,
    #[serde(default)]
    pub services: IndexMap<String, Registered<Service>>,
    #[serde(default)]
    pub users: IndexMap<String, User>,
}

impl Database {
    pub fn new(broker: BrokerConfig) -> Self {
        Self {
            broker_url: broker.url,
            broker_port: broker.port,
            devices: IndexMap::new(),
            services: IndexMap::new(),
            users: IndexMap::new(),
        }
    }
}

fn is_stale(last_seen: OffsetDateTime, now: OffsetDateTime, timeout: Duration) -> bool {
    now - last_seen > timeout
}

pub struct Catalog {
    db: RwLock<Database>,
    persister: SnapshotPersister,
}

impl Catalog {
    pub fn new(broker: BrokerConfig, persister: SnapshotPersister) -> Self {
        Self {
            db: RwLock::new(Database::new(broker)),
            persister,
        }
    }

    /// Recharge devices/services/users depuis le snapshot s'il existe.
    /// Le broker vient toujours de la config, jamais du fichier.
    pub fn restore(broker: BrokerConfig, persister: SnapshotPersister) -> Result<Self, PersistenceError> {
        let Some(saved) = persister.load()? else {
            return Ok(Self::new(broker, persister));
        };
        info!(
            devices = saved.devices.len(),
            services = saved.services.len(),
            users = saved.users.len(),
            "restored catalog snapshot"
        );
        let catalog = Self { db: RwLock::new(saved), persister };
        catalog.set_broker(&broker.url, broker.port);
        Ok(catalog)
    }

    // ---- écritures ----

    pub fn upsert_device(&self, device: Device) -> Result<(), CatalogError> {
        device.validate()?;
        let id = device.device_id.clone();
        let mut db = self.db.write();
        db.devices.insert(id, Registered { record: device, last_seen: OffsetDateTime::now_utc() });
        Ok(())
    }

    pub fn upsert_service(&self, service: Service) -> Result<(), CatalogError> {
        service.validate()?;
        let id = service.service_id.clone();
        let mut db = self.db.write();
        db.services.insert(id, Registered { record: service, last_seen: OffsetDateTime::now_utc() });
        Ok(())
    }

    pub fn upsert_user(&self, user: User) -> Result<(), CatalogError> {
        user.validate()?;
        let id = user.user_id.clone();
        self.db.write().users.insert(id, user);
        Ok(())
    }

    pub fn remove_user(&self, id: &str) -> Result<User, CatalogError> {
        self.db
            .write()
            .users
            .shift_remove(id)
            .ok_or_else(|| CatalogError::not_found(EntityKind::User, id))
    }

    /// Supprime l'entrée seulement si `now - lastSeen > timeout`, sous le même lock d'écriture
    /// qu'un upsert : un refresh arrivé avant le test gagne toujours.
    pub fn remove_if_stale(&self, kind: EntityKind, id: &str, now: OffsetDateTime, timeout: Duration) -> bool {
        let mut db = self.db.write();
        let stale = match kind {
            EntityKind::Device => db.devices.get(id).is_some_and(|e| is_stale(e.last_seen, now, timeout)),
            EntityKind::Service => db.services.get(id).is_some_and(|e| is_stale(e.last_seen, now, timeout)),
            // les users n'expirent jamais
            EntityKind::User => false,
        };
        if !stale {
            return false;
        }
        match kind {
            EntityKind::Device => db.devices.shift_remove(id).is_some(),
            EntityKind::Service => db.services.shift_remove(id).is_some(),
            EntityKind::User => false,
        }
    }

    pub fn set_broker(&self, url: &str, port: u16) {
        let mut db = self.db.write();
        db.broker_url = url.to_string();
        db.broker_port = port;
    }

    // ---- upsert + snapshot (chemins d'ingestion) ----

    pub fn register_device(&self, device: Device) -> Result<(), CatalogError> {
        let id = device.device_id.clone();
        self.upsert_device(device)?;
        debug!(device_id = %id, "device registered");
        self.persist_best_effort();
        Ok(())
    }

    pub fn register_service(&self, service: Service) -> Result<(), CatalogError> {
        let id = service.service_id.clone();
        self.upsert_service(service)?;
        debug!(service_id = %id, "service registered");
        self.persist_best_effort();
        Ok(())
    }

    pub fn register_user(&self, user: User) -> Result<(), CatalogError> {
        let id = user.user_id.clone();
        self.upsert_user(user)?;
        debug!(user_id = %id, "user registered");
        self.persist_best_effort();
        Ok(())
    }

    pub fn unregister_user(&self, id: &str) -> Result<(), CatalogError> {
        self.remove_user(id)?;
        info!(user_id = %id, "user removed");
        self.persist_best_effort();
        Ok(())
    }

    pub fn persist(&self) -> Result<(), PersistenceError> {
        self.persister.write(&self.db)
    }

    /// Un snapshot raté ne remonte jamais à l'appelant : le store reste la référence
    pub fn persist_best_effort(&self) {
        if let Err(e) = self.persist() {
            warn!(path = %self.persister.path().display(), error = %e, "failed to write catalog snapshot");
        }
    }

    // ---- lectures ----

    pub fn get_device(&self, id: &str) -> Result<Registered<Device>, CatalogError> {
        self.db.read().devices.get(id).cloned().ok_or_else(|| CatalogError::not_found(EntityKind::Device, id))
    }

    pub fn get_service(&self, id: &str) -> Result<Registered<Service>, CatalogError> {
        self.db.read().services.get(id).cloned().ok_or_else(|| CatalogError::not_found(EntityKind::Service, id))
    }

    pub fn get_user(&self, id: &str) -> Result<User, CatalogError> {
        self.db.read().users.get(id).cloned().ok_or_else(|| CatalogError::not_found(EntityKind::User, id))
    }

    /// Ordre d'insertion : même contenu => même tableau JSON
    pub fn list_devices(&self) -> Vec<Registered<Device>> {
        self.db.read().devices.values().cloned().collect()
    }

    pub fn list_services(&self) -> Vec<Registered<Service>> {
        self.db.read().services.values().cloned().collect()
    }

    pub fn list_users(&self) -> Vec<User> {
        self.db.read().users.values().cloned().collect()
    }

    /// IDs courants d'une collection évictable, copiés pour ne pas tenir le lock pendant le scan
    pub fn ids(&self, kind: EntityKind) -> Vec<String> {
        let db = self.db.read();
        match kind {
            EntityKind::Device => db.devices.keys().cloned().collect(),
            EntityKind::Service => db.services.keys().cloned().collect(),
            EntityKind::User => db.users.keys().cloned().collect(),
        }
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        let db = self.db.read();
        match kind {
            EntityKind::Device => db.devices.len(),
            EntityKind::Service => db.services.len(),
            EntityKind::User => db.users.len(),
        }
    }

    pub fn get_broker(&self) -> BrokerConfig {
        let db = self.db.read();
        BrokerConfig { url: db.broker_url.clone(), port: db.broker_port }
    }

    pub fn snapshot_stats(&self) -> SnapshotStats {
        self.persister.stats()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{BusRole, EndPoint, WebRole};
    use std::sync::{Arc, Barrier};

    pub(crate) fn test_catalog(dir: &tempfile::TempDir) -> Catalog {
        Catalog::new(
            BrokerConfig { url: "test.mosquitto.org".into(), port: 1883 },
            SnapshotPersister::new(dir.path().join("catalog.json")),
        )
    }

    pub(crate) fn pir() -> Device {
        Device {
            device_id: "pir".into(),
            resources: vec!["motion".into()],
            end_points: vec![EndPoint::WebService { service: "/motion".into(), role: WebRole::Producer }],
        }
    }

    fn converter() -> Service {
        Service {
            service_id: "converter".into(),
            description: "temperature conversion".into(),
            end_points: vec![EndPoint::MessageTopic { service: "/conv/out".into(), role: BusRole::Publisher }],
        }
    }

    #[test]
    fn test_upsert_then_get_returns_same_record() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        catalog.upsert_device(pir()).unwrap();
        catalog.upsert_service(converter()).unwrap();

        assert_eq!(catalog.get_device("pir").unwrap().record, pir());
        assert_eq!(catalog.get_service("converter").unwrap().record, converter());
    }

    #[test]
    fn test_upsert_same_id_twice_keeps_one_record_and_refreshes() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        catalog.upsert_device(pir()).unwrap();
        let first = catalog.get_device("pir").unwrap().last_seen;

        let mut updated = pir();
        updated.resources = vec!["motion".into(), "battery".into()];
        catalog.upsert_device(updated.clone()).unwrap();

        assert_eq!(catalog.count(EntityKind::Device), 1);
        let entry = catalog.get_device("pir").unwrap();
        assert_eq!(entry.record, updated);
        assert!(entry.last_seen >= first);
    }

    #[test]
    fn test_invalid_record_never_reaches_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        let mut bad = pir();
        bad.end_points.push(EndPoint::MessageTopic { service: "".into(), role: BusRole::Subscriber });

        assert!(matches!(catalog.register_device(bad), Err(CatalogError::MalformedRecord(_))));
        assert_eq!(catalog.count(EntityKind::Device), 0);
        assert_eq!(catalog.snapshot_stats().writes, 0);
    }

    #[test]
    fn test_unknown_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        assert!(matches!(
            catalog.get_device("nope"),
            Err(CatalogError::NotFound { kind: EntityKind::Device, .. })
        ));
        assert!(matches!(catalog.get_service("nope"), Err(CatalogError::NotFound { .. })));
        assert!(matches!(catalog.get_user("nope"), Err(CatalogError::NotFound { .. })));
        assert!(matches!(catalog.unregister_user("nope"), Err(CatalogError::NotFound { .. })));
    }

    #[test]
    fn test_list_follows_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        for id in ["c", "a", "b"] {
            let mut d = pir();
            d.device_id = id.into();
            catalog.upsert_device(d).unwrap();
        }
        // un refresh ne déplace pas l'entrée
        let mut again = pir();
        again.device_id = "c".into();
        catalog.upsert_device(again).unwrap();

        let ids: Vec<_> = catalog.list_devices().into_iter().map(|e| e.record.device_id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_remove_if_stale_respects_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        catalog.upsert_device(pir()).unwrap();
        let seen = catalog.get_device("pir").unwrap().last_seen;
        let timeout = Duration::seconds(120);

        assert!(!catalog.remove_if_stale(EntityKind::Device, "pir", seen + Duration::seconds(119), timeout));
        // égalité : pas encore périmé
        assert!(!catalog.remove_if_stale(EntityKind::Device, "pir", seen + timeout, timeout));
        assert!(catalog.remove_if_stale(EntityKind::Device, "pir", seen + Duration::seconds(121), timeout));
        assert!(catalog.get_device("pir").is_err());
        assert!(!catalog.remove_if_stale(EntityKind::Device, "pir", seen + Duration::hours(1), timeout));
    }

    #[test]
    fn test_users_are_never_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        catalog
            .upsert_user(User { user_id: "u1".into(), name: "A".into(), surname: "B".into(), email: "e".into() })
            .unwrap();
        let far_future = OffsetDateTime::now_utc() + Duration::days(365);
        assert!(!catalog.remove_if_stale(EntityKind::User, "u1", far_future, Duration::ZERO));
        assert!(catalog.get_user("u1").is_ok());
    }

    #[test]
    fn test_refresh_racing_eviction_check_is_never_lost() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(test_catalog(&dir));
        catalog.upsert_device(pir()).unwrap();
        // timeout nul : l'entrée est périmée dès que l'horloge avance
        let timeout = Duration::ZERO;
        let start = Arc::new(Barrier::new(2));

        let refresher = {
            let (catalog, start) = (catalog.clone(), start.clone());
            std::thread::spawn(move || {
                start.wait();
                let mut last_before = OffsetDateTime::now_utc();
                for _ in 0..2_000 {
                    last_before = OffsetDateTime::now_utc();
                    catalog.upsert_device(pir()).unwrap();
                }
                last_before
            })
        };
        let evictor = {
            let (catalog, start) = (catalog.clone(), start.clone());
            std::thread::spawn(move || {
                start.wait();
                let mut last_removal = None;
                for _ in 0..2_000 {
                    let now = OffsetDateTime::now_utc();
                    if catalog.remove_if_stale(EntityKind::Device, "pir", now, timeout) {
                        last_removal = Some(now);
                    }
                }
                last_removal
            })
        };

        let last_refresh = refresher.join().unwrap();
        let last_removal = evictor.join().unwrap();

        match (catalog.get_device("pir"), last_removal) {
            // présent : le dernier refresh est passé après la dernière suppression
            (Ok(entry), Some(removed_at)) => assert!(entry.last_seen >= removed_at),
            (Ok(_), None) => {}
            // absent : aucun refresh n'a suivi la suppression
            (Err(_), Some(removed_at)) => assert!(last_refresh < removed_at),
            (Err(e), None) => panic!("device vanished without any removal: {e}"),
        }
    }

    #[test]
    fn test_register_persists_and_tolerates_snapshot_failure() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        catalog.register_device(pir()).unwrap();
        assert_eq!(catalog.snapshot_stats().writes, 1);

        let broken = Catalog::new(
            BrokerConfig { url: "localhost".into(), port: 1883 },
            SnapshotPersister::new(dir.path().join("missing/catalog.json")),
        );
        broken.register_device(pir()).unwrap();
        assert!(broken.get_device("pir").is_ok());
        assert_eq!(broken.snapshot_stats().failures, 1);
    }

    #[test]
    fn test_restore_reloads_records_but_not_broker() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        catalog.register_device(pir()).unwrap();
        catalog.register_service(converter()).unwrap();
        catalog
            .register_user(User { user_id: "u1".into(), name: "A".into(), surname: "B".into(), email: "e".into() })
            .unwrap();
        let before = catalog.get_device("pir").unwrap();

        let restored = Catalog::restore(
            BrokerConfig { url: "broker.lan".into(), port: 8883 },
            SnapshotPersister::new(dir.path().join("catalog.json")),
        )
        .unwrap();

        assert_eq!(restored.get_device("pir").unwrap(), before);
        assert_eq!(restored.get_service("converter").unwrap().record, converter());
        assert_eq!(restored.list_users().len(), 1);
        assert_eq!(restored.get_broker(), BrokerConfig { url: "broker.lan".into(), port: 8883 });
    }
}
