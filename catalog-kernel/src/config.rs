use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CatalogConfig {
    pub http: HttpConf,
    pub broker: BrokerConf,
    pub bus: BusConf,
    pub eviction: EvictionConf,
    pub snapshot: SnapshotConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String, // ex: "0.0.0.0:8080"
}

/// Broker utilisé par le listener ET annoncé par getMQTTMessageBroker
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerConf {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BusConf {
    pub client_id: Option<String>, // généré (catalog-<uuid>) si absent
    pub registration_topic: String,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EvictionConf {
    pub timeout_secs: u64,
    pub period_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SnapshotConf {
    pub path: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl Default for BrokerConf {
    fn default() -> Self {
        Self { host: "test.mosquitto.org".into(), port: 1883 }
    }
}

impl Default for BusConf {
    fn default() -> Self {
        Self {
            client_id: None,
            registration_topic: "catalog/addDevice".into(),
            keep_alive_secs: 15,
            reconnect_delay_secs: 2,
        }
    }
}

impl Default for EvictionConf {
    fn default() -> Self {
        Self { timeout_secs: 120, period_secs: 60 }
    }
}

impl Default for SnapshotConf {
    fn default() -> Self {
        Self { path: "catalog.json".into() }
    }
}

impl CatalogConfig {
    /// Corrige les valeurs inutilisables plutôt que de refuser de démarrer
    fn sanitized(mut self) -> Self {
        if self.eviction.period_secs == 0 {
            warn!("eviction.period_secs must be > 0, using default");
            self.eviction.period_secs = EvictionConf::default().period_secs;
        }
        if self.bus.registration_topic.trim().is_empty() {
            warn!("bus.registration_topic is empty, using default");
            self.bus.registration_topic = BusConf::default().registration_topic;
        }
        self
    }
}

pub fn parse_config(txt: &str) -> CatalogConfig {
    if txt.trim().is_empty() {
        return CatalogConfig::default();
    }
    serde_yaml::from_str::<CatalogConfig>(txt)
        .unwrap_or_else(|e| {
            warn!(error = %e, "invalid config, using defaults");
            CatalogConfig::default()
        })
        .sanitized()
}

pub async fn load_config() -> CatalogConfig {
    let path = std::env::var("CATALOG_CONFIG").unwrap_or_else(|_| "catalog.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt)
    } else {
        warn!(%path, "no config file, using defaults");
        CatalogConfig::default()
    }
}
