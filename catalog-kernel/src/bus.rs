/**
 * BUS LISTENER - Enregistrement des devices via MQTT
 *
 * RÔLE : Second chemin d'ingestion, asynchrone, pour les devices qui publient
 * leur description au lieu d'appeler PUT /addDevice.
 *
 * FONCTIONNEMENT :
 * - Abonnement (re)fait à chaque ConnAck : survit aux reconnexions
 * - Payload = même JSON que /addDevice, même parse + même upsert + snapshot
 * - Payload invalide : loggé puis jeté (pas de canal de réponse)
 * - Livraison at-least-once : un doublon n'est qu'un upsert de plus
 */

use crate::config::{BrokerConf, BusConf};
use crate::error::CatalogError;
use crate::health::HealthTracker;
use crate::models::parse_device;
use crate::state::{shutdown_requested, SharedCatalog, Shutdown};
use crate::store::Catalog;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Traite un message reçu sur le topic d'enregistrement. Retourne l'ID du device.
pub fn ingest_registration(catalog: &Catalog, payload: &[u8]) -> Result<String, CatalogError> {
    let device = parse_device(payload)?;
    let id = device.device_id.clone();
    catalog.register_device(device)?;
    Ok(id)
}

pub fn client_id(conf: &BusConf) -> String {
    match &conf.client_id {
        Some(id) if !id.trim().is_empty() => id.clone(),
        _ => format!("catalog-{}", &Uuid::new_v4().simple().to_string()[..12]),
    }
}

fn mqtt_options(broker: &BrokerConf, bus: &BusConf) -> MqttOptions {
    let mut opts = MqttOptions::new(client_id(bus), &broker.host, broker.port);
    opts.set_keep_alive(Duration::from_secs(bus.keep_alive_secs.max(5)));
    opts.set_clean_session(true);
    opts
}

pub fn spawn_registration_listener(
    catalog: SharedCatalog,
    broker: BrokerConf,
    bus: BusConf,
    health: HealthTracker,
    mut shutdown: Shutdown,
) -> JoinHandle<()> {
    task::spawn(async move {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(&broker, &bus), 10);
        let topic = bus.registration_topic.clone();
        let retry = Duration::from_secs(bus.reconnect_delay_secs);
        info!(host = %broker.host, port = broker.port, %topic, "starting MQTT registration listener");

        loop {
            let event = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_bus_connected();
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        warn!(error = ?e, %topic, "subscribe failed");
                    } else {
                        info!(%topic, "connected to broker, subscribed");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == topic => {
                    match ingest_registration(&catalog, &p.payload) {
                        Ok(id) => debug!(device_id = %id, "device registered over MQTT"),
                        Err(e) => warn!(error = %e, "discarding invalid registration message"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let err = CatalogError::BrokerUnavailable(e.to_string());
                    warn!(error = %err, retry_in_secs = retry.as_secs(), "MQTT connection error");
                    health.increment_reconnects();
                    tokio::select! {
                        _ = shutdown_requested(&mut shutdown) => break,
                        _ = tokio::time::sleep(retry) => {}
                    }
                }
            }
        }

        disconnect(&client, &mut eventloop, &topic).await;
        health.mark_bus_stopped();
        info!("MQTT registration listener stopped");
    })
}

/// Désabonnement + déconnexion propre, sans bloquer l'arrêt si le broker ne répond plus
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop, topic: &str) {
    let _ = client.try_unsubscribe(topic);
    if client.try_disconnect().is_err() {
        return;
    }
    let drain = async {
        while let Ok(event) = eventloop.poll().await {
            if matches!(event, Event::Outgoing(rumqttc::Outgoing::Disconnect)) {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(1), drain).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;
    use crate::state::{new_catalog, shutdown_channel};
    use crate::store::tests::test_catalog;

    const PIR: &[u8] = br#"{"deviceID": "pir", "resources": ["motion"],
        "endPoints": [{"service": "/motion", "type": "webService", "webType": "producer"}]}"#;

    #[test]
    fn test_valid_message_registers_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);

        assert_eq!(ingest_registration(&catalog, PIR).unwrap(), "pir");
        assert_eq!(catalog.get_device("pir").unwrap().record.resources, vec!["motion"]);
        assert_eq!(catalog.snapshot_stats().writes, 1);
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);
        ingest_registration(&catalog, PIR).unwrap();
        ingest_registration(&catalog, PIR).unwrap();
        assert_eq!(catalog.count(EntityKind::Device), 1);
    }

    #[test]
    fn test_invalid_messages_leave_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = test_catalog(&dir);

        for payload in [
            &b"not json"[..],
            br#"{"deviceID": "x", "resources": []}"#,
            br#"{"deviceID": "x", "resources": [], "endPoints": [{"service": "/t", "type": "mqttTopic"}]}"#,
        ] {
            assert!(matches!(
                ingest_registration(&catalog, payload),
                Err(CatalogError::MalformedRecord(_))
            ));
        }
        assert_eq!(catalog.count(EntityKind::Device), 0);
        assert_eq!(catalog.snapshot_stats().writes, 0);
    }

    #[test]
    fn test_client_id_configured_or_generated() {
        let mut conf = BusConf::default();
        let a = client_id(&conf);
        let b = client_id(&conf);
        assert!(a.starts_with("catalog-"));
        assert_ne!(a, b);

        conf.client_id = Some("tiot19CatalogSubscriber".into());
        assert_eq!(client_id(&conf), "tiot19CatalogSubscriber");
    }

    #[tokio::test]
    async fn test_listener_stops_on_shutdown_without_broker() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = new_catalog(test_catalog(&dir));
        let (tx, rx) = shutdown_channel();
        let broker = BrokerConf { host: "127.0.0.1".into(), port: 1 };
        let health = HealthTracker::new();

        let handle = spawn_registration_listener(catalog, broker, BusConf::default(), health.clone(), rx);
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(3), handle).await.unwrap().unwrap();
        assert_eq!(health.bus_status(), "stopped");
    }
}
