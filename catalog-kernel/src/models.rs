/**
 * MODELS CATALOG - Enregistrements devices / services / users
 *
 * RÔLE : Types forts pour tout ce qui entre dans le Catalog, plus le parsing
 * des payloads JSON reçus par HTTP ou MQTT.
 *
 * FONCTIONNEMENT :
 * - Un payload est parsé puis validé AVANT toute mutation du store
 * - EndPoint = union taguée (webService / mqttTopic), jamais d'objet à champs optionnels
 * - Les deux chemins d'ingestion passent par les mêmes fonctions parse_*
 */

use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Rôle d'un endpoint web : on lit des données ou on envoie des commandes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebRole {
    Producer,
    Consumer,
}

/// Rôle d'un client MQTT sur un topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusRole {
    Publisher,
    Subscriber,
}

/// Surface d'interaction exposée par un device ou un service.
/// Le champ `type` du JSON choisit la variante ; le rôle correspondant est obligatoire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EndPoint {
    #[serde(rename = "webService")]
    WebService {
        service: String,
        #[serde(rename = "webType")]
        role: WebRole,
    },
    #[serde(rename = "mqttTopic")]
    MessageTopic {
        service: String,
        #[serde(rename = "mqttClientType")]
        role: BusRole,
    },
}

impl EndPoint {
    pub fn service(&self) -> &str {
        match self {
            EndPoint::WebService { service, .. } | EndPoint::MessageTopic { service, .. } => service,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    /// Tags des grandeurs mesurées/contrôlées. Par convention `resources[i]`
    /// correspond à `end_points[i]`, le Catalog ne le vérifie pas.
    pub resources: Vec<String>,
    #[serde(rename = "endPoints")]
    pub end_points: Vec<EndPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "serviceID")]
    pub service_id: String,
    pub description: String,
    #[serde(rename = "endPoints")]
    pub end_points: Vec<EndPoint>,
}

/// Les users n'expirent jamais : pas de timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub name: String,
    pub surname: String,
    pub email: String,
}

/// Enregistrement + date du dernier refresh, tel que stocké et exposé par l'API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registered<T> {
    #[serde(flatten)]
    pub record: T,
    #[serde(rename = "lastSeen", with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

/// Adresse du broker MQTT annoncée aux autres composants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub url: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Device,
    Service,
    User,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntityKind::Device => "device",
            EntityKind::Service => "service",
            EntityKind::User => "user",
        })
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), CatalogError> {
    if value.trim().is_empty() {
        return Err(CatalogError::MalformedRecord(format!("{field} must not be empty")));
    }
    Ok(())
}

fn validate_end_points(end_points: &[EndPoint]) -> Result<(), CatalogError> {
    for (i, ep) in end_points.iter().enumerate() {
        require_non_empty(&format!("endPoints[{i}].service"), ep.service())?;
    }
    Ok(())
}

impl Device {
    /// Contrôles sémantiques au-delà de la forme JSON
    pub fn validate(&self) -> Result<(), CatalogError> {
        require_non_empty("deviceID", &self.device_id)?;
        validate_end_points(&self.end_points)
    }
}

impl Service {
    pub fn validate(&self) -> Result<(), CatalogError> {
        require_non_empty("serviceID", &self.service_id)?;
        validate_end_points(&self.end_points)
    }
}

impl User {
    pub fn validate(&self) -> Result<(), CatalogError> {
        require_non_empty("userID", &self.user_id)
    }
}

/// JSON brut -> record typé et validé. Rien de non validé ne dépasse cette frontière.
fn parse_record<T>(payload: &[u8]) -> Result<T, CatalogError>
where
    T: for<'de> Deserialize<'de>,
{
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| CatalogError::MalformedRecord(format!("invalid JSON: {e}")))?;
    serde_path_to_error::deserialize(value).map_err(|e| {
        // "." = racine : l'erreur serde nomme déjà le champ manquant
        let path = e.path().to_string();
        if path == "." {
            CatalogError::MalformedRecord(e.inner().to_string())
        } else {
            CatalogError::MalformedRecord(format!("{path}: {}", e.inner()))
        }
    })
}

pub fn parse_device(payload: &[u8]) -> Result<Device, CatalogError> {
    let device: Device = parse_record(payload)?;
    device.validate()?;
    Ok(device)
}

pub fn parse_service(payload: &[u8]) -> Result<Service, CatalogError> {
    let service: Service = parse_record(payload)?;
    service.validate()?;
    Ok(service)
}

pub fn parse_user(payload: &[u8]) -> Result<User, CatalogError> {
    let user: User = parse_record(payload)?;
    user.validate()?;
    Ok(user)
}
