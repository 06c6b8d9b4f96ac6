use crate::models::EntityKind;

/// Erreurs d'écriture/lecture du snapshot JSON. Jamais fatales : le store reste la référence.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("snapshot IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Taxonomie des erreurs du Catalog
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("{0}")]
    MalformedRecord(String),
    #[error("No such {kind}: {id}")]
    NotFound { kind: EntityKind, id: String },
    #[error("{0}")]
    BadParameters(String),
    #[error("MQTT broker unavailable: {0}")]
    BrokerUnavailable(String),
}

impl CatalogError {
    pub fn not_found(kind: EntityKind, id: &str) -> Self {
        CatalogError::NotFound { kind, id: id.to_string() }
    }
}
