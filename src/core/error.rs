use thiserror::Error;

use crate::core::types::{AccessIndex, EntityId};

#[derive(Error, Debug)]
pub enum PetraError {
    #[error("Entity not found: {0:?}")]
    EntityNotFound(EntityId),

    #[error("Entity has no position: {0:?}")]
    NoPosition(EntityId),

    #[error("No sea connects land {start} to land {end}")]
    NoSeaPath { start: AccessIndex, end: AccessIndex },

    #[error("Transport from a ship requires the ship")]
    NoTransportShip,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, PetraError>;
