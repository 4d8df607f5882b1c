pub mod config;
pub mod error;
pub mod types;

pub use config::{load_config, PetraConfig};
pub use error::{PetraError, Result};
pub use types::{
    AccessIndex, ArmyId, Centroid, EntityId, GameTime, PlanId, PlayerId, Position, TransportId,
    ABOARD_ACCESS, GAIA, NO_ACCESS,
};
