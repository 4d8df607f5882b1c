//! Per-turn event feed

use serde::{Deserialize, Serialize};

use crate::core::types::{EntityId, PlayerId};
use crate::state::entity::EntityInfo;

/// Entity replaced by another one (promotion, packing)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenameEvent {
    pub entity: EntityId,
    pub new_entity: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GarrisonEvent {
    pub entity: EntityId,
    pub holder: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OwnershipEvent {
    pub entity: EntityId,
    pub from: PlayerId,
    pub to: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestroyEvent {
    pub entity: EntityId,
    /// Last known state of the entity, when the engine still had it
    pub snapshot: Option<EntityInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttackedEvent {
    pub target: EntityId,
    pub attacker: Option<EntityId>,
}

/// Everything that happened since the previous AI turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub renamed: Vec<RenameEvent>,
    pub garrison: Vec<GarrisonEvent>,
    pub ownership_changed: Vec<OwnershipEvent>,
    pub destroy: Vec<DestroyEvent>,
    pub attacked: Vec<AttackedEvent>,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.renamed.is_empty()
            && self.garrison.is_empty()
            && self.ownership_changed.is_empty()
            && self.destroy.is_empty()
            && self.attacked.is_empty()
    }

    /// Append another batch, keeping event order
    pub fn extend(&mut self, other: EventBatch) {
        self.renamed.extend(other.renamed);
        self.garrison.extend(other.garrison);
        self.ownership_changed.extend(other.ownership_changed);
        self.destroy.extend(other.destroy);
        self.attacked.extend(other.attacked);
    }
}
