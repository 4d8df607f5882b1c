//! Game state facade
//!
//! The military code never talks to the simulation directly. It reads a
//! snapshot through [`GameState`], reacts to an [`EventBatch`], and answers with
//! commands (see [`crate::command`]).

pub mod entity;
pub mod events;
pub mod queries;

pub use entity::{
    Attack, AttackKind, Capturable, DamageSet, EntityClass, EntityInfo, GarrisonHolder, OrderData,
    UnitAi, UnitAiState,
};
pub use events::{AttackedEvent, DestroyEvent, EventBatch, GarrisonEvent, OwnershipEvent, RenameEvent};
pub use queries::{allow_capture, is_siege_unit, land_access};

use crate::core::types::{AccessIndex, EntityId, GameTime, PlanId, PlayerId, Position};

/// Read-only view of the world for the AI player
pub trait GameState {
    /// The AI's own player slot
    fn player(&self) -> PlayerId;

    /// Number of player slots, gaia included
    fn num_players(&self) -> usize;

    fn elapsed_time(&self) -> GameTime;

    /// Number of AI turns played so far
    fn played_turn(&self) -> u64;

    fn entity(&self, id: EntityId) -> Option<&EntityInfo>;

    /// All entities, in a stable order
    fn entities(&self) -> Box<dyn Iterator<Item = &EntityInfo> + '_>;

    /// Diplomacy from `player`'s point of view: does it consider `other` an ally
    fn is_ally_of(&self, player: PlayerId, other: PlayerId) -> bool;

    fn is_enemy_of(&self, player: PlayerId, other: PlayerId) -> bool;

    fn territory_owner(&self, pos: Position) -> PlayerId;

    /// Territory tile is disconnected from its owner's roots
    fn is_blinking(&self, pos: Position) -> bool;

    /// Land region at a point
    fn land_access_at(&self, pos: Position) -> AccessIndex;

    /// Sea region connecting two land regions, if any
    fn sea_between(&self, start: AccessIndex, end: AccessIndex) -> Option<AccessIndex>;

    /// Shore points of `land` that border `sea`
    fn landing_zones(&self, land: AccessIndex, sea: AccessIndex) -> Vec<Position>;

    /// Our structure can still be held (base manager's view)
    fn is_defendable(&self, structure: EntityId) -> bool;

    /// Our structure belongs to a base connected to an anchored base
    fn in_anchored_base(&self, structure: EntityId) -> bool;

    /// Entities the victory manager protects (heroes in regicide and the like)
    fn is_critical(&self, entity: EntityId) -> bool;

    fn attack_plan_started(&self, plan: PlanId) -> bool;

    fn has_active_base(&self) -> bool;

    /// Our units currently trying to capture `target`
    fn capturing_units(&self, target: EntityId) -> Vec<EntityId>;

    // Derived diplomacy, from the AI player's point of view

    fn is_enemy(&self, player: PlayerId) -> bool {
        self.is_enemy_of(self.player(), player)
    }

    fn is_ally(&self, player: PlayerId) -> bool {
        self.is_ally_of(self.player(), player)
    }

    /// Both sides consider each other allies
    fn is_mutual_ally(&self, player: PlayerId) -> bool {
        self.is_ally_of(self.player(), player) && self.is_ally_of(player, self.player())
    }

    /// Allied, but not ourselves
    fn is_exclusive_ally(&self, player: PlayerId) -> bool {
        player != self.player() && self.is_ally(player)
    }
}
