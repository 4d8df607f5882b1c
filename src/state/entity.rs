//! Read-only entity snapshot handed out by the game state facade

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::core::types::{AccessIndex, EntityId, PlayerId, Position};

bitflags! {
    /// Identity classes of an entity template
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct EntityClass: u32 {
        const UNIT = 1 << 0;
        const STRUCTURE = 1 << 1;
        const SHIP = 1 << 2;
        const SUPPORT = 1 << 3;
        const HERO = 1 << 4;
        const SIEGE = 1 << 5;
        const STONE_THROWER = 1 << 6;
        const ELEPHANT = 1 << 7;
        const MELEE = 1 << 8;
        const RANGED = 1 << 9;
        const ANIMAL = 1 << 10;
        const TRADER = 1 << 11;
        const FISHING_BOAT = 1 << 12;
        const CIV_CENTRE = 1 << 13;
        const DOCK = 1 << 14;
        const DROPSITE = 1 << 15;
        const INFANTRY = 1 << 16;
        const CAVALRY = 1 << 17;
        /// Remains of a killed animal
        const RESOURCE = 1 << 18;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackKind {
    Melee,
    Ranged,
    Capture,
    Slaughter,
}

/// Damage (or resistance) per damage type
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DamageSet {
    pub hack: f32,
    pub pierce: f32,
    pub crush: f32,
    pub fire: f32,
}

impl DamageSet {
    pub fn hack(value: f32) -> Self {
        Self { hack: value, ..Self::default() }
    }

    pub fn pierce(value: f32) -> Self {
        Self { pierce: value, ..Self::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attack {
    pub kind: AttackKind,
    pub damage: DamageSet,
    /// Capture points per hit, for capture attacks
    pub capture: f32,
    /// Max range in map units (not squared)
    pub max_range: f32,
    /// Milliseconds between hits
    pub repeat_time: f32,
    /// Milliseconds before the first hit
    pub prepare_time: f32,
    /// Classes this attack cannot target
    pub restricted: EntityClass,
}

impl Attack {
    pub fn melee(damage: DamageSet) -> Self {
        Self {
            kind: AttackKind::Melee,
            damage,
            capture: 0.0,
            max_range: 4.0,
            repeat_time: 1000.0,
            prepare_time: 500.0,
            restricted: EntityClass::empty(),
        }
    }

    pub fn ranged(damage: DamageSet, max_range: f32) -> Self {
        Self {
            kind: AttackKind::Ranged,
            max_range,
            ..Self::melee(damage)
        }
    }

    pub fn capture(points: f32) -> Self {
        Self {
            kind: AttackKind::Capture,
            damage: DamageSet::default(),
            capture: points,
            max_range: 4.0,
            repeat_time: 1000.0,
            prepare_time: 0.0,
            restricted: EntityClass::UNIT,
        }
    }
}

/// Capture state of a capturable entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capturable {
    /// Capture points held by each player slot
    pub points: Vec<f32>,
    pub regen_rate: f32,
    /// Extra regen per capture strength of each garrisoned unit
    pub garrison_regen_rate: f32,
    /// Capture points lost per second while decaying
    pub decay_rate: f32,
}

impl Capturable {
    pub fn new(points: Vec<f32>) -> Self {
        Self {
            points,
            regen_rate: 0.0,
            garrison_regen_rate: 0.0,
            decay_rate: 0.0,
        }
    }

    pub fn total(&self) -> f32 {
        self.points.iter().sum()
    }

    pub fn held_by(&self, player: PlayerId) -> f32 {
        self.points.get(player as usize).copied().unwrap_or(0.0)
    }
}

/// Garrison capability of a holder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GarrisonHolder {
    pub capacity: usize,
    pub garrisoned: Vec<EntityId>,
    /// Units are ejected below this health ratio
    pub eject_health: f32,
    /// Hitpoints healed per second for garrisoned units
    pub buff_heal: f32,
    /// A unit needs one of these classes to enter
    pub allowed: EntityClass,
    /// Garrisoned units of these classes add arrows
    pub arrow_classes: EntityClass,
    pub arrow_multiplier: f32,
}

impl GarrisonHolder {
    pub fn new(capacity: usize, allowed: EntityClass) -> Self {
        Self {
            capacity,
            garrisoned: Vec::new(),
            eject_health: 0.1,
            buff_heal: 0.0,
            allowed,
            arrow_classes: EntityClass::empty(),
            arrow_multiplier: 0.0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.garrisoned.len() >= self.capacity
    }
}

/// Coarse unit AI state, as far as the military code cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnitAiState {
    #[default]
    Idle,
    Walking,
    Combat,
    Repairing,
    Gathering,
    PickupApproaching,
    PickupLoading,
    Other,
}

/// Current order of a unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderData {
    pub target: Option<EntityId>,
    /// The order is a capture attack
    pub capture: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitAi {
    pub state: UnitAiState,
    pub order: Option<OrderData>,
}

/// Snapshot of one entity as seen by the AI this turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub id: EntityId,
    pub owner: PlayerId,
    pub classes: EntityClass,
    /// None while garrisoned
    pub position: Option<Position>,
    pub obstruction_radius: f32,
    pub hitpoints: f32,
    pub max_hitpoints: f32,
    pub attacks: Vec<Attack>,
    pub resistance: DamageSet,
    pub capturable: Option<Capturable>,
    /// Construction progress; None once built
    pub foundation_progress: Option<f32>,
    pub decaying: bool,
    pub invulnerable: bool,
    pub default_arrows: u32,
    pub garrison: Option<GarrisonHolder>,
    /// Holder this entity is garrisoned in
    pub holder: Option<EntityId>,
    pub unit_ai: Option<UnitAi>,
    /// Sea region, for ships and docks
    pub sea: Option<AccessIndex>,
    pub carrying_resources: bool,
}

impl EntityInfo {
    pub fn new(id: EntityId, owner: PlayerId, classes: EntityClass) -> Self {
        Self {
            id,
            owner,
            classes,
            position: None,
            obstruction_radius: 1.0,
            hitpoints: 100.0,
            max_hitpoints: 100.0,
            attacks: Vec::new(),
            resistance: DamageSet::default(),
            capturable: None,
            foundation_progress: None,
            decaying: false,
            invulnerable: false,
            default_arrows: 0,
            garrison: None,
            holder: None,
            unit_ai: if classes.contains(EntityClass::UNIT) {
                Some(UnitAi::default())
            } else {
                None
            },
            sea: None,
            carrying_resources: false,
        }
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_attack(mut self, attack: Attack) -> Self {
        self.attacks.push(attack);
        self
    }

    pub fn has_class(&self, class: EntityClass) -> bool {
        self.classes.contains(class)
    }

    /// True if the entity carries any of `classes`
    pub fn has_any_class(&self, classes: EntityClass) -> bool {
        self.classes.intersects(classes)
    }

    pub fn health_level(&self) -> f32 {
        if self.max_hitpoints <= 0.0 {
            return 0.0;
        }
        self.hitpoints / self.max_hitpoints
    }

    pub fn attack(&self, kind: AttackKind) -> Option<&Attack> {
        self.attacks.iter().find(|a| a.kind == kind)
    }

    pub fn can_attack(&self) -> bool {
        !self.attacks.is_empty()
    }

    pub fn ranged_range(&self) -> Option<f32> {
        self.attack(AttackKind::Ranged).map(|a| a.max_range)
    }

    pub fn capture_strength(&self) -> f32 {
        self.attack(AttackKind::Capture).map(|a| a.capture).unwrap_or(0.0)
    }

    pub fn has_defensive_fire(&self) -> bool {
        self.default_arrows > 0
    }

    pub fn is_garrison_holder(&self) -> bool {
        self.garrison.is_some()
    }

    /// Garrisoning here would get ejected straight away
    pub fn below_eject_health(&self) -> bool {
        match &self.garrison {
            Some(g) => self.hitpoints < g.eject_health * self.max_hitpoints,
            None => false,
        }
    }

    pub fn garrisoned(&self) -> &[EntityId] {
        self.garrison.as_ref().map(|g| g.garrisoned.as_slice()).unwrap_or(&[])
    }

    pub fn arrow_multiplier(&self) -> f32 {
        self.garrison.as_ref().map(|g| g.arrow_multiplier).unwrap_or(0.0)
    }

    pub fn is_idle(&self) -> bool {
        self.unit_ai.as_ref().map(|ai| ai.order.is_none()).unwrap_or(true)
    }

    pub fn ai_state(&self) -> Option<UnitAiState> {
        self.unit_ai.as_ref().map(|ai| ai.state)
    }

    pub fn order(&self) -> Option<OrderData> {
        self.unit_ai.as_ref().and_then(|ai| ai.order)
    }

    pub fn order_target(&self) -> Option<EntityId> {
        self.order().and_then(|o| o.target)
    }

    /// Whether some attack of ours can legally hit `target`
    pub fn can_attack_target(&self, target: &EntityInfo, allow_capture: bool) -> bool {
        if target.invulnerable && !allow_capture {
            return false;
        }
        self.attacks.iter().any(|attack| {
            if attack.restricted.intersects(target.classes) {
                return false;
            }
            match attack.kind {
                AttackKind::Capture => allow_capture && target.capturable.is_some(),
                AttackKind::Slaughter => target.has_class(EntityClass::ANIMAL),
                AttackKind::Melee | AttackKind::Ranged => true,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soldier() -> EntityInfo {
        EntityInfo::new(EntityId(1), 1, EntityClass::UNIT | EntityClass::INFANTRY)
            .at(Position::new(0.0, 0.0))
            .with_attack(Attack::melee(DamageSet::hack(5.0)))
    }

    #[test]
    fn test_units_get_unit_ai() {
        assert!(soldier().unit_ai.is_some());
        let house = EntityInfo::new(EntityId(2), 1, EntityClass::STRUCTURE);
        assert!(house.unit_ai.is_none());
        assert!(house.is_idle());
    }

    #[test]
    fn test_health_level() {
        let mut s = soldier();
        s.hitpoints = 25.0;
        assert_eq!(s.health_level(), 0.25);
    }

    #[test]
    fn test_capture_attack_needs_capturable_target() {
        let capturer = EntityInfo::new(EntityId(3), 1, EntityClass::UNIT).with_attack(Attack::capture(2.5));
        let mut house = EntityInfo::new(EntityId(4), 2, EntityClass::STRUCTURE);
        assert!(!capturer.can_attack_target(&house, true));
        house.capturable = Some(Capturable::new(vec![0.0, 0.0, 500.0]));
        assert!(capturer.can_attack_target(&house, true));
        assert!(!capturer.can_attack_target(&house, false));
    }

    #[test]
    fn test_restricted_classes() {
        let mut archer = soldier();
        archer.attacks[0].restricted = EntityClass::SHIP;
        let ship = EntityInfo::new(EntityId(5), 2, EntityClass::UNIT | EntityClass::SHIP);
        assert!(!archer.can_attack_target(&ship, false));
    }

    #[test]
    fn test_class_flags_round_trip_through_text() {
        let classes = EntityClass::ANIMAL | EntityClass::ELEPHANT;
        let json = serde_json::to_string(&classes).unwrap();
        let back: EntityClass = serde_json::from_str(&json).unwrap();
        assert_eq!(back, classes);
    }
}
