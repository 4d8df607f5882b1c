//! In-memory game state
//!
//! A small stand-in for the engine, used by the tests, the simulator binary and
//! the benches. Land and sea regions are rectangles, movement is in straight
//! lines inside the mover's region, and combat is plain damage over time.
//! Commands aimed at other AI modules are only recorded.

mod geometry;
mod step;

pub use geometry::Rect;

use std::collections::{BTreeMap, BTreeSet};

use crate::command::{Command, Stance};
use crate::core::types::{AccessIndex, EntityId, GameTime, PlanId, PlayerId, Position, GAIA, NO_ACCESS};
use crate::state::{EntityClass, EntityInfo, EventBatch, GameState, OrderData, OwnershipEvent, RenameEvent, UnitAiState};

/// First index handed out; 0 is "nowhere" and 1 is "aboard"
const FIRST_ACCESS: AccessIndex = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Land,
    Sea,
}

#[derive(Debug, Clone, Copy)]
struct Region {
    index: AccessIndex,
    kind: RegionKind,
    area: Rect,
}

/// What a unit is busy doing, driven by `step`
#[derive(Debug, Clone, Copy, PartialEq)]
enum Goal {
    Move { to: Position },
    Garrison { holder: EntityId },
    Attack { target: EntityId },
}

pub struct Sandbox {
    player: PlayerId,
    num_players: usize,
    time: GameTime,
    played_turn: u64,
    next_id: u32,
    next_access: AccessIndex,
    entities: BTreeMap<EntityId, EntityInfo>,
    regions: Vec<Region>,
    /// Later entries win
    territories: Vec<(Rect, PlayerId)>,
    blinking: Vec<Rect>,
    landing_zones: BTreeMap<(AccessIndex, AccessIndex), Vec<Position>>,
    /// (player, other): `player` considers `other` an ally
    allies: BTreeSet<(PlayerId, PlayerId)>,
    indefensible: BTreeSet<EntityId>,
    unanchored: BTreeSet<EntityId>,
    critical: BTreeSet<EntityId>,
    started_plans: BTreeSet<PlanId>,
    active_base: bool,
    stuck: BTreeSet<EntityId>,
    goals: BTreeMap<EntityId, Goal>,
    stances: BTreeMap<EntityId, Stance>,
    /// Requests addressed to other AI modules, in arrival order
    requests: Vec<Command>,
    /// Events waiting for the next `step`
    pending: EventBatch,
}

impl Sandbox {
    pub fn new(player: PlayerId, num_players: usize) -> Self {
        Self {
            player,
            num_players,
            time: 0.0,
            played_turn: 0,
            next_id: 1,
            next_access: FIRST_ACCESS,
            entities: BTreeMap::new(),
            regions: Vec::new(),
            territories: Vec::new(),
            blinking: Vec::new(),
            landing_zones: BTreeMap::new(),
            allies: BTreeSet::new(),
            indefensible: BTreeSet::new(),
            unanchored: BTreeSet::new(),
            critical: BTreeSet::new(),
            started_plans: BTreeSet::new(),
            active_base: true,
            stuck: BTreeSet::new(),
            goals: BTreeMap::new(),
            stances: BTreeMap::new(),
            requests: Vec::new(),
            pending: EventBatch::new(),
        }
    }

    // === Map layout ===

    fn add_region(&mut self, kind: RegionKind, area: Rect) -> AccessIndex {
        let index = self.next_access;
        self.next_access += 1;
        self.regions.push(Region { index, kind, area });
        index
    }

    pub fn add_land(&mut self, area: Rect) -> AccessIndex {
        self.add_region(RegionKind::Land, area)
    }

    pub fn add_sea(&mut self, area: Rect) -> AccessIndex {
        self.add_region(RegionKind::Sea, area)
    }

    /// Shore point where ships of `sea` can meet units of `land`
    pub fn add_landing_zone(&mut self, land: AccessIndex, sea: AccessIndex, pos: Position) {
        self.landing_zones.entry((land, sea)).or_default().push(pos);
    }

    pub fn add_territory(&mut self, area: Rect, owner: PlayerId) {
        self.territories.push((area, owner));
    }

    pub fn add_blinking(&mut self, area: Rect) {
        self.blinking.push(area);
    }

    /// One-sided: `player` now considers `other` an ally (or not)
    pub fn set_ally(&mut self, player: PlayerId, other: PlayerId, ally: bool) {
        if ally {
            self.allies.insert((player, other));
        } else {
            self.allies.remove(&(player, other));
        }
    }

    pub fn set_mutual_allies(&mut self, a: PlayerId, b: PlayerId) {
        self.set_ally(a, b, true);
        self.set_ally(b, a, true);
    }

    fn region(&self, index: AccessIndex) -> Option<&Region> {
        self.regions.iter().find(|r| r.index == index)
    }

    fn region_at(&self, pos: Position) -> Option<&Region> {
        self.regions.iter().find(|r| r.area.contains(pos))
    }

    /// Area an entity can move in: its sea for ships, its current region otherwise
    fn movement_area(&self, ent: &EntityInfo) -> Option<Rect> {
        if ent.has_class(EntityClass::SHIP) {
            if let Some(sea) = ent.sea.and_then(|s| self.region(s)) {
                return Some(sea.area);
            }
        }
        ent.position.and_then(|p| self.region_at(p)).map(|r| r.area)
    }

    /// Closest point on any land region
    fn nearest_land_point(&self, pos: Position) -> Option<Position> {
        self.regions
            .iter()
            .filter(|r| r.kind == RegionKind::Land)
            .map(|r| r.area.clamp(pos))
            .min_by(|a, b| a.distance_squared(&pos).total_cmp(&b.distance_squared(&pos)))
    }

    // === Entities ===

    /// Add an entity under a fresh id, which is returned
    pub fn spawn(&mut self, mut info: EntityInfo) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        info.id = id;
        self.entities.insert(id, info);
        id
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut EntityInfo> {
        self.entities.get_mut(&id)
    }

    /// Take an entity out without any event
    pub fn remove(&mut self, id: EntityId) -> Option<EntityInfo> {
        self.goals.remove(&id);
        let ent = self.entities.remove(&id)?;
        if let Some(holder) = ent.holder.and_then(|h| self.entities.get_mut(&h)) {
            if let Some(garrison) = &mut holder.garrison {
                garrison.garrisoned.retain(|u| *u != id);
            }
        }
        Some(ent)
    }

    /// Destroy an entity, and anything garrisoned in it, reporting it next step
    pub fn kill(&mut self, id: EntityId) {
        let Some(ent) = self.remove(id) else {
            return;
        };
        for inside in ent.garrisoned().to_vec() {
            self.kill(inside);
        }
        self.pending.destroy.push(crate::state::DestroyEvent {
            entity: id,
            snapshot: Some(ent),
        });
    }

    /// Replace an entity by a copy under a new id (a promotion)
    pub fn rename(&mut self, id: EntityId) -> Option<EntityId> {
        let ent = self.remove(id)?;
        let new_id = self.spawn(ent);
        self.pending.renamed.push(RenameEvent {
            entity: id,
            new_entity: new_id,
        });
        Some(new_id)
    }

    pub fn change_owner(&mut self, id: EntityId, to: PlayerId) {
        let Some(ent) = self.entities.get_mut(&id) else {
            return;
        };
        let from = ent.owner;
        ent.owner = to;
        self.pending.ownership_changed.push(OwnershipEvent { entity: id, from, to });
    }

    /// Report an attack next step without simulating it
    pub fn report_attack(&mut self, target: EntityId, attacker: Option<EntityId>) {
        self.pending
            .attacked
            .push(crate::state::AttackedEvent { target, attacker });
    }

    pub fn teleport(&mut self, id: EntityId, pos: Position) {
        if let Some(ent) = self.entities.get_mut(&id) {
            ent.position = Some(pos);
        }
    }

    pub fn set_order(&mut self, id: EntityId, order: Option<OrderData>) {
        if let Some(ai) = self.entities.get_mut(&id).and_then(|e| e.unit_ai.as_mut()) {
            ai.order = order;
        }
    }

    pub fn set_ai_state(&mut self, id: EntityId, state: UnitAiState) {
        if let Some(ai) = self.entities.get_mut(&id).and_then(|e| e.unit_ai.as_mut()) {
            ai.state = state;
        }
    }

    /// A stuck entity drops every movement order
    pub fn set_stuck(&mut self, id: EntityId, stuck: bool) {
        if stuck {
            self.stuck.insert(id);
        } else {
            self.stuck.remove(&id);
        }
    }

    /// Put `unit` inside `holder` right away; false if it does not fit
    pub fn garrison_now(&mut self, unit: EntityId, holder: EntityId) -> bool {
        let fits = self
            .entities
            .get(&holder)
            .and_then(|h| h.garrison.as_ref())
            .map_or(false, |g| !g.is_full());
        if !fits || !self.entities.contains_key(&unit) {
            return false;
        }
        if let Some(garrison) = self.entities.get_mut(&holder).and_then(|h| h.garrison.as_mut()) {
            garrison.garrisoned.push(unit);
        }
        if let Some(ent) = self.entities.get_mut(&unit) {
            ent.position = None;
            ent.holder = Some(holder);
        }
        self.halt(unit);
        true
    }

    // === Other AI modules and engine flags ===

    pub fn set_defendable(&mut self, id: EntityId, defendable: bool) {
        if defendable {
            self.indefensible.remove(&id);
        } else {
            self.indefensible.insert(id);
        }
    }

    pub fn set_anchored(&mut self, id: EntityId, anchored: bool) {
        if anchored {
            self.unanchored.remove(&id);
        } else {
            self.unanchored.insert(id);
        }
    }

    pub fn set_critical(&mut self, id: EntityId, critical: bool) {
        if critical {
            self.critical.insert(id);
        } else {
            self.critical.remove(&id);
        }
    }

    pub fn start_attack_plan(&mut self, plan: PlanId) {
        self.started_plans.insert(plan);
    }

    pub fn set_active_base(&mut self, active: bool) {
        self.active_base = active;
    }

    // === Time ===

    pub fn time(&self) -> GameTime {
        self.time
    }

    pub fn advance_time(&mut self, dt: GameTime) {
        self.time += dt;
    }

    pub fn set_played_turn(&mut self, turn: u64) {
        self.played_turn = turn;
    }

    // === Inspection ===

    /// Requests recorded for other AI modules
    pub fn requests(&self) -> &[Command] {
        &self.requests
    }

    pub fn stance(&self, id: EntityId) -> Option<Stance> {
        self.stances.get(&id).copied()
    }

    /// Whether `id` still has something to do
    pub fn is_busy(&self, id: EntityId) -> bool {
        self.goals.contains_key(&id)
    }

    pub fn count_units(&self, owner: PlayerId) -> usize {
        self.entities
            .values()
            .filter(|e| e.owner == owner && e.has_class(EntityClass::UNIT))
            .count()
    }
}

impl GameState for Sandbox {
    fn player(&self) -> PlayerId {
        self.player
    }

    fn num_players(&self) -> usize {
        self.num_players
    }

    fn elapsed_time(&self) -> GameTime {
        self.time
    }

    fn played_turn(&self) -> u64 {
        self.played_turn
    }

    fn entity(&self, id: EntityId) -> Option<&EntityInfo> {
        self.entities.get(&id)
    }

    fn entities(&self) -> Box<dyn Iterator<Item = &EntityInfo> + '_> {
        Box::new(self.entities.values())
    }

    fn is_ally_of(&self, player: PlayerId, other: PlayerId) -> bool {
        player == other || self.allies.contains(&(player, other))
    }

    fn is_enemy_of(&self, player: PlayerId, other: PlayerId) -> bool {
        !self.is_ally_of(player, other)
    }

    fn territory_owner(&self, pos: Position) -> PlayerId {
        self.territories
            .iter()
            .rev()
            .find(|(area, _)| area.contains(pos))
            .map_or(GAIA, |(_, owner)| *owner)
    }

    fn is_blinking(&self, pos: Position) -> bool {
        self.blinking.iter().any(|area| area.contains(pos))
    }

    fn land_access_at(&self, pos: Position) -> AccessIndex {
        self.region_at(pos).map_or(NO_ACCESS, |r| r.index)
    }

    fn sea_between(&self, start: AccessIndex, end: AccessIndex) -> Option<AccessIndex> {
        self.regions
            .iter()
            .filter(|r| r.kind == RegionKind::Sea)
            .map(|r| r.index)
            .find(|sea| {
                self.landing_zones.contains_key(&(start, *sea)) && self.landing_zones.contains_key(&(end, *sea))
            })
    }

    fn landing_zones(&self, land: AccessIndex, sea: AccessIndex) -> Vec<Position> {
        self.landing_zones.get(&(land, sea)).cloned().unwrap_or_default()
    }

    fn is_defendable(&self, structure: EntityId) -> bool {
        !self.indefensible.contains(&structure)
    }

    fn in_anchored_base(&self, structure: EntityId) -> bool {
        !self.unanchored.contains(&structure)
    }

    fn is_critical(&self, entity: EntityId) -> bool {
        self.critical.contains(&entity)
    }

    fn attack_plan_started(&self, plan: PlanId) -> bool {
        self.started_plans.contains(&plan)
    }

    fn has_active_base(&self) -> bool {
        self.active_base
    }

    fn capturing_units(&self, target: EntityId) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|e| e.owner == self.player)
            .filter(|e| e.order().map_or(false, |o| o.capture && o.target == Some(target)))
            .map(|e| e.id)
            .collect()
    }
}
