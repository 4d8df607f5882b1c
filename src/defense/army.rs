//! Defense armies
//!
//! An army pairs a cluster of foes with the defenders sent against them. The
//! foe centroid drives clustering (new foes join within the compact size,
//! strays break away past the breakaway size) and the two strength totals
//! drive how many more defenders the army asks for.
//!
//! A `Capturing` army holds a single foe: a structure we want to capture, or
//! one of ours whose capture points we are recovering. It is never merged.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::Command;
use crate::context::TurnContext;
use crate::core::types::{ArmyId, Centroid, EntityId, GameTime, Position};
use crate::defense::assignment::AssignmentIndex;
use crate::defense::garrison::garrison_attacked_unit;
use crate::defense::strength::army_strength;
use crate::state::queries::{ally_structures, nearest_dropsite};
use crate::state::{allow_capture, is_siege_unit, land_access, EntityClass, EntityInfo, EventBatch};
use crate::transport::{TransportManager, TransportState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmyKind {
    /// Counters an invading group
    Default,
    /// Captures (or recovers) a single structure
    Capturing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmyState {
    /// No foes left, the army should be cleared
    Empty,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefenseArmy {
    id: ArmyId,
    kind: ArmyKind,
    foe_position: Position,
    position_last_update: GameTime,
    assignments: AssignmentIndex,
    foe_entities: Vec<EntityId>,
    foe_strength: f32,
    own_entities: Vec<EntityId>,
    own_strength: f32,
}

impl DefenseArmy {
    /// Create an army around `foes`, all force-added
    pub fn new(ctx: &mut TurnContext, id: ArmyId, foes: &[EntityId], kind: ArmyKind) -> Self {
        let mut army = Self {
            id,
            kind,
            foe_position: Position::default(),
            position_last_update: ctx.time(),
            assignments: AssignmentIndex::new(),
            foe_entities: Vec::new(),
            foe_strength: 0.0,
            own_entities: Vec::new(),
            own_strength: 0.0,
        };
        for &foe in foes {
            army.add_foe(ctx, foe, true);
        }
        army.recalculate_position(ctx, true);
        army
    }

    pub fn id(&self) -> ArmyId {
        self.id
    }

    pub fn kind(&self) -> ArmyKind {
        self.kind
    }

    pub fn foe_position(&self) -> Position {
        self.foe_position
    }

    pub fn foe_entities(&self) -> &[EntityId] {
        &self.foe_entities
    }

    pub fn own_entities(&self) -> &[EntityId] {
        &self.own_entities
    }

    pub fn foe_strength(&self) -> f32 {
        self.foe_strength
    }

    pub fn own_strength(&self) -> f32 {
        self.own_strength
    }

    pub fn assignments(&self) -> &AssignmentIndex {
        &self.assignments
    }

    pub fn state(&self) -> ArmyState {
        if self.foe_entities.is_empty() {
            ArmyState::Empty
        } else {
            ArmyState::Active
        }
    }

    /// Add an enemy entity. Unless `force`d, it must lie within the compact
    /// size of the centroid. Dirties the centroid without recomputing it.
    pub fn add_foe(&mut self, ctx: &mut TurnContext, id: EntityId, force: bool) -> bool {
        if self.foe_entities.contains(&id) {
            return false;
        }
        let Some(ent) = ctx.entity(id) else {
            return false;
        };
        let Some(pos) = ent.position else {
            return false;
        };
        if !force && pos.distance_squared(&self.foe_position) > ctx.config.defense.army_compact_size {
            return false;
        }
        if !ctx.tags.claim_army(id, self.id) {
            return false;
        }

        self.foe_entities.push(id);
        self.assignments.add_foe(id);
        self.position_last_update = 0.0;
        self.evaluate_strength(ctx, ent, false, false);
        true
    }

    /// Remove an enemy entity. `snapshot` stands in for an entity already
    /// gone from the game state.
    pub fn remove_foe(&mut self, ctx: &mut TurnContext, id: EntityId, snapshot: Option<&EntityInfo>) -> bool {
        let Some(idx) = self.foe_entities.iter().position(|e| *e == id) else {
            return false;
        };
        self.foe_entities.remove(idx);
        self.assignments.remove_foe(id);

        if let Some(ent) = snapshot.or_else(|| ctx.entity(id)) {
            self.evaluate_strength(ctx, ent, false, true);
        }
        ctx.tags.release_army(id, self.id);
        true
    }

    /// Add a defender without assigning it. `force` admits units without a
    /// position, which may be aboard a ship.
    pub fn add_own(&mut self, ctx: &mut TurnContext, id: EntityId, force: bool) -> bool {
        if self.own_entities.contains(&id) {
            return false;
        }
        let Some(ent) = ctx.entity(id) else {
            return false;
        };
        if ent.position.is_none() && !force {
            return false;
        }
        if !ctx.tags.claim_army(id, self.id) {
            return false;
        }

        self.own_entities.push(id);
        self.evaluate_strength(ctx, ent, true, false);
        self.assignments.add_own(id);
        ctx.tags.enter_defense(id);
        true
    }

    pub fn remove_own(
        &mut self,
        ctx: &mut TurnContext,
        naval: &mut TransportManager,
        id: EntityId,
        snapshot: Option<&EntityInfo>,
    ) -> bool {
        let Some(idx) = self.own_entities.iter().position(|e| *e == id) else {
            return false;
        };
        self.own_entities.remove(idx);
        self.assignments.remove_own(id);
        ctx.tags.release_army(id, self.id);
        ctx.tags.leave_defense(id);

        if let Some(ent) = snapshot.or_else(|| ctx.entity(id)) {
            self.evaluate_strength(ctx, ent, true, true);
        }

        // Not yet aboard: pull it out of its transport
        if let (Some(plan_id), Some(live)) = (ctx.tags.transport(id), ctx.entity(id)) {
            if live.position.is_some() {
                if let Some(plan) = naval.get_plan_mut(plan_id) {
                    if plan.state() == TransportState::Boarding {
                        plan.remove_unit(ctx, id);
                    }
                }
            }
        }
        true
    }

    /// Release every defender and send it back toward safe ground.
    ///
    /// Returns the rally point used, if one was found.
    pub fn clear(&mut self, ctx: &mut TurnContext, naval: &mut TransportManager) -> Option<Position> {
        while let Some(&foe) = self.foe_entities.first() {
            self.remove_foe(ctx, foe, None);
        }

        let state = ctx.state;
        let player = ctx.player();
        let mut own_ground = Centroid::default();
        let mut ally_ground = Centroid::default();
        let mut other_ground = Centroid::default();
        for id in &self.own_entities {
            let Some(pos) = ctx.entity(*id).and_then(|e| e.position) else {
                continue;
            };
            let owner = state.territory_owner(pos);
            if owner == player {
                own_ground.add(pos);
            } else if state.is_mutual_ally(owner) {
                ally_ground.add(pos);
            } else {
                other_ground.add(pos);
            }
        }

        let (destination, radius) = if let Some(pos) = own_ground.mean() {
            (Some(pos), 0.0)
        } else if let Some(pos) = ally_ground.mean() {
            (Some(pos), 0.0)
        } else if let Some(centre) = other_ground.mean() {
            match fallback_structure(ctx, centre) {
                Some((pos, radius)) => (Some(pos), radius),
                None => (None, 0.0),
            }
        } else {
            (None, 0.0)
        };

        let low_health = ctx.config.garrison_health.low;
        while let Some(&id) = self.own_entities.first() {
            self.remove_own(ctx, naval, id, None);
            let Some(ent) = ctx.entity(id) else {
                continue;
            };
            let Some(pos) = ent.position else {
                continue;
            };
            if ctx.tags.transport(id).is_some() || ctx.tags.transporter(id).is_some() {
                continue;
            }
            if ent.health_level() < low_health && garrison_attacked_unit(ctx, ent, false) {
                continue;
            }
            match destination {
                Some(dest) if !state.is_mutual_ally(state.territory_owner(pos)) => {
                    ctx.commands.move_to_range(id, dest, radius, radius + 5.0);
                }
                _ => ctx.commands.stop(id),
            }
        }

        self.assignments.clear();
        self.recalculate_strengths(ctx);
        self.recalculate_position(ctx, false);
        debug!("army {} cleared, rally point {:?}", self.id, destination);
        destination
    }

    /// Pick a target for one of our defenders, overriding any previous one
    pub fn assign_unit(&mut self, ctx: &mut TurnContext, naval: &mut TransportManager, id: EntityId) -> bool {
        let state = ctx.state;
        let Some(ent) = ctx.entity(id) else {
            return false;
        };
        let Some(pos) = ent.position else {
            return false;
        };

        // Drop off what it carries first; the attack is then queued behind
        let mut queued = false;
        if ent.carrying_resources {
            if let Some(dropsite) = nearest_dropsite(state, ent) {
                ctx.commands.push(Command::ReturnResources { unit: id, dropsite });
                queued = true;
            }
        }

        let alloc = &ctx.config.allocation;
        let mut chosen: Option<EntityId> = None;
        let mut preferred: Option<(EntityId, f32)> = None;
        let mut fallback: Option<(EntityId, f32)> = None;
        for &foe_id in &self.foe_entities {
            let Some(foe) = ctx.entity(foe_id) else {
                continue;
            };
            let Some(foe_pos) = foe.position else {
                continue;
            };
            if !ent.can_attack_target(foe, allow_capture(state, ent, foe)) {
                continue;
            }
            // Fight back whoever is hitting us
            if foe.has_class(EntityClass::UNIT) && foe.order_target() == Some(id) {
                chosen = Some(foe_id);
                break;
            }

            let count = self.assignments.assigned_count(foe_id);
            let cap = if foe.has_class(EntityClass::HERO) || is_siege_unit(foe) {
                alloc.priority_cap
            } else {
                alloc.ordinary_cap
            };
            if count >= cap {
                continue;
            }
            let dist = pos.distance_squared(&foe_pos);
            if fallback.map_or(true, |(_, d)| dist < d) {
                fallback = Some((foe_id, dist));
            }
            if count >= alloc.preferred_cap {
                continue;
            }
            if preferred.map_or(true, |(_, d)| dist < d) {
                preferred = Some((foe_id, dist));
            }
        }

        let Some(foe_id) = chosen
            .or(preferred.map(|(id, _)| id))
            .or(fallback.map(|(id, _)| id))
        else {
            return false;
        };
        let Some(foe) = ctx.entity(foe_id) else {
            return false;
        };
        let Some(foe_pos) = foe.position else {
            return false;
        };

        let own_index = land_access(state, ent);
        let foe_index = state.land_access_at(foe_pos);
        if own_index == Some(foe_index) || ent.has_class(EntityClass::SHIP) {
            self.assignments.assign(id, foe_id);
            ctx.commands.attack(id, foe_id, allow_capture(state, ent, foe), queued);
        } else if let Some(own_index) = own_index {
            naval.require_transport(ctx, id, own_index, foe_index, foe_pos);
        }
        true
    }

    /// Absorb `other`; its members are force-added
    pub fn merge(&mut self, ctx: &mut TurnContext, other: DefenseArmy) {
        let DefenseArmy {
            id: other_id,
            assignments,
            foe_entities,
            own_entities,
            ..
        } = other;
        for id in foe_entities.iter().chain(own_entities.iter()) {
            ctx.tags.release_army(*id, other_id);
        }

        self.assignments.merge(assignments);
        for id in foe_entities {
            if !self.add_foe(ctx, id, true) && !self.foe_entities.contains(&id) {
                self.assignments.remove_foe(id);
            }
        }
        for id in own_entities {
            if !self.add_own(ctx, id, true) && !self.own_entities.contains(&id) {
                self.assignments.remove_own(id);
            }
        }

        self.recalculate_position(ctx, true);
        self.recalculate_strengths(ctx);
        debug!("army {} merged into army {}", other_id, self.id);
    }

    /// Strength still missing to hold off the foes, if any
    pub fn needs_defenders(&mut self, ctx: &TurnContext) -> Option<f32> {
        let state = ctx.state;
        let ratios = &ctx.config.defense.defense_ratio;
        let territory_owner = state.territory_owner(self.foe_position);
        let ratio = if territory_owner == ctx.player() {
            ratios.own
        } else if state.is_ally(territory_owner) {
            let exclusive_allies = (1..state.num_players())
                .map(|p| p as u8)
                .filter(|p| *p != territory_owner && state.is_ally_of(*p, territory_owner))
                .count() as f32;
            ratios.ally / (1.0 + 0.5 * (exclusive_allies - 1.0).max(0.0))
        } else {
            ratios.neutral
        };

        // Upgrades are not tracked, so removals may have overshot
        if self.foe_strength <= 0.0 || self.own_strength <= 0.0 {
            self.recalculate_strengths(ctx);
        }

        let needed = self.foe_strength * ratio;
        if needed <= self.own_strength {
            None
        } else {
            Some(needed - self.own_strength)
        }
    }

    /// Refresh the centroid, at most once per game time unless `force`d
    pub fn recalculate_position(&mut self, ctx: &TurnContext, force: bool) {
        if !force && self.position_last_update == ctx.time() {
            return;
        }
        let mut centroid = Centroid::default();
        for id in &self.foe_entities {
            if let Some(pos) = ctx.entity(*id).and_then(|e| e.position) {
                centroid.add(pos);
            }
        }
        // No known position: keep the last one, the army goes away next turn
        if let Some(pos) = centroid.mean() {
            self.foe_position = pos;
        }
        self.position_last_update = ctx.time();
    }

    pub fn recalculate_strengths(&mut self, ctx: &TurnContext) {
        self.own_strength = 0.0;
        self.foe_strength = 0.0;
        for id in &self.foe_entities {
            if let Some(ent) = ctx.entity(*id) {
                self.foe_strength += army_strength(ent, ctx.player(), &ctx.config.strength);
            }
        }
        for id in &self.own_entities {
            if let Some(ent) = ctx.entity(*id) {
                self.own_strength += army_strength(ent, ctx.player(), &ctx.config.strength);
            }
        }
    }

    /// Add (or with `remove`, subtract) the strength of `ent` to one side
    pub fn evaluate_strength(&mut self, ctx: &TurnContext, ent: &EntityInfo, is_own: bool, remove: bool) {
        let mut strength = army_strength(ent, ctx.player(), &ctx.config.strength);
        if remove {
            strength = -strength;
        }
        if is_own {
            self.own_strength += strength;
        } else {
            self.foe_strength += strength;
        }
    }

    pub fn check_events(&mut self, ctx: &mut TurnContext, naval: &mut TransportManager, events: &EventBatch) {
        // Promotions and packing
        for evt in &events.renamed {
            let new_ent = ctx.entity(evt.new_entity);
            if let Some(idx) = self.foe_entities.iter().position(|e| *e == evt.entity) {
                // A killed animal turns into its corpse
                if new_ent.map_or(false, |e| e.has_class(EntityClass::RESOURCE)) {
                    continue;
                }
                self.foe_entities[idx] = evt.new_entity;
                self.assignments.rename_foe(evt.entity, evt.new_entity);
            } else if let Some(idx) = self.own_entities.iter().position(|e| *e == evt.entity) {
                if new_ent.map_or(false, |e| e.unit_ai.is_none() || !e.can_attack()) {
                    continue;
                }
                self.own_entities[idx] = evt.new_entity;
                self.assignments.rename_own(evt.entity, evt.new_entity);
            }
        }

        for evt in &events.garrison {
            self.remove_foe(ctx, evt.entity, None);
        }

        for evt in &events.ownership_changed {
            if !ctx.state.is_enemy(evt.to) {
                self.remove_foe(ctx, evt.entity, None);
            } else if evt.from == ctx.player() {
                self.remove_own(ctx, naval, evt.entity, None);
            }
        }

        // Capture and destroy can come together, so try both sides
        for evt in &events.destroy {
            self.remove_own(ctx, naval, evt.entity, evt.snapshot.as_ref());
            self.remove_foe(ctx, evt.entity, evt.snapshot.as_ref());
        }
    }

    /// Per-turn upkeep. Returns the foes that broke away from the army.
    pub fn update(&mut self, ctx: &mut TurnContext, naval: &mut TransportManager) -> Vec<EntityId> {
        let state = ctx.state;
        for id in self.own_entities.clone() {
            let Some(ent) = ctx.entity(id) else {
                continue;
            };
            match ent.order() {
                None => {
                    if ctx.tags.transport(id).is_none() {
                        self.assign_unit(ctx, naval, id);
                    }
                }
                Some(order) if order.capture => {
                    let Some(target_id) = order.target else {
                        continue;
                    };
                    if let Some(target) = ctx.entity(target_id) {
                        if !allow_capture(state, ent, target) {
                            ctx.commands.attack(id, target_id, false, false);
                        }
                    }
                }
                Some(_) => {}
            }
        }

        match self.kind {
            ArmyKind::Capturing => {
                // Keep going while an enemy still holds points on the target
                if let Some(&foe_id) = self.foe_entities.first() {
                    if let Some(foe) = ctx.entity(foe_id) {
                        let contested = foe.capturable.as_ref().map_or(false, |c| {
                            c.points
                                .iter()
                                .enumerate()
                                .any(|(p, points)| *points > 0.0 && state.is_enemy(p as u8))
                        });
                        if !contested {
                            self.remove_foe(ctx, foe_id, None);
                        }
                    }
                }
                Vec::new()
            }
            ArmyKind::Default => self.check_breakaways(ctx),
        }
    }

    fn check_breakaways(&mut self, ctx: &mut TurnContext) -> Vec<EntityId> {
        let mut breakaways = Vec::new();
        if ctx.time() - self.position_last_update <= ctx.config.defense.breakaway_refresh_interval {
            return breakaways;
        }
        self.recalculate_position(ctx, true);

        let limit = ctx.config.defense.army_breakaway_size;
        for id in self.foe_entities.clone() {
            let Some(pos) = ctx.entity(id).and_then(|e| e.position) else {
                continue;
            };
            if pos.distance_squared(&self.foe_position) > limit {
                breakaways.push(id);
                self.remove_foe(ctx, id, None);
            }
        }
        if !breakaways.is_empty() {
            debug!("army {}: {} foes broke away", self.id, breakaways.len());
            self.recalculate_position(ctx, true);
        }
        breakaways
    }
}

/// Nearest allied structure on the same land as `centre`, defensive ones first.
/// Returns its position and obstruction radius.
fn fallback_structure(ctx: &TurnContext, centre: Position) -> Option<(Position, f32)> {
    let state = ctx.state;
    let army_access = state.land_access_at(centre);
    let mut best: Option<(bool, f32, Position, f32)> = None;
    for structure in ally_structures(state) {
        let Some(pos) = structure.position else {
            continue;
        };
        if !state.is_mutual_ally(state.territory_owner(pos)) {
            continue;
        }
        if land_access(state, structure) != Some(army_access) {
            continue;
        }
        let defensive = structure.has_defensive_fire();
        let dist = centre.distance_squared(&pos);
        let better = match best {
            None => true,
            Some((best_defensive, best_dist, _, _)) => {
                (defensive && !best_defensive) || (defensive == best_defensive && dist < best_dist)
            }
        };
        if better {
            best = Some((defensive, dist, pos, structure.obstruction_radius));
        }
    }
    best.map(|(_, _, pos, radius)| (pos, radius))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandQueue;
    use crate::core::config::PetraConfig;
    use crate::sandbox::{Rect, Sandbox};
    use crate::state::{Attack, DamageSet, OrderData};
    use crate::tags::{PlanTag, Subrole, TagStore};

    fn world() -> Sandbox {
        let mut world = Sandbox::new(1, 3);
        world.add_land(Rect::new(0.0, 0.0, 400.0, 400.0));
        world.add_territory(Rect::new(0.0, 0.0, 200.0, 400.0), 1);
        world
    }

    fn soldier(world: &mut Sandbox, owner: u8, x: f32, z: f32) -> EntityId {
        world.spawn(
            EntityInfo::new(EntityId(0), owner, EntityClass::UNIT | EntityClass::INFANTRY)
                .at(Position::new(x, z))
                .with_attack(Attack::melee(DamageSet::hack(10.0))),
        )
    }

    struct Fixture {
        config: PetraConfig,
        tags: TagStore,
        commands: CommandQueue,
        naval: TransportManager,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                config: PetraConfig::default(),
                tags: TagStore::new(),
                commands: CommandQueue::new(),
                naval: TransportManager::new(),
            }
        }

        fn ctx<'a>(&'a mut self, world: &'a Sandbox) -> (TurnContext<'a>, &'a mut TransportManager) {
            (
                TurnContext::new(world, &self.config, &mut self.tags, &mut self.commands),
                &mut self.naval,
            )
        }
    }

    #[test]
    fn test_new_army_tags_foes_and_centres() {
        let mut world = world();
        let a = soldier(&mut world, 2, 100.0, 100.0);
        let b = soldier(&mut world, 2, 110.0, 100.0);
        let mut fx = Fixture::new();
        let (mut ctx, _) = fx.ctx(&world);

        let army = DefenseArmy::new(&mut ctx, ArmyId(1), &[a, b], ArmyKind::Default);
        assert_eq!(army.foe_entities(), &[a, b]);
        assert_eq!(army.foe_position(), Position::new(105.0, 100.0));
        assert!(army.foe_strength() > 0.0);
        assert_eq!(ctx.tags.army(a), Some(ArmyId(1)));
        assert_eq!(army.state(), ArmyState::Active);
    }

    #[test]
    fn test_add_foe_respects_compact_size() {
        let mut world = world();
        let a = soldier(&mut world, 2, 100.0, 100.0);
        let near = soldier(&mut world, 2, 120.0, 100.0);
        let far = soldier(&mut world, 2, 200.0, 100.0);
        let mut fx = Fixture::new();
        let (mut ctx, _) = fx.ctx(&world);

        let mut army = DefenseArmy::new(&mut ctx, ArmyId(1), &[a], ArmyKind::Default);
        assert!(army.add_foe(&mut ctx, near, false));
        assert!(!army.add_foe(&mut ctx, near, false));
        assert!(!army.add_foe(&mut ctx, far, false));
        assert!(army.add_foe(&mut ctx, far, true));
    }

    #[test]
    fn test_single_membership() {
        let mut world = world();
        let a = soldier(&mut world, 2, 100.0, 100.0);
        let mut fx = Fixture::new();
        let (mut ctx, _) = fx.ctx(&world);

        let first = DefenseArmy::new(&mut ctx, ArmyId(1), &[a], ArmyKind::Default);
        let second = DefenseArmy::new(&mut ctx, ArmyId(2), &[a], ArmyKind::Default);
        assert_eq!(first.foe_entities(), &[a]);
        assert!(second.foe_entities().is_empty());
        assert_eq!(second.state(), ArmyState::Empty);
    }

    #[test]
    fn test_own_round_trip_restores_tags_and_strength() {
        let mut world = world();
        let foe = soldier(&mut world, 2, 100.0, 100.0);
        let own = soldier(&mut world, 1, 90.0, 100.0);
        let mut fx = Fixture::new();
        let (mut ctx, naval) = fx.ctx(&world);
        ctx.tags.set_subrole(own, Some(Subrole::Gatherer));

        let mut army = DefenseArmy::new(&mut ctx, ArmyId(1), &[foe], ArmyKind::Default);
        assert!(army.add_own(&mut ctx, own, false));
        assert_eq!(ctx.tags.plan(own), Some(PlanTag::Defending));
        assert_eq!(ctx.tags.subrole(own), Some(Subrole::Defender));
        assert!(army.own_strength() > 0.0);

        assert!(army.remove_own(&mut ctx, naval, own, None));
        assert!(army.own_strength().abs() < 1e-4);
        assert_eq!(ctx.tags.plan(own), None);
        assert_eq!(ctx.tags.subrole(own), Some(Subrole::Gatherer));
        assert_eq!(ctx.tags.army(own), None);
    }

    #[test]
    fn test_assign_prefers_the_attacker_of_the_defender() {
        let mut world = world();
        let near = soldier(&mut world, 2, 95.0, 100.0);
        let attacker = soldier(&mut world, 2, 130.0, 100.0);
        let own = soldier(&mut world, 1, 90.0, 100.0);
        world.set_order(attacker, Some(OrderData { target: Some(own), capture: false }));
        let mut fx = Fixture::new();
        let (mut ctx, naval) = fx.ctx(&world);

        let mut army = DefenseArmy::new(&mut ctx, ArmyId(1), &[near, attacker], ArmyKind::Default);
        army.add_own(&mut ctx, own, false);
        assert!(army.assign_unit(&mut ctx, naval, own));
        assert_eq!(army.assignments().target_of(own), Some(attacker));
        assert!(ctx
            .commands
            .iter()
            .any(|c| matches!(c, Command::Attack { unit, target, .. } if *unit == own && *target == attacker)));
    }

    #[test]
    fn test_assign_spreads_defenders() {
        let mut world = world();
        let near = soldier(&mut world, 2, 100.0, 100.0);
        let far = soldier(&mut world, 2, 100.0, 130.0);
        let owns: Vec<EntityId> = (0..4).map(|i| soldier(&mut world, 1, 90.0 + i as f32, 100.0)).collect();
        let mut fx = Fixture::new();
        let (mut ctx, naval) = fx.ctx(&world);

        let mut army = DefenseArmy::new(&mut ctx, ArmyId(1), &[near, far], ArmyKind::Default);
        for own in &owns {
            army.add_own(&mut ctx, *own, false);
            army.assign_unit(&mut ctx, naval, *own);
        }
        // Three go to the nearest foe, then the preferred cap kicks in
        assert_eq!(army.assignments().assigned_count(near), 3);
        assert_eq!(army.assignments().assigned_count(far), 1);
        assert!(army.assignments().is_symmetric());
    }

    #[test]
    fn test_remove_foe_frees_its_defenders() {
        let mut world = world();
        let foe = soldier(&mut world, 2, 100.0, 100.0);
        let own = soldier(&mut world, 1, 90.0, 100.0);
        let mut fx = Fixture::new();
        let (mut ctx, naval) = fx.ctx(&world);

        let mut army = DefenseArmy::new(&mut ctx, ArmyId(1), &[foe], ArmyKind::Default);
        army.add_own(&mut ctx, own, false);
        army.assign_unit(&mut ctx, naval, own);
        assert!(army.remove_foe(&mut ctx, foe, None));
        assert!(!army.remove_foe(&mut ctx, foe, None));
        assert_eq!(army.assignments().target_of(own), None);
        assert!(army.foe_strength().abs() < 1e-4);
        assert_eq!(army.state(), ArmyState::Empty);
    }

    #[test]
    fn test_needs_defenders_in_own_territory() {
        let mut world = world();
        let foe = soldier(&mut world, 2, 100.0, 100.0);
        let own = soldier(&mut world, 1, 90.0, 100.0);
        let mut fx = Fixture::new();
        let (mut ctx, _) = fx.ctx(&world);

        let mut army = DefenseArmy::new(&mut ctx, ArmyId(1), &[foe], ArmyKind::Default);
        let single = army.foe_strength();
        let deficit = army.needs_defenders(&ctx).unwrap_or(0.0);
        assert!((deficit - 2.0 * single).abs() < 1e-3);

        army.add_own(&mut ctx, own, false);
        let deficit = army.needs_defenders(&ctx).unwrap_or(0.0);
        assert!((deficit - single).abs() < 1e-3);
    }

    #[test]
    fn test_merge_moves_members() {
        let mut world = world();
        let a = soldier(&mut world, 2, 100.0, 100.0);
        let b = soldier(&mut world, 2, 120.0, 100.0);
        let own = soldier(&mut world, 1, 90.0, 100.0);
        let mut fx = Fixture::new();
        let (mut ctx, naval) = fx.ctx(&world);

        let mut first = DefenseArmy::new(&mut ctx, ArmyId(1), &[a], ArmyKind::Default);
        let mut second = DefenseArmy::new(&mut ctx, ArmyId(2), &[b], ArmyKind::Default);
        second.add_own(&mut ctx, own, false);
        second.assign_unit(&mut ctx, naval, own);

        first.merge(&mut ctx, second);
        assert_eq!(first.foe_entities(), &[a, b]);
        assert_eq!(first.own_entities(), &[own]);
        assert_eq!(first.assignments().target_of(own), Some(b));
        assert_eq!(ctx.tags.army(b), Some(ArmyId(1)));
        assert_eq!(ctx.tags.army(own), Some(ArmyId(1)));
        assert_eq!(ctx.tags.plan(own), Some(PlanTag::Defending));
        assert!(first.assignments().is_symmetric());
    }

    #[test]
    fn test_breakaway_after_refresh_interval() {
        let mut world = world();
        let a = soldier(&mut world, 2, 100.0, 100.0);
        let b = soldier(&mut world, 2, 110.0, 100.0);
        let mut fx = Fixture::new();
        let mut army = {
            let (mut ctx, _) = fx.ctx(&world);
            DefenseArmy::new(&mut ctx, ArmyId(1), &[a, b], ArmyKind::Default)
        };

        world.teleport(b, Position::new(300.0, 100.0));
        world.advance_time(6.0);
        let (mut ctx, naval) = fx.ctx(&world);
        let breakaways = army.update(&mut ctx, naval);
        // Both sit 100 from the refreshed centroid, past the breakaway size
        assert_eq!(breakaways, vec![a, b]);
        assert_eq!(army.state(), ArmyState::Empty);
    }

    #[test]
    fn test_clear_sends_defenders_home() {
        let mut world = world();
        let foe = soldier(&mut world, 2, 300.0, 100.0);
        let home = soldier(&mut world, 1, 100.0, 100.0);
        let abroad = soldier(&mut world, 1, 300.0, 110.0);
        let mut fx = Fixture::new();
        let (mut ctx, naval) = fx.ctx(&world);

        let mut army = DefenseArmy::new(&mut ctx, ArmyId(1), &[foe], ArmyKind::Default);
        army.add_own(&mut ctx, home, false);
        army.add_own(&mut ctx, abroad, false);
        let dest = army.clear(&mut ctx, naval);
        assert_eq!(dest, Some(Position::new(100.0, 100.0)));
        assert!(army.own_entities().is_empty());
        assert!(ctx.commands.iter().any(|c| matches!(c, Command::StopMoving { unit } if *unit == home)));
        assert!(ctx
            .commands
            .iter()
            .any(|c| matches!(c, Command::MoveToRange { unit, .. } if *unit == abroad)));
        assert_eq!(ctx.tags.army(home), None);
    }

    #[test]
    fn test_destroy_event_uses_snapshot() {
        let mut world = world();
        let foe = soldier(&mut world, 2, 100.0, 100.0);
        let mut fx = Fixture::new();
        let mut army = {
            let (mut ctx, _) = fx.ctx(&world);
            DefenseArmy::new(&mut ctx, ArmyId(1), &[foe], ArmyKind::Default)
        };
        let snapshot = world.remove(foe);

        let mut events = EventBatch::new();
        events.destroy.push(crate::state::DestroyEvent { entity: foe, snapshot });
        let (mut ctx, naval) = fx.ctx(&world);
        army.check_events(&mut ctx, naval, &events);
        assert!(army.foe_entities().is_empty());
        assert!(army.foe_strength().abs() < 1e-4);
    }
}
