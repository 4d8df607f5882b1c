//! Defense manager
//!
//! Turns dangerous enemies into armies, keeps the armies tidy (merging,
//! breakaways, territory checks) and hands our idle soldiers to the armies
//! that are short of strength. It also reacts to attack events: garrisoning
//! hurt or fragile units, retaliating, and scuttling structures that cannot
//! be held.

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::context::TurnContext;
use crate::core::config::PetraConfig;
use crate::core::types::{AccessIndex, ArmyId, EntityId, PlayerId, Position, GAIA};
use crate::defense::army::{ArmyKind, ArmyState, DefenseArmy};
use crate::defense::garrison::{garrison_attacked_unit, garrison_siege_unit, GarrisonRequest};
use crate::defense::strength::max_strength;
use crate::state::queries::{own_structures, own_units};
use crate::state::{allow_capture, is_siege_unit, land_access, EntityClass, EntityInfo, EventBatch, UnitAiState};
use crate::tags::PlanTag;
use crate::transport::TransportManager;

/// Below this cooperation we ignore threats to an ally's civic centre
const COOPERATION_FOR_CIVIC_CENTRES: f32 = 0.3;
/// Below this, foundations of allied civic centres are not defended
const COOPERATION_FOR_FOUNDATIONS: f32 = 0.6;
/// Above this, any structure of an ally under heavy attack is defended
const COOPERATION_FOR_ALL_STRUCTURES: f32 = 0.7;

/// Enemy player -> attacked ally -> count
type AttackTally = BTreeMap<PlayerId, BTreeMap<PlayerId, u32>>;

/// An army still short of strength this turn
struct Shortfall {
    army: usize,
    access: Option<AccessIndex>,
    need: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefenseManager {
    armies: Vec<DefenseArmy>,
    next_army_id: u32,
    /// Enemy structures our units were caught repairing near
    target_list: Vec<EntityId>,
    army_merge_size: f32,
    /// Dangerous enemy units seen in allied territory
    attacking_units: AttackTally,
    /// Enemy armies standing in allied territory
    attacking_armies: AttackTally,
    /// Number of enemies attacking each ally
    attacked_allies: BTreeMap<PlayerId, u32>,
}

impl DefenseManager {
    pub fn new(config: &PetraConfig) -> Self {
        Self {
            armies: Vec::new(),
            next_army_id: 0,
            target_list: Vec::new(),
            army_merge_size: config.defense.army_merge_size,
            attacking_units: AttackTally::new(),
            attacking_armies: AttackTally::new(),
            attacked_allies: BTreeMap::new(),
        }
    }

    pub fn armies(&self) -> &[DefenseArmy] {
        &self.armies
    }

    pub fn target_list(&self) -> &[EntityId] {
        &self.target_list
    }

    pub fn get_army(&self, id: ArmyId) -> Option<&DefenseArmy> {
        self.armies.iter().find(|a| a.id() == id)
    }

    pub fn get_army_mut(&mut self, id: ArmyId) -> Option<&mut DefenseArmy> {
        self.armies.iter_mut().find(|a| a.id() == id)
    }

    fn army_index(&self, id: ArmyId) -> Option<usize> {
        self.armies.iter().position(|a| a.id() == id)
    }

    pub fn attacked_allies(&self, ally: PlayerId) -> u32 {
        self.attacked_allies.get(&ally).copied().unwrap_or(0)
    }

    pub fn update(&mut self, ctx: &mut TurnContext, naval: &mut TransportManager, events: &EventBatch) {
        self.check_events(ctx, naval, events);

        let state = ctx.state;
        self.target_list.retain(|id| {
            ctx.entity(*id)
                .map_or(false, |t| t.position.is_some() && state.is_enemy(t.owner))
        });

        // Enemies count as attacking an ally through an army, or through
        // enough single units roaming its territory
        let threshold = ctx.config.defense.attacking_units_threshold;
        let mut attacks = self.attacking_armies.clone();
        for (enemy, allies) in &self.attacking_units {
            for (ally, count) in allies {
                if *count >= threshold {
                    *attacks.entry(*enemy).or_default().entry(*ally).or_default() += 1;
                }
            }
        }
        self.attacked_allies.clear();
        for allies in attacks.values() {
            for ally in allies.keys() {
                *self.attacked_allies.entry(*ally).or_default() += 1;
            }
        }

        self.check_enemy_armies(ctx, naval);
        self.check_enemy_units(ctx);
        self.assign_defenders(ctx, naval);
    }

    /// Willingness to help `ally`, raised when several enemies gang up on it
    pub fn cooperation_level(&self, ctx: &TurnContext, ally: PlayerId) -> f32 {
        let mut level = ctx.config.personality.cooperative;
        let attacked = self.attacked_allies(ally);
        if attacked > 1 {
            level += 0.2 * (attacked - 1) as f32;
        }
        level
    }

    /// Put `id` in the nearest default army that accepts it, or a new one.
    /// Returns the army it joined.
    pub fn make_into_army(&mut self, ctx: &mut TurnContext, id: EntityId, kind: ArmyKind) -> Option<ArmyId> {
        if ctx.tags.army(id).is_some() {
            return None;
        }
        if kind == ArmyKind::Default {
            for army in &mut self.armies {
                if army.kind() == ArmyKind::Default && army.add_foe(ctx, id, false) {
                    army.recalculate_position(ctx, true);
                    return Some(army.id());
                }
            }
        }

        let army_id = ArmyId(self.next_army_id);
        self.next_army_id += 1;
        let army = DefenseArmy::new(ctx, army_id, &[id], kind);
        if army.state() == ArmyState::Empty {
            return None;
        }
        info!("{} created against {} ({:?})", army_id, id, kind);
        self.armies.push(army);
        Some(army_id)
    }

    /// Dissolve an army, sending its defenders home
    pub fn abort_army(&mut self, ctx: &mut TurnContext, naval: &mut TransportManager, id: ArmyId) -> bool {
        let Some(idx) = self.army_index(id) else {
            return false;
        };
        let mut army = self.armies.remove(idx);
        army.clear(ctx, naval);
        debug!("{} aborted", id);
        true
    }

    /// Units dropped by their transport plan leave their army too
    pub fn release_units(&mut self, ctx: &mut TurnContext, naval: &mut TransportManager, units: &[EntityId]) {
        for &unit in units {
            let Some(army_id) = ctx.tags.army(unit) else {
                continue;
            };
            if let Some(army) = self.get_army_mut(army_id) {
                army.remove_own(ctx, naval, unit, None);
            }
        }
    }

    /// Ask the attack manager to go after one of our targets instead of
    /// disbanding, when the army's defenders are already close to it
    pub fn switch_to_attack(&self, ctx: &mut TurnContext, army: &DefenseArmy) {
        let state = ctx.state;
        let range = ctx.config.defense.switch_to_attack_range;
        for &target_id in &self.target_list {
            let Some(target) = ctx.entity(target_id) else {
                continue;
            };
            let Some(target_pos) = target.position else {
                continue;
            };
            if !state.is_enemy(target.owner) {
                continue;
            }
            let access = land_access(state, target);
            let close = army.own_entities().iter().any(|id| {
                ctx.entity(*id).map_or(false, |ent| {
                    ent.position.map_or(false, |p| p.distance_squared(&target_pos) <= range)
                        && land_access(state, ent) == access
                })
            });
            if close {
                ctx.commands.push(Command::SwitchDefenseToAttack {
                    target: target_id,
                    army: Some(army.id()),
                    range: None,
                    unique_target: true,
                });
                info!("{} switched to attacking {}", army.id(), target_id);
                return;
            }
        }
    }

    /// Whether an enemy unit threatens us or an ally we care about
    pub fn is_dangerous(&mut self, ctx: &TurnContext, ent: &EntityInfo) -> bool {
        let state = ctx.state;
        let player = ctx.player();
        let Some(pos) = ent.position else {
            return false;
        };
        let territory_owner = state.territory_owner(pos);
        if territory_owner != GAIA && !state.is_ally(territory_owner) {
            return false;
        }

        // Builders: raising a structure in our land, or a civic centre near ours
        if ent.ai_state() == Some(UnitAiState::Repairing) {
            if let Some(target_id) = ent.order_target() {
                if self.target_list.contains(&target_id) {
                    return true;
                }
                if let Some(target) = ctx.entity(target_id) {
                    let enemy_target = state.is_enemy(target.owner);
                    if enemy_target && territory_owner == player {
                        if target.has_class(EntityClass::STRUCTURE) {
                            self.target_list.push(target_id);
                        }
                        return true;
                    } else if enemy_target && target.has_class(EntityClass::CIV_CENTRE) {
                        let proximity = ctx.config.defense.foundation_proximity;
                        let near_ours = own_structures(state).any(|b| {
                            b.foundation_progress != Some(0.0)
                                && b.position.map_or(false, |p| p.distance_squared(&pos) <= proximity)
                        });
                        if near_ours {
                            self.target_list.push(target_id);
                            return true;
                        }
                    }
                }
            }
        }

        if !ent.can_attack() || ent.has_class(EntityClass::SUPPORT) {
            return false;
        }

        let danger = match ent.ranged_range() {
            Some(range) => {
                let reach = range + ctx.config.defense.ranged_danger_margin;
                reach * reach
            }
            None => ctx.config.defense.danger_radius,
        };
        let within = |other: &EntityInfo| other.position.map_or(false, |p| p.distance_squared(&pos) < danger);

        if self
            .target_list
            .iter()
            .filter_map(|id| ctx.entity(*id))
            .any(|t| within(t))
        {
            return true;
        }

        // Civic centres of the allies we are willing to help
        for cc in state.entities().filter(|e| e.has_class(EntityClass::CIV_CENTRE)) {
            if !state.is_exclusive_ally(cc.owner) || cc.foundation_progress == Some(0.0) {
                continue;
            }
            let cooperation = self.cooperation_level(ctx, cc.owner);
            if cooperation < COOPERATION_FOR_CIVIC_CENTRES
                || (cooperation < COOPERATION_FOR_FOUNDATIONS && cc.foundation_progress.is_some())
            {
                continue;
            }
            if within(cc) {
                return true;
            }
        }

        for building in own_structures(state) {
            if building.foundation_progress == Some(0.0) || !within(building) {
                continue;
            }
            let Some(bpos) = building.position else {
                continue;
            };
            if !state.is_blinking(bpos) || state.is_defendable(building.id) {
                return true;
            }
        }

        if state.is_mutual_ally(territory_owner) {
            // An ally under attack from several sides gets all its structures covered
            if territory_owner != player
                && self.attacked_allies(territory_owner) > 1
                && self.cooperation_level(ctx, territory_owner) > COOPERATION_FOR_ALL_STRUCTURES
            {
                let threatened = state.entities().any(|b| {
                    b.owner == territory_owner
                        && b.has_class(EntityClass::STRUCTURE)
                        && b.foundation_progress != Some(0.0)
                        && within(b)
                        && b.position.map_or(false, |p| !state.is_blinking(p))
                });
                if threatened {
                    return true;
                }
            }
            *self
                .attacking_units
                .entry(ent.owner)
                .or_default()
                .entry(territory_owner)
                .or_default() += 1;
        }
        false
    }

    /// Scan one player per turn for dangerous units
    pub fn check_enemy_units(&mut self, ctx: &mut TurnContext) {
        let state = ctx.state;
        let player = ctx.player();
        let num_players = state.num_players().max(1) as u64;
        let scanned = (state.played_turn() % num_players) as PlayerId;
        self.attacking_units.remove(&scanned);

        if scanned == player {
            // Our own turn: look for a structure whose capture points are slipping
            if !self.armies.is_empty() {
                return;
            }
            let threshold = ctx.config.defense.capture_recovery_threshold;
            let losing = own_structures(state).find(|b| {
                if b.decaying {
                    return false;
                }
                let Some(capturable) = &b.capturable else {
                    return false;
                };
                let lost: f32 = capturable
                    .points
                    .iter()
                    .enumerate()
                    .filter(|(p, _)| state.is_enemy(*p as PlayerId))
                    .map(|(_, points)| *points)
                    .sum();
                lost > 0.0 && lost >= (threshold * capturable.held_by(player)).ceil()
            });
            if let Some(building) = losing {
                info!("recovering capture points of {}", building.id);
                self.make_into_army(ctx, building.id, ArmyKind::Capturing);
            }
            return;
        } else if !state.is_enemy(scanned) {
            return;
        }

        let candidates: Vec<EntityId> = state
            .entities()
            .filter(|e| e.owner == scanned && e.has_class(EntityClass::UNIT))
            .map(|e| e.id)
            .collect();
        for id in candidates {
            if ctx.tags.army(id).is_some() {
                continue;
            }
            let Some(ent) = ctx.entity(id) else {
                continue;
            };
            // Animals only matter while they hunt one of us
            if ent.has_class(EntityClass::ANIMAL) {
                if ent.ai_state() != Some(UnitAiState::Combat) {
                    continue;
                }
                let hunted_ally = ent
                    .order_target()
                    .and_then(|t| ctx.entity(t))
                    .map_or(false, |t| state.is_ally(t.owner));
                if !hunted_ally {
                    continue;
                }
            }
            if ent.has_any_class(EntityClass::SHIP | EntityClass::TRADER) {
                continue;
            }
            if self.is_dangerous(ctx, ent) {
                self.make_into_army(ctx, id, ArmyKind::Default);
            }
        }

        // In peaceful times, capture gaia structures in our territory
        if scanned != GAIA || self.armies.len() > 1 || !state.has_active_base() {
            return;
        }
        let gaia_structures: Vec<EntityId> = state
            .entities()
            .filter(|e| {
                e.owner == GAIA
                    && e.has_class(EntityClass::STRUCTURE)
                    && (e.capturable.is_some() || e.has_defensive_fire())
                    && e.position.map_or(false, |p| state.territory_owner(p) == player)
            })
            .map(|e| e.id)
            .collect();
        for id in gaia_structures {
            if ctx.tags.army(id).is_none() {
                self.make_into_army(ctx, id, ArmyKind::Capturing);
            }
        }
    }

    /// Army upkeep: events are already applied, now merge neighbours,
    /// split off strays and drop armies that left our concern
    pub fn check_enemy_armies(&mut self, ctx: &mut TurnContext, naval: &mut TransportManager) {
        let mut i = 0;
        while i < self.armies.len() {
            let breakaways = self.armies[i].update(ctx, naval);
            for id in breakaways {
                self.make_into_army(ctx, id, ArmyKind::Default);
            }
            if self.armies[i].state() == ArmyState::Empty {
                let mut army = self.armies.remove(i);
                if army.kind() == ArmyKind::Default {
                    self.switch_to_attack(ctx, &army);
                }
                army.clear(ctx, naval);
                debug!("{} emptied", army.id());
                continue;
            }
            i += 1;
        }

        // Merge default armies close to each other
        let mut i = 0;
        while i < self.armies.len() {
            if self.armies[i].kind() != ArmyKind::Default {
                i += 1;
                continue;
            }
            let mut j = i + 1;
            while j < self.armies.len() {
                let close = self.armies[j].kind() == ArmyKind::Default
                    && self.armies[i]
                        .foe_position()
                        .distance_squared(&self.armies[j].foe_position())
                        <= self.army_merge_size;
                if close {
                    let other = self.armies.remove(j);
                    self.armies[i].merge(ctx, other);
                } else {
                    j += 1;
                }
            }
            i += 1;
        }

        if ctx.state.played_turn() % ctx.config.defense.army_check_period.max(1) != 0 {
            return;
        }

        // Territory check: keep armies standing on allied ground, and on
        // neutral ground only next to something worth protecting
        let state = ctx.state;
        let player = ctx.player();
        self.attacking_armies.clear();
        let mut i = 0;
        while i < self.armies.len() {
            self.armies[i].recalculate_position(ctx, false);
            let pos = self.armies[i].foe_position();
            let owner = state.territory_owner(pos);

            if !state.is_enemy(owner) {
                if state.is_mutual_ally(owner) {
                    let enemy = self.armies[i].foe_entities().iter().find_map(|id| ctx.entity(*id));
                    if let Some(enemy) = enemy {
                        *self
                            .attacking_armies
                            .entry(enemy.owner)
                            .or_default()
                            .entry(owner)
                            .or_default() += 1;
                    }
                }
                i += 1;
                continue;
            }

            if owner != GAIA {
                // Inside enemy territory
                let mut army = self.armies.remove(i);
                army.clear(ctx, naval);
                debug!("{} left into enemy territory", army.id());
                continue;
            }

            let near_cc = state.entities().any(|cc| {
                cc.has_class(EntityClass::CIV_CENTRE)
                    && state.is_ally(cc.owner)
                    && (cc.owner == player
                        || self.cooperation_level(ctx, cc.owner) >= COOPERATION_FOR_CIVIC_CENTRES)
                    && cc
                        .position
                        .map_or(false, |p| p.distance_squared(&pos) <= ctx.config.defense.neutral_cc_radius)
            });
            let near_dock = own_structures(state).any(|dock| {
                dock.has_class(EntityClass::DOCK)
                    && dock
                        .position
                        .map_or(false, |p| p.distance_squared(&pos) <= ctx.config.defense.neutral_dock_radius)
            });
            if near_cc || near_dock {
                i += 1;
                continue;
            }

            if self.armies[i].kind() == ArmyKind::Default {
                self.switch_to_attack(ctx, &self.armies[i]);
            }
            let mut army = self.armies.remove(i);
            army.clear(ctx, naval);
            debug!("{} left for neutral ground", army.id());
        }
    }

    /// Hand idle soldiers to the armies that are short of strength
    pub fn assign_defenders(&mut self, ctx: &mut TurnContext, naval: &mut TransportManager) {
        if self.armies.is_empty() {
            return;
        }
        let state = ctx.state;
        let player = ctx.player();

        let mut needing = Vec::new();
        for (idx, army) in self.armies.iter_mut().enumerate() {
            let Some(need) = army.needs_defenders(ctx) else {
                continue;
            };
            let access = army
                .foe_entities()
                .iter()
                .filter_map(|id| ctx.entity(*id))
                .find(|e| e.position.is_some())
                .and_then(|e| land_access(state, e));
            if access.is_none() {
                warn!("{} has no foe with a known position", army.id());
            }
            army.recalculate_position(ctx, false);
            needing.push(Shortfall { army: idx, access, need });
        }
        if needing.is_empty() {
            return;
        }

        let mut potential: Vec<Option<EntityId>> = own_units(state)
            .filter(|ent| {
                if ent.position.is_none() || !ent.can_attack() {
                    return false;
                }
                if ent.has_any_class(EntityClass::STONE_THROWER | EntityClass::SUPPORT | EntityClass::FISHING_BOAT) {
                    return false;
                }
                if ctx.tags.transport(ent.id).is_some() || ctx.tags.transporter(ent.id).is_some() {
                    return false;
                }
                if state.is_critical(ent.id) {
                    return false;
                }
                match ctx.tags.plan(ent.id) {
                    None | Some(PlanTag::Released) => true,
                    Some(plan) if plan.is_defending() => false,
                    // Attack plan units only when not yet committed
                    Some(PlanTag::Attack(_)) => !ctx.tags.subrole(ent.id).map_or(false, |s| s.is_committed()),
                    Some(_) => false,
                }
            })
            .map(|ent| Some(ent.id))
            .collect();

        let reserve_size = ctx.config.allocation.reserve_size;
        let reserve_distance = ctx.config.allocation.reserve_distance;
        // First pass sticks to the unit's own land, the second lets transports in
        for pass in 0..2 {
            let mut backup = 0;
            for slot in potential.iter_mut() {
                let Some(id) = *slot else {
                    continue;
                };
                let Some(ent) = ctx.entity(id) else {
                    continue;
                };
                let Some(pos) = ent.position else {
                    continue;
                };
                let access = if pass == 0 { land_access(state, ent) } else { None };

                let mut best: Option<(usize, f32)> = None;
                for (n, shortfall) in needing.iter().enumerate() {
                    if access.is_some() && shortfall.access != access {
                        continue;
                    }
                    let army = &self.armies[shortfall.army];
                    let can_fight = army.foe_entities().iter().filter_map(|f| ctx.entity(*f)).any(|foe| {
                        ent.can_attack_target(foe, allow_capture(state, ent, foe))
                    });
                    if !can_fight {
                        continue;
                    }
                    let dist = pos.distance_squared(&army.foe_position());
                    if best.map_or(false, |(_, d)| dist > d) {
                        continue;
                    }
                    best = Some((n, dist));
                }

                // Keep a few units home in case something closer shows up
                let far = best.map_or(true, |(n, d)| {
                    d > reserve_distance
                        && state.territory_owner(self.armies[needing[n].army].foe_position()) != player
                });
                if backup < reserve_size && far {
                    backup += 1;
                    *slot = None;
                    continue;
                }
                let Some((n, _)) = best else {
                    continue;
                };

                needing[n].need -= max_strength(ent, &ctx.config.strength);
                let army = &mut self.armies[needing[n].army];
                army.add_own(ctx, id, false);
                army.assign_unit(ctx, naval, id);
                *slot = None;
                if needing[n].need <= 0.0 {
                    needing.remove(n);
                    if needing.is_empty() {
                        return;
                    }
                }
            }
        }

        let positions: Vec<Position> = needing
            .iter()
            .map(|s| self.armies[s.army].foe_position())
            .collect();
        info!("{} armies still short of defenders, requesting emergency units", positions.len());
        ctx.commands.push(Command::TrainEmergencyUnits { positions });
    }

    /// React to this turn's events before the regular upkeep
    pub fn check_events(&mut self, ctx: &mut TurnContext, naval: &mut TransportManager, events: &EventBatch) {
        let state = ctx.state;
        let player = ctx.player();

        for army in &mut self.armies {
            army.check_events(ctx, naval, events);
        }

        // A civic centre captured from us or an ally is worth taking back
        for evt in &events.ownership_changed {
            if !state.is_mutual_ally(evt.from) || evt.to == GAIA {
                continue;
            }
            let is_cc = ctx
                .entity(evt.entity)
                .map_or(false, |e| e.has_class(EntityClass::CIV_CENTRE));
            if is_cc {
                ctx.commands.push(Command::SwitchDefenseToAttack {
                    target: evt.entity,
                    army: None,
                    range: Some(ctx.config.defense.captured_cc_attack_range),
                    unique_target: false,
                });
                info!("allied civic centre {} captured, counterattacking", evt.entity);
            }
        }

        let all_attacked: AHashMap<EntityId, Option<EntityId>> =
            events.attacked.iter().map(|e| (e.target, e.attacker)).collect();
        // Units already pulled into a retaliation this turn
        let mut recruited: AHashSet<EntityId> = AHashSet::new();

        for evt in &events.attacked {
            let Some(target) = ctx.entity(evt.target) else {
                continue;
            };
            let Some(target_pos) = target.position else {
                continue;
            };
            let attacker = evt.attacker.and_then(|id| ctx.entity(id));

            // One of our defensive structures is shooting: man it
            if let Some(attacker) = attacker {
                let hits_back =
                    !target.has_class(EntityClass::STRUCTURE) || target.ranged_range().is_some();
                if attacker.owner == player
                    && state.is_enemy(target.owner)
                    && !attacker.has_class(EntityClass::SHIP)
                    && hits_back
                    && attacker.position.is_some()
                    && attacker.is_garrison_holder()
                    && attacker.arrow_multiplier() > 0.0
                    && (target.owner != GAIA
                        || !target.has_class(EntityClass::UNIT)
                        || target.ai_state() == Some(UnitAiState::Combat))
                {
                    let request = GarrisonRequest {
                        attacker: Some(target.id),
                        ..GarrisonRequest::default()
                    };
                    self.garrison_units_inside(ctx, naval, attacker, &request);
                }
            }

            if target.owner != player {
                continue;
            }
            if attacker.map_or(false, |a| state.is_ally(a.owner)) {
                continue;
            }

            if target.has_class(EntityClass::FISHING_BOAT) {
                // Fishing boats just get out of range
                if let Some((attacker, apos)) = attacker.and_then(|a| a.position.map(|p| (a, p))) {
                    let busy = target.ai_state() == Some(UnitAiState::Gathering);
                    if target.is_idle() || busy {
                        let range = attacker.ranged_range().map_or(25.0, |r| r + 15.0);
                        if range * range > apos.distance_squared(&target_pos) {
                            ctx.commands.move_to_range(target.id, apos, range, range + 5.0);
                        }
                    }
                }
                continue;
            }
            if target.has_class(EntityClass::SHIP) {
                continue;
            }

            if target.has_class(EntityClass::STRUCTURE) {
                let indefensible = (state.is_blinking(target_pos) && !state.is_defendable(target.id))
                    || !state.in_anchored_base(target.id);
                if indefensible {
                    // Destroy it before the enemy gets it
                    if let Some(capturable) = &target.capturable {
                        let total = capturable.total();
                        if total > 0.0 {
                            let ratio = capturable.held_by(player) / total;
                            let (low, high) = ctx.config.defense.scuttle_capture_window;
                            if ratio > low && ratio < high {
                                info!("scuttling indefensible {}", target.id);
                                ctx.commands.destroy(target.id);
                            }
                        }
                    }
                    continue;
                }
            }

            let plan = ctx.tags.plan(target.id);
            if let Some(PlanTag::Attack(plan_id)) = plan {
                if state.attack_plan_started(plan_id) {
                    continue;
                }
            }

            // Treat the attacker as an army of its own
            if let Some(attacker) = attacker {
                if let Some(apos) = attacker.position {
                    if ctx.tags.army(attacker.id).is_none()
                        && !attacker.has_any_class(EntityClass::STRUCTURE | EntityClass::SHIP)
                    {
                        let owner = state.territory_owner(apos);
                        if owner == GAIA || state.is_ally(owner) {
                            self.make_into_army(ctx, attacker.id, ArmyKind::Default);
                        }
                    }
                }
            }

            if let Some(army_id) = ctx.tags.army(target.id) {
                let abort = self.get_army(army_id).map_or(false, |army| {
                    if army.kind() != ArmyKind::Capturing {
                        return false;
                    }
                    if army.own_entities().contains(&target.id) {
                        // A capturer under fire gives up
                        true
                    } else if army.foe_entities().first() == Some(&target.id) && target.owner == player {
                        // Our own structure: stop once no enemy holds points
                        !target.capturable.as_ref().map_or(false, |c| {
                            c.points
                                .iter()
                                .enumerate()
                                .any(|(p, points)| *points > 0.0 && state.is_enemy(p as PlayerId))
                        })
                    } else {
                        false
                    }
                });
                if abort {
                    self.abort_army(ctx, naval, army_id);
                }
                continue;
            }

            let defending = plan.map_or(false, |p| p.is_defending());
            let free = ctx.tags.transport(target.id).is_none() && !defending;
            if target.has_class(EntityClass::SUPPORT)
                && target.health_level() < ctx.config.garrison_health.medium
                && free
            {
                garrison_attacked_unit(ctx, target, false);
                continue;
            }
            if target.has_class(EntityClass::STONE_THROWER) && free {
                garrison_siege_unit(ctx, target);
                continue;
            }

            let Some(attacker) = attacker else {
                continue;
            };
            if attacker.position.is_none() {
                continue;
            }

            if target.is_garrison_holder() && target.arrow_multiplier() > 0.0 {
                let request = GarrisonRequest {
                    attacker: Some(attacker.id),
                    ..GarrisonRequest::default()
                };
                self.garrison_units_inside(ctx, naval, target, &request);
            }

            if !target.has_class(EntityClass::UNIT) || !attacker.has_class(EntityClass::UNIT) {
                continue;
            }
            if target.has_class(EntityClass::SUPPORT) || !target.can_attack() {
                continue;
            }
            recruited.insert(target.id);

            if let Some(current_id) = target.order_target() {
                if let Some(current) = ctx.entity(current_id) {
                    let ai = target.ai_state();
                    if ai == Some(UnitAiState::Combat)
                        && (current_id == attacker.id
                            || !current.has_any_class(EntityClass::STRUCTURE | EntityClass::SUPPORT))
                    {
                        continue;
                    }
                    if ai == Some(UnitAiState::Repairing) && current.has_defensive_fire() {
                        continue;
                    }
                    // Busy capturing: pull a fellow capturer off instead
                    if ai == Some(UnitAiState::Combat) && !is_siege_unit(current) {
                        if let Some(helper) = nearest_capturer(ctx, current_id, attacker, &all_attacked, &recruited) {
                            recruited.insert(helper.id);
                            let capture = allow_capture(state, helper, attacker);
                            ctx.commands.attack(helper.id, attacker.id, capture, false);
                            debug!("{} leaves its capture to fight {}", helper.id, attacker.id);
                            continue;
                        }
                    }
                }
            }

            let capture = allow_capture(state, target, attacker);
            if target.can_attack_target(attacker, capture) {
                ctx.commands.attack(target.id, attacker.id, capture, false);
            }
        }
    }
}

/// Nearest of our units capturing `structure` that is free to turn on
/// `attacker`
fn nearest_capturer<'a>(
    ctx: &TurnContext<'a>,
    structure: EntityId,
    attacker: &EntityInfo,
    all_attacked: &AHashMap<EntityId, Option<EntityId>>,
    recruited: &AHashSet<EntityId>,
) -> Option<&'a EntityInfo> {
    let state = ctx.state;
    let apos = attacker.position?;
    let mut nearest: Option<(&'a EntityInfo, f32)> = None;
    for id in state.capturing_units(structure) {
        if recruited.contains(&id) || all_attacked.contains_key(&id) {
            continue;
        }
        let Some(ent) = ctx.entity(id) else {
            continue;
        };
        let Some(pos) = ent.position else {
            continue;
        };
        if ent.ai_state() != Some(UnitAiState::Combat) || ent.order_target() != Some(structure) {
            continue;
        }
        if !ent.can_attack_target(attacker, allow_capture(state, ent, attacker)) {
            continue;
        }
        let dist = pos.distance_squared(&apos);
        if nearest.map_or(true, |(_, d)| dist < d) {
            nearest = Some((ent, dist));
        }
    }
    nearest.map(|(ent, _)| ent)
}
