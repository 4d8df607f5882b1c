//! Derived queries over the facade

use crate::core::types::{AccessIndex, EntityId};
use crate::state::entity::{EntityClass, EntityInfo};
use crate::state::GameState;

/// Siege engines, and melee elephants which are used the same way
pub fn is_siege_unit(ent: &EntityInfo) -> bool {
    ent.has_class(EntityClass::SIEGE) || ent.has_class(EntityClass::ELEPHANT | EntityClass::MELEE)
}

/// Land region of an entity; garrisoned units use their holder's region
pub fn land_access(state: &dyn GameState, ent: &EntityInfo) -> Option<AccessIndex> {
    if let Some(pos) = ent.position {
        return Some(state.land_access_at(pos));
    }
    let holder = state.entity(ent.holder?)?;
    // Holders cannot themselves be garrisoned, so one hop is enough
    holder.position.map(|pos| state.land_access_at(pos))
}

/// Decide whether `ent` should capture (true) or destroy (false) `target`
pub fn allow_capture(state: &dyn GameState, ent: &EntityInfo, target: &EntityInfo) -> bool {
    let Some(capturable) = &target.capturable else {
        return false;
    };
    if !ent.can_attack_target(target, true) || ent.capture_strength() <= 0.0 {
        return false;
    }
    if target.invulnerable {
        return true;
    }
    // Always try to recover points from an ally, unless it is decaying anyway
    if state.is_ally(target.owner) {
        return !target.decaying;
    }

    let mut anti_capture = capturable.regen_rate;
    for garrisoned in target.garrisoned() {
        let strength = state.entity(*garrisoned).map(|g| g.capture_strength()).unwrap_or(0.0);
        anti_capture += capturable.garrison_regen_rate * strength;
    }
    if target.decaying {
        anti_capture -= capturable.decay_rate;
    }

    let capture = ent.capture_strength() / (0.1 + 0.9 * target.health_level());
    let total = capturable.total();
    if target.has_defensive_fire() && !target.garrisoned().is_empty() {
        capture > anti_capture + total / 50.0
    } else {
        capture > anti_capture + total / 80.0
    }
}

pub fn own_units<'a>(state: &'a dyn GameState) -> impl Iterator<Item = &'a EntityInfo> + 'a {
    let player = state.player();
    state
        .entities()
        .filter(move |e| e.owner == player && e.has_class(EntityClass::UNIT))
}

pub fn own_structures<'a>(state: &'a dyn GameState) -> impl Iterator<Item = &'a EntityInfo> + 'a {
    let player = state.player();
    state
        .entities()
        .filter(move |e| e.owner == player && e.has_class(EntityClass::STRUCTURE))
}

/// Structures of mutual allies, our own included
pub fn ally_structures<'a>(state: &'a dyn GameState) -> impl Iterator<Item = &'a EntityInfo> + 'a {
    state
        .entities()
        .filter(move |e| e.has_class(EntityClass::STRUCTURE) && state.is_mutual_ally(e.owner))
}

/// Nearest of our dropsites on the unit's land region
pub fn nearest_dropsite(state: &dyn GameState, ent: &EntityInfo) -> Option<EntityId> {
    let pos = ent.position?;
    let access = land_access(state, ent)?;
    own_structures(state)
        .filter(|s| s.has_class(EntityClass::DROPSITE) && s.foundation_progress.is_none())
        .filter_map(|s| s.position.map(|p| (s, p)))
        .filter(|(_, p)| state.land_access_at(*p) == access)
        .min_by(|(_, a), (_, b)| pos.distance_squared(a).total_cmp(&pos.distance_squared(b)))
        .map(|(s, _)| s.id)
}
