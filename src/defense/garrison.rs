//! Garrison requests made by the defense
//!
//! The garrison manager owns the actual garrisoning; we only pick a holder
//! and hand the unit over with a `GarrisonFor` command. Requests issued
//! earlier in the same turn count as occupied slots.

use crate::command::{Command, GarrisonKind};
use crate::context::TurnContext;
use crate::core::types::{EntityId, Position};
use crate::defense::manager::DefenseManager;
use crate::state::queries::{ally_structures, own_units};
use crate::state::{is_siege_unit, land_access, AttackKind, EntityClass, EntityInfo};
use crate::tags::PlanTag;
use crate::transport::TransportManager;

/// Parameters of a `garrison_units_inside` call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GarrisonRequest {
    /// Stop once this many slots are taken; defaults to the holder's capacity
    pub min: Option<usize>,
    /// Only garrison if this enemy is within the holder's ranged attack
    pub attacker: Option<EntityId>,
    pub kind: GarrisonKind,
}

impl Default for GarrisonRequest {
    fn default() -> Self {
        Self {
            min: None,
            attacker: None,
            kind: GarrisonKind::Protection,
        }
    }
}

/// Garrisoned units plus the ones already sent this turn
pub fn garrisoned_slots(ctx: &TurnContext, holder: &EntityInfo) -> usize {
    let pending = ctx
        .commands
        .iter()
        .filter(|c| matches!(c, Command::GarrisonFor { holder: h, .. } if *h == holder.id))
        .count();
    holder.garrisoned().len() + pending
}

fn capacity(holder: &EntityInfo) -> usize {
    holder.garrison.as_ref().map_or(0, |g| g.capacity)
}

fn allowed_in(unit: &EntityInfo, holder: &EntityInfo) -> bool {
    holder.garrison.as_ref().map_or(false, |g| unit.has_any_class(g.allowed))
}

/// Nearest allied holder on the unit's land that passes `accept`
fn nearest_holder<'a>(
    ctx: &TurnContext<'a>,
    unit: &EntityInfo,
    mut accept: impl FnMut(&EntityInfo) -> bool,
) -> Option<&'a EntityInfo> {
    let state = ctx.state;
    let pos = unit.position?;
    let access = land_access(state, unit)?;
    let mut nearest: Option<(&'a EntityInfo, f32)> = None;
    for holder in ally_structures(state) {
        if !holder.is_garrison_holder() || !allowed_in(unit, holder) || holder.below_eject_health() {
            continue;
        }
        let Some(holder_pos) = holder.position else {
            continue;
        };
        if land_access(state, holder) != Some(access) || !accept(holder) {
            continue;
        }
        let dist = pos.distance_squared(&holder_pos);
        if nearest.map_or(true, |(_, d)| dist <= d) {
            nearest = Some((holder, dist));
        }
    }
    nearest.map(|(holder, _)| holder)
}

/// Shelter an attacked siege unit in the nearest holder with room
pub fn garrison_siege_unit(ctx: &mut TurnContext, unit: &EntityInfo) -> bool {
    let holder = nearest_holder(ctx, unit, |h| garrisoned_slots(ctx, h) < capacity(h));
    let Some(holder) = holder else {
        return false;
    };
    ctx.commands.push(Command::GarrisonFor {
        unit: unit.id,
        holder: holder.id,
        kind: GarrisonKind::Protection,
    });
    true
}

/// Shelter a hurt unit. Normally only in a healing holder with room; in an
/// `emergency` any holder will do, and a full one ejects a unit to make room.
pub fn garrison_attacked_unit(ctx: &mut TurnContext, unit: &EntityInfo, emergency: bool) -> bool {
    let holder = nearest_holder(ctx, unit, |h| {
        let heals = h.garrison.as_ref().map_or(false, |g| g.buff_heal > 0.0);
        if !emergency && !heals {
            return false;
        }
        garrisoned_slots(ctx, h) < capacity(h) || (emergency && !h.garrisoned().is_empty())
    });
    let Some(holder) = holder else {
        return false;
    };

    let heals = holder.garrison.as_ref().map_or(false, |g| g.buff_heal > 0.0);
    let kind = if !emergency || heals {
        GarrisonKind::Protection
    } else {
        GarrisonKind::Emergency
    };
    if emergency && garrisoned_slots(ctx, holder) >= capacity(holder) {
        if let Some(&first) = holder.garrisoned().first() {
            ctx.commands.push(Command::Unload {
                holder: holder.id,
                unit: first,
            });
        }
    }
    ctx.commands.push(Command::GarrisonFor {
        unit: unit.id,
        holder: holder.id,
        kind,
    });
    true
}

impl DefenseManager {
    /// Fill `target` with nearby soldiers that add arrows to it
    pub fn garrison_units_inside(
        &mut self,
        ctx: &mut TurnContext,
        naval: &mut TransportManager,
        target: &EntityInfo,
        request: &GarrisonRequest,
    ) -> bool {
        let state = ctx.state;
        if target.below_eject_health() {
            return false;
        }
        let Some(holder) = &target.garrison else {
            return false;
        };
        let Some(target_pos) = target.position else {
            return false;
        };
        let min_garrison = request.min.unwrap_or(holder.capacity);
        if garrisoned_slots(ctx, target) >= min_garrison {
            return false;
        }

        let attacker = request.attacker.and_then(|id| ctx.entity(id));
        if let Some(attacker) = attacker {
            // Garrisoning only pays off while the attacker is in arrow range
            let Some(range) = target.ranged_range() else {
                return false;
            };
            let Some(attacker_pos) = attacker.position else {
                return false;
            };
            if attacker_pos.distance_squared(&target_pos) >= range * range {
                return false;
            }
        }
        let allow_melee = match attacker {
            Some(a) if a.has_class(EntityClass::STRUCTURE) => a.ranged_range().is_some(),
            Some(a) => !is_siege_unit(a),
            None => true,
        };

        let access = land_access(state, target);
        let mut candidates: Vec<(EntityId, Position)> = own_units(state)
            .filter(|ent| {
                if ent.position.is_none() || !ent.has_any_class(holder.arrow_classes) {
                    return false;
                }
                if request.kind != GarrisonKind::Decay && !allow_melee && ent.attack(AttackKind::Melee).is_some() {
                    return false;
                }
                if ctx.tags.transport(ent.id).is_some() {
                    return false;
                }
                let plan = ctx.tags.plan(ent.id);
                let in_army = ctx.tags.army(ent.id).and_then(|a| self.get_army(a)).is_some();
                if !in_army && plan.map_or(false, |p| p.is_defending()) {
                    return false;
                }
                // Attack plan units only help a decaying structure we just captured
                if let Some(PlanTag::Attack(_)) = plan {
                    let committed = ctx.tags.subrole(ent.id).map_or(false, |s| s.is_committed());
                    if request.kind != GarrisonKind::Decay && committed {
                        return false;
                    }
                }
                land_access(state, ent) == access
            })
            .filter_map(|ent| ent.position.map(|p| (ent.id, p)))
            .collect();
        candidates.sort_by(|a, b| {
            a.1.distance_squared(&target_pos)
                .total_cmp(&b.1.distance_squared(&target_pos))
        });

        let mut sent = false;
        for (unit, _) in candidates {
            if garrisoned_slots(ctx, target) >= min_garrison {
                break;
            }
            if let Some(PlanTag::Attack(plan)) = ctx.tags.plan(unit) {
                ctx.commands.push(Command::LeaveAttackPlan { unit, plan });
            }
            if let Some(army_id) = ctx.tags.army(unit) {
                if let Some(army) = self.get_army_mut(army_id) {
                    army.remove_own(ctx, naval, unit, None);
                }
            }
            ctx.commands.push(Command::GarrisonFor {
                unit,
                holder: target.id,
                kind: request.kind,
            });
            sent = true;
        }
        sent
    }
}
