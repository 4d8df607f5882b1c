//! Per-entity side tags
//!
//! Army and transport membership, the prior task of a defender, and the
//! boarding bookkeeping of transported units are stored here rather than on
//! the entity. Only the owning army or plan may clear its own tag: every
//! `release_*` call names the owner and is a no-op for a foreign tag.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::types::{ArmyId, EntityId, PlanId, Position, TransportId};
use crate::transport::stall::ProgressWatch;

/// Plan membership, as seen by the attack manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanTag {
    Attack(PlanId),
    /// Freed by a defense army after having been in a plan
    Released,
    /// Defending, taken from an attack plan
    DefendingFromPlan,
    /// Defending, was idle before
    Defending,
}

impl PlanTag {
    pub fn is_defending(self) -> bool {
        matches!(self, PlanTag::Defending | PlanTag::DefendingFromPlan)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subrole {
    Defender,
    Completing,
    Walking,
    Attacking,
    Idle,
    Gatherer,
    Builder,
}

impl Subrole {
    /// Attack plan units in these subroles are committed and left alone
    pub fn is_committed(self) -> bool {
        matches!(self, Subrole::Completing | Subrole::Walking | Subrole::Attacking)
    }
}

/// Boarding status of a transported unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnBoard {
    /// Assigned to this ship, not yet garrisoned
    Ship(EntityId),
    /// Garrisoned in one of the plan's ships
    Aboard,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityTags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub army: Option<ArmyId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subrole: Option<Subrole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub former_subrole: Option<Subrole>,
    /// Units: the plan carrying them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportId>,
    /// Ships: the plan they work for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transporter: Option<TransportId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_board: Option<OnBoard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_pos: Option<Position>,
    /// Last observed progress toward a rendezvous
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch: Option<ProgressWatch>,
}

impl EntityTags {
    pub fn is_empty(&self) -> bool {
        *self == EntityTags::default()
    }
}

/// Side tags of every entity the AI has annotated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagStore {
    tags: BTreeMap<EntityId, EntityTags>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityTags> {
        self.tags.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Mutate the tags of `id`, dropping the entry once nothing is left
    fn edit<R>(&mut self, id: EntityId, f: impl FnOnce(&mut EntityTags) -> R) -> R {
        let entry = self.tags.entry(id).or_default();
        let result = f(entry);
        if entry.is_empty() {
            self.tags.remove(&id);
        }
        result
    }

    // === Army membership ===

    pub fn army(&self, id: EntityId) -> Option<ArmyId> {
        self.get(id).and_then(|t| t.army)
    }

    /// Tag `id` as part of `army`. Fails if another army holds it.
    pub fn claim_army(&mut self, id: EntityId, army: ArmyId) -> bool {
        self.edit(id, |t| match t.army {
            Some(other) if other != army => false,
            _ => {
                t.army = Some(army);
                true
            }
        })
    }

    pub fn release_army(&mut self, id: EntityId, army: ArmyId) -> bool {
        self.edit(id, |t| {
            if t.army == Some(army) {
                t.army = None;
                true
            } else {
                false
            }
        })
    }

    // === Task metadata ===

    pub fn plan(&self, id: EntityId) -> Option<PlanTag> {
        self.get(id).and_then(|t| t.plan)
    }

    pub fn set_plan(&mut self, id: EntityId, plan: Option<PlanTag>) {
        self.edit(id, |t| t.plan = plan);
    }

    pub fn subrole(&self, id: EntityId) -> Option<Subrole> {
        self.get(id).and_then(|t| t.subrole)
    }

    pub fn set_subrole(&mut self, id: EntityId, subrole: Option<Subrole>) {
        self.edit(id, |t| t.subrole = subrole);
    }

    /// Enter defender duty, remembering what the unit was doing
    pub fn enter_defense(&mut self, id: EntityId) {
        self.edit(id, |t| {
            t.plan = Some(match t.plan {
                Some(plan) if plan.is_defending() => plan,
                Some(_) => PlanTag::DefendingFromPlan,
                None => PlanTag::Defending,
            });
            if t.subrole != Some(Subrole::Defender) {
                t.former_subrole = t.subrole;
            }
            t.subrole = Some(Subrole::Defender);
        });
    }

    /// Leave defender duty and restore the remembered task
    pub fn leave_defense(&mut self, id: EntityId) {
        self.edit(id, |t| {
            t.plan = match t.plan {
                Some(PlanTag::DefendingFromPlan) => Some(PlanTag::Released),
                _ => None,
            };
            t.subrole = t.former_subrole.take();
        });
    }

    // === Transport membership ===

    pub fn transport(&self, id: EntityId) -> Option<TransportId> {
        self.get(id).and_then(|t| t.transport)
    }

    pub fn transporter(&self, id: EntityId) -> Option<TransportId> {
        self.get(id).and_then(|t| t.transporter)
    }

    pub fn on_board(&self, id: EntityId) -> Option<OnBoard> {
        self.get(id).and_then(|t| t.on_board)
    }

    pub fn end_pos(&self, id: EntityId) -> Option<Position> {
        self.get(id).and_then(|t| t.end_pos)
    }

    pub fn watch(&self, id: EntityId) -> Option<ProgressWatch> {
        self.get(id).and_then(|t| t.watch)
    }

    /// Tag `id` as carried by `plan`. Fails if another plan holds it.
    pub fn claim_transport(&mut self, id: EntityId, plan: TransportId, end_pos: Position) -> bool {
        self.edit(id, |t| match t.transport {
            Some(other) if other != plan => false,
            _ => {
                t.transport = Some(plan);
                t.end_pos = Some(end_pos);
                true
            }
        })
    }

    /// Clear every transport tag of a unit carried by `plan`
    pub fn release_transport(&mut self, id: EntityId, plan: TransportId) -> bool {
        self.edit(id, |t| {
            if t.transport != Some(plan) {
                return false;
            }
            t.transport = None;
            t.on_board = None;
            t.end_pos = None;
            t.watch = None;
            true
        })
    }

    pub fn claim_transporter(&mut self, ship: EntityId, plan: TransportId) -> bool {
        self.edit(ship, |t| match t.transporter {
            Some(other) if other != plan => false,
            _ => {
                t.transporter = Some(plan);
                true
            }
        })
    }

    pub fn release_transporter(&mut self, ship: EntityId, plan: TransportId) -> bool {
        self.edit(ship, |t| {
            if t.transporter != Some(plan) {
                return false;
            }
            t.transporter = None;
            t.watch = None;
            true
        })
    }

    pub fn set_on_board(&mut self, id: EntityId, on_board: Option<OnBoard>) {
        self.edit(id, |t| t.on_board = on_board);
    }

    pub fn set_watch(&mut self, id: EntityId, watch: Option<ProgressWatch>) {
        self.edit(id, |t| t.watch = watch);
    }

    /// Units carried by `plan`, in id order
    pub fn transported_by(&self, plan: TransportId) -> Vec<EntityId> {
        self.tags
            .iter()
            .filter(|(_, t)| t.transport == Some(plan))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Ships working for `plan`, in id order
    pub fn ships_of(&self, plan: TransportId) -> Vec<EntityId> {
        self.tags
            .iter()
            .filter(|(_, t)| t.transporter == Some(plan))
            .map(|(id, _)| *id)
            .collect()
    }

    // === Housekeeping ===

    /// Carry the tags over to a renamed entity
    pub fn rename(&mut self, old: EntityId, new: EntityId) {
        if let Some(tags) = self.tags.remove(&old) {
            self.tags.insert(new, tags);
        }
    }

    /// Drop the tags of entities for which `alive` is false
    pub fn retain(&mut self, mut alive: impl FnMut(EntityId) -> bool) {
        self.tags.retain(|id, _| alive(*id));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &EntityTags)> {
        self.tags.iter()
    }
}
