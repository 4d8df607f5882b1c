//! Naval side of the military: owns the transport plans

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::TurnContext;
use crate::core::types::{AccessIndex, EntityId, Position, TransportId};
use crate::transport::plan::{TransportPlan, TransportState};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportManager {
    plans: Vec<TransportPlan>,
    next_id: u32,
}

impl TransportManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plans(&self) -> &[TransportPlan] {
        &self.plans
    }

    pub fn get_plan(&self, id: TransportId) -> Option<&TransportPlan> {
        self.plans.iter().find(|p| p.id() == id)
    }

    pub fn get_plan_mut(&mut self, id: TransportId) -> Option<&mut TransportPlan> {
        self.plans.iter_mut().find(|p| p.id() == id)
    }

    fn allocate_id(&mut self) -> TransportId {
        let id = TransportId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Ship `unit` from land `start` to land `end`, joining a plan still
    /// boarding on the same route when there is one
    pub fn require_transport(
        &mut self,
        ctx: &mut TurnContext,
        unit: EntityId,
        start: AccessIndex,
        end: AccessIndex,
        end_pos: Position,
    ) -> bool {
        if ctx.tags.transport(unit).is_some() {
            return false;
        }
        if let Some(plan) = self.plans.iter_mut().find(|p| {
            p.state() == TransportState::Boarding && p.start_index() == start && p.end_index() == end && !p.is_canceled()
        }) {
            return plan.add_unit(ctx, unit, end_pos);
        }

        let id = self.allocate_id();
        match TransportPlan::new(ctx, id, &[unit], start, end, end_pos, None) {
            Ok(plan) => {
                self.plans.push(plan);
                true
            }
            Err(e) => {
                warn!("transport of unit {} abandoned: {}", unit, e);
                false
            }
        }
    }

    /// Move `units` out of plan `from` into a new plan on the same route
    pub fn split_transport(&mut self, ctx: &mut TurnContext, from: TransportId, units: &[EntityId]) -> Option<TransportId> {
        let (start, end, end_pos) = {
            let plan = self.get_plan(from)?;
            (plan.start_index(), plan.end_index(), plan.end_pos())
        };
        let moved: Vec<(EntityId, Position)> = units
            .iter()
            .filter(|u| ctx.tags.transport(**u) == Some(from))
            .map(|u| (*u, ctx.tags.end_pos(*u).unwrap_or(end_pos)))
            .collect();
        if moved.is_empty() {
            return None;
        }
        for (unit, _) in &moved {
            ctx.tags.release_transport(*unit, from);
        }

        let id = self.allocate_id();
        match TransportPlan::new(ctx, id, &[], start, end, end_pos, None) {
            Ok(mut plan) => {
                for (unit, unit_end) in moved {
                    plan.add_unit(ctx, unit, unit_end);
                }
                info!("transport {} split into transport {}", from, id);
                self.plans.push(plan);
                Some(id)
            }
            Err(e) => {
                warn!("split of transport {} failed: {}", from, e);
                None
            }
        }
    }

    /// Advance every plan and discard the finished ones.
    ///
    /// Returns the units dropped by plans this turn; their armies must let
    /// them go.
    pub fn update(&mut self, ctx: &mut TurnContext) -> Vec<EntityId> {
        let mut released = Vec::new();
        let mut splits = Vec::new();
        for plan in &mut self.plans {
            if plan.needs_transport_ships() {
                plan.assign_ship(ctx);
            }
            plan.update(ctx);
            released.extend(plan.take_reset_units());
            let split = plan.take_split();
            if !split.is_empty() {
                splits.push((plan.id(), split));
            }
        }
        for (from, units) in splits {
            self.split_transport(ctx, from, &units);
        }

        self.plans.retain_mut(|plan| {
            if plan.units(ctx).is_empty() {
                plan.release_all(ctx);
                info!("transport {} finished", plan.id());
                false
            } else {
                true
            }
        });
        released
    }
}
