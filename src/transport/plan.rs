//! Transport plans
//!
//! A plan ferries a group of land units from one land region to another
//! across a single sea region. Membership lives in the tag store: units carry
//! a `transport` tag, ships a `transporter` tag, and a unit's `on_board` tag
//! tracks its boarding progress.
//!
//! Boarding: units are assigned to ships with free slots, ships sail to a
//! rendezvous point on the start shore, units garrison. Stalled ships retry and
//! eventually pick a new rendezvous; stalled units try to walk out of their
//! trap and are finally destroyed.
//!
//! Sailing: ships head for a landing point, unload, and check on the next turn
//! that every unit landed on the right region. Misdelivered units are
//! reloaded once; units that cannot be recovered are destroyed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::command::{Command, Stance};
use crate::context::TurnContext;
use crate::core::error::{PetraError, Result};
use crate::core::types::{AccessIndex, EntityId, Position, TransportId, ABOARD_ACCESS, GAIA};
use crate::state::queries::{ally_structures, own_structures};
use crate::state::{land_access, EntityClass, EntityInfo, UnitAiState};
use crate::tags::{OnBoard, PlanTag};
use crate::transport::stall::{bump_retry, ProgressWatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    /// Units are walking to and garrisoning in the ships
    Boarding,
    /// Ships are moving and unloading
    Sailing,
}

/// A unit unloaded on the wrong shore and sent back aboard
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recovered {
    pub unit: EntityId,
    pub position: Position,
    pub ship: EntityId,
}

const ENEMY_SHORE_PENALTY: f32 = 1.0e8;
const CROWDED_POINT_PENALTY: f32 = 1.0e6;
const DOCK_PENALTY: f32 = 1.0e5;
const DOCK_CLEARANCE: f32 = 4900.0;
const DOCK_FOUNDATION_CLEARANCE: f32 = 900.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportPlan {
    id: TransportId,
    /// Several ships may work for this plan
    flotilla: bool,
    end_pos: Position,
    start_index: AccessIndex,
    end_index: AccessIndex,
    sea: AccessIndex,
    state: TransportState,
    boarding_pos: BTreeMap<EntityId, Position>,
    needs_transport_ships: bool,
    n_try: BTreeMap<EntityId, u32>,
    canceled: bool,
    unloaded: Vec<EntityId>,
    recovered: Vec<Recovered>,
    /// Units that did not fit; the manager moves them to a new plan
    #[serde(skip)]
    need_split: Vec<EntityId>,
    /// Units dropped by the plan this turn, to be released by their army
    #[serde(skip)]
    reset_units: Vec<EntityId>,
}

impl TransportPlan {
    /// Start a plan for `units` from `start_index` to `end_index`.
    ///
    /// A start index of `ABOARD_ACCESS` means the units are already garrisoned
    /// in `ship`, which then works for the plan.
    pub fn new(
        ctx: &mut TurnContext,
        id: TransportId,
        units: &[EntityId],
        start_index: AccessIndex,
        end_index: AccessIndex,
        end_pos: Position,
        ship: Option<EntityId>,
    ) -> Result<Self> {
        let sea = if start_index == ABOARD_ACCESS {
            let ship_id = ship.ok_or(PetraError::NoTransportShip)?;
            let ship_ent = ctx.entity(ship_id).ok_or(PetraError::EntityNotFound(ship_id))?;
            let sea = ship_ent.sea.ok_or(PetraError::NoTransportShip)?;
            ctx.tags.claim_transporter(ship_id, id);
            ctx.commands.push(Command::SetStance {
                unit: ship_id,
                stance: Stance::NoAction,
            });
            sea
        } else {
            ctx.state.sea_between(start_index, end_index).ok_or(PetraError::NoSeaPath {
                start: start_index,
                end: end_index,
            })?
        };

        for &unit in units {
            ctx.tags.claim_transport(unit, id, end_pos);
            if start_index == ABOARD_ACCESS {
                ctx.tags.set_on_board(unit, Some(OnBoard::Aboard));
            }
        }
        info!(
            "transport {} started: {} units from land {} to land {} over sea {}",
            id,
            units.len(),
            start_index,
            end_index,
            sea
        );

        Ok(Self {
            id,
            flotilla: ctx.config.transport.flotilla,
            end_pos,
            start_index,
            end_index,
            sea,
            state: TransportState::Boarding,
            boarding_pos: BTreeMap::new(),
            needs_transport_ships: ship.is_none(),
            n_try: BTreeMap::new(),
            canceled: false,
            unloaded: Vec::new(),
            recovered: Vec::new(),
            need_split: Vec::new(),
            reset_units: Vec::new(),
        })
    }

    pub fn id(&self) -> TransportId {
        self.id
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn start_index(&self) -> AccessIndex {
        self.start_index
    }

    pub fn end_index(&self) -> AccessIndex {
        self.end_index
    }

    pub fn end_pos(&self) -> Position {
        self.end_pos
    }

    pub fn sea(&self) -> AccessIndex {
        self.sea
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    pub fn needs_transport_ships(&self) -> bool {
        self.needs_transport_ships
    }

    pub fn boarding_pos(&self, ship: EntityId) -> Option<Position> {
        self.boarding_pos.get(&ship).copied()
    }

    pub fn recovered(&self) -> &[Recovered] {
        &self.recovered
    }

    /// Our living units carried by this plan
    pub fn units(&self, ctx: &TurnContext) -> Vec<EntityId> {
        let player = ctx.player();
        ctx.tags
            .transported_by(self.id)
            .into_iter()
            .filter(|id| ctx.entity(*id).map_or(false, |e| e.owner == player))
            .collect()
    }

    /// Living ships working for this plan
    pub fn ships(&self, ctx: &TurnContext) -> Vec<EntityId> {
        ctx.tags
            .ships_of(self.id)
            .into_iter()
            .filter(|id| ctx.entity(*id).is_some())
            .collect()
    }

    /// Ships of this plan able to carry units
    pub fn transport_ships(&self, ctx: &TurnContext) -> Vec<EntityId> {
        self.ships(ctx)
            .into_iter()
            .filter(|id| ctx.entity(*id).map_or(false, |e| e.is_garrison_holder()))
            .collect()
    }

    pub fn count_free_slots(&self, ctx: &TurnContext) -> usize {
        self.transport_ships(ctx)
            .into_iter()
            .filter_map(|id| ctx.entity(id))
            .map(|ship| self.count_free_slots_on_ship(ctx, ship))
            .sum()
    }

    /// Capacity minus garrisoned units minus units on their way to the ship
    pub fn count_free_slots_on_ship(&self, ctx: &TurnContext, ship: &EntityInfo) -> usize {
        let Some(holder) = &ship.garrison else {
            return 0;
        };
        if ship.below_eject_health() {
            return 0;
        }
        let assigned = self
            .units(ctx)
            .into_iter()
            .filter(|id| ctx.tags.on_board(*id) == Some(OnBoard::Ship(ship.id)))
            .count();
        holder.capacity.saturating_sub(holder.garrisoned.len() + assigned)
    }

    /// Give `unit` a seat on a ship with room. Without room it is queued for
    /// a split (or, for a flotilla, another ship is requested).
    pub fn assign_unit_to_ship(&mut self, ctx: &mut TurnContext, unit: EntityId) {
        if self.needs_transport_ships {
            return;
        }
        for ship_id in self.transport_ships(ctx) {
            let Some(ship) = ctx.entity(ship_id) else {
                continue;
            };
            if self.count_free_slots_on_ship(ctx, ship) == 0 {
                continue;
            }
            ctx.tags.set_on_board(unit, Some(OnBoard::Ship(ship_id)));
            return;
        }
        if self.flotilla {
            self.needs_transport_ships = true;
        } else if !self.need_split.contains(&unit) {
            self.need_split.push(unit);
        }
    }

    /// Take the nearest idle transport ship of our sea
    pub fn assign_ship(&mut self, ctx: &mut TurnContext) -> bool {
        let from = self
            .units(ctx)
            .into_iter()
            .filter(|id| ctx.tags.on_board(*id).is_none())
            .find_map(|id| ctx.entity(id).and_then(|e| e.position));

        let player = ctx.player();
        let mut nearest: Option<(EntityId, f32)> = None;
        for ship in ctx.state.entities() {
            if ship.owner != player
                || !ship.has_class(EntityClass::SHIP)
                || !ship.is_garrison_holder()
                || ship.sea != Some(self.sea)
                || ctx.tags.transporter(ship.id).is_some()
            {
                continue;
            }
            let Some(pos) = ship.position else {
                continue;
            };
            match from {
                Some(from) => {
                    let dist = from.distance_squared(&pos);
                    if nearest.map_or(true, |(_, d)| dist < d) {
                        nearest = Some((ship.id, dist));
                    }
                }
                None => {
                    if nearest.is_none() {
                        nearest = Some((ship.id, 0.0));
                    }
                }
            }
        }
        let Some((ship_id, _)) = nearest else {
            return false;
        };

        ctx.tags.claim_transporter(ship_id, self.id);
        ctx.commands.push(Command::SetStance {
            unit: ship_id,
            stance: Stance::NoAction,
        });
        self.needs_transport_ships = false;
        debug!("transport {}: ship {} assigned", self.id, ship_id);
        true
    }

    pub fn add_unit(&mut self, ctx: &mut TurnContext, unit: EntityId, end_pos: Position) -> bool {
        ctx.tags.claim_transport(unit, self.id, end_pos)
    }

    /// Drop a unit that is not aboard yet. A ship left with nobody to carry
    /// is released.
    pub fn remove_unit(&mut self, ctx: &mut TurnContext, unit: EntityId) -> bool {
        if ctx.tags.transport(unit) != Some(self.id) {
            return false;
        }
        let on_board = ctx.tags.on_board(unit);
        if on_board == Some(OnBoard::Aboard) {
            return false;
        }
        if on_board.is_some() {
            // Cancel the garrison order
            ctx.commands.stop(unit);
        }
        ctx.tags.release_transport(unit, self.id);
        self.need_split.retain(|id| *id != unit);

        if let Some(OnBoard::Ship(ship_id)) = on_board {
            let still_used = self
                .units(ctx)
                .into_iter()
                .any(|id| ctx.tags.on_board(id) == Some(OnBoard::Ship(ship_id)));
            if let Some(ship) = ctx.entity(ship_id) {
                if ship.garrisoned().is_empty() && !still_used {
                    self.release_ship(ctx, ship_id);
                }
            }
        }
        true
    }

    pub fn release_ship(&mut self, ctx: &mut TurnContext, ship: EntityId) {
        if !ctx.tags.release_transporter(ship, self.id) {
            warn!(
                "transport {}: ship {} belongs to transport {:?}",
                self.id,
                ship,
                ctx.tags.transporter(ship)
            );
            return;
        }
        ctx.commands.push(Command::SetStance {
            unit: ship,
            stance: Stance::Aggressive,
        });
    }

    /// Untag every ship and unit of the plan
    pub fn release_all(&mut self, ctx: &mut TurnContext) {
        for ship in ctx.tags.ships_of(self.id) {
            self.release_ship(ctx, ship);
        }
        for unit in ctx.tags.transported_by(self.id) {
            ctx.tags.release_transport(unit, self.id);
        }
    }

    /// Bring the units back to the start region, next to one of our civic
    /// centres. Fails when no such anchor exists.
    pub fn cancel_transport(&mut self, ctx: &mut TurnContext) -> bool {
        let state = ctx.state;
        let anchor = own_structures(state)
            .filter(|s| s.has_class(EntityClass::CIV_CENTRE) && s.foundation_progress.is_none())
            .filter(|s| land_access(state, s) == Some(self.start_index))
            .find_map(|s| s.position);
        let Some(anchor) = anchor else {
            return false;
        };
        for unit in self.units(ctx) {
            if ctx.tags.end_pos(unit).is_some() {
                ctx.tags.claim_transport(unit, self.id, anchor);
            }
        }
        self.end_index = self.start_index;
        self.end_pos = anchor;
        self.canceled = true;
        info!("transport {} canceled, heading back to land {}", self.id, self.start_index);
        true
    }

    /// Advance the plan. Returns the number of units still carried.
    pub fn update(&mut self, ctx: &mut TurnContext) -> usize {
        match self.state {
            TransportState::Boarding => self.on_boarding(ctx),
            TransportState::Sailing => self.on_sailing(ctx),
        }
        self.units(ctx).len()
    }

    /// Units waiting for a split, drained
    pub fn take_split(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.need_split)
    }

    /// Units reset this turn, drained
    pub fn take_reset_units(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.reset_units)
    }

    fn on_boarding(&mut self, ctx: &mut TurnContext) {
        let cfg = ctx.config.transport.clone();
        let time = ctx.time();
        let mut ready = true;
        let mut ship_tested = BTreeSet::new();

        for unit_id in self.units(ctx) {
            let Some(ent) = ctx.entity(unit_id) else {
                continue;
            };
            let ship_id = match ctx.tags.on_board(unit_id) {
                Some(OnBoard::Aboard) => continue,
                None => {
                    ready = false;
                    self.start_boarding(ctx, ent);
                    continue;
                }
                Some(OnBoard::Ship(ship_id)) => ship_id,
            };
            if self.is_on_board(ctx, unit_id) {
                continue;
            }
            ready = false;

            let Some(ship) = ctx.entity(ship_id) else {
                // Its ship was sunk
                ctx.tags.set_on_board(unit_id, None);
                continue;
            };
            let dist_ship = match (self.boarding_pos.get(&ship_id), ship.position) {
                (Some(bp), Some(pos)) => bp.distance_squared(&pos),
                _ => f32::MAX,
            };

            if dist_ship > cfg.boarding_range && ship_tested.insert(ship_id) {
                let ship_watch = ctx.tags.watch(ship_id).unwrap_or_else(|| ProgressWatch::start(time, None));
                let mut retry = false;
                match ship.ai_state() {
                    Some(UnitAiState::Walking) | Some(UnitAiState::PickupApproaching) => {
                        if ship_watch.is_due(time, cfg.stall_interval) {
                            let mut watch = ctx
                                .tags
                                .watch(unit_id)
                                .unwrap_or_else(|| ProgressWatch::start(time, ent.position));
                            retry = watch.has_not_moved(ent.position);
                            watch.reset(time, ent.position);
                            ctx.tags.set_watch(unit_id, Some(watch));
                        }
                    }
                    ai_state => {
                        let loading = ai_state == Some(UnitAiState::PickupLoading);
                        if (!loading && ship_watch.is_due(time, cfg.ship_idle_timeout))
                            || ship_watch.is_due(time, cfg.ship_hard_timeout)
                        {
                            retry = true;
                            let mut watch = ctx
                                .tags
                                .watch(unit_id)
                                .unwrap_or_else(|| ProgressWatch::start(time, ent.position));
                            watch.since = time;
                            ctx.tags.set_watch(unit_id, Some(watch));
                        }
                    }
                }

                if retry {
                    let n_try = self.n_try.entry(ship_id).or_insert(0);
                    if bump_retry(n_try, cfg.ship_boarding_retries) {
                        // Blocked by something; try another rendezvous point
                        debug!("transport {}: ship {} tries a new boarding point", self.id, ship_id);
                        if let Some(pos) = self.boarding_position(ctx, ship, self.start_index, None, false) {
                            self.boarding_pos.insert(ship_id, pos);
                        }
                    }
                    if let Some(pos) = self.boarding_pos.get(&ship_id) {
                        ctx.commands.move_to(ship_id, *pos);
                    }
                    ctx.tags.set_watch(ship_id, Some(ProgressWatch::start(time, None)));
                }
            }

            let mut watch = ctx
                .tags
                .watch(unit_id)
                .unwrap_or_else(|| ProgressWatch::start(time, ent.position));
            if !watch.is_due(time, cfg.stall_interval) {
                continue;
            }
            if watch.has_not_moved(ent.position) {
                if dist_ship < cfg.boarding_range {
                    // Next to its ship but stuck: try to get out of the trap
                    let n_try = self.n_try.entry(unit_id).or_insert(0);
                    *n_try += 1;
                    if *n_try > cfg.unit_stall_limit {
                        warn!("transport {}: unit {} blocked with no way out, destroying it", self.id, unit_id);
                        self.reset_unit(ctx, unit_id);
                        ctx.commands.destroy(unit_id);
                        continue;
                    }
                    if *n_try > cfg.unit_unstick_after {
                        if let Some(pos) = ent.position {
                            ctx.commands.move_to_range(unit_id, pos, 30.0, 35.0);
                        }
                    }
                    ctx.commands.garrison(unit_id, ship_id, true);
                } else if let (Some(bp), Some(pos)) = (self.boarding_pos.get(&ship_id), ent.position) {
                    if bp.distance_squared(&pos) > cfg.unit_rendezvous_range {
                        ctx.commands.move_to_range(unit_id, *bp, 0.0, 15.0);
                    }
                }
            } else {
                self.n_try.remove(&unit_id);
            }
            watch.reset(time, ent.position);
            ctx.tags.set_watch(unit_id, Some(watch));
        }

        if !ready {
            return;
        }

        for ship_id in self.ships(ctx) {
            self.boarding_pos.remove(&ship_id);
            let Some(ship) = ctx.entity(ship_id) else {
                continue;
            };
            if let Some(pos) = self.boarding_position(ctx, ship, self.end_index, Some(self.end_pos), true) {
                self.boarding_pos.insert(ship_id, pos);
                ctx.commands.move_to(ship_id, pos);
            }
        }
        self.state = TransportState::Sailing;
        self.n_try.clear();
        self.unloaded.clear();
        self.recovered.clear();
        info!("transport {}: everyone aboard, sailing to land {}", self.id, self.end_index);
    }

    /// Seat a unit that has no ship yet and send it to garrison
    fn start_boarding(&mut self, ctx: &mut TurnContext, ent: &EntityInfo) {
        let time = ctx.time();
        self.assign_unit_to_ship(ctx, ent.id);
        let Some(OnBoard::Ship(ship_id)) = ctx.tags.on_board(ent.id) else {
            return;
        };
        let Some(ship) = ctx.entity(ship_id) else {
            return;
        };
        if !self.boarding_pos.contains_key(&ship_id) {
            if let Some(pos) = self.boarding_position(ctx, ship, self.start_index, ent.position, false) {
                self.boarding_pos.insert(ship_id, pos);
                ctx.commands.move_to(ship_id, pos);
            }
            ctx.tags.set_watch(ship_id, Some(ProgressWatch::start(time, None)));
        }
        ctx.commands.garrison(ent.id, ship_id, false);
        ctx.tags.set_watch(ent.id, Some(ProgressWatch::start(time, ent.position)));
    }

    fn on_sailing(&mut self, ctx: &mut TurnContext) {
        let cfg = ctx.config.transport.clone();
        let state = ctx.state;

        // Units reloaded last turn: move the ship a bit before landing again
        for recov in std::mem::take(&mut self.recovered) {
            let Some(ent) = ctx.entity(recov.unit) else {
                continue;
            };
            if ent.position.is_none() {
                if ctx.entity(recov.ship).is_some() {
                    ctx.commands.move_apart(recov.ship, recov.position, cfg.recovery_clearance);
                }
                continue;
            }
            warn!("transport {}: reloading unit {} failed, destroying it", self.id, recov.unit);
            self.reset_unit(ctx, recov.unit);
            ctx.commands.destroy(recov.unit);
        }

        // Units unloaded last turn: check they reached the right shore
        let mut ships_to_move = BTreeSet::new();
        for unit_id in std::mem::take(&mut self.unloaded) {
            let Some(ent) = ctx.entity(unit_id) else {
                continue;
            };
            let ship = match ctx.tags.on_board(unit_id) {
                Some(OnBoard::Ship(ship_id)) => ctx.entity(ship_id),
                _ => None,
            };
            let Some(pos) = ent.position else {
                // Unloading failed
                match ship {
                    Some(ship) if ship.garrisoned().contains(&unit_id) => {
                        ctx.tags.set_on_board(unit_id, Some(OnBoard::Aboard));
                    }
                    Some(_) => {
                        warn!("transport {}: unit {} off its ship but without position", self.id, unit_id);
                        self.reset_unit(ctx, unit_id);
                        ctx.commands.destroy(unit_id);
                    }
                    None => {
                        warn!("transport {}: unit {} aboard a missing ship", self.id, unit_id);
                        self.reset_unit(ctx, unit_id);
                        ctx.commands.destroy(unit_id);
                    }
                }
                continue;
            };

            if land_access(state, ent) != Some(self.end_index) {
                match ship {
                    Some(ship) if !self.canceled => {
                        debug!("transport {}: unit {} landed on the wrong shore, reloading", self.id, unit_id);
                        ships_to_move.insert(ship.id);
                        self.recovered.push(Recovered {
                            unit: unit_id,
                            position: pos,
                            ship: ship.id,
                        });
                        ctx.commands.garrison(unit_id, ship.id, false);
                        ctx.tags.set_on_board(unit_id, Some(OnBoard::Aboard));
                    }
                    _ => {
                        warn!("transport {}: unit {} stranded, destroying it", self.id, unit_id);
                        self.reset_unit(ctx, unit_id);
                        ctx.commands.destroy(unit_id);
                    }
                }
                continue;
            }

            // Landed: make room for the next ones
            let goal = ctx.tags.end_pos(unit_id);
            let dist = goal.map_or(0.0, |g| pos.distance(&g));
            match goal {
                Some(goal) if dist > 30.0 => ctx.commands.move_to_range(unit_id, goal, dist - 25.0, dist - 20.0),
                _ => ctx.commands.move_to_range(unit_id, pos, 20.0, 25.0),
            }
            ctx.tags.release_transport(unit_id, self.id);
        }

        for ship_id in ships_to_move {
            let Some(ship) = ctx.entity(ship_id) else {
                continue;
            };
            if let Some(pos) = self.boarding_position(ctx, ship, self.end_index, Some(self.end_pos), true) {
                self.boarding_pos.insert(ship_id, pos);
                ctx.commands.move_to(ship_id, pos);
            }
        }

        if self.canceled {
            for ship_id in self.ships(ctx) {
                self.boarding_pos.remove(&ship_id);
                let Some(ship) = ctx.entity(ship_id) else {
                    continue;
                };
                if let Some(pos) = self.boarding_position(ctx, ship, self.end_index, Some(self.end_pos), true) {
                    self.boarding_pos.insert(ship_id, pos);
                    ctx.commands.move_to(ship_id, pos);
                }
            }
            self.canceled = false;
        }

        for ship_id in self.transport_ships(ctx) {
            let Some(ship) = ctx.entity(ship_id) else {
                continue;
            };
            if ship.ai_state() == Some(UnitAiState::Walking) {
                continue;
            }
            let (Some(ship_pos), Some(bp)) = (ship.position, self.boarding_pos.get(&ship_id).copied()) else {
                continue;
            };
            let dist = ship_pos.distance_squared(&bp);

            let mut remaining = 0;
            for &unit_id in ship.garrisoned() {
                if ctx.tags.transport(unit_id).is_none() {
                    continue;
                }
                remaining += 1;
                if dist < cfg.unload_range {
                    ctx.commands.push(Command::Unload {
                        holder: ship_id,
                        unit: unit_id,
                    });
                    self.unloaded.push(unit_id);
                    ctx.tags.set_on_board(unit_id, Some(OnBoard::Ship(ship_id)));
                }
            }
            let recovering = self.recovered.iter().filter(|r| r.ship == ship_id).count();

            if remaining == 0 && recovering == 0 {
                // Empty: leave room for the other ships
                ctx.commands.move_apart(ship_id, bp, cfg.empty_ship_clearance);
                self.release_ship(ctx, ship_id);
                continue;
            }
            if dist > cfg.boarding_range {
                let n_try = self.n_try.entry(ship_id).or_insert(0);
                if bump_retry(n_try, cfg.ship_sailing_retries) {
                    debug!("transport {}: ship {} tries a new landing point", self.id, ship_id);
                    if let Some(pos) = self.boarding_position(ctx, ship, self.end_index, None, true) {
                        self.boarding_pos.insert(ship_id, pos);
                    }
                }
                if let Some(pos) = self.boarding_pos.get(&ship_id) {
                    ctx.commands.move_to(ship_id, *pos);
                }
            }
        }
    }

    /// Mark `unit` as aboard if it is garrisoned in one of our ships
    pub fn is_on_board(&self, ctx: &mut TurnContext, unit: EntityId) -> bool {
        for ship_id in self.transport_ships(ctx) {
            let aboard = ctx.entity(ship_id).map_or(false, |s| s.garrisoned().contains(&unit));
            if aboard {
                ctx.tags.set_on_board(unit, Some(OnBoard::Aboard));
                return true;
            }
        }
        false
    }

    /// Best shore point of `land` for `ship` to meet its units.
    ///
    /// Scores the ship's travel plus the walk to `destination`, and penalises
    /// enemy shores (with `avoid_enemy`), points near another rendezvous and
    /// points near allied docks. Falls back to `destination`, then to the
    /// ship's current rendezvous, when the shore has no landing zone.
    pub fn boarding_position(
        &self,
        ctx: &TurnContext,
        ship: &EntityInfo,
        land: AccessIndex,
        destination: Option<Position>,
        avoid_enemy: bool,
    ) -> Option<Position> {
        let state = ctx.state;
        let fallback = destination.or_else(|| self.boarding_pos.get(&ship.id).copied());
        let zones = state.landing_zones(land, self.sea);
        if zones.is_empty() {
            warn!("transport {}: no landing zone for land {} and sea {}", self.id, land, self.sea);
            return fallback;
        }
        let Some(start) = ship.position else {
            return fallback;
        };

        let docks: Vec<(Position, bool)> = ally_structures(state)
            .filter(|s| s.has_class(EntityClass::DOCK) && s.sea == Some(self.sea))
            .filter_map(|s| s.position.map(|p| (p, s.foundation_progress.is_some())))
            .collect();
        let boarding_range = ctx.config.transport.boarding_range;

        let mut best: Option<(Position, f32)> = None;
        for pos in zones {
            let mut score = start.distance(&pos);
            if let Some(dest) = destination {
                score += pos.distance(&dest);
            }
            if avoid_enemy {
                let owner = state.territory_owner(pos);
                if owner != GAIA && !state.is_ally(owner) {
                    score += ENEMY_SHORE_PENALTY;
                }
            }
            // Keep the ships of a plan apart, and away from a point that failed
            for other in self.boarding_pos.values() {
                if other.distance_squared(&pos) < boarding_range {
                    score += CROWDED_POINT_PENALTY;
                }
            }
            // Do not block the naval traffic of allied docks
            for (dock, foundation) in &docks {
                let clearance = if *foundation {
                    DOCK_FOUNDATION_CLEARANCE
                } else {
                    DOCK_CLEARANCE
                };
                let dock_dist = dock.distance_squared(&pos);
                if dock_dist < clearance {
                    score += DOCK_PENALTY * (clearance - dock_dist) / clearance;
                }
            }
            if best.map_or(true, |(_, s)| score < s) {
                best = Some((pos, score));
            }
        }
        best.map(|(pos, _)| pos).or(fallback)
    }

    /// Drop a unit from the plan and from whatever it was doing
    pub fn reset_unit(&mut self, ctx: &mut TurnContext, unit: EntityId) {
        ctx.tags.release_transport(unit, self.id);
        if let Some(PlanTag::Attack(plan)) = ctx.tags.plan(unit) {
            ctx.commands.push(Command::LeaveAttackPlan { unit, plan });
        }
        if ctx.tags.army(unit).is_some() {
            self.reset_units.push(unit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandQueue;
    use crate::core::config::PetraConfig;
    use crate::sandbox::{Rect, Sandbox};
    use crate::state::GarrisonHolder;
    use crate::tags::TagStore;

    /// Land 2 west, sea 3 in the middle, land 4 east
    fn strait() -> Sandbox {
        let mut world = Sandbox::new(1, 3);
        let west = world.add_land(Rect::new(0.0, 0.0, 100.0, 300.0));
        let sea = world.add_sea(Rect::new(100.0, 0.0, 200.0, 300.0));
        let east = world.add_land(Rect::new(200.0, 0.0, 300.0, 300.0));
        world.add_landing_zone(west, sea, Position::new(98.0, 100.0));
        world.add_landing_zone(west, sea, Position::new(98.0, 200.0));
        world.add_landing_zone(east, sea, Position::new(202.0, 150.0));
        world
    }

    fn ship(world: &mut Sandbox, capacity: usize, pos: Position) -> EntityId {
        let mut info = EntityInfo::new(EntityId(0), 1, EntityClass::UNIT | EntityClass::SHIP).at(pos);
        info.garrison = Some(GarrisonHolder::new(capacity, EntityClass::UNIT));
        info.sea = Some(3);
        world.spawn(info)
    }

    fn unit(world: &mut Sandbox, pos: Position) -> EntityId {
        world.spawn(EntityInfo::new(EntityId(0), 1, EntityClass::UNIT | EntityClass::INFANTRY).at(pos))
    }

    #[test]
    fn test_no_sea_path_fails() {
        let mut world = Sandbox::new(1, 2);
        world.add_land(Rect::new(0.0, 0.0, 100.0, 100.0));
        let config = PetraConfig::default();
        let mut tags = TagStore::new();
        let mut commands = CommandQueue::new();
        let mut ctx = TurnContext::new(&world, &config, &mut tags, &mut commands);
        let result = TransportPlan::new(&mut ctx, TransportId(1), &[], 2, 4, Position::default(), None);
        assert!(matches!(result, Err(PetraError::NoSeaPath { start: 2, end: 4 })));
    }

    #[test]
    fn test_free_slots_account_for_assigned_units() {
        let mut world = strait();
        let boat = ship(&mut world, 2, Position::new(150.0, 150.0));
        let a = unit(&mut world, Position::new(50.0, 100.0));
        let b = unit(&mut world, Position::new(50.0, 110.0));
        let c = unit(&mut world, Position::new(50.0, 120.0));
        let config = PetraConfig::default();
        let mut tags = TagStore::new();
        let mut commands = CommandQueue::new();
        let mut ctx = TurnContext::new(&world, &config, &mut tags, &mut commands);

        let end = Position::new(250.0, 150.0);
        let mut plan = TransportPlan::new(&mut ctx, TransportId(1), &[a, b, c], 2, 4, end, None).unwrap();
        assert_eq!(plan.sea(), 3);
        assert!(plan.assign_ship(&mut ctx));
        assert_eq!(plan.count_free_slots(&ctx), 2);

        plan.assign_unit_to_ship(&mut ctx, a);
        plan.assign_unit_to_ship(&mut ctx, b);
        plan.assign_unit_to_ship(&mut ctx, c);
        assert_eq!(ctx.tags.on_board(a), Some(OnBoard::Ship(boat)));
        assert_eq!(plan.count_free_slots(&ctx), 0);
        assert_eq!(plan.take_split(), vec![c]);
    }

    #[test]
    fn test_remove_unit_releases_unused_ship() {
        let mut world = strait();
        let boat = ship(&mut world, 2, Position::new(150.0, 150.0));
        let a = unit(&mut world, Position::new(50.0, 100.0));
        let config = PetraConfig::default();
        let mut tags = TagStore::new();
        let mut commands = CommandQueue::new();
        let mut ctx = TurnContext::new(&world, &config, &mut tags, &mut commands);

        let mut plan =
            TransportPlan::new(&mut ctx, TransportId(1), &[a], 2, 4, Position::new(250.0, 150.0), None).unwrap();
        plan.assign_ship(&mut ctx);
        plan.assign_unit_to_ship(&mut ctx, a);
        assert!(plan.remove_unit(&mut ctx, a));
        assert_eq!(ctx.tags.transport(a), None);
        assert_eq!(ctx.tags.transporter(boat), None);
        assert!(plan.units(&ctx).is_empty());
    }

    #[test]
    fn test_boarding_point_prefers_short_trip() {
        let mut world = strait();
        let boat = ship(&mut world, 2, Position::new(150.0, 100.0));
        let config = PetraConfig::default();
        let mut tags = TagStore::new();
        let mut commands = CommandQueue::new();
        let mut ctx = TurnContext::new(&world, &config, &mut tags, &mut commands);

        let plan = TransportPlan::new(&mut ctx, TransportId(1), &[], 2, 4, Position::new(250.0, 150.0), None).unwrap();
        let ship_ent = ctx.entity(boat).unwrap();
        let near = plan.boarding_position(&ctx, ship_ent, 2, Some(Position::new(50.0, 100.0)), false);
        assert_eq!(near, Some(Position::new(98.0, 100.0)));
        let far = plan.boarding_position(&ctx, ship_ent, 2, Some(Position::new(50.0, 290.0)), false);
        assert_eq!(far, Some(Position::new(98.0, 200.0)));
    }

    #[test]
    fn test_boarding_point_avoids_enemy_shore() {
        let mut world = strait();
        world.add_territory(Rect::new(0.0, 50.0, 100.0, 150.0), 2);
        let boat = ship(&mut world, 2, Position::new(150.0, 100.0));
        let config = PetraConfig::default();
        let mut tags = TagStore::new();
        let mut commands = CommandQueue::new();
        let mut ctx = TurnContext::new(&world, &config, &mut tags, &mut commands);

        let plan = TransportPlan::new(&mut ctx, TransportId(1), &[], 2, 4, Position::new(250.0, 150.0), None).unwrap();
        let ship_ent = ctx.entity(boat).unwrap();
        let pos = plan.boarding_position(&ctx, ship_ent, 2, Some(Position::new(50.0, 100.0)), true);
        assert_eq!(pos, Some(Position::new(98.0, 200.0)));
    }

    #[test]
    fn test_reset_unit_leaves_attack_plan() {
        let mut world = strait();
        let a = unit(&mut world, Position::new(50.0, 100.0));
        let config = PetraConfig::default();
        let mut tags = TagStore::new();
        let mut commands = CommandQueue::new();
        let mut ctx = TurnContext::new(&world, &config, &mut tags, &mut commands);
        ctx.tags.set_plan(a, Some(PlanTag::Attack(crate::core::types::PlanId(4))));

        let mut plan =
            TransportPlan::new(&mut ctx, TransportId(1), &[a], 2, 4, Position::new(250.0, 150.0), None).unwrap();
        plan.reset_unit(&mut ctx, a);
        assert_eq!(ctx.tags.transport(a), None);
        assert!(ctx
            .commands
            .iter()
            .any(|c| matches!(c, Command::LeaveAttackPlan { unit, .. } if *unit == a)));
    }

    /// A plan for `units` already out at sea, as if `boat` had just unloaded them
    fn sailing_plan(ctx: &mut TurnContext, units: &[EntityId], boat: EntityId) -> TransportPlan {
        let mut plan =
            TransportPlan::new(ctx, TransportId(1), units, 2, 4, Position::new(250.0, 150.0), None).unwrap();
        assert!(ctx.tags.claim_transporter(boat, plan.id()));
        for &unit in units {
            ctx.tags.set_on_board(unit, Some(OnBoard::Ship(boat)));
            plan.unloaded.push(unit);
        }
        plan.state = TransportState::Sailing;
        plan
    }

    #[test]
    fn test_unit_on_wrong_shore_is_reloaded_then_ship_moves_off() {
        let mut world = strait();
        let boat = ship(&mut world, 2, Position::new(110.0, 150.0));
        // Dropped back on the start land
        let a = unit(&mut world, Position::new(98.0, 150.0));
        let config = PetraConfig::default();
        let mut tags = TagStore::new();

        let mut plan = {
            let mut commands = CommandQueue::new();
            let mut ctx = TurnContext::new(&world, &config, &mut tags, &mut commands);
            let mut plan = sailing_plan(&mut ctx, &[a], boat);
            plan.update(&mut ctx);
            assert_eq!(
                plan.recovered(),
                &[Recovered {
                    unit: a,
                    position: Position::new(98.0, 150.0),
                    ship: boat
                }]
            );
            assert_eq!(ctx.tags.on_board(a), Some(OnBoard::Aboard));
            assert_eq!(ctx.tags.transporter(boat), Some(plan.id()));
            assert!(commands.iter().any(|c| *c
                == Command::Garrison {
                    unit: a,
                    holder: boat,
                    queued: false
                }));
            assert!(commands
                .iter()
                .any(|c| matches!(c, Command::Move { unit, .. } if *unit == boat)));
            plan
        };

        // Back aboard: the ship clears the bad shore before landing again
        assert!(world.garrison_now(a, boat));
        let mut commands = CommandQueue::new();
        let mut ctx = TurnContext::new(&world, &config, &mut tags, &mut commands);
        plan.update(&mut ctx);
        assert!(plan.recovered().is_empty());
        assert_eq!(ctx.tags.transport(a), Some(plan.id()));
        assert!(commands.iter().any(|c| *c
            == Command::MoveApart {
                unit: boat,
                from: Position::new(98.0, 150.0),
                distance: config.transport.recovery_clearance
            }));
        assert!(!commands.iter().any(|c| matches!(c, Command::Destroy { .. })));
    }

    #[test]
    fn test_failed_reload_destroys_unit() {
        let mut world = strait();
        let boat = ship(&mut world, 2, Position::new(110.0, 150.0));
        let a = unit(&mut world, Position::new(98.0, 150.0));
        let config = PetraConfig::default();
        let mut tags = TagStore::new();
        let mut commands = CommandQueue::new();
        let mut ctx = TurnContext::new(&world, &config, &mut tags, &mut commands);

        let mut plan = sailing_plan(&mut ctx, &[a], boat);
        plan.update(&mut ctx);
        assert_eq!(plan.recovered().len(), 1);

        // The garrison order was never carried out
        plan.update(&mut ctx);
        assert!(plan.recovered().is_empty());
        assert_eq!(ctx.tags.transport(a), None);
        assert!(ctx
            .commands
            .iter()
            .any(|c| matches!(c, Command::Destroy { entity } if *entity == a)));
        assert!(plan.units(&ctx).is_empty());
    }

    #[test]
    fn test_canceled_plan_does_not_reload_strays() {
        let mut world = strait();
        let boat = ship(&mut world, 2, Position::new(110.0, 150.0));
        let a = unit(&mut world, Position::new(98.0, 150.0));
        let config = PetraConfig::default();
        let mut tags = TagStore::new();
        let mut commands = CommandQueue::new();
        let mut ctx = TurnContext::new(&world, &config, &mut tags, &mut commands);

        let mut plan = sailing_plan(&mut ctx, &[a], boat);
        plan.canceled = true;
        plan.update(&mut ctx);
        assert!(plan.recovered().is_empty());
        assert_eq!(ctx.tags.transport(a), None);
        assert!(ctx
            .commands
            .iter()
            .any(|c| matches!(c, Command::Destroy { entity } if *entity == a)));
    }

    #[test]
    fn test_unit_aboard_a_vanished_ship_is_destroyed() {
        let mut world = strait();
        let boat = ship(&mut world, 2, Position::new(150.0, 150.0));
        let a = unit(&mut world, Position::new(98.0, 150.0));
        assert!(world.garrison_now(a, boat));
        world.remove(boat);
        let config = PetraConfig::default();
        let mut tags = TagStore::new();
        let mut commands = CommandQueue::new();
        let mut ctx = TurnContext::new(&world, &config, &mut tags, &mut commands);

        let mut plan = sailing_plan(&mut ctx, &[a], boat);
        assert_eq!(plan.update(&mut ctx), 0);
        assert_eq!(ctx.tags.transport(a), None);
        assert!(ctx
            .commands
            .iter()
            .any(|c| matches!(c, Command::Destroy { entity } if *entity == a)));
    }

    #[test]
    fn test_unit_held_elsewhere_is_destroyed() {
        let mut world = strait();
        let boat = ship(&mut world, 2, Position::new(150.0, 150.0));
        let other = ship(&mut world, 2, Position::new(150.0, 250.0));
        let a = unit(&mut world, Position::new(98.0, 150.0));
        assert!(world.garrison_now(a, other));
        let config = PetraConfig::default();
        let mut tags = TagStore::new();
        let mut commands = CommandQueue::new();
        let mut ctx = TurnContext::new(&world, &config, &mut tags, &mut commands);

        let mut plan = sailing_plan(&mut ctx, &[a], boat);
        plan.update(&mut ctx);
        assert_eq!(ctx.tags.transport(a), None);
        assert!(ctx
            .commands
            .iter()
            .any(|c| matches!(c, Command::Destroy { entity } if *entity == a)));
    }

    #[test]
    fn test_failed_unload_keeps_unit_aboard() {
        let mut world = strait();
        let boat = ship(&mut world, 2, Position::new(150.0, 150.0));
        let a = unit(&mut world, Position::new(98.0, 150.0));
        assert!(world.garrison_now(a, boat));
        let config = PetraConfig::default();
        let mut tags = TagStore::new();
        let mut commands = CommandQueue::new();
        let mut ctx = TurnContext::new(&world, &config, &mut tags, &mut commands);

        let mut plan = sailing_plan(&mut ctx, &[a], boat);
        assert_eq!(plan.update(&mut ctx), 1);
        assert_eq!(ctx.tags.on_board(a), Some(OnBoard::Aboard));
        assert!(!ctx.commands.iter().any(|c| matches!(c, Command::Destroy { .. })));
    }
}
