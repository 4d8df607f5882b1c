//! Command execution and time stepping for the sandbox

use tracing::trace;

use crate::command::Command;
use crate::core::types::{EntityId, GameTime, PlayerId, Position};
use crate::sandbox::{Goal, Sandbox};
use crate::state::{
    AttackKind, AttackedEvent, EntityClass, EventBatch, GarrisonEvent, OrderData, OwnershipEvent, UnitAiState,
};

/// Map units per second
const UNIT_SPEED: f32 = 9.0;
const SHIP_SPEED: f32 = 14.0;
/// A unit garrisons once this close to its holder
const GARRISON_RANGE: f32 = 12.0;

impl Sandbox {
    /// Execute a batch of commands, whoever issued them
    pub fn apply(&mut self, commands: impl IntoIterator<Item = Command>) {
        for command in commands {
            self.apply_one(command);
        }
    }

    fn apply_one(&mut self, command: Command) {
        match command {
            Command::Attack {
                unit,
                target,
                allow_capture,
                ..
            } => {
                let order = OrderData {
                    target: Some(target),
                    capture: allow_capture,
                };
                self.give_order(unit, order, UnitAiState::Combat, Goal::Attack { target });
            }
            Command::Move { unit, to } => self.walk(unit, to),
            Command::MoveToRange { unit, to, min, max } => {
                let Some(pos) = self.entities.get(&unit).and_then(|e| e.position) else {
                    return;
                };
                let dist = pos.distance(&to);
                let wanted = dist.clamp(min, max.max(min));
                let dir = direction(to, pos);
                self.walk(unit, to + dir * wanted);
            }
            Command::MoveApart { unit, from, distance } => {
                let Some(pos) = self.entities.get(&unit).and_then(|e| e.position) else {
                    return;
                };
                self.walk(unit, pos + direction(from, pos) * distance);
            }
            Command::StopMoving { unit } => self.halt(unit),
            Command::Garrison { unit, holder, .. } => self.board(unit, holder),
            Command::Unload { holder, unit } => self.unload(holder, unit),
            Command::Destroy { entity } => self.kill(entity),
            Command::SetStance { unit, stance } => {
                self.stances.insert(unit, stance);
            }
            Command::ReturnResources { unit, .. } => {
                if let Some(ent) = self.entities.get_mut(&unit) {
                    ent.carrying_resources = false;
                }
            }
            Command::GarrisonFor { unit, holder, kind } => {
                // The garrison manager would send it right away
                self.requests.push(Command::GarrisonFor { unit, holder, kind });
                self.board(unit, holder);
            }
            other => self.requests.push(other),
        }
    }

    fn give_order(&mut self, id: EntityId, order: OrderData, state: UnitAiState, goal: Goal) {
        let Some(ai) = self.entities.get_mut(&id).and_then(|e| e.unit_ai.as_mut()) else {
            return;
        };
        ai.order = Some(order);
        ai.state = state;
        self.goals.insert(id, goal);
    }

    fn walk(&mut self, id: EntityId, to: Position) {
        let order = OrderData {
            target: None,
            capture: false,
        };
        self.give_order(id, order, UnitAiState::Walking, Goal::Move { to });
    }

    fn board(&mut self, id: EntityId, holder: EntityId) {
        let order = OrderData {
            target: Some(holder),
            capture: false,
        };
        self.give_order(id, order, UnitAiState::Walking, Goal::Garrison { holder });
    }

    /// Drop the current order and go idle
    pub(super) fn halt(&mut self, id: EntityId) {
        self.goals.remove(&id);
        if let Some(ai) = self.entities.get_mut(&id).and_then(|e| e.unit_ai.as_mut()) {
            ai.order = None;
            ai.state = UnitAiState::Idle;
        }
    }

    fn unload(&mut self, holder: EntityId, unit: EntityId) {
        let Some(holder_ent) = self.entities.get_mut(&holder) else {
            return;
        };
        let Some(holder_pos) = holder_ent.position else {
            return;
        };
        let Some(garrison) = holder_ent.garrison.as_mut() else {
            return;
        };
        if !garrison.garrisoned.contains(&unit) {
            return;
        }
        garrison.garrisoned.retain(|u| *u != unit);
        let landing = self.nearest_land_point(holder_pos).unwrap_or(holder_pos);
        if let Some(ent) = self.entities.get_mut(&unit) {
            ent.position = Some(landing);
            ent.holder = None;
        }
        self.halt(unit);
    }

    /// Advance the world by `dt` seconds and one AI turn. Returns what
    /// happened since the previous step.
    pub fn step(&mut self, dt: GameTime) -> EventBatch {
        self.time += dt;
        self.played_turn += 1;
        let secs = dt as f32;

        let busy: Vec<(EntityId, Goal)> = self.goals.iter().map(|(id, goal)| (*id, *goal)).collect();
        for (id, goal) in busy {
            // Killed earlier in this step, or a goal replaced meanwhile
            if self.goals.get(&id) != Some(&goal) {
                continue;
            }
            if self.stuck.contains(&id) {
                self.halt(id);
                continue;
            }
            match goal {
                Goal::Move { to } => {
                    if self.advance(id, to, 0.0, secs) {
                        self.halt(id);
                    }
                }
                Goal::Garrison { holder } => {
                    let Some(holder_pos) = self.entities.get(&holder).and_then(|h| h.position) else {
                        self.halt(id);
                        continue;
                    };
                    // Waits on the shore until a moving holder comes close
                    if self.advance(id, holder_pos, GARRISON_RANGE, secs) && self.is_near(id, holder_pos) {
                        self.enter(id, holder);
                    }
                }
                Goal::Attack { target } => {
                    let Some(target_pos) = self.entities.get(&target).and_then(|t| t.position) else {
                        self.halt(id);
                        continue;
                    };
                    let range = self.attack_range(id, target);
                    if self.advance(id, target_pos, range, secs) {
                        self.hit(id, target, target_pos, range, secs);
                    }
                }
            }
        }
        std::mem::take(&mut self.pending)
    }

    /// Move toward `to` inside the mover's area. True once within `range`
    /// of it, or as close as the area allows.
    fn advance(&mut self, id: EntityId, to: Position, range: f32, secs: f32) -> bool {
        let Some(ent) = self.entities.get(&id) else {
            return false;
        };
        let Some(pos) = ent.position else {
            return false;
        };
        if pos.distance(&to) <= range {
            return true;
        }
        let dest = self.movement_area(ent).map_or(to, |area| area.clamp(to));
        let speed = if ent.has_class(EntityClass::SHIP) {
            SHIP_SPEED
        } else {
            UNIT_SPEED
        };
        let next = pos.step_toward(&dest, speed * secs);
        if let Some(ent) = self.entities.get_mut(&id) {
            ent.position = Some(next);
        }
        next == dest || next.distance(&to) <= range
    }

    fn is_near(&self, id: EntityId, pos: Position) -> bool {
        self.entities
            .get(&id)
            .and_then(|e| e.position)
            .map_or(false, |p| p.distance(&pos) <= GARRISON_RANGE)
    }

    fn enter(&mut self, unit: EntityId, holder: EntityId) {
        let allowed = match (self.entities.get(&unit), self.entities.get(&holder)) {
            (Some(u), Some(h)) => h.garrison.as_ref().map_or(false, |g| u.has_any_class(g.allowed)),
            _ => false,
        };
        if allowed && self.garrison_now(unit, holder) {
            trace!("{} garrisoned in {}", unit, holder);
            self.pending.garrison.push(GarrisonEvent { entity: unit, holder });
        } else {
            self.halt(unit);
        }
    }

    fn attack_range(&self, id: EntityId, target: EntityId) -> f32 {
        let Some(ent) = self.entities.get(&id) else {
            return 0.0;
        };
        let capture = ent.order().map_or(false, |o| o.capture);
        let reach = ent
            .attacks
            .iter()
            .filter(|a| (a.kind == AttackKind::Capture) == capture)
            .map(|a| a.max_range)
            .fold(0.0_f32, f32::max);
        let radii = ent.obstruction_radius + self.entities.get(&target).map_or(0.0, |t| t.obstruction_radius);
        reach + radii
    }

    fn hit(&mut self, id: EntityId, target: EntityId, target_pos: Position, range: f32, secs: f32) {
        let Some(ent) = self.entities.get(&id) else {
            return;
        };
        if ent.position.map_or(true, |p| p.distance(&target_pos) > range) {
            // Could not get close enough
            self.halt(id);
            return;
        }
        let owner = ent.owner;
        let capture = ent.order().map_or(false, |o| o.capture);
        let attack = ent
            .attacks
            .iter()
            .find(|a| (a.kind == AttackKind::Capture) == capture && a.kind != AttackKind::Slaughter)
            .cloned();
        let Some(attack) = attack else {
            self.halt(id);
            return;
        };
        let hits = secs * 1000.0 / attack.repeat_time.max(1.0);
        self.pending.attacked.push(AttackedEvent {
            target,
            attacker: Some(id),
        });

        if attack.kind == AttackKind::Capture {
            self.capture(id, owner, target, attack.capture * hits);
            return;
        }
        let Some(target_ent) = self.entities.get_mut(&target) else {
            return;
        };
        let d = attack.damage;
        let r = target_ent.resistance;
        let raw = d.hack + d.pierce + d.crush + d.fire;
        let armour = r.hack + r.pierce + r.crush + r.fire;
        target_ent.hitpoints -= (raw - armour).max(0.5) * hits;
        if target_ent.hitpoints <= 0.0 {
            trace!("{} killed by {}", target, id);
            self.kill(target);
            self.halt(id);
        }
    }

    fn capture(&mut self, id: EntityId, owner: PlayerId, target: EntityId, amount: f32) {
        let num_players = self.num_players;
        let Some(target_ent) = self.entities.get_mut(&target) else {
            return;
        };
        let previous = target_ent.owner;
        let Some(capturable) = target_ent.capturable.as_mut() else {
            self.halt(id);
            return;
        };
        if capturable.points.len() < num_players {
            capturable.points.resize(num_players, 0.0);
        }
        let (Some(&held), Some(_)) = (
            capturable.points.get(previous as usize),
            capturable.points.get(owner as usize),
        ) else {
            return;
        };
        let taken = amount.min(held);
        capturable.points[previous as usize] -= taken;
        capturable.points[owner as usize] += taken;
        if capturable.points[previous as usize] <= 0.0 {
            target_ent.owner = owner;
            self.pending.ownership_changed.push(OwnershipEvent {
                entity: target,
                from: previous,
                to: owner,
            });
            self.halt(id);
        }
    }
}

/// Unit vector from `from` toward `to`, or +x when they coincide
fn direction(from: Position, to: Position) -> Position {
    let dir = (to - from).normalize();
    if dir == Position::default() {
        Position::new(1.0, 0.0)
    } else {
        dir
    }
}

#[cfg(test)]
mod tests {
    use crate::command::{Command, CommandQueue};
    use crate::core::types::{EntityId, Position};
    use crate::sandbox::{Rect, Sandbox};
    use crate::state::{Attack, Capturable, DamageSet, EntityClass, EntityInfo, GameState, GarrisonHolder, UnitAiState};

    fn field() -> Sandbox {
        let mut world = Sandbox::new(1, 3);
        world.add_land(Rect::new(0.0, 0.0, 200.0, 200.0));
        world
    }

    #[test]
    fn test_walk_then_idle() {
        let mut world = field();
        let id = world.spawn(EntityInfo::new(EntityId(0), 1, EntityClass::UNIT).at(Position::new(10.0, 10.0)));
        let mut queue = CommandQueue::new();
        queue.move_to(id, Position::new(28.0, 10.0));
        world.apply(queue.into_vec());
        world.step(1.0);
        assert_eq!(world.entity(id).and_then(|e| e.ai_state()), Some(UnitAiState::Walking));
        world.step(1.0);
        let ent = world.entity(id).unwrap();
        assert_eq!(ent.position, Some(Position::new(28.0, 10.0)));
        assert_eq!(ent.ai_state(), Some(UnitAiState::Idle));
        assert!(ent.is_idle());
    }

    #[test]
    fn test_stuck_unit_drops_order() {
        let mut world = field();
        let id = world.spawn(EntityInfo::new(EntityId(0), 1, EntityClass::UNIT).at(Position::new(10.0, 10.0)));
        world.set_stuck(id, true);
        world.apply(vec![Command::Move {
            unit: id,
            to: Position::new(50.0, 10.0),
        }]);
        world.step(1.0);
        let ent = world.entity(id).unwrap();
        assert_eq!(ent.position, Some(Position::new(10.0, 10.0)));
        assert!(ent.is_idle());
    }

    #[test]
    fn test_garrison_and_unload() {
        let mut world = field();
        let mut tower = EntityInfo::new(EntityId(0), 1, EntityClass::STRUCTURE).at(Position::new(20.0, 10.0));
        tower.garrison = Some(GarrisonHolder::new(2, EntityClass::UNIT));
        let tower = world.spawn(tower);
        let id = world.spawn(EntityInfo::new(EntityId(0), 1, EntityClass::UNIT).at(Position::new(10.0, 10.0)));
        let mut queue = CommandQueue::new();
        queue.garrison(id, tower, false);
        world.apply(queue.into_vec());

        let events = world.step(1.0);
        assert_eq!(events.garrison.len(), 1);
        assert_eq!(world.entity(id).and_then(|e| e.position), None);
        assert_eq!(world.entity(tower).map(|t| t.garrisoned().to_vec()), Some(vec![id]));

        world.apply(vec![Command::Unload { holder: tower, unit: id }]);
        assert_eq!(world.entity(id).and_then(|e| e.position), Some(Position::new(20.0, 10.0)));
        assert!(world.entity(tower).map_or(false, |t| t.garrisoned().is_empty()));
    }

    #[test]
    fn test_fight_to_the_death() {
        let mut world = field();
        let own = world.spawn(
            EntityInfo::new(EntityId(0), 1, EntityClass::UNIT)
                .at(Position::new(10.0, 10.0))
                .with_attack(Attack::melee(DamageSet::hack(50.0))),
        );
        let foe = world.spawn(EntityInfo::new(EntityId(0), 2, EntityClass::UNIT).at(Position::new(14.0, 10.0)));
        let mut queue = CommandQueue::new();
        queue.attack(own, foe, false, false);
        world.apply(queue.into_vec());

        let first = world.step(1.0);
        assert_eq!(first.attacked.len(), 1);
        let second = world.step(1.0);
        assert_eq!(second.destroy.len(), 1);
        assert!(world.entity(foe).is_none());
        assert!(world.entity(own).map_or(false, |e| e.is_idle()));
    }

    #[test]
    fn test_capture_flips_owner() {
        let mut world = field();
        let own = world.spawn(
            EntityInfo::new(EntityId(0), 1, EntityClass::UNIT)
                .at(Position::new(10.0, 10.0))
                .with_attack(Attack::capture(50.0)),
        );
        let mut house = EntityInfo::new(EntityId(0), 2, EntityClass::STRUCTURE).at(Position::new(14.0, 10.0));
        house.capturable = Some(Capturable::new(vec![0.0, 0.0, 80.0]));
        let house = world.spawn(house);
        world.apply(vec![Command::Attack {
            unit: own,
            target: house,
            allow_capture: true,
            queued: false,
        }]);
        assert_eq!(world.capturing_units(house), vec![own]);

        world.step(1.0);
        let events = world.step(1.0);
        assert_eq!(events.ownership_changed.len(), 1);
        assert_eq!(world.entity(house).map(|h| h.owner), Some(1));
    }

    #[test]
    fn test_requests_are_recorded() {
        let mut world = field();
        world.apply(vec![Command::TrainEmergencyUnits {
            positions: vec![Position::new(1.0, 1.0)],
        }]);
        assert_eq!(world.requests().len(), 1);
    }
}
