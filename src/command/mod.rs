//! Outgoing commands
//!
//! Commands are fire-and-forget: their outcome is only observed on a later
//! turn through the game state. Requests aimed at other AI modules (garrison
//! manager, attack manager, production) travel the same queue.

use serde::{Deserialize, Serialize};

use crate::core::types::{ArmyId, EntityId, PlanId, Position};

/// Why a unit is handed to the garrison manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GarrisonKind {
    Protection,
    Emergency,
    Decay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stance {
    Aggressive,
    Defensive,
    Standground,
    Passive,
    /// Never react; used by ships ferrying units
    NoAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Attack {
        unit: EntityId,
        target: EntityId,
        allow_capture: bool,
        queued: bool,
    },
    Move {
        unit: EntityId,
        to: Position,
    },
    MoveToRange {
        unit: EntityId,
        to: Position,
        min: f32,
        max: f32,
    },
    MoveApart {
        unit: EntityId,
        from: Position,
        distance: f32,
    },
    StopMoving {
        unit: EntityId,
    },
    Garrison {
        unit: EntityId,
        holder: EntityId,
        queued: bool,
    },
    Unload {
        holder: EntityId,
        unit: EntityId,
    },
    Destroy {
        entity: EntityId,
    },
    SetStance {
        unit: EntityId,
        stance: Stance,
    },
    ReturnResources {
        unit: EntityId,
        dropsite: EntityId,
    },
    /// Garrison manager: put `unit` in `holder`
    GarrisonFor {
        unit: EntityId,
        holder: EntityId,
        kind: GarrisonKind,
    },
    /// Headquarters: train units garrisoned near these threats
    TrainEmergencyUnits {
        positions: Vec<Position>,
    },
    /// Attack manager: turn defenders into an attack on `target`
    SwitchDefenseToAttack {
        target: EntityId,
        army: Option<ArmyId>,
        range: Option<f32>,
        unique_target: bool,
    },
    /// Attack manager: drop `unit` from its attack plan
    LeaveAttackPlan {
        unit: EntityId,
        plan: PlanId,
    },
}

impl Command {
    /// The entity the command is issued to, if it is a unit order
    pub fn subject(&self) -> Option<EntityId> {
        match self {
            Command::Attack { unit, .. }
            | Command::Move { unit, .. }
            | Command::MoveToRange { unit, .. }
            | Command::MoveApart { unit, .. }
            | Command::StopMoving { unit }
            | Command::Garrison { unit, .. }
            | Command::SetStance { unit, .. }
            | Command::ReturnResources { unit, .. }
            | Command::GarrisonFor { unit, .. } => Some(*unit),
            Command::Unload { holder, .. } => Some(*holder),
            Command::Destroy { entity } => Some(*entity),
            Command::TrainEmergencyUnits { .. }
            | Command::SwitchDefenseToAttack { .. }
            | Command::LeaveAttackPlan { .. } => None,
        }
    }
}

/// Commands emitted during one AI turn, in issue order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    pub fn into_vec(self) -> Vec<Command> {
        self.commands
    }

    /// Commands addressed to `unit`
    pub fn for_unit(&self, unit: EntityId) -> impl Iterator<Item = &Command> {
        self.commands.iter().filter(move |c| c.subject() == Some(unit))
    }

    // Convenience constructors for the common unit orders

    pub fn attack(&mut self, unit: EntityId, target: EntityId, allow_capture: bool, queued: bool) {
        self.push(Command::Attack {
            unit,
            target,
            allow_capture,
            queued,
        });
    }

    pub fn move_to(&mut self, unit: EntityId, to: Position) {
        self.push(Command::Move { unit, to });
    }

    pub fn move_to_range(&mut self, unit: EntityId, to: Position, min: f32, max: f32) {
        self.push(Command::MoveToRange { unit, to, min, max });
    }

    pub fn move_apart(&mut self, unit: EntityId, from: Position, distance: f32) {
        self.push(Command::MoveApart { unit, from, distance });
    }

    pub fn stop(&mut self, unit: EntityId) {
        self.push(Command::StopMoving { unit });
    }

    pub fn garrison(&mut self, unit: EntityId, holder: EntityId, queued: bool) {
        self.push(Command::Garrison { unit, holder, queued });
    }

    pub fn destroy(&mut self, entity: EntityId) {
        self.push(Command::Destroy { entity });
    }
}

impl IntoIterator for CommandQueue {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_keeps_issue_order() {
        let mut queue = CommandQueue::new();
        queue.move_to(EntityId(1), Position::new(1.0, 2.0));
        queue.attack(EntityId(1), EntityId(9), false, true);
        queue.destroy(EntityId(3));
        assert_eq!(queue.len(), 3);
        let v = queue.into_vec();
        assert!(matches!(v[0], Command::Move { .. }));
        assert!(matches!(v[1], Command::Attack { queued: true, .. }));
        assert!(matches!(v[2], Command::Destroy { .. }));
    }

    #[test]
    fn test_for_unit_filters_by_subject() {
        let mut queue = CommandQueue::new();
        queue.stop(EntityId(1));
        queue.stop(EntityId(2));
        queue.push(Command::TrainEmergencyUnits { positions: vec![] });
        assert_eq!(queue.for_unit(EntityId(2)).count(), 1);
        assert_eq!(queue.for_unit(EntityId(5)).count(), 0);
    }
}
