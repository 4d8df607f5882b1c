//! Core type definitions used throughout the codebase

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulation entity identifier, as handed out by the game engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Player slot. Slot 0 is gaia.
pub type PlayerId = u8;

pub const GAIA: PlayerId = 0;

/// Connectivity region index (a maximal connected land or sea area).
///
/// Index 0 means "no region"; index 1 is reserved for units already aboard a ship.
pub type AccessIndex = u32;

pub const NO_ACCESS: AccessIndex = 0;
pub const ABOARD_ACCESS: AccessIndex = 1;

/// Elapsed game time in seconds
pub type GameTime = f64;

/// Unique identifier for defense armies
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArmyId(pub u32);

impl fmt::Display for ArmyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "army {}", self.0)
    }
}

/// Unique identifier for transport plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportId(pub u32);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport {}", self.0)
    }
}

/// Identifier of an attack plan owned by the attack manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub u32);

/// 2D map position (the engine's x/z ground plane)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, z: f32) -> Self {
        Self { x, z }
    }

    pub fn distance_squared(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        dx * dx + dz * dz
    }

    pub fn distance(&self, other: &Self) -> f32 {
        self.distance_squared(other).sqrt()
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.z * self.z).sqrt()
    }

    pub fn normalize(&self) -> Self {
        let len = self.length();
        if len > 0.0001 {
            Self { x: self.x / len, z: self.z / len }
        } else {
            Self::default()
        }
    }

    /// Step from `self` toward `target`, never overshooting
    pub fn step_toward(&self, target: &Self, max_step: f32) -> Self {
        let delta = *target - *self;
        let len = delta.length();
        if len <= max_step {
            *target
        } else {
            *self + delta.normalize() * max_step
        }
    }
}

impl std::ops::Add for Position {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self { x: self.x + rhs.x, z: self.z + rhs.z }
    }
}

impl std::ops::Sub for Position {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self { x: self.x - rhs.x, z: self.z - rhs.z }
    }
}

impl std::ops::Mul<f32> for Position {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self { x: self.x * rhs, z: self.z * rhs }
    }
}

/// Running sum used to average a set of positions
#[derive(Debug, Clone, Copy, Default)]
pub struct Centroid {
    sum_x: f64,
    sum_z: f64,
    count: usize,
}

impl Centroid {
    pub fn add(&mut self, pos: Position) {
        self.sum_x += pos.x as f64;
        self.sum_z += pos.z as f64;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> Option<Position> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(Position::new((self.sum_x / n) as f32, (self.sum_z / n) as f32))
    }
}
