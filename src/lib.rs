//! Petra military coordination
//!
//! The defense side of an AI player: detecting raids, grouping enemies into
//! armies, assigning defenders, and ferrying units across water when a
//! threat sits on another island.

pub mod command;
pub mod context;
pub mod coordinator;
pub mod core;
pub mod defense;
pub mod sandbox;
pub mod state;
pub mod tags;
pub mod transport;

pub use coordinator::{CoordinatorSnapshot, MilitaryCoordinator};
pub use crate::core::{PetraConfig, PetraError, Result};
