//! Territory defense: threat detection, armies and defender allocation

pub mod army;
pub mod assignment;
pub mod garrison;
pub mod manager;
pub mod strength;

pub use army::{ArmyKind, ArmyState, DefenseArmy};
pub use assignment::AssignmentIndex;
pub use garrison::{garrison_attacked_unit, garrison_siege_unit, GarrisonRequest};
pub use manager::DefenseManager;
pub use strength::{army_strength, max_strength};
