//! Tuning constants for the military subsystem
//!
//! Every magic number used by the defense and transport code lives here so it
//! can be overridden from a TOML file. All distances are SQUARED map units
//! unless the field name says otherwise.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::error::{PetraError, Result};
use crate::state::EntityClass;

/// Strength multiplier that a defender needs over the attackers, per terrain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefenseRatio {
    /// Foes inside our own territory
    pub own: f32,
    /// Foes inside an ally's territory (further divided by the number of exclusive allies)
    pub ally: f32,
    /// Foes in neutral or enemy territory
    pub neutral: f32,
}

impl Default for DefenseRatio {
    fn default() -> Self {
        Self {
            own: 2.0,
            ally: 1.4,
            neutral: 1.8,
        }
    }
}

/// Army clustering and threat detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefenseConfig {
    pub defense_ratio: DefenseRatio,
    /// A new foe joins an army only within this distance of its centroid
    pub army_compact_size: f32,
    /// A foe farther than this from its centroid breaks away
    pub army_breakaway_size: f32,
    /// Two default armies closer than this are merged
    pub army_merge_size: f32,
    /// Seconds between breakaway checks of an army
    pub breakaway_refresh_interval: f64,
    /// Armies are re-evaluated against territory every N played turns
    pub army_check_period: u64,
    /// Neutral-ground army stays relevant within this distance of an allied civic centre
    pub neutral_cc_radius: f32,
    /// Neutral-ground army stays relevant within this distance of one of our docks
    pub neutral_dock_radius: f32,
    /// Base danger radius for melee attackers
    pub danger_radius: f32,
    /// Margin added to a ranged attacker's range, roughly a structure's size (not squared)
    pub ranged_danger_margin: f32,
    /// A builder near any of our structures within this distance flags its foundation
    pub foundation_proximity: f32,
    /// Enemy units in an ally's territory needed to count as an attack on that ally
    pub attacking_units_threshold: u32,
    /// Share of our capture points held by enemies that triggers a capturing army
    pub capture_recovery_threshold: f32,
    /// Defenders must be within this distance of a target to switch to an attack
    pub switch_to_attack_range: f32,
    /// Range handed to the attack manager when one of our civic centres is captured (not squared)
    pub captured_cc_attack_range: f32,
    /// Indefensible structures are scuttled when our capture ratio lies in this window
    pub scuttle_capture_window: (f32, f32),
}

impl Default for DefenseConfig {
    fn default() -> Self {
        Self {
            defense_ratio: DefenseRatio::default(),
            army_compact_size: 2000.0,
            army_breakaway_size: 3500.0,
            army_merge_size: 1400.0,
            breakaway_refresh_interval: 5.0,
            army_check_period: 5,
            neutral_cc_radius: 40000.0,
            neutral_dock_radius: 10000.0,
            danger_radius: 6000.0,
            ranged_danger_margin: 30.0,
            foundation_proximity: 30000.0,
            attacking_units_threshold: 8,
            capture_recovery_threshold: 0.25,
            switch_to_attack_range: 14400.0,
            captured_cc_attack_range: 150.0,
            scuttle_capture_window: (0.50, 0.70),
        }
    }
}

/// Defender assignment heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Units held back for far-away or out-of-territory threats, per pass
    pub reserve_size: usize,
    /// Threats farther than this and outside our territory draw from the reserve first
    pub reserve_distance: f32,
    /// A foe with fewer defenders than this is preferred
    pub preferred_cap: usize,
    /// Hard cap of defenders against an ordinary foe
    pub ordinary_cap: usize,
    /// Hard cap of defenders against heroes and siege
    pub priority_cap: usize,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            reserve_size: 12,
            reserve_distance: 40000.0,
            preferred_cap: 3,
            ordinary_cap: 6,
            priority_cap: 9,
        }
    }
}

/// Relative weight of each damage type
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DamageWeights {
    pub hack: f32,
    pub pierce: f32,
    pub crush: f32,
    pub fire: f32,
}

impl DamageWeights {
    pub const TYPE_COUNT: f32 = 4.0;
}

impl Default for DamageWeights {
    fn default() -> Self {
        Self {
            hack: 0.085,
            pierce: 0.075,
            crush: 0.065,
            fire: 0.095,
        }
    }
}

/// Flat multiplier applied to entities carrying all of `classes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassMultiplier {
    pub classes: EntityClass,
    pub factor: f32,
}

/// Strength heuristic weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrengthConfig {
    pub damage_importance: DamageWeights,
    pub range_weight: f32,
    pub attack_time_weight: f32,
    /// Foreign structure value per default arrow
    pub arrow_value: f32,
    /// Foreign structure without arrows
    pub unarmed_structure_value: f32,
    /// Own structure (only tracked while recovering capture points)
    pub own_structure_value: f32,
    /// Overrides for classes the stat heuristic undervalues
    pub class_multipliers: Vec<ClassMultiplier>,
}

impl Default for StrengthConfig {
    fn default() -> Self {
        Self {
            damage_importance: DamageWeights::default(),
            range_weight: 0.0125,
            attack_time_weight: 1.0e-5,
            arrow_value: 6.0,
            unarmed_structure_value: 4.0,
            own_structure_value: 2.0,
            class_multipliers: vec![ClassMultiplier {
                classes: EntityClass::ANIMAL | EntityClass::ELEPHANT,
                factor: 3.0,
            }],
        }
    }
}

/// Transport plan timings and retry budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// A ship closer than this to its rendezvous point is considered there
    pub boarding_range: f32,
    /// Ships unload once this close to their landing point
    pub unload_range: f32,
    /// Seconds without movement before a unit or walking ship counts as stalled
    pub stall_interval: f64,
    /// Seconds before an idle (not loading) ship is sent again
    pub ship_idle_timeout: f64,
    /// Seconds before any ship is sent again
    pub ship_hard_timeout: f64,
    /// Boarding retries of a ship before a new rendezvous point is chosen
    pub ship_boarding_retries: u32,
    /// Sailing retries of a ship before a new landing point is chosen
    pub ship_sailing_retries: u32,
    /// Stalls near its ship after which a unit is destroyed
    pub unit_stall_limit: u32,
    /// Stalls after which a unit first tries to walk out of its trap
    pub unit_unstick_after: u32,
    /// A stalled unit farther than this from the rendezvous point walks there
    pub unit_rendezvous_range: f32,
    /// Distance an emptied ship moves away from its landing point (not squared)
    pub empty_ship_clearance: f32,
    /// Distance a ship moves after reloading a misdelivered unit (not squared)
    pub recovery_clearance: f32,
    /// Allow several ships per plan
    pub flotilla: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            boarding_range: 18.0 * 18.0,
            unload_range: 625.0,
            stall_interval: 2.0,
            ship_idle_timeout: 5.0,
            ship_hard_timeout: 8.0,
            ship_boarding_retries: 1,
            ship_sailing_retries: 2,
            unit_stall_limit: 5,
            unit_unstick_after: 1,
            unit_rendezvous_range: 225.0,
            empty_ship_clearance: 30.0,
            recovery_clearance: 15.0,
            flotilla: false,
        }
    }
}

/// Health ratios used for garrison decisions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GarrisonHealthLevel {
    pub low: f32,
    pub medium: f32,
    pub high: f32,
}

impl Default for GarrisonHealthLevel {
    fn default() -> Self {
        Self {
            low: 0.4,
            medium: 0.55,
            high: 0.7,
        }
    }
}

/// Bot personality traits relevant to defense
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Personality {
    /// Baseline willingness to help allies (0.0 to 1.0)
    pub cooperative: f32,
}

impl Default for Personality {
    fn default() -> Self {
        Self { cooperative: 0.5 }
    }
}

/// Complete configuration of the military subsystem
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PetraConfig {
    #[serde(default)]
    pub defense: DefenseConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub strength: StrengthConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub garrison_health: GarrisonHealthLevel,
    #[serde(default)]
    pub personality: Personality,
}

impl PetraConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: PetraConfig = toml::from_str(contents)?;
        config.validate().map_err(PetraError::InvalidConfig)?;
        Ok(config)
    }

    /// Check that the values are mutually consistent
    pub fn validate(&self) -> std::result::Result<(), String> {
        let d = &self.defense;
        if d.army_compact_size <= 0.0 || d.army_merge_size <= 0.0 {
            return Err("army sizes must be positive".into());
        }
        // A foe admitted to an army must not immediately break away again
        if d.army_breakaway_size < d.army_compact_size {
            return Err(format!(
                "army_breakaway_size ({}) should be >= army_compact_size ({})",
                d.army_breakaway_size, d.army_compact_size
            ));
        }
        if d.defense_ratio.own <= 0.0 || d.defense_ratio.ally <= 0.0 || d.defense_ratio.neutral <= 0.0 {
            return Err("defense ratios must be positive".into());
        }
        if d.army_check_period == 0 {
            return Err("army_check_period must be at least 1".into());
        }
        let (lo, hi) = d.scuttle_capture_window;
        if lo > hi {
            return Err(format!("scuttle_capture_window ({}, {}) is inverted", lo, hi));
        }

        let a = &self.allocation;
        if a.preferred_cap > a.ordinary_cap || a.ordinary_cap > a.priority_cap {
            return Err(format!(
                "assignment caps should be ordered: preferred {} <= ordinary {} <= priority {}",
                a.preferred_cap, a.ordinary_cap, a.priority_cap
            ));
        }

        let g = &self.garrison_health;
        if !(g.low <= g.medium && g.medium <= g.high) {
            return Err("garrison health levels should be ordered low <= medium <= high".into());
        }

        let t = &self.transport;
        if t.boarding_range <= 0.0 || t.unload_range <= 0.0 {
            return Err("transport ranges must be positive".into());
        }
        if t.ship_idle_timeout > t.ship_hard_timeout {
            return Err(format!(
                "ship_idle_timeout ({}) should be <= ship_hard_timeout ({})",
                t.ship_idle_timeout, t.ship_hard_timeout
            ));
        }

        Ok(())
    }
}

/// Load the configuration from a TOML file
///
/// Missing sections and fields fall back to their defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<PetraConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    PetraConfig::from_toml_str(&contents)
}
