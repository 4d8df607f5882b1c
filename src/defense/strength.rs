//! Combat strength heuristic
//!
//! A rough "damage output times survivability" score, good enough to compare
//! a group of attackers against a group of defenders.

use crate::core::config::{DamageWeights, StrengthConfig};
use crate::core::types::PlayerId;
use crate::state::{AttackKind, DamageSet, EntityClass, EntityInfo};

fn weighted(damage: &DamageSet, weights: &DamageWeights) -> f32 {
    (weights.hack * damage.hack
        + weights.pierce * damage.pierce
        + weights.crush * damage.crush
        + weights.fire * damage.fire)
        / DamageWeights::TYPE_COUNT
}

/// Weighted attack, range, timing and armour, scaled by max hitpoints
pub fn max_strength(ent: &EntityInfo, config: &StrengthConfig) -> f32 {
    if !ent.can_attack() {
        return 0.0;
    }
    let weights = &config.damage_importance;
    let mut strength = 0.0;
    for attack in &ent.attacks {
        if attack.kind == AttackKind::Slaughter {
            continue;
        }
        strength += weighted(&attack.damage, weights);
        strength += attack.max_range * config.range_weight;
        strength += attack.repeat_time * config.attack_time_weight;
        strength -= attack.prepare_time * config.attack_time_weight;
    }
    strength += weighted(&ent.resistance, weights);
    strength * ent.max_hitpoints / 100.0
}

/// Contribution of `ent` to an army's strength, as seen by `player`
pub fn army_strength(ent: &EntityInfo, player: PlayerId, config: &StrengthConfig) -> f32 {
    let mut strength = if ent.has_class(EntityClass::STRUCTURE) {
        if ent.owner != player {
            if ent.default_arrows > 0 {
                config.arrow_value * ent.default_arrows as f32
            } else {
                config.unarmed_structure_value
            }
        } else {
            // Only counted while recovering capture points
            config.own_structure_value
        }
    } else {
        max_strength(ent, config)
    };

    for multiplier in &config.class_multipliers {
        if ent.has_class(multiplier.classes) {
            strength *= multiplier.factor;
        }
    }
    strength
}
