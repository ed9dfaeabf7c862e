//! Hit detection and damage resolution
//!
//! One attack is resolved against every candidate defender in a single call
//! and produces one batch of [`DamageResult`]s, ordered by defender id.

use super::animation::AnimationAction;
use super::element::{affinity, ElementCalculator, ElementType};
use super::equipment::{EquipmentPart, TriggerType};
use super::{Computed, TickContext};
use crate::command::{AnimationCommand, AttackCommand, CommandPayload, TriggerCommand};
use crate::config::GameConfig;
use crate::math::Vec3;
use crate::property::{BuffIncreaseData, BuffOperationType, PropertyType, SubjectedStateType};
use crate::state::PlayerState;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AttackShape {
    /// Cone in front of the attacker's origin
    Sector { radius: f32, angle_degrees: f32, height: f32 },
    /// Cylinder around a fixed point
    Sphere { center: Vec3, radius: f32, height: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackSource {
    Combo { stage: u8 },
    Skill { skill_id: u32 },
}

/// What the battle calculator needs to know about a potential target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefenderView {
    pub connection_id: u32,
    pub position: Vec3,
    pub defense: f32,
    pub damage_reduction: f32,
    pub element: ElementType,
    pub targetable: bool,
}

impl DefenderView {
    pub fn of(state: &PlayerState, config: &GameConfig) -> Self {
        let untargetable = SubjectedStateType::DEAD | SubjectedStateType::INVINCIBLE;
        Self {
            connection_id: state.connection_id,
            position: state.movement.position,
            defense: state.property.current(PropertyType::Defense),
            damage_reduction: state.property.current(PropertyType::DamageReduction),
            element: state
                .inventory
                .equipment
                .element(EquipmentPart::Armor, config)
                .unwrap_or_default(),
            targetable: !state.property.subjected.intersects(untargetable),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageResult {
    pub defender_connection_id: u32,
    pub damage: f32,
    pub critical: bool,
    pub element: ElementType,
}

/// Deterministic per-attack seed from values both sides agree on
pub fn attack_seed(connection_id: u32, tick: u32, salt: u32) -> u64 {
    let mixed = ((connection_id as u64) << 32 | tick as u64) ^ (salt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    mixed.rotate_left(17)
}

#[derive(Debug, Clone)]
pub struct BattleCalculator {
    config: Arc<GameConfig>,
}

impl BattleCalculator {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self { config }
    }

    pub fn in_shape(&self, attack: &AttackCommand, target: &Vec3) -> bool {
        let reach = self.config.battle.player_radius;
        match attack.shape {
            AttackShape::Sector {
                radius,
                angle_degrees,
                height,
            } => {
                let offset = target.sub(&attack.origin);
                if offset.y.abs() > height {
                    return false;
                }
                let flat = offset.flat();
                let distance = flat.magnitude();
                if distance > radius + reach {
                    return false;
                }
                if angle_degrees >= 360.0 || distance <= f32::EPSILON {
                    return true;
                }
                let forward = attack.forward.flat().normalize();
                let cos = forward.dot(&flat.normalize()).clamp(-1.0, 1.0);
                cos.acos().to_degrees() <= angle_degrees * 0.5
            }
            AttackShape::Sphere { center, radius, height } => {
                let offset = target.sub(&center);
                offset.y.abs() <= height && offset.flat().magnitude() <= radius + reach
            }
        }
    }

    /// Resolves `attack` against `defenders`, skipping the attacker itself and
    /// anyone dead or invincible.
    pub fn resolve(&self, attacker: &PlayerState, attack: &AttackCommand, defenders: &[DefenderView]) -> Vec<DamageResult> {
        let battle = &self.config.battle;
        let raw = attacker.property.current(PropertyType::Attack) * attack.damage_scale;
        let crit_rate = attacker.property.current(PropertyType::CriticalRate);
        let crit_damage = attacker.property.current(PropertyType::CriticalDamage);

        let mut candidates: Vec<&DefenderView> = defenders
            .iter()
            .filter(|d| d.connection_id != attacker.connection_id && d.targetable)
            .filter(|d| self.in_shape(attack, &d.position))
            .collect();
        candidates.sort_by_key(|d| d.connection_id);

        candidates
            .into_iter()
            .map(|defender| {
                let mut rng = StdRng::seed_from_u64(attack.seed ^ defender.connection_id as u64);
                let critical = rng.gen::<f32>() < crit_rate;
                let mut damage = raw * affinity(attack.element, defender.element, &self.config.element);
                if critical {
                    damage *= 1.0 + crit_damage;
                }

                let armor = defender.defense.max(0.0);
                let mitigation = (armor / (armor + battle.defense_constant) + defender.damage_reduction)
                    .clamp(0.0, battle.max_damage_reduction);
                DamageResult {
                    defender_connection_id: defender.connection_id,
                    damage: (damage * (1.0 - mitigation)).max(battle.min_damage),
                    critical,
                    element: attack.element,
                }
            })
            .collect()
    }

    /// Applies one result to its defender: health loss, hit reaction, damage
    /// triggers and element reaction.
    pub fn apply_hit(
        &self,
        defender: &PlayerState,
        attacker_connection_id: u32,
        result: &DamageResult,
        element: &ElementCalculator,
        context: &TickContext,
    ) -> Computed {
        let mut next = defender.clone();
        next.property = next.property.with_buff(
            PropertyType::Health,
            &BuffIncreaseData::current(BuffOperationType::Subtract, result.damage),
        );
        let health_ratio = next
            .property
            .get(PropertyType::Health)
            .map_or(0.0, |health| health.ratio());

        let mut follow_ups = vec![
            context.command(CommandPayload::Animation(AnimationCommand {
                action: AnimationAction::Hit,
            })),
            context.command(CommandPayload::Trigger(TriggerCommand {
                trigger_type: TriggerType::OnTakeDamage,
                value: result.damage,
            })),
            context.command(CommandPayload::Trigger(TriggerCommand {
                trigger_type: TriggerType::OnHealthBelow,
                value: health_ratio,
            })),
        ];

        let reacted = element.react(&next, result.element, attacker_connection_id, context);
        follow_ups.extend(reacted.follow_ups);
        Computed::with_follow_ups(reacted.state, follow_ups)
    }
}
