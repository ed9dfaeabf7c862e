//! Skill slots, cooldown headers and per-tick in-flight skill effects

use super::animation::{AnimationCalculator, AnimationState};
use super::battle::{attack_seed, AttackShape, AttackSource, DefenderView};
use super::equipment::TriggerType;
use super::{unhandled, Computed, StateCalculator, TickContext};
use crate::command::{AttackCommand, CommandPayload, NetworkCommand, SkillCommand, TriggerCommand};
use crate::config::GameConfig;
use crate::error::CommandError;
use crate::math::Vec3;
use crate::property::SubjectedStateType;
use crate::state::PlayerState;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SkillSlot {
    Q,
    E,
}

impl SkillSlot {
    pub fn animation(&self) -> AnimationState {
        match self {
            SkillSlot::Q => AnimationState::SkillQ,
            SkillSlot::E => AnimationState::SkillE,
        }
    }
}

/// Closed set of skill behaviors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SkillBehavior {
    /// Projectile that damages the first defender it touches
    SingleFly { speed: f32, range: f32, radius: f32 },
    /// Instant area at a target point within `range`
    AreaRanged { range: f32, radius: f32 },
    /// Projectile that explodes on contact or at the end of its range
    AreaFly { speed: f32, range: f32, radius: f32 },
    Dash { distance: f32, duration_ticks: u32 },
    /// Area that lands `delay_ticks` after the cast
    DelayedAreaRanged { range: f32, radius: f32, delay_ticks: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownHeader {
    pub skill_id: u32,
    pub cooldown_ticks: u32,
    pub remaining_ticks: u32,
}

impl CooldownHeader {
    pub fn is_ready(&self) -> bool {
        self.remaining_ticks == 0
    }

    fn start(&mut self) {
        self.remaining_ticks = self.cooldown_ticks;
    }

    fn tick(&mut self) {
        self.remaining_ticks = self.remaining_ticks.saturating_sub(1);
    }
}

/// One loaded skill slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillChecker {
    pub slot: SkillSlot,
    pub skill_id: u32,
    pub cooldown: CooldownHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InFlightSkill {
    Projectile {
        skill_id: u32,
        position: Vec3,
        direction: Vec3,
        speed: f32,
        remaining_distance: f32,
        radius: f32,
        explodes: bool,
    },
    Delayed {
        skill_id: u32,
        center: Vec3,
        radius: f32,
        remaining_ticks: u32,
    },
    Dash {
        step: Vec3,
        remaining_ticks: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SkillState {
    pub checkers: BTreeMap<SkillSlot, SkillChecker>,
    pub in_flight: Vec<InFlightSkill>,
}

#[derive(Debug, Clone)]
pub struct SkillCalculator {
    config: Arc<GameConfig>,
    animation: AnimationCalculator,
}

impl SkillCalculator {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self {
            animation: AnimationCalculator::new(Arc::clone(&config)),
            config,
        }
    }

    fn load(&self, state: &PlayerState, slot: SkillSlot, skill_id: u32) -> Result<PlayerState, CommandError> {
        let skill = self.config.skill(skill_id)?;
        let mut next = state.clone();
        next.skills.checkers.insert(
            slot,
            SkillChecker {
                slot,
                skill_id,
                cooldown: CooldownHeader {
                    skill_id,
                    cooldown_ticks: skill.cooldown_ticks,
                    remaining_ticks: 0,
                },
            },
        );
        Ok(next)
    }

    /// Point `target` pulled back onto the cast range around `origin`.
    fn clamp_target(origin: &Vec3, target: &Vec3, range: f32) -> Vec3 {
        let offset = target.sub(origin).flat();
        if offset.magnitude() <= range {
            origin.add(&offset)
        } else {
            origin.add(&offset.normalize().scale(range))
        }
    }

    fn area_attack(&self, connection_id: u32, tick: u32, skill_id: u32, center: Vec3, radius: f32, forward: Vec3) -> Result<AttackCommand, CommandError> {
        let skill = self.config.skill(skill_id)?;
        Ok(AttackCommand {
            origin: center,
            forward,
            shape: AttackShape::Sphere {
                center,
                radius,
                height: self.config.battle.player_height,
            },
            damage_scale: skill.damage_scale,
            element: skill.element,
            seed: attack_seed(connection_id, tick, skill_id),
            source: AttackSource::Skill { skill_id },
        })
    }

    fn cast(&self, command: &NetworkCommand, state: &PlayerState, cast: &SkillCommand) -> Result<Computed, CommandError> {
        let checker = state
            .skills
            .checkers
            .get(&cast.slot)
            .ok_or_else(|| CommandError::rejected(format!("no skill loaded in slot {:?}", cast.slot)))?;
        if !checker.cooldown.is_ready() {
            return Err(CommandError::rejected(format!(
                "skill {} on cooldown for {} ticks",
                checker.skill_id, checker.cooldown.remaining_ticks
            )));
        }
        if state.property.subjected.intersects(SubjectedStateType::NO_CAST) {
            return Err(CommandError::rejected("player cannot cast"));
        }
        let skill_id = checker.skill_id;
        let skill = self.config.skill(skill_id)?;
        if !state.property.can_afford(&skill.costs) {
            return Err(CommandError::rejected(format!("cannot afford skill {}", skill_id)));
        }

        let mut next = state.clone();
        if !self.animation.try_enter(&mut next, cast.slot.animation())? {
            return Err(CommandError::rejected(format!(
                "cannot cast from {:?}",
                state.combat.animation.current
            )));
        }
        next.property = next.property.pay(&skill.costs);
        if let Some(checker) = next.skills.checkers.get_mut(&cast.slot) {
            checker.cooldown.start();
        }

        let origin = next.movement.position;
        let mut direction = cast.direction.flat().normalize();
        if direction == Vec3::ZERO {
            direction = next.movement.rotation.forward();
        }

        let mut follow_ups = Vec::new();
        match skill.behavior {
            SkillBehavior::SingleFly { speed, range, radius } | SkillBehavior::AreaFly { speed, range, radius } => {
                next.skills.in_flight.push(InFlightSkill::Projectile {
                    skill_id,
                    position: origin,
                    direction,
                    speed,
                    remaining_distance: range,
                    radius,
                    explodes: matches!(skill.behavior, SkillBehavior::AreaFly { .. }),
                });
            }
            SkillBehavior::AreaRanged { range, radius } => {
                let center = Self::clamp_target(&origin, &cast.target, range);
                let attack = self.area_attack(next.connection_id, command.header.tick, skill_id, center, radius, direction)?;
                follow_ups.push(command.follow_up(CommandPayload::Attack(attack)));
            }
            SkillBehavior::DelayedAreaRanged {
                range,
                radius,
                delay_ticks,
            } => {
                next.skills.in_flight.push(InFlightSkill::Delayed {
                    skill_id,
                    center: Self::clamp_target(&origin, &cast.target, range),
                    radius,
                    remaining_ticks: delay_ticks.max(1),
                });
            }
            SkillBehavior::Dash {
                distance,
                duration_ticks,
            } => {
                let ticks = duration_ticks.max(1);
                next.skills.in_flight.push(InFlightSkill::Dash {
                    step: direction.scale(distance / ticks as f32),
                    remaining_ticks: ticks,
                });
            }
        }

        follow_ups.push(command.follow_up(CommandPayload::Trigger(TriggerCommand {
            trigger_type: TriggerType::OnSkillCast,
            value: skill_id as f32,
        })));
        debug!("Connection {} cast skill {} at tick {}", next.connection_id, skill_id, command.header.tick);
        Ok(Computed::with_follow_ups(next, follow_ups))
    }

    /// Per-tick step: cooldowns count down and every in-flight effect moves,
    /// lands or expires. Landing effects emit `Attack` commands.
    pub fn advance(&self, state: &PlayerState, context: &TickContext, defenders: &[DefenderView]) -> Result<Computed, CommandError> {
        let mut next = state.clone();
        for checker in next.skills.checkers.values_mut() {
            checker.cooldown.tick();
        }
        if next.property.is_dead() {
            next.skills.in_flight.clear();
            return Ok(Computed::new(next));
        }

        let battle = &self.config.battle;
        let dt = self.config.tick_dt();
        let touches = |position: &Vec3, radius: f32| {
            defenders.iter().any(|d| {
                d.connection_id != state.connection_id
                    && d.targetable
                    && (d.position.y - position.y).abs() <= battle.player_height
                    && d.position.sub(position).flat().magnitude() <= radius + battle.player_radius
            })
        };

        let mut follow_ups = Vec::new();
        let mut remaining = Vec::with_capacity(next.skills.in_flight.len());
        for effect in std::mem::take(&mut next.skills.in_flight) {
            match effect {
                InFlightSkill::Projectile {
                    skill_id,
                    position,
                    direction,
                    speed,
                    remaining_distance,
                    radius,
                    explodes,
                } => {
                    let step = (speed * dt).min(remaining_distance);
                    let position = position.add(&direction.scale(step));
                    let remaining_distance = remaining_distance - step;
                    let hit = touches(&position, radius);
                    if hit || (explodes && remaining_distance <= 0.0) {
                        let attack = self.area_attack(state.connection_id, context.tick, skill_id, position, radius, direction)?;
                        follow_ups.push(context.command(CommandPayload::Attack(attack)));
                    } else if remaining_distance > 0.0 {
                        remaining.push(InFlightSkill::Projectile {
                            skill_id,
                            position,
                            direction,
                            speed,
                            remaining_distance,
                            radius,
                            explodes,
                        });
                    }
                }
                InFlightSkill::Delayed {
                    skill_id,
                    center,
                    radius,
                    remaining_ticks,
                } => {
                    let remaining_ticks = remaining_ticks.saturating_sub(1);
                    if remaining_ticks == 0 {
                        let forward = next.movement.rotation.forward();
                        let attack = self.area_attack(state.connection_id, context.tick, skill_id, center, radius, forward)?;
                        follow_ups.push(context.command(CommandPayload::Attack(attack)));
                    } else {
                        remaining.push(InFlightSkill::Delayed {
                            skill_id,
                            center,
                            radius,
                            remaining_ticks,
                        });
                    }
                }
                InFlightSkill::Dash { step, remaining_ticks } => {
                    next.movement.position = next.movement.position.add(&step);
                    if remaining_ticks > 1 {
                        remaining.push(InFlightSkill::Dash {
                            step,
                            remaining_ticks: remaining_ticks - 1,
                        });
                    }
                }
            }
        }
        next.skills.in_flight = remaining;
        Ok(Computed::with_follow_ups(next, follow_ups))
    }
}

impl StateCalculator for SkillCalculator {
    fn compute(&self, command: &NetworkCommand, state: &PlayerState) -> Result<Computed, CommandError> {
        match &command.payload {
            CommandPayload::SkillLoad(load) => Ok(Computed::new(self.load(state, load.slot, load.skill_id)?)),
            CommandPayload::SkillChanged(changed) => match changed.skill_id {
                Some(skill_id) => Ok(Computed::new(self.load(state, changed.slot, skill_id)?)),
                None => {
                    let mut next = state.clone();
                    next.skills.checkers.remove(&changed.slot);
                    Ok(Computed::new(next))
                }
            },
            CommandPayload::Skill(cast) => self.cast(command, state, cast),
            _ => Err(unhandled("skill", command)),
        }
    }
}
