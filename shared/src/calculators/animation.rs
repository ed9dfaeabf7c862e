//! Animation state machine and attack combo tracking

use super::battle::{attack_seed, AttackSource};
use super::equipment::EquipmentPart;
use super::movement::{classify, EnvironmentType};
use super::{unhandled, Computed, StateCalculator};
use crate::command::{AnimationCommand, AttackCommand, CommandPayload, NetworkCommand};
use crate::config::{AnimationDefinition, GameConfig};
use crate::error::CommandError;
use crate::property::{PropertyType, SubjectedStateType};
use crate::state::PlayerState;
use crate::timer::{TimerId, TimerKind};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnimationState {
    Idle,
    Move,
    Sprint,
    Jump,
    SprintJump,
    Roll,
    Attack,
    Hit,
    Dead,
    SkillQ,
    SkillE,
    Falling,
}

impl AnimationState {
    pub const ALL: [AnimationState; 12] = [
        AnimationState::Idle,
        AnimationState::Move,
        AnimationState::Sprint,
        AnimationState::Jump,
        AnimationState::SprintJump,
        AnimationState::Roll,
        AnimationState::Attack,
        AnimationState::Hit,
        AnimationState::Dead,
        AnimationState::SkillQ,
        AnimationState::SkillE,
        AnimationState::Falling,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnimationType {
    /// Loops until replaced
    Continuous,
    /// Plays once, then falls back to Idle
    Single,
    /// Plays once per stage of a multi-stage sequence
    Combo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnimationAction {
    StartCooldown { state: AnimationState },
    Hit,
    Die,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationCooldownState {
    pub current: AnimationState,
    pub elapsed_ticks: u32,
    pub animation_speed: f32,
    /// 0 when no combo is running, otherwise the last stage played
    pub combo_stage: u8,
    pub combo_window: Option<TimerId>,
    pub cooldowns: BTreeMap<AnimationState, u32>,
}

impl Default for AnimationCooldownState {
    fn default() -> Self {
        Self {
            current: AnimationState::Idle,
            elapsed_ticks: 0,
            animation_speed: 1.0,
            combo_stage: 0,
            combo_window: None,
            cooldowns: BTreeMap::new(),
        }
    }
}

impl AnimationCooldownState {
    pub fn cooldown(&self, state: AnimationState) -> u32 {
        self.cooldowns.get(&state).copied().unwrap_or(0)
    }

    fn enter(&mut self, state: AnimationState, speed: f32) {
        self.current = state;
        self.elapsed_ticks = 0;
        self.animation_speed = speed;
    }
}

/// A transition is legal only out of an interruptible animation, and only when
/// that animation loops or the candidate outranks it.
pub fn can_transition(current: &AnimationDefinition, candidate: &AnimationDefinition) -> bool {
    current.can_be_interrupted
        && (current.animation_type == AnimationType::Continuous || candidate.priority > current.priority)
}

/// Ticks a one-shot animation lasts at `speed`
pub fn scaled_duration(definition: &AnimationDefinition, speed: f32) -> u32 {
    let speed = if speed.is_finite() && speed > 0.1 { speed } else { 0.1 };
    ((definition.duration_ticks as f32 / speed).ceil() as u32).max(1)
}

#[derive(Debug, Clone)]
pub struct AnimationCalculator {
    config: Arc<GameConfig>,
}

impl AnimationCalculator {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self { config }
    }

    /// Whether the player may leave its current animation for `candidate`.
    pub fn transition_allowed(
        &self,
        animation: &AnimationCooldownState,
        candidate: AnimationState,
    ) -> Result<bool, CommandError> {
        if animation.cooldown(candidate) > 0 {
            return Ok(false);
        }
        let current = self.config.animation(animation.current)?;
        let next = self.config.animation(candidate)?;
        Ok(can_transition(current, next))
    }

    /// Enters `candidate` if legal, returning whether it was entered.
    pub fn try_enter(&self, state: &mut PlayerState, candidate: AnimationState) -> Result<bool, CommandError> {
        if !self.transition_allowed(&state.combat.animation, candidate)? {
            return Ok(false);
        }
        let speed = self.speed_for(state, candidate);
        state.combat.animation.enter(candidate, speed);
        Ok(true)
    }

    fn speed_for(&self, state: &PlayerState, candidate: AnimationState) -> f32 {
        match candidate {
            AnimationState::Attack => state.property.current(PropertyType::AttackSpeed).max(0.1),
            _ => 1.0,
        }
    }

    fn reset_combo(state: &mut PlayerState) {
        if let Some(window) = state.combat.animation.combo_window.take() {
            state.combat.timers.cancel(window);
        }
        state.combat.animation.combo_stage = 0;
    }

    fn compute_input(&self, command: &NetworkCommand, state: &PlayerState) -> Result<Computed, CommandError> {
        let input = match &command.payload {
            CommandPayload::Input(input) => input,
            _ => return Err(unhandled("animation", command)),
        };

        let movement = &self.config.movement;
        let moving = input.movement.flat().magnitude() > movement.rotation_input_threshold;
        let wants_action = moving || input.jump || input.roll || input.attack;
        if wants_action && state.property.subjected.intersects(SubjectedStateType::IMMOBILE) {
            return Err(CommandError::rejected("player cannot act"));
        }

        let grounded = classify(&input.probe, &state.movement, movement) != EnvironmentType::Air;
        let candidate = if input.roll {
            AnimationState::Roll
        } else if input.attack {
            AnimationState::Attack
        } else if input.jump && grounded {
            if input.sprint {
                AnimationState::SprintJump
            } else {
                AnimationState::Jump
            }
        } else if !grounded {
            AnimationState::Falling
        } else if moving {
            if input.sprint {
                AnimationState::Sprint
            } else {
                AnimationState::Move
            }
        } else {
            AnimationState::Idle
        };

        if candidate == AnimationState::Attack {
            return self.combo(command, state);
        }

        let mut next = state.clone();
        if candidate == next.combat.animation.current {
            return Ok(Computed::new(next));
        }

        let definition = self.config.animation(candidate)?;
        if self.transition_allowed(&next.combat.animation, candidate)?
            && next.property.can_afford(&definition.costs)
        {
            next.property = next.property.pay(&definition.costs);
            let speed = self.speed_for(&next, candidate);
            next.combat.animation.enter(candidate, speed);
        }
        Ok(Computed::new(next))
    }

    /// Plays the next attack stage, or starts a new combo.
    fn combo(&self, command: &NetworkCommand, state: &PlayerState) -> Result<Computed, CommandError> {
        let max_stage = self.config.animation.attack_combo_max_count.max(1);
        let animation = &state.combat.animation;
        // The window outlives the attack animation; only its timer ends the combo
        let continuing = animation.combo_stage > 0
            && animation.combo_stage < max_stage
            && animation
                .combo_window
                .map_or(false, |id| state.combat.timers.is_pending(id));
        let chaining = continuing && animation.current == AnimationState::Attack;

        if !chaining && !self.transition_allowed(animation, AnimationState::Attack)? {
            debug!(
                "Attack ignored for connection {} in {:?}",
                state.connection_id, animation.current
            );
            return Ok(Computed::new(state.clone()));
        }

        let stage = if continuing { animation.combo_stage + 1 } else { 1 };
        let mut next = state.clone();
        Self::reset_combo(&mut next);
        let speed = self.speed_for(&next, AnimationState::Attack);
        next.combat.animation.enter(AnimationState::Attack, speed);

        let battle = &self.config.battle;
        let index = (stage as usize - 1).min(battle.combo_shapes.len().saturating_sub(1));
        let mut follow_ups = Vec::new();
        if let Some(shape) = battle.combo_shapes.get(index) {
            let element = next
                .inventory
                .equipment
                .element(EquipmentPart::Weapon, &self.config)
                .unwrap_or_default();
            follow_ups.push(command.follow_up(CommandPayload::Attack(AttackCommand {
                origin: next.movement.position,
                forward: next.movement.rotation.forward(),
                shape: *shape,
                damage_scale: battle.combo_damage_scales.get(index).copied().unwrap_or(1.0),
                element,
                seed: attack_seed(next.connection_id, command.header.tick, stage as u32),
                source: AttackSource::Combo { stage },
            })));
        }

        if stage >= max_stage {
            follow_ups.push(command.follow_up(CommandPayload::Animation(AnimationCommand {
                action: AnimationAction::StartCooldown {
                    state: AnimationState::Attack,
                },
            })));
        } else {
            let definition = self.config.animation(AnimationState::Attack)?;
            let window = scaled_duration(definition, speed) + self.config.animation.combo_window_ticks;
            next.combat.animation.combo_stage = stage;
            next.combat.animation.combo_window = Some(next.combat.timers.schedule(TimerKind::ComboWindow, window));
        }

        Ok(Computed::with_follow_ups(next, follow_ups))
    }

    fn compute_action(&self, action: &AnimationAction, state: &PlayerState) -> Result<Computed, CommandError> {
        let mut next = state.clone();
        match action {
            AnimationAction::StartCooldown { state: animation } => {
                let ticks = self.config.animation(*animation)?.cooldown_ticks;
                if ticks > 0 {
                    next.combat.animation.cooldowns.insert(*animation, ticks);
                }
            }
            AnimationAction::Hit => {
                if !next.property.is_dead() && self.try_enter(&mut next, AnimationState::Hit)? {
                    Self::reset_combo(&mut next);
                }
            }
            AnimationAction::Die => {
                Self::reset_combo(&mut next);
                if next.combat.animation.current != AnimationState::Dead {
                    next.combat.animation.enter(AnimationState::Dead, 1.0);
                }
            }
        }
        Ok(Computed::new(next))
    }

    pub fn close_combo_window(&self, state: &PlayerState) -> PlayerState {
        let mut next = state.clone();
        next.combat.animation.combo_stage = 0;
        next.combat.animation.combo_window = None;
        next
    }

    /// Per-tick clock: counts cooldowns down and ends finished one-shot animations.
    pub fn advance(&self, state: &PlayerState) -> Result<Computed, CommandError> {
        let mut next = state.clone();
        let animation = &mut next.combat.animation;
        animation.elapsed_ticks = animation.elapsed_ticks.saturating_add(1);
        animation.cooldowns.retain(|_, remaining| {
            *remaining = remaining.saturating_sub(1);
            *remaining > 0
        });

        let definition = self.config.animation(animation.current)?;
        if definition.animation_type != AnimationType::Continuous
            && animation.elapsed_ticks >= scaled_duration(definition, animation.animation_speed)
        {
            let fallback = if next.property.is_dead() {
                AnimationState::Dead
            } else {
                AnimationState::Idle
            };
            if next.combat.animation.current != fallback {
                next.combat.animation.enter(fallback, 1.0);
            }
        }
        Ok(Computed::new(next))
    }
}

impl StateCalculator for AnimationCalculator {
    fn compute(&self, command: &NetworkCommand, state: &PlayerState) -> Result<Computed, CommandError> {
        match &command.payload {
            CommandPayload::Input(_) => self.compute_input(command, state),
            CommandPayload::Animation(animation) => self.compute_action(&animation.action, state),
            _ => Err(unhandled("animation", command)),
        }
    }
}
