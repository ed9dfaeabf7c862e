//! Character movement driven by input and probed geometry
//!
//! Geometry queries happen outside the core: whoever produces an
//! [`InputCommand`] samples a [`PhysicsProbe`] and embeds the [`ProbeResult`]
//! in the command, so the server replays exactly what the client saw.

use super::animation::AnimationState;
use super::{unhandled, Computed, StateCalculator};
use crate::command::{CommandPayload, InputCommand, NetworkCommand};
use crate::config::{GameConfig, MovementConfig};
use crate::error::CommandError;
use crate::math::{Quat, Vec3};
use crate::property::{PropertyType, SubjectedStateType};
use crate::state::PlayerState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Speeds below this are treated as standing still
const SPEED_EPSILON: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnvironmentType {
    #[default]
    Ground,
    Stairs,
    Air,
}

/// Raycast results for one position: one ray down, one ray along the heading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Distance from the feet to the surface below, `f32::MAX` if nothing was hit
    pub ground_distance: f32,
    pub ground_normal: Vec3,
    pub step_ahead: bool,
    pub step_height: f32,
    pub forward_blocked: bool,
}

impl ProbeResult {
    pub fn grounded() -> Self {
        Self {
            ground_distance: 0.0,
            ground_normal: Vec3::UP,
            step_ahead: false,
            step_height: 0.0,
            forward_blocked: false,
        }
    }

    pub fn airborne(ground_distance: f32) -> Self {
        Self {
            ground_distance,
            ..Self::grounded()
        }
    }
}

impl Default for ProbeResult {
    fn default() -> Self {
        Self::grounded()
    }
}

pub trait PhysicsProbe {
    fn probe(&self, position: &Vec3, heading: &Vec3) -> ProbeResult;
}

/// Endless flat floor at a fixed height
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlatGroundProbe {
    pub ground_height: f32,
}

impl PhysicsProbe for FlatGroundProbe {
    fn probe(&self, position: &Vec3, _heading: &Vec3) -> ProbeResult {
        ProbeResult::airborne((position.y - self.ground_height).max(0.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MovementState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Quat,
    /// Smoothed horizontal speed, chases the input-derived target
    pub current_speed: f32,
    pub environment: EnvironmentType,
}

impl MovementState {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

/// Classifies the surroundings from a probe taken before moving.
pub fn classify(probe: &ProbeResult, movement: &MovementState, config: &MovementConfig) -> EnvironmentType {
    let rising = movement.velocity.y > 0.0 && probe.ground_distance > 0.0;
    if rising || probe.ground_distance > config.ground_check_distance {
        return EnvironmentType::Air;
    }
    if probe.step_ahead && probe.step_height > 0.0 && probe.step_height <= config.max_step_height {
        EnvironmentType::Stairs
    } else {
        EnvironmentType::Ground
    }
}

#[derive(Debug, Clone)]
pub struct MovementCalculator {
    config: Arc<GameConfig>,
}

impl MovementCalculator {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self { config }
    }

    fn compute_input(&self, input: &InputCommand, state: &PlayerState) -> PlayerState {
        let config = &self.config.movement;
        let dt = self.config.tick_dt();
        let mut next = state.clone();

        let raw = input.movement.flat();
        let intent = if raw.magnitude() > 1.0 { raw.normalize() } else { raw };
        let animation = &next.combat.animation;
        let rolling = animation.current == AnimationState::Roll;
        let jumped = input.jump
            && animation.elapsed_ticks == 0
            && matches!(animation.current, AnimationState::Jump | AnimationState::SprintJump);

        let movement = &mut next.movement;
        let mut direction = intent.normalize();
        if rolling && direction == Vec3::ZERO {
            direction = movement.rotation.forward();
        }
        let magnitude = if rolling { 1.0 } else { intent.magnitude() };

        let mut target_speed = next.property.current(PropertyType::Speed) * magnitude;
        if rolling {
            target_speed *= config.roll_multiplier;
        } else if input.sprint {
            target_speed *= config.sprint_multiplier;
        }
        if next.property.subjected.intersects(SubjectedStateType::IMMOBILE) {
            target_speed = 0.0;
        }

        let blend = (config.acceleration * dt).min(1.0);
        movement.current_speed += (target_speed - movement.current_speed) * blend;
        if movement.current_speed.abs() < SPEED_EPSILON {
            movement.current_speed = 0.0;
        }

        let probe = &input.probe;
        let environment = classify(probe, movement, config);
        let heading = if probe.forward_blocked && environment != EnvironmentType::Stairs {
            Vec3::ZERO
        } else {
            direction
        };

        match environment {
            EnvironmentType::Ground => {
                let normal = if probe.ground_normal == Vec3::ZERO {
                    Vec3::UP
                } else {
                    probe.ground_normal
                };
                movement.velocity = heading
                    .project_on_plane(&normal)
                    .normalize()
                    .scale(movement.current_speed);
                movement.position.y -= probe.ground_distance;
            }
            EnvironmentType::Stairs => {
                movement.velocity = heading.scale(movement.current_speed);
                if movement.current_speed > 0.0 {
                    let climb = (config.stair_climb_speed * dt).min(probe.step_height);
                    movement.position.y += climb;
                    movement.position = movement
                        .position
                        .add(&heading.scale(config.stair_lateral_offset));
                }
            }
            EnvironmentType::Air => {
                let desired = heading.scale(movement.current_speed);
                let horizontal = movement.velocity.flat();
                let steered = horizontal.add(&desired.sub(&horizontal).scale(config.air_control));
                movement.velocity = Vec3::new(steered.x, movement.velocity.y - config.gravity * dt, steered.z);
            }
        }
        if jumped && environment != EnvironmentType::Air {
            movement.velocity.y = config.jump_velocity;
        }

        let step = movement.velocity.scale(dt);
        let mut position = movement.position.add(&step);
        if environment == EnvironmentType::Air && step.y < 0.0 && -step.y >= probe.ground_distance {
            // Landed this tick
            position.y = movement.position.y - probe.ground_distance;
            movement.velocity.y = 0.0;
        }
        movement.position = position;
        movement.environment = if jumped { EnvironmentType::Air } else { environment };

        if environment != EnvironmentType::Air && intent.magnitude() > config.rotation_input_threshold {
            let target = Quat::look_rotation(&direction);
            movement.rotation = movement
                .rotation
                .slerp(&target, (config.rotation_speed * dt).min(1.0));
        }

        next
    }
}

impl StateCalculator for MovementCalculator {
    fn compute(&self, command: &NetworkCommand, state: &PlayerState) -> Result<Computed, CommandError> {
        match &command.payload {
            CommandPayload::Input(input) => Ok(Computed::new(self.compute_input(input, state))),
            _ => Err(unhandled("movement", command)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn setup() -> (MovementCalculator, PlayerState) {
        let config = Arc::new(GameConfig::default());
        let state = PlayerState::spawn(1, &config);
        (MovementCalculator::new(config), state)
    }

    fn input(movement: Vec3, probe: ProbeResult) -> InputCommand {
        InputCommand {
            movement,
            sprint: false,
            jump: false,
            roll: false,
            attack: false,
            probe,
        }
    }

    #[test]
    fn test_speed_is_smoothed_not_snapped() {
        let (calc, state) = setup();
        let next = calc.compute_input(&input(Vec3::new(0.0, 0.0, 1.0), ProbeResult::grounded()), &state);

        let speed = state.property.current(PropertyType::Speed);
        assert!(next.movement.current_speed > 0.0);
        assert!(next.movement.current_speed < speed);
        assert!(next.movement.position.z > state.movement.position.z);
    }

    #[test]
    fn test_speed_converges_to_target() {
        let (calc, mut state) = setup();
        for _ in 0..60 {
            state = calc.compute_input(&input(Vec3::new(1.0, 0.0, 0.0), ProbeResult::grounded()), &state);
        }
        assert_approx_eq!(state.movement.current_speed, 5.0, 1e-3);
    }

    #[test]
    fn test_classify_environments() {
        let config = MovementConfig::default();
        let standing = MovementState::default();

        assert_eq!(classify(&ProbeResult::grounded(), &standing, &config), EnvironmentType::Ground);
        assert_eq!(classify(&ProbeResult::airborne(2.0), &standing, &config), EnvironmentType::Air);

        let stairs = ProbeResult {
            step_ahead: true,
            step_height: 0.3,
            ..ProbeResult::grounded()
        };
        assert_eq!(classify(&stairs, &standing, &config), EnvironmentType::Stairs);

        let wall = ProbeResult {
            step_ahead: true,
            step_height: 2.0,
            ..ProbeResult::grounded()
        };
        assert_eq!(classify(&wall, &standing, &config), EnvironmentType::Ground);
    }

    #[test]
    fn test_stairs_climb_with_lateral_offset() {
        let (calc, state) = setup();
        let stairs = ProbeResult {
            step_ahead: true,
            step_height: 0.3,
            ..ProbeResult::grounded()
        };
        let mut moving = state.clone();
        moving.movement.current_speed = 5.0;
        let next = calc.compute_input(&input(Vec3::new(0.0, 0.0, 1.0), stairs), &moving);

        assert_eq!(next.movement.environment, EnvironmentType::Stairs);
        assert!(next.movement.position.y > 0.0);
        assert!(next.movement.position.y <= 0.3);
        assert!(next.movement.position.z > calc.config.movement.stair_lateral_offset);
    }

    #[test]
    fn test_rotation_only_changes_on_ground() {
        let (calc, state) = setup();
        let right = Vec3::new(1.0, 0.0, 0.0);

        let airborne = calc.compute_input(&input(right, ProbeResult::airborne(3.0)), &state);
        assert_eq!(airborne.movement.rotation, state.movement.rotation);
        assert!(airborne.movement.velocity.y < 0.0);

        let grounded = calc.compute_input(&input(right, ProbeResult::grounded()), &state);
        assert_ne!(grounded.movement.rotation, state.movement.rotation);
    }

    #[test]
    fn test_small_input_does_not_rotate() {
        let (calc, state) = setup();
        let next = calc.compute_input(&input(Vec3::new(0.05, 0.0, 0.0), ProbeResult::grounded()), &state);
        assert_eq!(next.movement.rotation, state.movement.rotation);
    }

    #[test]
    fn test_jump_requires_jump_animation_and_ground() {
        let (calc, state) = setup();
        let mut jumping = state.clone();
        jumping.combat.animation.current = AnimationState::Jump;
        let mut command = input(Vec3::ZERO, ProbeResult::grounded());
        command.jump = true;

        let next = calc.compute_input(&command, &jumping);
        assert_approx_eq!(next.movement.velocity.y, calc.config.movement.jump_velocity, 1e-5);
        assert_eq!(next.movement.environment, EnvironmentType::Air);

        let no_animation = calc.compute_input(&command, &state);
        assert_eq!(no_animation.movement.velocity.y, 0.0);
    }

    #[test]
    fn test_landing_stops_at_ground() {
        let (calc, state) = setup();
        let mut falling = state.clone();
        falling.movement.position.y = 0.05;
        falling.movement.velocity.y = -10.0;
        let next = calc.compute_input(&input(Vec3::ZERO, ProbeResult::airborne(0.05)), &falling);
        assert_approx_eq!(next.movement.position.y, 0.0, 1e-5);
        assert_eq!(next.movement.velocity.y, 0.0);
    }

    #[test]
    fn test_flat_ground_probe() {
        let probe = FlatGroundProbe { ground_height: 1.0 };
        assert_eq!(probe.probe(&Vec3::new(0.0, 3.0, 0.0), &Vec3::FORWARD).ground_distance, 2.0);
        assert_eq!(probe.probe(&Vec3::new(0.0, 0.5, 0.0), &Vec3::FORWARD).ground_distance, 0.0);
    }

    #[test]
    fn test_blocked_forward_stops_horizontal_motion() {
        let (calc, state) = setup();
        let blocked = ProbeResult {
            forward_blocked: true,
            ..ProbeResult::grounded()
        };
        let next = calc.compute_input(&input(Vec3::new(0.0, 0.0, 1.0), blocked), &state);
        assert_eq!(next.movement.position, state.movement.position);
    }
}
