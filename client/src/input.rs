//! Headless input source
//!
//! Produces one frame of player intent per tick from a seeded generator, so a
//! client run is reproducible from its `--seed`. Ground probes are sampled
//! here, at input time, and travel inside the `Input` command.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::calculators::movement::{FlatGroundProbe, PhysicsProbe};
use shared::calculators::skill::SkillSlot;
use shared::command::{CommandPayload, InputCommand, ShopBuyCommand, ShopRefreshCommand, SkillCommand};
use shared::config::GameConfig;
use shared::math::Vec3;
use shared::state::PlayerState;

/// Ticks a chosen heading is held before a new one is rolled
const HOLD_TICKS: u32 = 20;
/// One shop request roughly every this many ticks
const REQUEST_PERIOD: u32 = 90;

/// Everything the local player does in one tick
#[derive(Debug, Clone, PartialEq)]
pub struct InputFrame {
    pub input: InputCommand,
    /// Predicted actions besides movement
    pub actions: Vec<CommandPayload>,
    /// Requests only the server may answer
    pub requests: Vec<CommandPayload>,
}

pub struct ScriptedInput {
    rng: StdRng,
    probe: Box<dyn PhysicsProbe + Send>,
    heading: Vec3,
    hold: u32,
}

impl ScriptedInput {
    pub fn new(seed: u64) -> Self {
        Self::with_probe(seed, Box::new(FlatGroundProbe::default()))
    }

    pub fn with_probe(seed: u64, probe: Box<dyn PhysicsProbe + Send>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            probe,
            heading: Vec3::ZERO,
            hold: 0,
        }
    }

    /// Rolls the next frame for `state`, the locally predicted player.
    pub fn next_frame(&mut self, state: &PlayerState, config: &GameConfig) -> InputFrame {
        if self.hold == 0 {
            self.heading = self.roll_heading();
            self.hold = HOLD_TICKS;
        }
        self.hold -= 1;

        let probe = self.probe.probe(&state.movement.position, &self.heading);
        let input = InputCommand {
            movement: self.heading,
            sprint: self.rng.gen_bool(0.3),
            jump: self.rng.gen_bool(0.02),
            roll: self.rng.gen_bool(0.01),
            attack: self.rng.gen_bool(0.05),
            probe,
        };

        let mut actions = Vec::new();
        if !state.skills.checkers.is_empty() && self.rng.gen_bool(0.03) {
            let slot = if self.rng.gen_bool(0.5) { SkillSlot::Q } else { SkillSlot::E };
            if state.skills.checkers.contains_key(&slot) {
                let direction = if self.heading == Vec3::ZERO {
                    state.movement.rotation.forward()
                } else {
                    self.heading
                };
                actions.push(CommandPayload::Skill(SkillCommand {
                    slot,
                    direction,
                    target: state.movement.position.add(&direction.scale(6.0)),
                }));
            }
        }

        let mut requests = Vec::new();
        if self.rng.gen_range(0..REQUEST_PERIOD) == 0 {
            let slots = config.shop.slot_count.max(1) as u32;
            requests.push(if self.rng.gen_bool(0.5) {
                CommandPayload::ShopRefresh(ShopRefreshCommand { seed: self.rng.gen() })
            } else {
                CommandPayload::ShopBuy(ShopBuyCommand {
                    shop_slot: self.rng.gen_range(0..slots),
                })
            });
        }

        InputFrame { input, actions, requests }
    }

    /// Standing still a quarter of the time, otherwise a unit heading on XZ
    fn roll_heading(&mut self) -> Vec3 {
        if self.rng.gen_bool(0.25) {
            return Vec3::ZERO;
        }
        let angle: f32 = self.rng.gen_range(0.0..std::f32::consts::TAU);
        Vec3::new(angle.sin(), 0.0, angle.cos())
    }
}
