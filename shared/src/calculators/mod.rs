//! Per-domain state calculators
//!
//! Each calculator is a stateless value holding the shared [`GameConfig`]. It
//! takes one command and the current [`PlayerState`] and returns the next
//! state plus any follow-up commands. Nothing in here reads clocks or
//! unseeded randomness, so replaying a command on the same state yields a
//! bit-identical result on client and server.

pub mod animation;
pub mod battle;
pub mod element;
pub mod equipment;
pub mod item;
pub mod movement;
pub mod property;
pub mod shop;
pub mod skill;

use crate::command::{CommandAuthority, CommandExecuteType, CommandPayload, CommandType, NetworkCommand};
use crate::config::GameConfig;
use crate::error::CommandError;
use crate::state::PlayerState;
use crate::timer::TimerKind;
use battle::DefenderView;
use std::sync::Arc;

/// Next state of one player plus the commands its transition emitted
#[derive(Debug, Clone, PartialEq)]
pub struct Computed {
    pub state: PlayerState,
    pub follow_ups: Vec<NetworkCommand>,
}

impl Computed {
    pub fn new(state: PlayerState) -> Self {
        Self {
            state,
            follow_ups: Vec::new(),
        }
    }

    pub fn with_follow_ups(state: PlayerState, follow_ups: Vec<NetworkCommand>) -> Self {
        Self { state, follow_ups }
    }

    /// Runs `next` on the produced state, keeping follow-ups in emission order.
    pub fn then<F>(self, next: F) -> Result<Computed, CommandError>
    where
        F: FnOnce(&PlayerState) -> Result<Computed, CommandError>,
    {
        let mut follow_ups = self.follow_ups;
        let computed = next(&self.state)?;
        follow_ups.extend(computed.follow_ups);
        Ok(Computed::with_follow_ups(computed.state, follow_ups))
    }
}

/// Header template for commands emitted by per-tick systems rather than by a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickContext {
    pub connection_id: u32,
    pub tick: u32,
    pub authority: CommandAuthority,
}

impl TickContext {
    pub fn command(&self, payload: CommandPayload) -> NetworkCommand {
        let execute_type = match self.authority {
            CommandAuthority::Client => CommandExecuteType::Predicate,
            CommandAuthority::Server => CommandExecuteType::Immediate,
        };
        NetworkCommand::new(self.connection_id, self.tick, self.authority, execute_type, payload)
    }
}

pub trait StateCalculator {
    fn compute(&self, command: &NetworkCommand, state: &PlayerState) -> Result<Computed, CommandError>;
}

pub(crate) fn unhandled(calculator: &str, command: &NetworkCommand) -> CommandError {
    CommandError::rejected(format!(
        "{:?} is not handled by the {} calculator",
        command.header.command_type, calculator
    ))
}

/// The full calculator set, built once per process from one config
#[derive(Debug, Clone)]
pub struct Calculators {
    pub config: Arc<GameConfig>,
    pub movement: movement::MovementCalculator,
    pub property: property::PropertyCalculator,
    pub animation: animation::AnimationCalculator,
    pub item: item::ItemCalculator,
    pub equipment: equipment::EquipmentCalculator,
    pub skill: skill::SkillCalculator,
    pub shop: shop::ShopCalculator,
    pub battle: battle::BattleCalculator,
    pub element: element::ElementCalculator,
}

impl Calculators {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self {
            movement: movement::MovementCalculator::new(Arc::clone(&config)),
            property: property::PropertyCalculator::new(Arc::clone(&config)),
            animation: animation::AnimationCalculator::new(Arc::clone(&config)),
            item: item::ItemCalculator::new(Arc::clone(&config)),
            equipment: equipment::EquipmentCalculator::new(Arc::clone(&config)),
            skill: skill::SkillCalculator::new(Arc::clone(&config)),
            shop: shop::ShopCalculator::new(Arc::clone(&config)),
            battle: battle::BattleCalculator::new(Arc::clone(&config)),
            element: element::ElementCalculator::new(Arc::clone(&config)),
            config,
        }
    }

    /// Calculator owning a command type. `Input` and the battle commands are
    /// handled by [`Calculators::compute`] and the dispatcher respectively.
    pub fn route(&self, command_type: CommandType) -> Option<&dyn StateCalculator> {
        match command_type {
            CommandType::Input | CommandType::Attack | CommandType::AttackResult => None,
            CommandType::PropertyEnvironmentChange
            | CommandType::PropertyAutoRecover
            | CommandType::PropertyBuff
            | CommandType::PlayerTouchedBase
            | CommandType::PlayerTraceOtherPlayerHp => Some(&self.property),
            CommandType::ItemGet
            | CommandType::ItemBuy
            | CommandType::ItemSell
            | CommandType::ItemDrop
            | CommandType::ItemLock
            | CommandType::ItemEquip
            | CommandType::ItemExchange
            | CommandType::ItemUse
            | CommandType::GoldChanged => Some(&self.item),
            CommandType::Equipment | CommandType::Trigger => Some(&self.equipment),
            CommandType::SkillLoad | CommandType::SkillChanged | CommandType::Skill => Some(&self.skill),
            CommandType::ShopBuy | CommandType::ShopSell | CommandType::ShopRefresh => Some(&self.shop),
            CommandType::Animation => Some(&self.animation),
        }
    }

    /// Applies one single-player command.
    pub fn compute(&self, command: &NetworkCommand, state: &PlayerState) -> Result<Computed, CommandError> {
        if command.header.command_type == CommandType::Input {
            // Animation picks the pose first; movement reads it for roll and jump
            return self
                .animation
                .compute(command, state)?
                .then(|animated| self.movement.compute(command, animated));
        }

        match self.route(command.header.command_type) {
            Some(calculator) => calculator.compute(command, state),
            None => Err(unhandled("player", command)),
        }
    }

    /// Advances one player's tick systems: timers, animation clocks, skills in
    /// flight and element marks.
    pub fn advance(
        &self,
        state: &PlayerState,
        context: &TickContext,
        defenders: &[DefenderView],
    ) -> Result<Computed, CommandError> {
        let mut next = state.clone();
        let fired = next.combat.timers.advance();

        let mut computed = Computed::new(next);
        for kind in fired {
            computed = match kind {
                TimerKind::ComboWindow => computed.then(|s| Ok(Computed::new(self.animation.close_combo_window(s))))?,
                TimerKind::BuffExpiry { buff_id } => computed.then(|s| self.property.expire_buff(s, buff_id))?,
                TimerKind::ConditionCooldown { equipment_id } => {
                    computed.then(|s| Ok(Computed::new(self.equipment.condition_ready(s, equipment_id))))?
                }
            };
        }

        computed
            .then(|s| self.animation.advance(s))?
            .then(|s| self.skill.advance(s, context, defenders))?
            .then(|s| Ok(Computed::new(self.element.advance(s))))
    }
}
