//! Property mutations: environment changes, regeneration and timed buffs

use super::{unhandled, Computed, StateCalculator};
use crate::command::{CommandPayload, NetworkCommand};
use crate::config::GameConfig;
use crate::error::CommandError;
use crate::property::{BuffIncreaseData, BuffIncreaseType, BuffOperationType, PropertyType, SubjectedStateType};
use crate::state::{PlayerState, TracedHp};
use crate::timer::{TimerId, TimerKind};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A buff with a duration that is still running on a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveBuff {
    pub buff_id: u32,
    pub source_connection_id: u32,
    pub timer: TimerId,
}

#[derive(Debug, Clone)]
pub struct PropertyCalculator {
    config: Arc<GameConfig>,
}

impl PropertyCalculator {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self { config }
    }

    /// Recomputes status flags from death and every running buff.
    fn refresh_subjected(&self, state: &mut PlayerState) {
        let mut flags = SubjectedStateType::NONE;
        if state.property.is_dead() {
            flags.insert(SubjectedStateType::DEAD);
        }
        for active in &state.combat.buffs {
            if let Ok(buff) = self.config.buff(active.buff_id) {
                flags.insert(buff.subjected);
            }
        }
        state.property.subjected = flags;
    }

    /// Applies a configured buff. Status flags are only granted by buffs with a
    /// duration; reapplying a running buff restarts its timer and repeats only
    /// its `Current` changes.
    pub fn apply_buff(&self, state: &PlayerState, buff_id: u32, source_connection_id: u32) -> Result<PlayerState, CommandError> {
        let buff = self.config.buff(buff_id)?;
        if state.property.is_dead() {
            return Err(CommandError::rejected(format!("buff {} on a dead player", buff_id)));
        }

        let mut next = state.clone();
        let running = next.combat.buffs.iter().position(|b| b.buff_id == buff_id);
        match running {
            Some(index) => {
                let current_only: Vec<(PropertyType, BuffIncreaseData)> = buff
                    .changes
                    .iter()
                    .filter(|(_, delta)| delta.increase_type == BuffIncreaseType::Current)
                    .copied()
                    .collect();
                next.property = next.property.with_buffs(&current_only);

                let old = next.combat.buffs[index].timer;
                next.combat.timers.cancel(old);
                let timer = next
                    .combat
                    .timers
                    .schedule(TimerKind::BuffExpiry { buff_id }, buff.duration_ticks);
                next.combat.buffs[index] = ActiveBuff {
                    buff_id,
                    source_connection_id,
                    timer,
                };
            }
            None => {
                next.property = next.property.with_buffs(&buff.changes);
                if buff.duration_ticks > 0 {
                    let timer = next
                        .combat
                        .timers
                        .schedule(TimerKind::BuffExpiry { buff_id }, buff.duration_ticks);
                    next.combat.buffs.push(ActiveBuff {
                        buff_id,
                        source_connection_id,
                        timer,
                    });
                }
            }
        }

        self.refresh_subjected(&mut next);
        Ok(next)
    }

    /// Undoes the layered part of an expired buff and drops its flags.
    pub fn expire_buff(&self, state: &PlayerState, buff_id: u32) -> Result<Computed, CommandError> {
        let mut next = state.clone();
        let index = match next.combat.buffs.iter().position(|b| b.buff_id == buff_id) {
            Some(index) => index,
            None => return Ok(Computed::new(next)),
        };
        next.combat.buffs.remove(index);

        let buff = self.config.buff(buff_id)?;
        let inverse: Vec<(PropertyType, BuffIncreaseData)> = buff
            .changes
            .iter()
            .rev()
            .filter(|(_, delta)| delta.increase_type != BuffIncreaseType::Current)
            .map(|(property, delta)| (*property, delta.inverse()))
            .collect();
        next.property = next.property.with_buffs(&inverse);
        self.refresh_subjected(&mut next);
        debug!("Buff {} expired on connection {}", buff_id, next.connection_id);
        Ok(Computed::new(next))
    }

    fn auto_recover(&self, state: &PlayerState, elapsed_ticks: u32) -> PlayerState {
        if state.property.is_dead() {
            return state.clone();
        }
        let seconds = elapsed_ticks as f32 * self.config.tick_dt();
        let deltas: Vec<(PropertyType, BuffIncreaseData)> = PropertyType::ALL
            .iter()
            .filter_map(|property| {
                let recovery = property.recovery()?;
                state.property.get(*property)?;
                let amount = state.property.current(recovery) * seconds;
                Some((*property, BuffIncreaseData::current(BuffOperationType::Add, amount)))
            })
            .collect();
        let mut next = state.clone();
        next.property = next.property.with_buffs(&deltas);
        next
    }

    fn touched_base(&self, state: &PlayerState, base_id: u32) -> Result<PlayerState, CommandError> {
        if state.property.is_dead() {
            return Err(CommandError::rejected("dead player cannot reach a base"));
        }
        let mut next = state.clone();
        let refill: Vec<(PropertyType, BuffIncreaseData)> = next
            .property
            .properties
            .iter()
            .filter(|(_, value)| value.is_resource_property)
            .map(|(property, value)| {
                (
                    *property,
                    BuffIncreaseData::current(BuffOperationType::Add, value.max_current_value - value.current_value),
                )
            })
            .collect();
        next.property = next.property.with_buffs(&refill);
        if !next.round.touched_bases.contains(&base_id) {
            next.round.touched_bases.push(base_id);
        }
        Ok(next)
    }
}

impl StateCalculator for PropertyCalculator {
    fn compute(&self, command: &NetworkCommand, state: &PlayerState) -> Result<Computed, CommandError> {
        let next = match &command.payload {
            CommandPayload::PropertyEnvironmentChange(change) => {
                let mut next = state.clone();
                next.property = next.property.with_buffs(&change.changes);
                next
            }
            CommandPayload::PropertyAutoRecover(recover) => self.auto_recover(state, recover.elapsed_ticks),
            CommandPayload::PropertyBuff(buff) => self.apply_buff(state, buff.buff_id, buff.source_connection_id)?,
            CommandPayload::PlayerTouchedBase(touched) => self.touched_base(state, touched.base_id)?,
            CommandPayload::PlayerTraceOtherPlayerHp(trace) => {
                let mut next = state.clone();
                next.round.traced_hp.insert(
                    trace.target_connection_id,
                    TracedHp {
                        current_hp: trace.current_hp,
                        max_hp: trace.max_hp,
                    },
                );
                next
            }
            _ => return Err(unhandled("property", command)),
        };
        Ok(Computed::new(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{PropertyAutoRecoverCommand, PropertyBuffCommand, PropertyEnvironmentChangeCommand};
    use assert_approx_eq::assert_approx_eq;

    fn setup() -> (PropertyCalculator, PlayerState) {
        let config = Arc::new(GameConfig::default());
        let state = PlayerState::spawn(1, &config);
        (PropertyCalculator::new(config), state)
    }

    fn buff(buff_id: u32) -> NetworkCommand {
        NetworkCommand::server(
            1,
            1,
            CommandPayload::PropertyBuff(PropertyBuffCommand {
                buff_id,
                source_connection_id: 2,
            }),
        )
    }

    #[test]
    fn test_environment_change_scenario() {
        let (calc, state) = setup();
        let hit = |amount: f32| {
            NetworkCommand::server(
                1,
                1,
                CommandPayload::PropertyEnvironmentChange(PropertyEnvironmentChangeCommand {
                    changes: vec![(
                        PropertyType::Health,
                        BuffIncreaseData::current(BuffOperationType::Add, amount),
                    )],
                }),
            )
        };

        let once = calc.compute(&hit(-50.0), &state).unwrap().state;
        assert_eq!(once.property.current(PropertyType::Health), 50.0);
        let twice = calc.compute(&hit(-60.0), &once).unwrap().state;
        assert_eq!(twice.property.current(PropertyType::Health), 0.0);
    }

    #[test]
    fn test_timed_buff_applies_and_expires() {
        let (calc, state) = setup();
        let base_speed = state.property.current(PropertyType::Speed);

        let buffed = calc.compute(&buff(3), &state).unwrap().state;
        assert_approx_eq!(buffed.property.current(PropertyType::Speed), base_speed * 1.3, 1e-4);
        assert_eq!(buffed.combat.buffs.len(), 1);

        let expired = calc.expire_buff(&buffed, 3).unwrap().state;
        assert_approx_eq!(expired.property.current(PropertyType::Speed), base_speed, 1e-4);
        assert!(expired.combat.buffs.is_empty());
    }

    #[test]
    fn test_reapplying_buff_restarts_timer_without_stacking() {
        let (calc, state) = setup();
        let once = calc.compute(&buff(3), &state).unwrap().state;
        let twice = calc.compute(&buff(3), &once).unwrap().state;
        assert_eq!(
            once.property.current(PropertyType::Speed),
            twice.property.current(PropertyType::Speed)
        );
        assert_eq!(twice.combat.buffs.len(), 1);
        assert_eq!(twice.combat.timers.len(), 1);
    }

    #[test]
    fn test_stun_flag_lifecycle() {
        let (calc, state) = setup();
        let stun = calc.config.element.stun_buff_id;
        let stunned = calc.compute(&buff(stun), &state).unwrap().state;
        assert!(stunned.property.subjected.contains(SubjectedStateType::STUNNED));

        let recovered = calc.expire_buff(&stunned, stun).unwrap().state;
        assert!(!recovered.property.subjected.contains(SubjectedStateType::STUNNED));
    }

    #[test]
    fn test_instant_buff_is_not_tracked() {
        let (calc, state) = setup();
        let mut hurt = state.clone();
        hurt.property = hurt
            .property
            .with_buff(PropertyType::Health, &BuffIncreaseData::current(BuffOperationType::Subtract, 70.0));
        let healed = calc.compute(&buff(1), &hurt).unwrap().state;
        assert_eq!(healed.property.current(PropertyType::Health), 70.0);
        assert!(healed.combat.buffs.is_empty());
    }

    #[test]
    fn test_auto_recover_regenerates_resources() {
        let (calc, state) = setup();
        let mut drained = state.clone();
        drained.property = drained
            .property
            .with_buff(PropertyType::Mana, &BuffIncreaseData::current(BuffOperationType::Subtract, 40.0));

        let command = NetworkCommand::server(
            1,
            1,
            CommandPayload::PropertyAutoRecover(PropertyAutoRecoverCommand {
                elapsed_ticks: calc.config.tick_rate,
            }),
        );
        let recovered = calc.compute(&command, &drained).unwrap().state;
        let rate = state.property.current(PropertyType::ManaRecovery);
        assert_approx_eq!(recovered.property.current(PropertyType::Mana), 10.0 + rate, 1e-4);
    }

    #[test]
    fn test_missing_buff_config_aborts() {
        let (calc, state) = setup();
        let err = calc.compute(&buff(999), &state).unwrap_err();
        assert!(matches!(err, CommandError::MissingConfig { table: "buff", id: 999 }));
    }
}
