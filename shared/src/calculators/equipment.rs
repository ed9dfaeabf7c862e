//! Worn equipment, its stat layers and conditional passives

use super::element::ElementType;
use super::{unhandled, Computed, StateCalculator};
use crate::command::{
    CommandPayload, NetworkCommand, PropertyBuffCommand, SkillChangedCommand, SkillLoadCommand,
};
use crate::config::GameConfig;
use crate::error::CommandError;
use crate::property::{BuffIncreaseData, PropertyType};
use crate::state::PlayerState;
use crate::timer::TimerKind;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EquipmentPart {
    Weapon,
    Armor,
    Accessory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerType {
    /// Value is the damage dealt
    OnAttackHit,
    /// Value is the damage taken
    OnTakeDamage,
    /// Value is the remaining health ratio
    OnHealthBelow,
    OnSkillCast,
    OnKill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquippedItem {
    pub equipment_id: u32,
    pub item_slot: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EquipmentState {
    pub equipped: BTreeMap<EquipmentPart, EquippedItem>,
}

impl EquipmentState {
    pub fn element(&self, part: EquipmentPart, config: &GameConfig) -> Option<ElementType> {
        let worn = self.equipped.get(&part)?;
        config.equipment(worn.equipment_id).ok()?.element
    }

    pub fn part_of(&self, equipment_id: u32) -> Option<EquipmentPart> {
        self.equipped
            .iter()
            .find(|(_, worn)| worn.equipment_id == equipment_id)
            .map(|(part, _)| *part)
    }
}

/// Passive registered by a worn item, armed until it fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionChecker {
    pub equipment_id: u32,
    pub trigger: TriggerType,
    pub threshold: f32,
    pub buff_id: u32,
    pub cooldown_ticks: u32,
    pub ready: bool,
}

impl ConditionChecker {
    pub fn matches(&self, trigger: TriggerType, value: f32) -> bool {
        if !self.ready || self.trigger != trigger {
            return false;
        }
        match trigger {
            TriggerType::OnHealthBelow => value < self.threshold,
            TriggerType::OnAttackHit | TriggerType::OnTakeDamage => value >= self.threshold,
            TriggerType::OnSkillCast | TriggerType::OnKill => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EquipmentCalculator {
    config: Arc<GameConfig>,
}

impl EquipmentCalculator {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self { config }
    }

    fn equip(&self, command: &NetworkCommand, state: &PlayerState, equipment_id: u32, item_slot: u32) -> Result<Computed, CommandError> {
        let equipment = self.config.equipment(equipment_id)?;
        let mut computed = Computed::new(state.clone());

        if let Some(worn) = state.inventory.equipment.equipped.get(&equipment.part) {
            if worn.equipment_id == equipment_id && worn.item_slot == item_slot {
                return Ok(computed);
            }
            let worn_id = worn.equipment_id;
            computed = computed.then(|s| self.unequip(command, s, worn_id))?;
        }

        let next = &mut computed.state;
        next.property = next.property.with_buffs(&equipment.stats);
        next.inventory.equipment.equipped.insert(
            equipment.part,
            EquippedItem {
                equipment_id,
                item_slot,
            },
        );
        if let Some(passive) = &equipment.passive {
            next.combat.conditions.push(ConditionChecker {
                equipment_id,
                trigger: passive.trigger,
                threshold: passive.threshold,
                buff_id: passive.buff_id,
                cooldown_ticks: passive.cooldown_ticks,
                ready: true,
            });
        }
        if let Some((slot, skill_id)) = equipment.skill {
            computed
                .follow_ups
                .push(command.follow_up(CommandPayload::SkillLoad(SkillLoadCommand { skill_id, slot })));
        }
        Ok(computed)
    }

    fn unequip(&self, command: &NetworkCommand, state: &PlayerState, equipment_id: u32) -> Result<Computed, CommandError> {
        let part = state
            .inventory
            .equipment
            .part_of(equipment_id)
            .ok_or_else(|| CommandError::rejected(format!("equipment {} is not worn", equipment_id)))?;
        let equipment = self.config.equipment(equipment_id)?;

        let mut next = state.clone();
        let inverse: Vec<(PropertyType, BuffIncreaseData)> = equipment
            .stats
            .iter()
            .rev()
            .map(|(property, delta)| (*property, delta.inverse()))
            .collect();
        next.property = next.property.with_buffs(&inverse);
        next.inventory.equipment.equipped.remove(&part);
        next.combat.conditions.retain(|checker| checker.equipment_id != equipment_id);
        next.combat
            .timers
            .cancel_where(|kind| *kind == TimerKind::ConditionCooldown { equipment_id });

        let mut follow_ups = Vec::new();
        if let Some((slot, _)) = equipment.skill {
            follow_ups.push(command.follow_up(CommandPayload::SkillChanged(SkillChangedCommand {
                slot,
                skill_id: None,
            })));
        }
        Ok(Computed::with_follow_ups(next, follow_ups))
    }

    /// Fires every armed passive matching the trigger.
    fn trigger(&self, command: &NetworkCommand, state: &PlayerState, trigger: TriggerType, value: f32) -> Computed {
        if state.property.is_dead() {
            return Computed::new(state.clone());
        }

        let mut next = state.clone();
        let mut follow_ups = Vec::new();
        let mut cooldowns = Vec::new();
        for checker in next.combat.conditions.iter_mut() {
            if !checker.matches(trigger, value) {
                continue;
            }
            debug!(
                "Passive of equipment {} fired on {:?} for connection {}",
                checker.equipment_id, trigger, state.connection_id
            );
            follow_ups.push(command.follow_up(CommandPayload::PropertyBuff(PropertyBuffCommand {
                buff_id: checker.buff_id,
                source_connection_id: state.connection_id,
            })));
            if checker.cooldown_ticks > 0 {
                checker.ready = false;
                cooldowns.push((checker.equipment_id, checker.cooldown_ticks));
            }
        }
        for (equipment_id, ticks) in cooldowns {
            next.combat
                .timers
                .schedule(TimerKind::ConditionCooldown { equipment_id }, ticks);
        }
        Computed::with_follow_ups(next, follow_ups)
    }

    /// Re-arms the passives of one piece of equipment once its cooldown elapses.
    pub fn condition_ready(&self, state: &PlayerState, equipment_id: u32) -> PlayerState {
        let mut next = state.clone();
        for checker in next
            .combat
            .conditions
            .iter_mut()
            .filter(|checker| checker.equipment_id == equipment_id)
        {
            checker.ready = true;
        }
        next
    }
}

impl StateCalculator for EquipmentCalculator {
    fn compute(&self, command: &NetworkCommand, state: &PlayerState) -> Result<Computed, CommandError> {
        match &command.payload {
            CommandPayload::Equipment(equipment) if equipment.equip => {
                self.equip(command, state, equipment.equipment_id, equipment.item_slot)
            }
            CommandPayload::Equipment(equipment) => self.unequip(command, state, equipment.equipment_id),
            CommandPayload::Trigger(trigger) => Ok(self.trigger(command, state, trigger.trigger_type, trigger.value)),
            _ => Err(unhandled("equipment", command)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculators::skill::SkillSlot;
    use crate::command::{EquipmentCommand, TriggerCommand};
    use assert_approx_eq::assert_approx_eq;

    fn setup() -> (EquipmentCalculator, PlayerState) {
        let config = Arc::new(GameConfig::default());
        let state = PlayerState::spawn(1, &config);
        (EquipmentCalculator::new(config), state)
    }

    fn equipment(equipment_id: u32, equip: bool) -> NetworkCommand {
        NetworkCommand::server(
            1,
            1,
            CommandPayload::Equipment(EquipmentCommand {
                equipment_id,
                item_slot: 0,
                equip,
            }),
        )
    }

    fn trigger(trigger_type: TriggerType, value: f32) -> NetworkCommand {
        NetworkCommand::server(1, 1, CommandPayload::Trigger(TriggerCommand { trigger_type, value }))
    }

    #[test]
    fn test_equip_applies_stats_and_loads_skill() {
        let (calc, state) = setup();
        let attack = state.property.current(PropertyType::Attack);
        let computed = calc.compute(&equipment(100, true), &state).unwrap();

        assert_approx_eq!(computed.state.property.current(PropertyType::Attack), attack + 8.0, 1e-5);
        assert_eq!(computed.follow_ups.len(), 1);
        match &computed.follow_ups[0].payload {
            CommandPayload::SkillLoad(load) => {
                assert_eq!(load.slot, SkillSlot::Q);
                assert_eq!(load.skill_id, 200);
            }
            _ => panic!("Wrong payload type"),
        }
    }

    #[test]
    fn test_unequip_restores_stats() {
        let (calc, state) = setup();
        let worn = calc.compute(&equipment(102, true), &state).unwrap().state;
        assert_eq!(worn.combat.conditions.len(), 1);

        let removed = calc.compute(&equipment(102, false), &worn).unwrap();
        assert_eq!(removed.state.property, state.property);
        assert!(removed.state.combat.conditions.is_empty());
        assert!(removed.state.inventory.equipment.equipped.is_empty());
    }

    #[test]
    fn test_equipping_same_part_replaces_previous() {
        let (calc, state) = setup();
        let sword = calc.compute(&equipment(100, true), &state).unwrap().state;
        let staff = calc.compute(&equipment(101, true), &sword).unwrap();

        let kinds: Vec<_> = staff.follow_ups.iter().map(|c| c.header.command_type).collect();
        assert_eq!(
            kinds,
            vec![
                crate::command::CommandType::SkillChanged,
                crate::command::CommandType::SkillLoad
            ]
        );
        assert_eq!(staff.state.inventory.equipment.equipped[&EquipmentPart::Weapon].equipment_id, 101);
        assert_approx_eq!(
            staff.state.property.current(PropertyType::Attack),
            state.property.current(PropertyType::Attack) + 5.0,
            1e-5
        );
    }

    #[test]
    fn test_unequip_of_unworn_is_rejected() {
        let (calc, state) = setup();
        assert!(matches!(
            calc.compute(&equipment(100, false), &state),
            Err(CommandError::Rejected(_))
        ));
    }

    #[test]
    fn test_passive_fires_once_until_cooldown() {
        let (calc, state) = setup();
        let worn = calc.compute(&equipment(102, true), &state).unwrap().state;

        let healthy = calc.compute(&trigger(TriggerType::OnHealthBelow, 0.9), &worn).unwrap();
        assert!(healthy.follow_ups.is_empty());

        let low = calc.compute(&trigger(TriggerType::OnHealthBelow, 0.2), &worn).unwrap();
        assert_eq!(low.follow_ups.len(), 1);
        let again = calc.compute(&trigger(TriggerType::OnHealthBelow, 0.1), &low.state).unwrap();
        assert!(again.follow_ups.is_empty());

        let rearmed = calc.condition_ready(&again.state, 102);
        let fired = calc.compute(&trigger(TriggerType::OnHealthBelow, 0.1), &rearmed).unwrap();
        assert_eq!(fired.follow_ups.len(), 1);
    }

    #[test]
    fn test_unequip_cancels_passive_cooldown() {
        let (calc, state) = setup();
        let worn = calc.compute(&equipment(102, true), &state).unwrap().state;
        let fired = calc.compute(&trigger(TriggerType::OnHealthBelow, 0.2), &worn).unwrap().state;
        assert_eq!(fired.combat.timers.len(), 1);

        let removed = calc.compute(&equipment(102, false), &fired).unwrap().state;
        assert!(removed.combat.timers.is_empty());
    }
}
