//! Inventory slots, stacking and gold

use super::equipment::EquipmentState;
use super::{unhandled, Computed, StateCalculator};
use crate::command::{CommandPayload, EquipmentCommand, NetworkCommand, PropertyBuffCommand};
use crate::config::{GameConfig, ItemKind};
use crate::error::CommandError;
use crate::state::PlayerState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemState {
    InBag,
    Equipped,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSlot {
    pub item_id: u32,
    pub count: u32,
    pub state: ItemState,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub slots: Vec<Option<ItemSlot>>,
}

impl Inventory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Result<&ItemSlot, CommandError> {
        self.slots
            .get(index)
            .and_then(|slot| slot.as_ref())
            .ok_or(CommandError::MissingItem { slot: index })
    }

    pub fn count_of(&self, item_id: u32) -> u32 {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| slot.item_id == item_id)
            .map(|slot| slot.count)
            .sum()
    }

    /// How many of `item_id` still fit, counting partial stacks and empty slots.
    pub fn room_for(&self, item_id: u32, max_stack: u32) -> u32 {
        self.slots
            .iter()
            .map(|slot| match slot {
                None => max_stack,
                Some(slot) if slot.item_id == item_id && slot.state == ItemState::InBag => {
                    max_stack.saturating_sub(slot.count)
                }
                Some(_) => 0,
            })
            .fold(0u32, |total, room| total.saturating_add(room))
    }

    /// Adds `count` items, topping up existing stacks before opening new slots.
    pub fn add(&self, item_id: u32, count: u32, max_stack: u32) -> Result<Inventory, CommandError> {
        let max_stack = max_stack.max(1);
        if self.room_for(item_id, max_stack) < count {
            return Err(CommandError::InventoryFull { item_id });
        }

        let mut next = self.clone();
        let mut left = count;
        for slot in next.slots.iter_mut().flatten() {
            if left == 0 {
                break;
            }
            if slot.item_id == item_id && slot.state == ItemState::InBag {
                let moved = left.min(max_stack.saturating_sub(slot.count));
                slot.count += moved;
                left -= moved;
            }
        }
        for slot in next.slots.iter_mut().filter(|slot| slot.is_none()) {
            if left == 0 {
                break;
            }
            let moved = left.min(max_stack);
            *slot = Some(ItemSlot {
                item_id,
                count: moved,
                state: ItemState::InBag,
            });
            left -= moved;
        }
        Ok(next)
    }
}

/// Everything the player carries: bag, worn equipment and gold
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InventoryState {
    pub items: Inventory,
    pub equipment: EquipmentState,
    pub gold: u64,
}

#[derive(Debug, Clone)]
pub struct ItemCalculator {
    config: Arc<GameConfig>,
}

impl ItemCalculator {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self { config }
    }

    fn add(&self, state: &PlayerState, item_id: u32, count: u32) -> Result<PlayerState, CommandError> {
        let item = self.config.item(item_id)?;
        let mut next = state.clone();
        next.inventory.items = next.inventory.items.add(item_id, count, item.max_stack)?;
        Ok(next)
    }

    /// Removes `count` items from a slot. Taking the last copy of an equipped
    /// item also emits its unequip.
    fn remove(&self, command: &NetworkCommand, state: &PlayerState, slot: usize, count: u32) -> Result<Computed, CommandError> {
        let entry = *state.inventory.items.slot(slot)?;
        if entry.state == ItemState::Locked {
            return Err(CommandError::rejected(format!("slot {} is locked", slot)));
        }
        if count == 0 || count > entry.count {
            return Err(CommandError::rejected(format!(
                "cannot remove {} from a stack of {}",
                count, entry.count
            )));
        }

        let mut next = state.clone();
        let mut follow_ups = Vec::new();
        if count == entry.count {
            next.inventory.items.slots[slot] = None;
            if entry.state == ItemState::Equipped {
                let equipment_id = self.equipment_id(entry.item_id)?;
                follow_ups.push(command.follow_up(CommandPayload::Equipment(EquipmentCommand {
                    equipment_id,
                    item_slot: slot as u32,
                    equip: false,
                })));
            }
        } else if let Some(stack) = next.inventory.items.slots[slot].as_mut() {
            stack.count -= count;
        }
        Ok(Computed::with_follow_ups(next, follow_ups))
    }

    fn equipment_id(&self, item_id: u32) -> Result<u32, CommandError> {
        match self.config.item(item_id)?.kind {
            ItemKind::Equipment { equipment_id } => Ok(equipment_id),
            _ => Err(CommandError::rejected(format!("item {} is not equipment", item_id))),
        }
    }

    fn lock(&self, state: &PlayerState, slot: usize, locked: bool) -> Result<PlayerState, CommandError> {
        let entry = *state.inventory.items.slot(slot)?;
        let target = match (entry.state, locked) {
            (ItemState::Equipped, _) => {
                return Err(CommandError::rejected("equipped items cannot be locked"))
            }
            (_, true) => ItemState::Locked,
            (_, false) => ItemState::InBag,
        };
        let mut next = state.clone();
        if let Some(stack) = next.inventory.items.slots[slot].as_mut() {
            stack.state = target;
        }
        Ok(next)
    }

    fn equip(&self, command: &NetworkCommand, state: &PlayerState, slot: usize, equip: bool) -> Result<Computed, CommandError> {
        let entry = *state.inventory.items.slot(slot)?;
        let equipment_id = self.equipment_id(entry.item_id)?;
        let mut next = state.clone();
        let mut follow_ups = Vec::new();

        if !equip {
            if entry.state != ItemState::Equipped {
                return Err(CommandError::rejected(format!("slot {} is not equipped", slot)));
            }
            if let Some(stack) = next.inventory.items.slots[slot].as_mut() {
                stack.state = ItemState::InBag;
            }
            follow_ups.push(command.follow_up(CommandPayload::Equipment(EquipmentCommand {
                equipment_id,
                item_slot: slot as u32,
                equip: false,
            })));
            return Ok(Computed::with_follow_ups(next, follow_ups));
        }

        match entry.state {
            ItemState::Equipped => return Ok(Computed::new(next)),
            ItemState::Locked => return Err(CommandError::rejected(format!("slot {} is locked", slot))),
            ItemState::InBag => {}
        }

        let part = self.config.equipment(equipment_id)?.part;
        if let Some(worn) = state.inventory.equipment.equipped.get(&part) {
            if let Some(Some(old)) = next.inventory.items.slots.get_mut(worn.item_slot as usize) {
                old.state = ItemState::InBag;
            }
            follow_ups.push(command.follow_up(CommandPayload::Equipment(EquipmentCommand {
                equipment_id: worn.equipment_id,
                item_slot: worn.item_slot,
                equip: false,
            })));
        }
        if let Some(stack) = next.inventory.items.slots[slot].as_mut() {
            stack.state = ItemState::Equipped;
        }
        follow_ups.push(command.follow_up(CommandPayload::Equipment(EquipmentCommand {
            equipment_id,
            item_slot: slot as u32,
            equip: true,
        })));
        Ok(Computed::with_follow_ups(next, follow_ups))
    }

    fn exchange(&self, state: &PlayerState, from: usize, to: usize) -> Result<PlayerState, CommandError> {
        let capacity = state.inventory.items.capacity();
        if to >= capacity {
            return Err(CommandError::MissingItem { slot: to });
        }
        state.inventory.items.slot(from)?;

        let mut next = state.clone();
        if from == to {
            return Ok(next);
        }
        next.inventory.items.slots.swap(from, to);
        for worn in next.inventory.equipment.equipped.values_mut() {
            if worn.item_slot as usize == from {
                worn.item_slot = to as u32;
            } else if worn.item_slot as usize == to {
                worn.item_slot = from as u32;
            }
        }
        Ok(next)
    }

    fn use_item(&self, command: &NetworkCommand, state: &PlayerState, slot: usize) -> Result<Computed, CommandError> {
        let entry = *state.inventory.items.slot(slot)?;
        let buff_id = match self.config.item(entry.item_id)?.kind {
            ItemKind::Consumable { buff_id } => buff_id,
            _ => return Err(CommandError::rejected(format!("item {} is not usable", entry.item_id))),
        };
        if state.property.is_dead() {
            return Err(CommandError::rejected("dead players cannot use items"));
        }

        let mut removed = self.remove(command, state, slot, 1)?;
        removed
            .follow_ups
            .push(command.follow_up(CommandPayload::PropertyBuff(PropertyBuffCommand {
                buff_id,
                source_connection_id: state.connection_id,
            })));
        Ok(removed)
    }

    fn change_gold(&self, state: &PlayerState, delta: i64) -> Result<PlayerState, CommandError> {
        let gold = state
            .inventory
            .gold
            .checked_add_signed(delta)
            .ok_or_else(|| CommandError::rejected(format!("gold {} cannot change by {}", state.inventory.gold, delta)))?;
        let mut next = state.clone();
        next.inventory.gold = gold;
        Ok(next)
    }
}

impl StateCalculator for ItemCalculator {
    fn compute(&self, command: &NetworkCommand, state: &PlayerState) -> Result<Computed, CommandError> {
        match &command.payload {
            CommandPayload::ItemGet(get) => Ok(Computed::new(self.add(state, get.item_id, get.count)?)),
            CommandPayload::ItemBuy(buy) => {
                let total = buy.price as u64 * buy.count as u64;
                if state.inventory.gold < total {
                    return Err(CommandError::rejected(format!(
                        "{} gold needed, {} held",
                        total, state.inventory.gold
                    )));
                }
                let mut next = self.add(state, buy.item_id, buy.count)?;
                next.inventory.gold -= total;
                Ok(Computed::new(next))
            }
            CommandPayload::ItemSell(sell) => {
                let mut computed = self.remove(command, state, sell.slot as usize, sell.count)?;
                computed.state.inventory.gold = computed
                    .state
                    .inventory
                    .gold
                    .saturating_add(sell.price as u64 * sell.count as u64);
                Ok(computed)
            }
            CommandPayload::ItemDrop(drop) => self.remove(command, state, drop.slot as usize, drop.count),
            CommandPayload::ItemLock(lock) => Ok(Computed::new(self.lock(state, lock.slot as usize, lock.locked)?)),
            CommandPayload::ItemEquip(equip) => self.equip(command, state, equip.slot as usize, equip.equip),
            CommandPayload::ItemExchange(exchange) => Ok(Computed::new(self.exchange(
                state,
                exchange.from_slot as usize,
                exchange.to_slot as usize,
            )?)),
            CommandPayload::ItemUse(item) => self.use_item(command, state, item.slot as usize),
            CommandPayload::GoldChanged(gold) => Ok(Computed::new(self.change_gold(state, gold.delta)?)),
            _ => Err(unhandled("item", command)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculators::equipment::{EquipmentPart, EquippedItem};
    use crate::command::*;

    fn setup() -> (ItemCalculator, PlayerState) {
        let config = Arc::new(GameConfig::default());
        let state = PlayerState::spawn(1, &config);
        (ItemCalculator::new(config), state)
    }

    fn run(calc: &ItemCalculator, state: &PlayerState, payload: CommandPayload) -> Result<Computed, CommandError> {
        calc.compute(&NetworkCommand::server(1, 1, payload), state)
    }

    fn give(calc: &ItemCalculator, state: &PlayerState, item_id: u32, count: u32) -> PlayerState {
        run(calc, state, CommandPayload::ItemGet(ItemGetCommand { item_id, count }))
            .unwrap()
            .state
    }

    #[test]
    fn test_get_stacks_before_new_slot() {
        let (calc, state) = setup();
        let state = give(&calc, &state, 1, 3);
        let state = give(&calc, &state, 1, 4);
        assert_eq!(state.inventory.items.slot(0).unwrap().count, 5);
        assert_eq!(state.inventory.items.slot(1).unwrap().count, 2);
        assert_eq!(state.inventory.items.count_of(1), 7);
    }

    #[test]
    fn test_inventory_full_aborts() {
        let (calc, state) = setup();
        let capacity = state.inventory.items.capacity() as u32;
        let full = give(&calc, &state, 10, capacity);
        let err = run(&calc, &full, CommandPayload::ItemGet(ItemGetCommand { item_id: 1, count: 1 })).unwrap_err();
        assert_eq!(err, CommandError::InventoryFull { item_id: 1 });
    }

    #[test]
    fn test_missing_slot_is_data_integrity_miss() {
        let (calc, state) = setup();
        let err = run(&calc, &state, CommandPayload::ItemDrop(ItemDropCommand { slot: 3, count: 1 })).unwrap_err();
        assert_eq!(err, CommandError::MissingItem { slot: 3 });
    }

    #[test]
    fn test_removing_last_equipped_copy_emits_one_unequip() {
        let (calc, state) = setup();
        let mut state = give(&calc, &state, 10, 1);
        state.inventory.items.slots[0].as_mut().unwrap().state = ItemState::Equipped;
        state.inventory.equipment.equipped.insert(
            EquipmentPart::Weapon,
            EquippedItem {
                equipment_id: 100,
                item_slot: 0,
            },
        );

        let computed = run(&calc, &state, CommandPayload::ItemDrop(ItemDropCommand { slot: 0, count: 1 })).unwrap();
        assert_eq!(computed.state.inventory.items.slots[0], None);
        assert_eq!(computed.follow_ups.len(), 1);
        match &computed.follow_ups[0].payload {
            CommandPayload::Equipment(equipment) => {
                assert_eq!(equipment.equipment_id, 100);
                assert!(!equipment.equip);
            }
            _ => panic!("Wrong payload type"),
        }
    }

    #[test]
    fn test_equip_swaps_part_holder() {
        let (calc, state) = setup();
        let state = give(&calc, &state, 10, 1);
        let state = give(&calc, &state, 11, 1);
        let first = run(&calc, &state, CommandPayload::ItemEquip(ItemEquipCommand { slot: 0, equip: true })).unwrap();
        assert_eq!(first.follow_ups.len(), 1);

        let mut worn = first.state.clone();
        worn.inventory.equipment.equipped.insert(
            EquipmentPart::Weapon,
            EquippedItem {
                equipment_id: 100,
                item_slot: 0,
            },
        );
        let second = run(&calc, &worn, CommandPayload::ItemEquip(ItemEquipCommand { slot: 1, equip: true })).unwrap();
        let equips: Vec<(u32, bool)> = second
            .follow_ups
            .iter()
            .map(|c| match &c.payload {
                CommandPayload::Equipment(e) => (e.equipment_id, e.equip),
                _ => panic!("Wrong payload type"),
            })
            .collect();
        assert_eq!(equips, vec![(100, false), (101, true)]);
        assert_eq!(second.state.inventory.items.slot(0).unwrap().state, ItemState::InBag);
        assert_eq!(second.state.inventory.items.slot(1).unwrap().state, ItemState::Equipped);
    }

    #[test]
    fn test_locked_items_cannot_be_used_or_sold() {
        let (calc, state) = setup();
        let state = give(&calc, &state, 1, 2);
        let locked = run(&calc, &state, CommandPayload::ItemLock(ItemLockCommand { slot: 0, locked: true }))
            .unwrap()
            .state;
        assert!(run(&calc, &locked, CommandPayload::ItemUse(ItemUseCommand { slot: 0 })).is_err());
        assert!(run(
            &calc,
            &locked,
            CommandPayload::ItemSell(ItemSellCommand {
                slot: 0,
                count: 1,
                price: 8
            })
        )
        .is_err());
    }

    #[test]
    fn test_use_consumes_and_buffs() {
        let (calc, state) = setup();
        let state = give(&calc, &state, 1, 2);
        let used = run(&calc, &state, CommandPayload::ItemUse(ItemUseCommand { slot: 0 })).unwrap();
        assert_eq!(used.state.inventory.items.slot(0).unwrap().count, 1);
        match &used.follow_ups[0].payload {
            CommandPayload::PropertyBuff(buff) => assert_eq!(buff.buff_id, 1),
            _ => panic!("Wrong payload type"),
        }
    }

    #[test]
    fn test_exchange_moves_equipment_reference() {
        let (calc, state) = setup();
        let mut state = give(&calc, &state, 10, 1);
        state.inventory.items.slots[0].as_mut().unwrap().state = ItemState::Equipped;
        state.inventory.equipment.equipped.insert(
            EquipmentPart::Weapon,
            EquippedItem {
                equipment_id: 100,
                item_slot: 0,
            },
        );
        let moved = run(
            &calc,
            &state,
            CommandPayload::ItemExchange(ItemExchangeCommand { from_slot: 0, to_slot: 5 }),
        )
        .unwrap()
        .state;
        assert_eq!(moved.inventory.items.slot(5).unwrap().item_id, 10);
        assert_eq!(moved.inventory.equipment.equipped[&EquipmentPart::Weapon].item_slot, 5);
    }

    #[test]
    fn test_buy_and_sell_move_gold() {
        let (calc, state) = setup();
        let gold = state.inventory.gold;
        let bought = run(
            &calc,
            &state,
            CommandPayload::ItemBuy(ItemBuyCommand {
                item_id: 1,
                count: 2,
                price: 20,
            }),
        )
        .unwrap()
        .state;
        assert_eq!(bought.inventory.gold, gold - 40);

        let sold = run(
            &calc,
            &bought,
            CommandPayload::ItemSell(ItemSellCommand {
                slot: 0,
                count: 2,
                price: 8,
            }),
        )
        .unwrap()
        .state;
        assert_eq!(sold.inventory.gold, gold - 24);
        assert_eq!(sold.inventory.items.slots[0], None);

        let broke = run(
            &calc,
            &state,
            CommandPayload::ItemBuy(ItemBuyCommand {
                item_id: 10,
                count: 1,
                price: 1_000,
            }),
        );
        assert!(matches!(broke, Err(CommandError::Rejected(_))));
    }

    #[test]
    fn test_gold_cannot_go_negative() {
        let (calc, state) = setup();
        let err = run(&calc, &state, CommandPayload::GoldChanged(GoldChangedCommand { delta: -1_000 })).unwrap_err();
        assert!(matches!(err, CommandError::Rejected(_)));
        let richer = run(&calc, &state, CommandPayload::GoldChanged(GoldChangedCommand { delta: 5 })).unwrap();
        assert_eq!(richer.state.inventory.gold, state.inventory.gold + 5);
    }
}
