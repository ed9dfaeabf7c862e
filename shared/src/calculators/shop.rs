//! Per-player shop offers

use super::item::ItemState;
use super::{unhandled, Computed, StateCalculator};
use crate::command::{CommandPayload, ItemBuyCommand, ItemSellCommand, NetworkCommand};
use crate::config::{GameConfig, ShopConfig};
use crate::error::CommandError;
use crate::state::PlayerState;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShopState {
    /// Offered item ids; `None` once bought
    pub slots: Vec<Option<u32>>,
    pub refresh_count: u32,
}

/// Draws a fresh set of offers from the pool.
pub fn roll_slots(config: &ShopConfig, seed: u64) -> Vec<Option<u32>> {
    if config.pool.is_empty() {
        return vec![None; config.slot_count];
    }
    let mut rng = StdRng::seed_from_u64(seed);
    (0..config.slot_count)
        .map(|_| Some(config.pool[rng.gen_range(0..config.pool.len())]))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ShopCalculator {
    config: Arc<GameConfig>,
}

impl ShopCalculator {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self { config }
    }

    fn refresh(&self, state: &PlayerState, seed: u64) -> Result<PlayerState, CommandError> {
        let cost = self.config.shop.refresh_cost as u64 * state.shop.refresh_count as u64;
        if state.inventory.gold < cost {
            return Err(CommandError::rejected(format!("refresh costs {} gold", cost)));
        }
        let mut next = state.clone();
        next.inventory.gold -= cost;
        next.shop.slots = roll_slots(&self.config.shop, seed);
        next.shop.refresh_count += 1;
        Ok(next)
    }

    fn buy(&self, command: &NetworkCommand, state: &PlayerState, shop_slot: usize) -> Result<Computed, CommandError> {
        let item_id = state
            .shop
            .slots
            .get(shop_slot)
            .copied()
            .flatten()
            .ok_or(CommandError::MissingItem { slot: shop_slot })?;
        let item = self.config.item(item_id)?;
        if state.inventory.gold < item.price as u64 {
            return Err(CommandError::rejected(format!("item {} costs {} gold", item_id, item.price)));
        }
        if state.inventory.items.room_for(item_id, item.max_stack.max(1)) == 0 {
            return Err(CommandError::InventoryFull { item_id });
        }

        let mut next = state.clone();
        next.shop.slots[shop_slot] = None;
        let buy = command.follow_up(CommandPayload::ItemBuy(ItemBuyCommand {
            item_id,
            count: 1,
            price: item.price,
        }));
        Ok(Computed::with_follow_ups(next, vec![buy]))
    }

    fn sell(&self, command: &NetworkCommand, state: &PlayerState, item_slot: usize) -> Result<Computed, CommandError> {
        let entry = state.inventory.items.slot(item_slot)?;
        if entry.state == ItemState::Locked {
            return Err(CommandError::rejected(format!("slot {} is locked", item_slot)));
        }
        let item = self.config.item(entry.item_id)?;
        let sell = command.follow_up(CommandPayload::ItemSell(ItemSellCommand {
            slot: item_slot as u32,
            count: entry.count,
            price: item.sell_price,
        }));
        Ok(Computed::with_follow_ups(state.clone(), vec![sell]))
    }
}

impl StateCalculator for ShopCalculator {
    fn compute(&self, command: &NetworkCommand, state: &PlayerState) -> Result<Computed, CommandError> {
        match &command.payload {
            CommandPayload::ShopRefresh(refresh) => Ok(Computed::new(self.refresh(state, refresh.seed)?)),
            CommandPayload::ShopBuy(buy) => self.buy(command, state, buy.shop_slot as usize),
            CommandPayload::ShopSell(sell) => self.sell(command, state, sell.item_slot as usize),
            _ => Err(unhandled("shop", command)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ItemGetCommand, ItemLockCommand, ShopBuyCommand, ShopRefreshCommand, ShopSellCommand};

    fn setup() -> (ShopCalculator, PlayerState) {
        let config = Arc::new(GameConfig::default());
        let state = PlayerState::spawn(1, &config);
        (ShopCalculator::new(config), state)
    }

    fn run(calc: &ShopCalculator, state: &PlayerState, payload: CommandPayload) -> Result<Computed, CommandError> {
        calc.compute(&NetworkCommand::request(1, 1, payload), state)
    }

    #[test]
    fn test_roll_is_seeded() {
        let config = GameConfig::default().shop;
        assert_eq!(roll_slots(&config, 42), roll_slots(&config, 42));
        assert_eq!(roll_slots(&config, 42).len(), config.slot_count);
        for item_id in roll_slots(&config, 7).into_iter().flatten() {
            assert!(config.pool.contains(&item_id));
        }
    }

    #[test]
    fn test_first_refresh_free_then_priced() {
        let (calc, state) = setup();
        let refresh = |seed| CommandPayload::ShopRefresh(ShopRefreshCommand { seed });

        let once = run(&calc, &state, refresh(1)).unwrap().state;
        assert_eq!(once.inventory.gold, state.inventory.gold);
        assert_eq!(once.shop.slots, roll_slots(&calc.config.shop, 1));

        let twice = run(&calc, &once, refresh(2)).unwrap().state;
        assert_eq!(twice.inventory.gold, state.inventory.gold - 10);
        let thrice = run(&calc, &twice, refresh(3)).unwrap().state;
        assert_eq!(thrice.inventory.gold, state.inventory.gold - 30);
    }

    #[test]
    fn test_buy_sells_out_slot_and_emits_item_buy() {
        let (calc, mut state) = setup();
        state.shop.slots = vec![Some(1), None, Some(20), Some(10)];

        let computed = run(&calc, &state, CommandPayload::ShopBuy(ShopBuyCommand { shop_slot: 0 })).unwrap();
        assert_eq!(computed.state.shop.slots[0], None);
        match &computed.follow_ups[0].payload {
            CommandPayload::ItemBuy(buy) => {
                assert_eq!(buy.item_id, 1);
                assert_eq!(buy.count, 1);
                assert_eq!(buy.price, 20);
            }
            _ => panic!("Wrong payload type"),
        }

        let sold_out = run(&calc, &state, CommandPayload::ShopBuy(ShopBuyCommand { shop_slot: 1 }));
        assert!(matches!(sold_out, Err(CommandError::MissingItem { slot: 1 })));
        let too_expensive = run(&calc, &state, CommandPayload::ShopBuy(ShopBuyCommand { shop_slot: 3 }));
        assert!(matches!(too_expensive, Err(CommandError::Rejected(_))));
    }

    #[test]
    fn test_sell_prices_whole_stack() {
        let (calc, state) = setup();
        let stocked = crate::calculators::item::ItemCalculator::new(Arc::clone(&calc.config))
            .compute(
                &NetworkCommand::server(1, 1, CommandPayload::ItemGet(ItemGetCommand { item_id: 20, count: 6 })),
                &state,
            )
            .unwrap()
            .state;

        let computed = run(&calc, &stocked, CommandPayload::ShopSell(ShopSellCommand { item_slot: 0 })).unwrap();
        match &computed.follow_ups[0].payload {
            CommandPayload::ItemSell(sell) => {
                assert_eq!(sell.count, 6);
                assert_eq!(sell.price, 2);
            }
            _ => panic!("Wrong payload type"),
        }

        let locked = crate::calculators::item::ItemCalculator::new(Arc::clone(&calc.config))
            .compute(
                &NetworkCommand::server(1, 1, CommandPayload::ItemLock(ItemLockCommand { slot: 0, locked: true })),
                &stocked,
            )
            .unwrap()
            .state;
        assert!(run(&calc, &locked, CommandPayload::ShopSell(ShopSellCommand { item_slot: 0 })).is_err());
    }
}
