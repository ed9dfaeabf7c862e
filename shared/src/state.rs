//! Per-player simulation state, its broadcast slices and the player arena

use crate::calculators::animation::AnimationCooldownState;
use crate::calculators::battle::DefenderView;
use crate::calculators::element::ElementStatus;
use crate::calculators::equipment::ConditionChecker;
use crate::calculators::item::{Inventory, InventoryState};
use crate::calculators::movement::MovementState;
use crate::calculators::property::ActiveBuff;
use crate::calculators::shop::{roll_slots, ShopState};
use crate::calculators::skill::SkillState;
use crate::config::GameConfig;
use crate::math::Vec3;
use crate::property::{BuffIncreaseData, PlayerPredictablePropertyState, PropertyType, PropertyValue};
use crate::timer::TimerTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TracedHp {
    pub current_hp: f32,
    pub max_hp: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CombatState {
    pub animation: AnimationCooldownState,
    pub timers: TimerTable,
    pub buffs: Vec<ActiveBuff>,
    pub conditions: Vec<ConditionChecker>,
    pub element: ElementStatus,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoundState {
    pub touched_bases: Vec<u32>,
    /// Last known health of other players, keyed by connection
    pub traced_hp: BTreeMap<u32, TracedHp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub connection_id: u32,
    pub property: PlayerPredictablePropertyState,
    pub movement: MovementState,
    pub combat: CombatState,
    pub inventory: InventoryState,
    pub skills: SkillState,
    pub shop: ShopState,
    pub round: RoundState,
}

impl PlayerState {
    /// Fresh player built from config defaults. Spawn points are spread along
    /// X so players never start on top of each other.
    pub fn spawn(connection_id: u32, config: &GameConfig) -> Self {
        let properties = config
            .properties
            .iter()
            .map(|(property, d)| {
                (
                    *property,
                    PropertyValue::new(d.base, d.min, d.max, d.is_hundred_percent, d.is_resource),
                )
            })
            .collect();
        let offset = Vec3::new((connection_id % 8) as f32 * 2.0, 0.0, 0.0);

        Self {
            connection_id,
            property: PlayerPredictablePropertyState::new(properties),
            movement: MovementState::at(config.spawn_point.add(&offset)),
            combat: CombatState {
                timers: TimerTable::new(),
                ..CombatState::default()
            },
            inventory: InventoryState {
                items: Inventory::with_capacity(config.inventory_capacity),
                equipment: Default::default(),
                gold: config.starting_gold,
            },
            skills: SkillState::default(),
            shop: ShopState {
                slots: roll_slots(&config.shop, connection_id as u64),
                refresh_count: 0,
            },
            round: RoundState::default(),
        }
    }

    pub fn with_property_buff(mut self, property: PropertyType, delta: &BuffIncreaseData) -> Self {
        self.property = self.property.with_buff(property, delta);
        self
    }

    pub fn slice(&self, kind: SliceKind) -> StateSlice {
        match kind {
            SliceKind::Property => StateSlice::Property(self.property.clone()),
            SliceKind::Movement => StateSlice::Movement(self.movement),
            SliceKind::Combat => StateSlice::Combat(self.combat.clone()),
            SliceKind::Inventory => StateSlice::Inventory(self.inventory.clone()),
            SliceKind::Skill => StateSlice::Skill(self.skills.clone()),
            SliceKind::Shop => StateSlice::Shop(self.shop.clone()),
            SliceKind::Round => StateSlice::Round(self.round.clone()),
        }
    }

    /// Overwrites one slice wholesale.
    pub fn apply_slice(&mut self, slice: StateSlice) {
        match slice {
            StateSlice::Property(property) => self.property = property,
            StateSlice::Movement(movement) => self.movement = movement,
            StateSlice::Combat(combat) => self.combat = combat,
            StateSlice::Inventory(inventory) => self.inventory = inventory,
            StateSlice::Skill(skills) => self.skills = skills,
            StateSlice::Shop(shop) => self.shop = shop,
            StateSlice::Round(round) => self.round = round,
        }
    }

    fn slice_equals(&self, other: &PlayerState, kind: SliceKind) -> bool {
        match kind {
            SliceKind::Property => self.property == other.property,
            SliceKind::Movement => self.movement == other.movement,
            SliceKind::Combat => self.combat == other.combat,
            SliceKind::Inventory => self.inventory == other.inventory,
            SliceKind::Skill => self.skills == other.skills,
            SliceKind::Shop => self.shop == other.shop,
            SliceKind::Round => self.round == other.round,
        }
    }

    /// Slices that differ between two states of the same player.
    pub fn divergent_slices(&self, other: &PlayerState) -> Vec<SliceKind> {
        SliceKind::ALL
            .iter()
            .copied()
            .filter(|kind| !self.slice_equals(other, *kind))
            .collect()
    }

    /// Copies the listed slices from `authoritative`, leaving the rest untouched.
    pub fn refresh(&mut self, authoritative: &PlayerState, kinds: &[SliceKind]) {
        for kind in kinds {
            self.apply_slice(authoritative.slice(*kind));
        }
    }
}

/// Independently replaceable part of a [`PlayerState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SliceKind {
    Property,
    Movement,
    /// Animation, timers, buffs, passives and element marks
    Combat,
    /// Bag, worn equipment and gold
    Inventory,
    Skill,
    Shop,
    Round,
}

impl SliceKind {
    pub const ALL: [SliceKind; 7] = [
        SliceKind::Property,
        SliceKind::Movement,
        SliceKind::Combat,
        SliceKind::Inventory,
        SliceKind::Skill,
        SliceKind::Shop,
        SliceKind::Round,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateSlice {
    Property(PlayerPredictablePropertyState),
    Movement(MovementState),
    Combat(CombatState),
    Inventory(InventoryState),
    Skill(SkillState),
    Shop(ShopState),
    Round(RoundState),
}

impl StateSlice {
    pub fn kind(&self) -> SliceKind {
        match self {
            StateSlice::Property(_) => SliceKind::Property,
            StateSlice::Movement(_) => SliceKind::Movement,
            StateSlice::Combat(_) => SliceKind::Combat,
            StateSlice::Inventory(_) => SliceKind::Inventory,
            StateSlice::Skill(_) => SliceKind::Skill,
            StateSlice::Shop(_) => SliceKind::Shop,
            StateSlice::Round(_) => SliceKind::Round,
        }
    }
}

/// Changed slices of one player for one broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDelta {
    pub connection_id: u32,
    pub slices: Vec<StateSlice>,
}

impl PlayerDelta {
    /// Every slice of `state`.
    pub fn full(state: &PlayerState) -> Self {
        Self {
            connection_id: state.connection_id,
            slices: SliceKind::ALL.iter().map(|kind| state.slice(*kind)).collect(),
        }
    }

    /// Slices of `current` that differ from `previous`, or `None` if nothing changed.
    pub fn diff(previous: &PlayerState, current: &PlayerState) -> Option<Self> {
        let slices: Vec<StateSlice> = current
            .divergent_slices(previous)
            .into_iter()
            .map(|kind| current.slice(kind))
            .collect();
        if slices.is_empty() {
            None
        } else {
            Some(Self {
                connection_id: current.connection_id,
                slices,
            })
        }
    }

    pub fn apply_to(&self, state: &mut PlayerState) {
        for slice in &self.slices {
            state.apply_slice(slice.clone());
        }
    }
}

/// Player states in reusable slots, addressed by connection id through a side table
#[derive(Debug, Clone, Default)]
pub struct PlayerArena {
    slots: Vec<Option<PlayerState>>,
    by_connection: BTreeMap<u32, usize>,
    free: Vec<usize>,
}

impl PlayerArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `state`, replacing any state already held for its connection.
    pub fn insert(&mut self, state: PlayerState) -> usize {
        if let Some(&slot) = self.by_connection.get(&state.connection_id) {
            self.slots[slot] = Some(state);
            return slot;
        }
        let connection_id = state.connection_id;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(state);
                slot
            }
            None => {
                self.slots.push(Some(state));
                self.slots.len() - 1
            }
        };
        self.by_connection.insert(connection_id, slot);
        slot
    }

    pub fn remove(&mut self, connection_id: u32) -> Option<PlayerState> {
        let slot = self.by_connection.remove(&connection_id)?;
        self.free.push(slot);
        self.slots.get_mut(slot)?.take()
    }

    pub fn slot_of(&self, connection_id: u32) -> Option<usize> {
        self.by_connection.get(&connection_id).copied()
    }

    pub fn get(&self, connection_id: u32) -> Option<&PlayerState> {
        let slot = self.slot_of(connection_id)?;
        self.slots.get(slot)?.as_ref()
    }

    pub fn get_mut(&mut self, connection_id: u32) -> Option<&mut PlayerState> {
        let slot = self.slot_of(connection_id)?;
        self.slots.get_mut(slot)?.as_mut()
    }

    pub fn contains(&self, connection_id: u32) -> bool {
        self.by_connection.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }

    pub fn connection_ids(&self) -> Vec<u32> {
        self.by_connection.keys().copied().collect()
    }

    /// Players in connection order
    pub fn iter(&self) -> impl Iterator<Item = &PlayerState> + '_ {
        self.by_connection
            .values()
            .filter_map(move |slot| self.slots.get(*slot).and_then(|s| s.as_ref()))
    }

    /// Battle views of every player except `exclude`.
    pub fn defender_views(&self, config: &GameConfig, exclude: Option<u32>) -> Vec<DefenderView> {
        self.iter()
            .filter(|state| Some(state.connection_id) != exclude)
            .map(|state| DefenderView::of(state, config))
            .collect()
    }
}
