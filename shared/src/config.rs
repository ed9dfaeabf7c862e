//! Static gameplay tables
//!
//! A [`GameConfig`] is built once per process, wrapped in an `Arc` and handed
//! to every calculator. Nothing in here changes at runtime; lookups that miss
//! return a [`CommandError::MissingConfig`] so the offending command is
//! aborted instead of the tick.

use crate::calculators::animation::{AnimationState, AnimationType};
use crate::calculators::battle::AttackShape;
use crate::calculators::element::ElementType;
use crate::calculators::equipment::{EquipmentPart, TriggerType};
use crate::calculators::skill::{SkillBehavior, SkillSlot};
use crate::error::CommandError;
use crate::math::Vec3;
use crate::property::{
    BuffIncreaseData, BuffIncreaseType, BuffOperationType, PropertyType, SubjectedStateType,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementConfig {
    pub sprint_multiplier: f32,
    pub roll_multiplier: f32,
    /// Fraction of the speed gap closed per second
    pub acceleration: f32,
    pub ground_check_distance: f32,
    pub max_step_height: f32,
    pub stair_climb_speed: f32,
    pub stair_lateral_offset: f32,
    pub gravity: f32,
    pub jump_velocity: f32,
    pub air_control: f32,
    /// Slerp rate toward the movement heading, per second
    pub rotation_speed: f32,
    pub rotation_input_threshold: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            sprint_multiplier: 1.6,
            roll_multiplier: 2.2,
            acceleration: 12.0,
            ground_check_distance: 0.15,
            max_step_height: 0.45,
            stair_climb_speed: 2.5,
            stair_lateral_offset: 0.05,
            gravity: 20.0,
            jump_velocity: 7.5,
            air_control: 0.25,
            rotation_speed: 14.0,
            rotation_input_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefault {
    pub base: f32,
    pub min: f32,
    pub max: f32,
    pub is_hundred_percent: bool,
    pub is_resource: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationDefinition {
    pub animation_type: AnimationType,
    pub priority: u8,
    pub can_be_interrupted: bool,
    /// Length at speed 1.0; ignored for continuous animations
    pub duration_ticks: u32,
    pub cooldown_ticks: u32,
    pub costs: Vec<(PropertyType, f32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationConfig {
    pub definitions: BTreeMap<AnimationState, AnimationDefinition>,
    pub attack_combo_max_count: u8,
    pub combo_window_ticks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ItemKind {
    Consumable { buff_id: u32 },
    Equipment { equipment_id: u32 },
    Material,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemConfig {
    pub name: String,
    pub kind: ItemKind,
    pub max_stack: u32,
    pub price: u32,
    pub sell_price: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassiveConfig {
    pub trigger: TriggerType,
    pub threshold: f32,
    pub buff_id: u32,
    pub cooldown_ticks: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentConfig {
    pub part: EquipmentPart,
    pub stats: Vec<(PropertyType, BuffIncreaseData)>,
    pub skill: Option<(SkillSlot, u32)>,
    pub passive: Option<PassiveConfig>,
    pub element: Option<ElementType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuffConfig {
    pub changes: Vec<(PropertyType, BuffIncreaseData)>,
    /// 0 for instant, permanent changes
    pub duration_ticks: u32,
    pub subjected: SubjectedStateType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillConfig {
    pub behavior: SkillBehavior,
    pub cooldown_ticks: u32,
    pub costs: Vec<(PropertyType, f32)>,
    pub damage_scale: f32,
    pub element: ElementType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopConfig {
    pub slot_count: usize,
    pub pool: Vec<u32>,
    /// Cost of the n-th refresh is `refresh_cost * n`; the first one is free
    pub refresh_cost: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleConfig {
    /// Hit shape per combo stage (index 0 is stage 1)
    pub combo_shapes: Vec<AttackShape>,
    pub combo_damage_scales: Vec<f32>,
    pub defense_constant: f32,
    pub max_damage_reduction: f32,
    pub min_damage: f32,
    pub player_height: f32,
    pub player_radius: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementConfig {
    pub advantage_multiplier: f32,
    pub disadvantage_multiplier: f32,
    pub same_element_multiplier: f32,
    pub burn_buff_id: u32,
    pub slow_buff_id: u32,
    pub stun_buff_id: u32,
    /// How long a Water mark stays on a target, in ticks
    pub wet_ticks: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub max_tick_lead: u32,
    pub max_tick_lag: u32,
    pub max_cascade_depth: usize,
    pub snapshot_history: usize,
    /// Ticks a client may go without confirming before it is sent a full state
    pub resync_after_ticks: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_tick_lead: 120,
            max_tick_lag: 120,
            max_cascade_depth: 8,
            snapshot_history: 128,
            resync_after_ticks: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    pub tick_rate: u32,
    pub inventory_capacity: usize,
    pub starting_gold: u64,
    pub spawn_point: Vec3,
    pub movement: MovementConfig,
    pub properties: BTreeMap<PropertyType, PropertyDefault>,
    pub animation: AnimationConfig,
    pub items: BTreeMap<u32, ItemConfig>,
    pub equipment: BTreeMap<u32, EquipmentConfig>,
    pub buffs: BTreeMap<u32, BuffConfig>,
    pub skills: BTreeMap<u32, SkillConfig>,
    pub shop: ShopConfig,
    pub battle: BattleConfig,
    pub element: ElementConfig,
    pub sync: SyncConfig,
}

impl GameConfig {
    /// Seconds simulated by one tick
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    pub fn with_tick_rate(mut self, tick_rate: u32) -> Self {
        self.tick_rate = tick_rate.max(1);
        self
    }

    pub fn item(&self, id: u32) -> Result<&ItemConfig, CommandError> {
        self.items
            .get(&id)
            .ok_or(CommandError::MissingConfig { table: "item", id })
    }

    pub fn equipment(&self, id: u32) -> Result<&EquipmentConfig, CommandError> {
        self.equipment
            .get(&id)
            .ok_or(CommandError::MissingConfig { table: "equipment", id })
    }

    pub fn buff(&self, id: u32) -> Result<&BuffConfig, CommandError> {
        self.buffs
            .get(&id)
            .ok_or(CommandError::MissingConfig { table: "buff", id })
    }

    pub fn skill(&self, id: u32) -> Result<&SkillConfig, CommandError> {
        self.skills
            .get(&id)
            .ok_or(CommandError::MissingConfig { table: "skill", id })
    }

    pub fn animation(&self, state: AnimationState) -> Result<&AnimationDefinition, CommandError> {
        self.animation
            .definitions
            .get(&state)
            .ok_or(CommandError::MissingConfig {
                table: "animation",
                id: state as u32,
            })
    }
}

fn property(base: f32, min: f32, max: f32, is_hundred_percent: bool, is_resource: bool) -> PropertyDefault {
    PropertyDefault {
        base,
        min,
        max,
        is_hundred_percent,
        is_resource,
    }
}

fn animation(
    animation_type: AnimationType,
    priority: u8,
    can_be_interrupted: bool,
    duration_ticks: u32,
    cooldown_ticks: u32,
    costs: Vec<(PropertyType, f32)>,
) -> AnimationDefinition {
    AnimationDefinition {
        animation_type,
        priority,
        can_be_interrupted,
        duration_ticks,
        cooldown_ticks,
        costs,
    }
}

fn stat(property: PropertyType, increase_type: BuffIncreaseType, value: f32) -> (PropertyType, BuffIncreaseData) {
    (
        property,
        BuffIncreaseData::new(increase_type, BuffOperationType::Add, value),
    )
}

fn default_properties() -> BTreeMap<PropertyType, PropertyDefault> {
    use PropertyType::*;
    BTreeMap::from([
        (Health, property(100.0, 0.0, 10_000.0, false, true)),
        (Mana, property(50.0, 0.0, 5_000.0, false, true)),
        (Strength, property(100.0, 0.0, 1_000.0, false, true)),
        (Attack, property(10.0, 0.0, 10_000.0, false, false)),
        (Defense, property(5.0, 0.0, 10_000.0, false, false)),
        (Speed, property(5.0, 0.0, 30.0, false, false)),
        (AttackSpeed, property(1.0, 0.1, 5.0, false, false)),
        (CriticalRate, property(0.05, 0.0, 1.0, true, false)),
        (CriticalDamage, property(0.5, 0.0, 10.0, false, false)),
        (DamageReduction, property(0.0, 0.0, 1.0, true, false)),
        (HealthRecovery, property(1.0, 0.0, 1_000.0, false, false)),
        (ManaRecovery, property(2.0, 0.0, 1_000.0, false, false)),
        (StrengthRecovery, property(10.0, 0.0, 1_000.0, false, false)),
    ])
}

fn default_animations() -> BTreeMap<AnimationState, AnimationDefinition> {
    use AnimationState::*;
    use AnimationType::*;
    BTreeMap::from([
        (Idle, animation(Continuous, 0, true, 0, 0, vec![])),
        (Move, animation(Continuous, 1, true, 0, 0, vec![])),
        (Sprint, animation(Continuous, 2, true, 0, 0, vec![])),
        (Falling, animation(Continuous, 3, true, 0, 0, vec![])),
        (Jump, animation(Single, 4, true, 12, 0, vec![(PropertyType::Strength, 5.0)])),
        (SprintJump, animation(Single, 4, true, 14, 0, vec![(PropertyType::Strength, 8.0)])),
        (Attack, animation(Combo, 5, true, 9, 20, vec![])),
        (SkillQ, animation(Single, 6, true, 12, 0, vec![])),
        (SkillE, animation(Single, 6, true, 15, 0, vec![])),
        (Roll, animation(Single, 7, false, 10, 24, vec![(PropertyType::Strength, 20.0)])),
        (Hit, animation(Single, 8, true, 8, 0, vec![])),
        (Dead, animation(Single, 10, false, 30, 0, vec![])),
    ])
}

fn default_items() -> BTreeMap<u32, ItemConfig> {
    let item = |name: &str, kind, max_stack, price, sell_price| ItemConfig {
        name: name.to_string(),
        kind,
        max_stack,
        price,
        sell_price,
    };
    BTreeMap::from([
        (1, item("Health Potion", ItemKind::Consumable { buff_id: 1 }, 5, 20, 8)),
        (2, item("Mana Potion", ItemKind::Consumable { buff_id: 2 }, 5, 20, 8)),
        (3, item("Haste Tonic", ItemKind::Consumable { buff_id: 3 }, 3, 35, 12)),
        (10, item("Iron Sword", ItemKind::Equipment { equipment_id: 100 }, 1, 120, 50)),
        (11, item("Ember Staff", ItemKind::Equipment { equipment_id: 101 }, 1, 180, 70)),
        (12, item("Tide Mail", ItemKind::Equipment { equipment_id: 102 }, 1, 150, 60)),
        (13, item("Storm Charm", ItemKind::Equipment { equipment_id: 103 }, 1, 160, 65)),
        (20, item("Iron Ore", ItemKind::Material, 20, 5, 2)),
    ])
}

fn default_equipment() -> BTreeMap<u32, EquipmentConfig> {
    use BuffIncreaseType::*;
    use PropertyType::*;
    BTreeMap::from([
        (
            100,
            EquipmentConfig {
                part: EquipmentPart::Weapon,
                stats: vec![stat(Attack, Extra, 8.0), stat(CriticalRate, Extra, 0.05)],
                skill: Some((SkillSlot::Q, 200)),
                passive: None,
                element: None,
            },
        ),
        (
            101,
            EquipmentConfig {
                part: EquipmentPart::Weapon,
                stats: vec![stat(Attack, Extra, 5.0), stat(Mana, Multiplier, 0.5)],
                skill: Some((SkillSlot::E, 201)),
                passive: Some(PassiveConfig {
                    trigger: TriggerType::OnSkillCast,
                    threshold: 0.0,
                    buff_id: 2,
                    cooldown_ticks: 90,
                }),
                element: Some(ElementType::Fire),
            },
        ),
        (
            102,
            EquipmentConfig {
                part: EquipmentPart::Armor,
                stats: vec![stat(Defense, Extra, 10.0), stat(Health, Multiplier, 0.2)],
                skill: None,
                passive: Some(PassiveConfig {
                    trigger: TriggerType::OnHealthBelow,
                    threshold: 0.3,
                    buff_id: 4,
                    cooldown_ticks: 300,
                }),
                element: Some(ElementType::Water),
            },
        ),
        (
            103,
            EquipmentConfig {
                part: EquipmentPart::Accessory,
                stats: vec![stat(Speed, Multiplier, 0.1)],
                skill: Some((SkillSlot::E, 202)),
                passive: Some(PassiveConfig {
                    trigger: TriggerType::OnAttackHit,
                    threshold: 15.0,
                    buff_id: 3,
                    cooldown_ticks: 150,
                }),
                element: Some(ElementType::Thunder),
            },
        ),
    ])
}

fn default_buffs() -> BTreeMap<u32, BuffConfig> {
    use BuffIncreaseType::*;
    use PropertyType::*;
    let buff = |changes, duration_ticks, subjected| BuffConfig {
        changes,
        duration_ticks,
        subjected,
    };
    BTreeMap::from([
        (1, buff(vec![stat(Health, Current, 40.0)], 0, SubjectedStateType::NONE)),
        (2, buff(vec![stat(Mana, Current, 30.0)], 0, SubjectedStateType::NONE)),
        (3, buff(vec![stat(Speed, Multiplier, 0.3)], 150, SubjectedStateType::NONE)),
        (4, buff(vec![stat(DamageReduction, Extra, 0.3)], 120, SubjectedStateType::NONE)),
        (
            5,
            buff(
                vec![
                    (Health, BuffIncreaseData::current(BuffOperationType::Subtract, 6.0)),
                    (
                        HealthRecovery,
                        BuffIncreaseData::new(Extra, BuffOperationType::Subtract, 1.0),
                    ),
                ],
                60,
                SubjectedStateType::NONE,
            ),
        ),
        (
            6,
            buff(
                vec![(
                    Speed,
                    BuffIncreaseData::new(CorrectionFactor, BuffOperationType::Multiply, 0.7),
                )],
                90,
                SubjectedStateType::SLOWED,
            ),
        ),
        (7, buff(vec![], 45, SubjectedStateType::STUNNED)),
    ])
}

fn default_skills() -> BTreeMap<u32, SkillConfig> {
    BTreeMap::from([
        (
            200,
            SkillConfig {
                behavior: SkillBehavior::Dash {
                    distance: 6.0,
                    duration_ticks: 6,
                },
                cooldown_ticks: 150,
                costs: vec![(PropertyType::Strength, 25.0)],
                damage_scale: 0.0,
                element: ElementType::None,
            },
        ),
        (
            201,
            SkillConfig {
                behavior: SkillBehavior::SingleFly {
                    speed: 18.0,
                    range: 20.0,
                    radius: 0.6,
                },
                cooldown_ticks: 60,
                costs: vec![(PropertyType::Mana, 15.0)],
                damage_scale: 1.8,
                element: ElementType::Fire,
            },
        ),
        (
            202,
            SkillConfig {
                behavior: SkillBehavior::DelayedAreaRanged {
                    range: 12.0,
                    radius: 3.0,
                    delay_ticks: 20,
                },
                cooldown_ticks: 240,
                costs: vec![(PropertyType::Mana, 30.0)],
                damage_scale: 2.5,
                element: ElementType::Thunder,
            },
        ),
        (
            203,
            SkillConfig {
                behavior: SkillBehavior::AreaRanged {
                    range: 0.0,
                    radius: 4.0,
                },
                cooldown_ticks: 180,
                costs: vec![(PropertyType::Mana, 25.0)],
                damage_scale: 1.2,
                element: ElementType::Water,
            },
        ),
        (
            204,
            SkillConfig {
                behavior: SkillBehavior::AreaFly {
                    speed: 12.0,
                    range: 14.0,
                    radius: 2.5,
                },
                cooldown_ticks: 200,
                costs: vec![(PropertyType::Mana, 35.0)],
                damage_scale: 2.0,
                element: ElementType::Wind,
            },
        ),
    ])
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            inventory_capacity: 12,
            starting_gold: 100,
            spawn_point: Vec3::ZERO,
            movement: MovementConfig::default(),
            properties: default_properties(),
            animation: AnimationConfig {
                definitions: default_animations(),
                attack_combo_max_count: 3,
                combo_window_ticks: 12,
            },
            items: default_items(),
            equipment: default_equipment(),
            buffs: default_buffs(),
            skills: default_skills(),
            shop: ShopConfig {
                slot_count: 4,
                pool: vec![1, 2, 3, 10, 11, 12, 13, 20],
                refresh_cost: 10,
            },
            battle: BattleConfig {
                combo_shapes: vec![
                    AttackShape::Sector {
                        radius: 2.5,
                        angle_degrees: 100.0,
                        height: 2.0,
                    },
                    AttackShape::Sector {
                        radius: 2.8,
                        angle_degrees: 140.0,
                        height: 2.0,
                    },
                    AttackShape::Sector {
                        radius: 3.2,
                        angle_degrees: 360.0,
                        height: 2.5,
                    },
                ],
                combo_damage_scales: vec![1.0, 1.2, 1.6],
                defense_constant: 100.0,
                max_damage_reduction: 0.9,
                min_damage: 1.0,
                player_height: 1.8,
                player_radius: 0.4,
            },
            element: ElementConfig {
                advantage_multiplier: 1.5,
                disadvantage_multiplier: 0.75,
                same_element_multiplier: 0.5,
                burn_buff_id: 5,
                slow_buff_id: 6,
                stun_buff_id: 7,
                wet_ticks: 150,
            },
            sync: SyncConfig::default(),
        }
    }
}
