//! Network command model
//!
//! Every command is a [`CommandHeader`] plus a variant-specific
//! [`CommandPayload`]. The header says who the command belongs to, who is
//! allowed to author it, whether it is applied on arrival or speculatively
//! replayable, and which simulation tick it was produced for.

use crate::calculators::animation::AnimationAction;
use crate::calculators::battle::{AttackShape, AttackSource, DamageResult};
use crate::calculators::element::ElementType;
use crate::calculators::equipment::TriggerType;
use crate::calculators::movement::ProbeResult;
use crate::calculators::skill::SkillSlot;
use crate::math::Vec3;
use crate::property::{BuffIncreaseData, PropertyType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandAuthority {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandExecuteType {
    /// Applied as soon as it is admitted; never replayed
    Immediate,
    /// Speculative on the owning client, replayable after a correction
    Predicate,
}

/// Wire tag for each command variant
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommandType {
    Input = 1,
    PropertyEnvironmentChange = 2,
    PropertyAutoRecover = 3,
    PropertyBuff = 4,
    ItemGet = 5,
    ItemBuy = 6,
    ItemSell = 7,
    ItemDrop = 8,
    ItemLock = 9,
    ItemEquip = 10,
    ItemExchange = 11,
    ItemUse = 12,
    Equipment = 13,
    Trigger = 14,
    SkillLoad = 15,
    SkillChanged = 16,
    Skill = 17,
    ShopBuy = 18,
    ShopSell = 19,
    ShopRefresh = 20,
    GoldChanged = 21,
    PlayerTouchedBase = 22,
    PlayerTraceOtherPlayerHp = 23,
    Animation = 24,
    Attack = 25,
    AttackResult = 26,
}

impl CommandType {
    pub const ALL: [CommandType; 26] = [
        CommandType::Input,
        CommandType::PropertyEnvironmentChange,
        CommandType::PropertyAutoRecover,
        CommandType::PropertyBuff,
        CommandType::ItemGet,
        CommandType::ItemBuy,
        CommandType::ItemSell,
        CommandType::ItemDrop,
        CommandType::ItemLock,
        CommandType::ItemEquip,
        CommandType::ItemExchange,
        CommandType::ItemUse,
        CommandType::Equipment,
        CommandType::Trigger,
        CommandType::SkillLoad,
        CommandType::SkillChanged,
        CommandType::Skill,
        CommandType::ShopBuy,
        CommandType::ShopSell,
        CommandType::ShopRefresh,
        CommandType::GoldChanged,
        CommandType::PlayerTouchedBase,
        CommandType::PlayerTraceOtherPlayerHp,
        CommandType::Animation,
        CommandType::Attack,
        CommandType::AttackResult,
    ];

    pub fn from_u8(tag: u8) -> Option<CommandType> {
        CommandType::ALL.iter().copied().find(|t| *t as u8 == tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandHeader {
    /// Connection owning the player state this command targets
    pub connection_id: u32,
    pub command_type: CommandType,
    pub authority: CommandAuthority,
    pub execute_type: CommandExecuteType,
    pub tick: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputCommand {
    /// World-space movement intent on the XZ plane, magnitude <= 1
    pub movement: Vec3,
    pub sprint: bool,
    pub jump: bool,
    pub roll: bool,
    pub attack: bool,
    /// Raycast results sampled by the producer at input time
    pub probe: ProbeResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyEnvironmentChangeCommand {
    pub changes: Vec<(PropertyType, BuffIncreaseData)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyAutoRecoverCommand {
    pub elapsed_ticks: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyBuffCommand {
    pub buff_id: u32,
    pub source_connection_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemGetCommand {
    pub item_id: u32,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemBuyCommand {
    pub item_id: u32,
    pub count: u32,
    pub price: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSellCommand {
    pub slot: u32,
    pub count: u32,
    /// Gold paid per sold unit
    pub price: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDropCommand {
    pub slot: u32,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemLockCommand {
    pub slot: u32,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEquipCommand {
    pub slot: u32,
    pub equip: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemExchangeCommand {
    pub from_slot: u32,
    pub to_slot: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemUseCommand {
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentCommand {
    pub equipment_id: u32,
    pub item_slot: u32,
    pub equip: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCommand {
    pub trigger_type: TriggerType,
    /// Trigger-specific magnitude (damage taken, health ratio, ...)
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillLoadCommand {
    pub skill_id: u32,
    pub slot: SkillSlot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillChangedCommand {
    pub slot: SkillSlot,
    /// `None` unloads the slot
    pub skill_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillCommand {
    pub slot: SkillSlot,
    pub direction: Vec3,
    pub target: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopBuyCommand {
    pub shop_slot: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopSellCommand {
    pub item_slot: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopRefreshCommand {
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldChangedCommand {
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerTouchedBaseCommand {
    pub base_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerTraceOtherPlayerHpCommand {
    pub target_connection_id: u32,
    pub current_hp: f32,
    pub max_hp: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationCommand {
    pub action: AnimationAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackCommand {
    pub origin: Vec3,
    pub forward: Vec3,
    pub shape: AttackShape,
    /// Multiplier on the attacker's Attack property
    pub damage_scale: f32,
    pub element: ElementType,
    /// Seed for critical rolls, fixed when the attack is emitted
    pub seed: u64,
    pub source: AttackSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackResultCommand {
    pub attacker_connection_id: u32,
    pub results: Vec<DamageResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandPayload {
    Input(InputCommand),
    PropertyEnvironmentChange(PropertyEnvironmentChangeCommand),
    PropertyAutoRecover(PropertyAutoRecoverCommand),
    PropertyBuff(PropertyBuffCommand),
    ItemGet(ItemGetCommand),
    ItemBuy(ItemBuyCommand),
    ItemSell(ItemSellCommand),
    ItemDrop(ItemDropCommand),
    ItemLock(ItemLockCommand),
    ItemEquip(ItemEquipCommand),
    ItemExchange(ItemExchangeCommand),
    ItemUse(ItemUseCommand),
    Equipment(EquipmentCommand),
    Trigger(TriggerCommand),
    SkillLoad(SkillLoadCommand),
    SkillChanged(SkillChangedCommand),
    Skill(SkillCommand),
    ShopBuy(ShopBuyCommand),
    ShopSell(ShopSellCommand),
    ShopRefresh(ShopRefreshCommand),
    GoldChanged(GoldChangedCommand),
    PlayerTouchedBase(PlayerTouchedBaseCommand),
    PlayerTraceOtherPlayerHp(PlayerTraceOtherPlayerHpCommand),
    Animation(AnimationCommand),
    Attack(AttackCommand),
    AttackResult(AttackResultCommand),
}

impl CommandPayload {
    pub fn command_type(&self) -> CommandType {
        match self {
            CommandPayload::Input(_) => CommandType::Input,
            CommandPayload::PropertyEnvironmentChange(_) => CommandType::PropertyEnvironmentChange,
            CommandPayload::PropertyAutoRecover(_) => CommandType::PropertyAutoRecover,
            CommandPayload::PropertyBuff(_) => CommandType::PropertyBuff,
            CommandPayload::ItemGet(_) => CommandType::ItemGet,
            CommandPayload::ItemBuy(_) => CommandType::ItemBuy,
            CommandPayload::ItemSell(_) => CommandType::ItemSell,
            CommandPayload::ItemDrop(_) => CommandType::ItemDrop,
            CommandPayload::ItemLock(_) => CommandType::ItemLock,
            CommandPayload::ItemEquip(_) => CommandType::ItemEquip,
            CommandPayload::ItemExchange(_) => CommandType::ItemExchange,
            CommandPayload::ItemUse(_) => CommandType::ItemUse,
            CommandPayload::Equipment(_) => CommandType::Equipment,
            CommandPayload::Trigger(_) => CommandType::Trigger,
            CommandPayload::SkillLoad(_) => CommandType::SkillLoad,
            CommandPayload::SkillChanged(_) => CommandType::SkillChanged,
            CommandPayload::Skill(_) => CommandType::Skill,
            CommandPayload::ShopBuy(_) => CommandType::ShopBuy,
            CommandPayload::ShopSell(_) => CommandType::ShopSell,
            CommandPayload::ShopRefresh(_) => CommandType::ShopRefresh,
            CommandPayload::GoldChanged(_) => CommandType::GoldChanged,
            CommandPayload::PlayerTouchedBase(_) => CommandType::PlayerTouchedBase,
            CommandPayload::PlayerTraceOtherPlayerHp(_) => CommandType::PlayerTraceOtherPlayerHp,
            CommandPayload::Animation(_) => CommandType::Animation,
            CommandPayload::Attack(_) => CommandType::Attack,
            CommandPayload::AttackResult(_) => CommandType::AttackResult,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkCommand {
    pub header: CommandHeader,
    pub payload: CommandPayload,
}

impl NetworkCommand {
    pub fn new(
        connection_id: u32,
        tick: u32,
        authority: CommandAuthority,
        execute_type: CommandExecuteType,
        payload: CommandPayload,
    ) -> Self {
        Self {
            header: CommandHeader {
                connection_id,
                command_type: payload.command_type(),
                authority,
                execute_type,
                tick,
            },
            payload,
        }
    }

    /// Client-authored, speculative command (movement, animation triggers, skills)
    pub fn predicted(connection_id: u32, tick: u32, payload: CommandPayload) -> Self {
        Self::new(
            connection_id,
            tick,
            CommandAuthority::Client,
            CommandExecuteType::Predicate,
            payload,
        )
    }

    /// Client-authored request the server answers authoritatively (shop, inventory)
    pub fn request(connection_id: u32, tick: u32, payload: CommandPayload) -> Self {
        Self::new(
            connection_id,
            tick,
            CommandAuthority::Client,
            CommandExecuteType::Immediate,
            payload,
        )
    }

    /// Server-authored, applied on arrival
    pub fn server(connection_id: u32, tick: u32, payload: CommandPayload) -> Self {
        Self::new(
            connection_id,
            tick,
            CommandAuthority::Server,
            CommandExecuteType::Immediate,
            payload,
        )
    }

    /// Follow-up emitted by a calculator while handling this command.
    ///
    /// Follow-ups inherit the parent's target, tick and execute type; they are
    /// authored by whichever side computed them.
    pub fn follow_up(&self, payload: CommandPayload) -> Self {
        Self::new(
            self.header.connection_id,
            self.header.tick,
            self.header.authority,
            self.header.execute_type,
            payload,
        )
    }

    /// Follow-up aimed at another player's state
    pub fn follow_up_for(&self, connection_id: u32, payload: CommandPayload) -> Self {
        Self::new(
            connection_id,
            self.header.tick,
            CommandAuthority::Server,
            CommandExecuteType::Immediate,
            payload,
        )
    }

    pub fn is_predicted(&self) -> bool {
        self.header.execute_type == CommandExecuteType::Predicate
    }
}
