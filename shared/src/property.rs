//! Layered numeric player attributes
//!
//! A [`PropertyValue`] keeps its layers (base, multiplier, extra, correction
//! factor) separately and derives the effective value from them, so a
//! "multiplier +20%" buff can be stacked and later removed without ever
//! touching the base value. Every mutation goes through [`apply`], which is
//! pure and always leaves `min_value <= current_value <= max_current_value`.

use log::error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    Health,
    Mana,
    Strength,
    Attack,
    Defense,
    Speed,
    AttackSpeed,
    CriticalRate,
    CriticalDamage,
    DamageReduction,
    HealthRecovery,
    ManaRecovery,
    StrengthRecovery,
}

impl PropertyType {
    pub const ALL: [PropertyType; 13] = [
        PropertyType::Health,
        PropertyType::Mana,
        PropertyType::Strength,
        PropertyType::Attack,
        PropertyType::Defense,
        PropertyType::Speed,
        PropertyType::AttackSpeed,
        PropertyType::CriticalRate,
        PropertyType::CriticalDamage,
        PropertyType::DamageReduction,
        PropertyType::HealthRecovery,
        PropertyType::ManaRecovery,
        PropertyType::StrengthRecovery,
    ];

    /// Recovery property that regenerates this resource, if any.
    pub fn recovery(&self) -> Option<PropertyType> {
        match self {
            PropertyType::Health => Some(PropertyType::HealthRecovery),
            PropertyType::Mana => Some(PropertyType::ManaRecovery),
            PropertyType::Strength => Some(PropertyType::StrengthRecovery),
            _ => None,
        }
    }
}

/// Which layer of a property a buff modifies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuffIncreaseType {
    Base,
    Multiplier,
    Extra,
    CorrectionFactor,
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuffOperationType {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BuffOperationType {
    pub fn inverse(&self) -> BuffOperationType {
        match self {
            BuffOperationType::Add => BuffOperationType::Subtract,
            BuffOperationType::Subtract => BuffOperationType::Add,
            BuffOperationType::Multiply => BuffOperationType::Divide,
            BuffOperationType::Divide => BuffOperationType::Multiply,
        }
    }

    fn eval(&self, lhs: f32, rhs: f32) -> f32 {
        match self {
            BuffOperationType::Add => lhs + rhs,
            BuffOperationType::Subtract => lhs - rhs,
            BuffOperationType::Multiply => lhs * rhs,
            BuffOperationType::Divide => {
                if rhs == 0.0 {
                    lhs
                } else {
                    lhs / rhs
                }
            }
        }
    }
}

/// One change to one property layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuffIncreaseData {
    pub increase_type: BuffIncreaseType,
    pub operation_type: BuffOperationType,
    pub value: f32,
}

impl BuffIncreaseData {
    pub fn new(increase_type: BuffIncreaseType, operation_type: BuffOperationType, value: f32) -> Self {
        Self {
            increase_type,
            operation_type,
            value,
        }
    }

    pub fn current(operation_type: BuffOperationType, value: f32) -> Self {
        Self::new(BuffIncreaseType::Current, operation_type, value)
    }

    /// Delta undoing this one on the same layer.
    pub fn inverse(&self) -> Self {
        Self {
            operation_type: self.operation_type.inverse(),
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub base_value: f32,
    /// Additive fraction on top of 100% (0.2 == +20%)
    pub multiplier: f32,
    pub extra: f32,
    pub correction_factor: f32,
    pub current_value: f32,
    pub max_current_value: f32,
    pub min_value: f32,
    /// Hard ceiling from config
    pub max_value: f32,
    /// Chance-like fractions (0.25 == 25%), capped at 1.0
    pub is_hundred_percent: bool,
    /// Drains and regenerates; current is tracked separately from the layered maximum
    pub is_resource_property: bool,
}

impl PropertyValue {
    pub fn new(base_value: f32, min_value: f32, max_value: f32, is_hundred_percent: bool, is_resource_property: bool) -> Self {
        let mut value = Self {
            base_value,
            multiplier: 0.0,
            extra: 0.0,
            correction_factor: 1.0,
            current_value: base_value,
            max_current_value: base_value,
            min_value,
            max_value,
            is_hundred_percent,
            is_resource_property,
        };
        value.recompute();
        value.current_value = value.max_current_value;
        value
    }

    /// Effective value derived from the layers, clamped to the config range.
    pub fn layered_value(&self) -> f32 {
        let raw = (self.base_value * (1.0 + self.multiplier) + self.extra) * self.correction_factor;
        let mut ceiling = self.max_value;
        if self.is_hundred_percent {
            ceiling = ceiling.min(1.0);
        }
        let ceiling = ceiling.max(self.min_value);
        if raw.is_finite() {
            raw.clamp(self.min_value, ceiling)
        } else {
            self.min_value
        }
    }

    fn recompute(&mut self) {
        self.max_current_value = self.layered_value();
        if self.is_resource_property {
            self.current_value = self.current_value.clamp(self.min_value, self.max_current_value);
        } else {
            self.current_value = self.max_current_value;
        }
    }

    pub fn ratio(&self) -> f32 {
        if self.max_current_value <= 0.0 {
            0.0
        } else {
            self.current_value / self.max_current_value
        }
    }

    pub fn is_depleted(&self) -> bool {
        self.current_value <= self.min_value
    }
}

/// Applies `delta` to `value`, returning the new value.
///
/// Zero-magnitude deltas are the identity for every operation. Results that
/// would be non-finite leave the layer untouched.
pub fn apply(value: &PropertyValue, delta: &BuffIncreaseData) -> PropertyValue {
    let mut next = *value;
    if delta.value == 0.0 || !delta.value.is_finite() {
        return next;
    }

    let layer = match delta.increase_type {
        BuffIncreaseType::Base => &mut next.base_value,
        BuffIncreaseType::Multiplier => &mut next.multiplier,
        BuffIncreaseType::Extra => &mut next.extra,
        BuffIncreaseType::CorrectionFactor => &mut next.correction_factor,
        BuffIncreaseType::Current => &mut next.current_value,
    };
    let updated = delta.operation_type.eval(*layer, delta.value);
    if updated.is_finite() {
        *layer = updated;
    }

    if delta.increase_type == BuffIncreaseType::Current {
        next.current_value = next.current_value.clamp(next.min_value, next.max_current_value);
    } else {
        next.recompute();
    }
    next
}

/// Status flags a player can be subjected to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct SubjectedStateType(u32);

impl SubjectedStateType {
    pub const NONE: SubjectedStateType = SubjectedStateType(0);
    pub const INVISIBLE: SubjectedStateType = SubjectedStateType(1 << 0);
    pub const FROZEN: SubjectedStateType = SubjectedStateType(1 << 1);
    pub const STUNNED: SubjectedStateType = SubjectedStateType(1 << 2);
    pub const DEAD: SubjectedStateType = SubjectedStateType(1 << 3);
    pub const CANNOT_MOVE: SubjectedStateType = SubjectedStateType(1 << 4);
    pub const SILENCED: SubjectedStateType = SubjectedStateType(1 << 5);
    pub const INVINCIBLE: SubjectedStateType = SubjectedStateType(1 << 6);
    pub const SLOWED: SubjectedStateType = SubjectedStateType(1 << 7);

    /// States that forbid any movement input
    pub const IMMOBILE: SubjectedStateType = SubjectedStateType(
        Self::FROZEN.0 | Self::STUNNED.0 | Self::DEAD.0 | Self::CANNOT_MOVE.0,
    );

    /// States that forbid casting skills
    pub const NO_CAST: SubjectedStateType =
        SubjectedStateType(Self::FROZEN.0 | Self::STUNNED.0 | Self::DEAD.0 | Self::SILENCED.0);

    pub const fn from_bits(bits: u32) -> Self {
        SubjectedStateType(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: SubjectedStateType) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: SubjectedStateType) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: SubjectedStateType) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: SubjectedStateType) {
        self.0 &= !other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for SubjectedStateType {
    type Output = SubjectedStateType;

    fn bitor(self, rhs: Self) -> Self::Output {
        SubjectedStateType(self.0 | rhs.0)
    }
}

/// All predicted properties of one player
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerPredictablePropertyState {
    pub properties: BTreeMap<PropertyType, PropertyValue>,
    pub subjected: SubjectedStateType,
}

impl PlayerPredictablePropertyState {
    pub fn new(properties: BTreeMap<PropertyType, PropertyValue>) -> Self {
        Self {
            properties,
            subjected: SubjectedStateType::NONE,
        }
    }

    pub fn get(&self, property: PropertyType) -> Option<&PropertyValue> {
        self.properties.get(&property)
    }

    /// Current value, or 0 for a property this player does not carry.
    pub fn current(&self, property: PropertyType) -> f32 {
        self.properties
            .get(&property)
            .map(|v| v.current_value)
            .unwrap_or(0.0)
    }

    /// Returns a copy with `delta` applied to `property`.
    ///
    /// A property missing from the map is a programming error: it asserts in
    /// debug builds and leaves the state unchanged in release builds.
    pub fn with_buff(&self, property: PropertyType, delta: &BuffIncreaseData) -> Self {
        let mut next = self.clone();
        match next.properties.get_mut(&property) {
            Some(value) => *value = apply(value, delta),
            None => {
                error!("Property {:?} missing from player state", property);
                debug_assert!(false, "property {:?} missing from player state", property);
            }
        }
        next
    }

    pub fn with_buffs<'a, I>(&self, deltas: I) -> Self
    where
        I: IntoIterator<Item = &'a (PropertyType, BuffIncreaseData)>,
    {
        deltas
            .into_iter()
            .fold(self.clone(), |state, (property, delta)| state.with_buff(*property, delta))
    }

    /// True when every resource cost can be paid from current values.
    pub fn can_afford(&self, costs: &[(PropertyType, f32)]) -> bool {
        costs.iter().all(|(property, amount)| match self.properties.get(property) {
            Some(value) => value.current_value - amount >= value.min_value,
            None => *amount <= 0.0,
        })
    }

    /// Deducts resource costs from the current layer.
    pub fn pay(&self, costs: &[(PropertyType, f32)]) -> Self {
        costs.iter().fold(self.clone(), |state, (property, amount)| {
            if state.properties.contains_key(property) {
                state.with_buff(*property, &BuffIncreaseData::current(BuffOperationType::Subtract, *amount))
            } else {
                state
            }
        })
    }

    pub fn is_dead(&self) -> bool {
        self.subjected.contains(SubjectedStateType::DEAD)
    }
}
