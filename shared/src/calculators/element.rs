//! Element affinities and on-hit element reactions

use super::{Computed, TickContext};
use crate::command::{CommandPayload, PropertyBuffCommand};
use crate::config::{ElementConfig, GameConfig};
use crate::state::PlayerState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ElementType {
    #[default]
    None,
    Fire,
    Water,
    Wind,
    Earth,
    Thunder,
}

impl ElementType {
    /// Element this one deals bonus damage to.
    ///
    /// Fire > Wind > Earth > Thunder > Water > Fire
    pub fn strong_against(&self) -> Option<ElementType> {
        match self {
            ElementType::None => None,
            ElementType::Fire => Some(ElementType::Wind),
            ElementType::Wind => Some(ElementType::Earth),
            ElementType::Earth => Some(ElementType::Thunder),
            ElementType::Thunder => Some(ElementType::Water),
            ElementType::Water => Some(ElementType::Fire),
        }
    }
}

/// Damage multiplier for `attack` landing on a defender of element `defend`.
pub fn affinity(attack: ElementType, defend: ElementType, config: &ElementConfig) -> f32 {
    if attack == ElementType::None || defend == ElementType::None {
        1.0
    } else if attack == defend {
        config.same_element_multiplier
    } else if attack.strong_against() == Some(defend) {
        config.advantage_multiplier
    } else if defend.strong_against() == Some(attack) {
        config.disadvantage_multiplier
    } else {
        1.0
    }
}

/// Lingering element marks on a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementStatus {
    pub wet_ticks: u32,
}

impl ElementStatus {
    pub fn is_wet(&self) -> bool {
        self.wet_ticks > 0
    }
}

#[derive(Debug, Clone)]
pub struct ElementCalculator {
    config: Arc<GameConfig>,
}

impl ElementCalculator {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self { config }
    }

    /// Reaction of a defender to a hit carrying `element`.
    ///
    /// Water leaves a wet mark, Thunder on a wet target stuns and dries it,
    /// Fire burns a dry target and only dries a wet one.
    pub fn react(&self, defender: &PlayerState, element: ElementType, source_connection_id: u32, context: &TickContext) -> Computed {
        let config = &self.config.element;
        let mut next = defender.clone();
        let status = &mut next.combat.element;
        let buff = |buff_id: u32| {
            context.command(CommandPayload::PropertyBuff(PropertyBuffCommand {
                buff_id,
                source_connection_id,
            }))
        };

        let follow_ups = match element {
            ElementType::Water => {
                status.wet_ticks = config.wet_ticks;
                vec![buff(config.slow_buff_id)]
            }
            ElementType::Thunder if status.is_wet() => {
                status.wet_ticks = 0;
                vec![buff(config.stun_buff_id)]
            }
            ElementType::Fire if status.is_wet() => {
                status.wet_ticks = 0;
                vec![]
            }
            ElementType::Fire => vec![buff(config.burn_buff_id)],
            _ => vec![],
        };
        Computed::with_follow_ups(next, follow_ups)
    }

    pub fn advance(&self, state: &PlayerState) -> PlayerState {
        let mut next = state.clone();
        next.combat.element.wet_ticks = next.combat.element.wet_ticks.saturating_sub(1);
        next
    }
}
