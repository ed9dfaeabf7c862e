pub mod calculators;
pub mod codec;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod math;
pub mod property;
pub mod reconciliation;
pub mod state;
pub mod sync;
pub mod timer;

use crate::command::NetworkCommand;
use crate::error::CodecError;
use crate::state::{PlayerDelta, PlayerState};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
/// Largest UDP payload either side sends or accepts
pub const MAX_PACKET_SIZE: usize = 65_507;
pub const DEFAULT_PORT: u16 = 8080;

/// Transport envelope. Commands travel as codec frames inside `Commands`;
/// state travels as whole players or per-slice deltas.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Commands {
        frames: Vec<Vec<u8>>,
    },
    Disconnect,

    Connected {
        client_id: u32,
        tick: u32,
        tick_rate: u32,
    },
    FullState {
        tick: u32,
        players: Vec<PlayerState>,
    },
    TickDelta {
        tick: u32,
        /// Last tick group of the receiver's own commands the server applied
        acknowledged: Option<u32>,
        rejected: Vec<u32>,
        deltas: Vec<PlayerDelta>,
    },
    Disconnected {
        reason: String,
    },
}

impl Packet {
    pub fn commands(commands: &[NetworkCommand]) -> Result<Packet, CodecError> {
        let frames = commands.iter().map(codec::encode).collect::<Result<Vec<_>, _>>()?;
        Ok(Packet::Commands { frames })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Packet, CodecError> {
        Ok(bincode::deserialize(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandPayload, ItemUseCommand, ShopRefreshCommand};
    use crate::config::GameConfig;

    #[test]
    fn test_packet_serialization_connect() {
        let packet = Packet::Connect { client_version: 42 };
        let deserialized = Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap();

        match deserialized {
            Packet::Connect { client_version } => assert_eq!(client_version, 42),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_commands() {
        let commands = vec![
            NetworkCommand::predicted(3, 10, CommandPayload::ItemUse(ItemUseCommand { slot: 2 })),
            NetworkCommand::request(3, 10, CommandPayload::ShopRefresh(ShopRefreshCommand { seed: 77 })),
        ];
        let packet = Packet::commands(&commands).unwrap();
        let deserialized = Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap();

        match deserialized {
            Packet::Commands { frames } => {
                assert_eq!(frames.len(), 2);
                let decoded: Vec<NetworkCommand> = frames.iter().map(|f| codec::decode(f).unwrap()).collect();
                assert_eq!(decoded, commands);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_full_state() {
        let config = GameConfig::default();
        let players = vec![PlayerState::spawn(1, &config), PlayerState::spawn(2, &config)];
        let packet = Packet::FullState {
            tick: 42,
            players: players.clone(),
        };

        let bytes = packet.to_bytes().unwrap();
        assert!(bytes.len() < MAX_PACKET_SIZE);
        match Packet::from_bytes(&bytes).unwrap() {
            Packet::FullState { tick, players: decoded } => {
                assert_eq!(tick, 42);
                assert_eq!(decoded, players);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_tick_delta() {
        let config = GameConfig::default();
        let before = PlayerState::spawn(1, &config);
        let mut after = before.clone();
        after.inventory.gold += 50;

        let packet = Packet::TickDelta {
            tick: 9,
            acknowledged: Some(8),
            rejected: vec![7],
            deltas: PlayerDelta::diff(&before, &after).into_iter().collect(),
        };
        let deserialized = Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap();
        assert_eq!(deserialized, packet);
    }

    #[test]
    fn test_garbage_packet_is_an_error() {
        assert!(Packet::from_bytes(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
        assert!(Packet::from_bytes(&[]).is_err());
    }
}
