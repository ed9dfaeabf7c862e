//! Compact binary encoding of [`NetworkCommand`]
//!
//! Layout (little endian):
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0      | 4    | connection id  |
//! | 4      | 1    | command type   |
//! | 5      | 1    | authority      |
//! | 6      | 1    | execute type   |
//! | 7      | 4    | tick           |
//! | 11     | ..   | payload        |
//!
//! The payload is the bincode encoding of the variant's own struct; the
//! command type byte selects which struct to decode.

use crate::command::*;
use crate::error::CodecError;
use bincode::{deserialize, serialize};
use serde::de::DeserializeOwned;

pub const HEADER_LEN: usize = 11;

pub fn encode_header(header: &CommandHeader, out: &mut Vec<u8>) {
    out.extend_from_slice(&header.connection_id.to_le_bytes());
    out.push(header.command_type as u8);
    out.push(match header.authority {
        CommandAuthority::Client => 0,
        CommandAuthority::Server => 1,
    });
    out.push(match header.execute_type {
        CommandExecuteType::Immediate => 0,
        CommandExecuteType::Predicate => 1,
    });
    out.extend_from_slice(&header.tick.to_le_bytes());
}

pub fn decode_header(buf: &[u8]) -> Result<CommandHeader, CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::BufferTooShort {
            need: HEADER_LEN,
            have: buf.len(),
        });
    }

    let connection_id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let command_type = CommandType::from_u8(buf[4]).ok_or(CodecError::UnknownCommandType(buf[4]))?;
    let authority = match buf[5] {
        0 => CommandAuthority::Client,
        1 => CommandAuthority::Server,
        value => {
            return Err(CodecError::InvalidField {
                field: "authority",
                value,
            })
        }
    };
    let execute_type = match buf[6] {
        0 => CommandExecuteType::Immediate,
        1 => CommandExecuteType::Predicate,
        value => {
            return Err(CodecError::InvalidField {
                field: "execute type",
                value,
            })
        }
    };
    let tick = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]);

    Ok(CommandHeader {
        connection_id,
        command_type,
        authority,
        execute_type,
        tick,
    })
}

pub fn encode(command: &NetworkCommand) -> Result<Vec<u8>, CodecError> {
    let payload_type = command.payload.command_type();
    if payload_type != command.header.command_type {
        return Err(CodecError::TypeMismatch {
            header: command.header.command_type,
            payload: payload_type,
        });
    }

    let payload = match &command.payload {
        CommandPayload::Input(p) => serialize(p)?,
        CommandPayload::PropertyEnvironmentChange(p) => serialize(p)?,
        CommandPayload::PropertyAutoRecover(p) => serialize(p)?,
        CommandPayload::PropertyBuff(p) => serialize(p)?,
        CommandPayload::ItemGet(p) => serialize(p)?,
        CommandPayload::ItemBuy(p) => serialize(p)?,
        CommandPayload::ItemSell(p) => serialize(p)?,
        CommandPayload::ItemDrop(p) => serialize(p)?,
        CommandPayload::ItemLock(p) => serialize(p)?,
        CommandPayload::ItemEquip(p) => serialize(p)?,
        CommandPayload::ItemExchange(p) => serialize(p)?,
        CommandPayload::ItemUse(p) => serialize(p)?,
        CommandPayload::Equipment(p) => serialize(p)?,
        CommandPayload::Trigger(p) => serialize(p)?,
        CommandPayload::SkillLoad(p) => serialize(p)?,
        CommandPayload::SkillChanged(p) => serialize(p)?,
        CommandPayload::Skill(p) => serialize(p)?,
        CommandPayload::ShopBuy(p) => serialize(p)?,
        CommandPayload::ShopSell(p) => serialize(p)?,
        CommandPayload::ShopRefresh(p) => serialize(p)?,
        CommandPayload::GoldChanged(p) => serialize(p)?,
        CommandPayload::PlayerTouchedBase(p) => serialize(p)?,
        CommandPayload::PlayerTraceOtherPlayerHp(p) => serialize(p)?,
        CommandPayload::Animation(p) => serialize(p)?,
        CommandPayload::Attack(p) => serialize(p)?,
        CommandPayload::AttackResult(p) => serialize(p)?,
    };

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    encode_header(&command.header, &mut out);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(deserialize(bytes)?)
}

pub fn decode(buf: &[u8]) -> Result<NetworkCommand, CodecError> {
    let header = decode_header(buf)?;
    let bytes = &buf[HEADER_LEN..];

    let payload = match header.command_type {
        CommandType::Input => CommandPayload::Input(payload(bytes)?),
        CommandType::PropertyEnvironmentChange => CommandPayload::PropertyEnvironmentChange(payload(bytes)?),
        CommandType::PropertyAutoRecover => CommandPayload::PropertyAutoRecover(payload(bytes)?),
        CommandType::PropertyBuff => CommandPayload::PropertyBuff(payload(bytes)?),
        CommandType::ItemGet => CommandPayload::ItemGet(payload(bytes)?),
        CommandType::ItemBuy => CommandPayload::ItemBuy(payload(bytes)?),
        CommandType::ItemSell => CommandPayload::ItemSell(payload(bytes)?),
        CommandType::ItemDrop => CommandPayload::ItemDrop(payload(bytes)?),
        CommandType::ItemLock => CommandPayload::ItemLock(payload(bytes)?),
        CommandType::ItemEquip => CommandPayload::ItemEquip(payload(bytes)?),
        CommandType::ItemExchange => CommandPayload::ItemExchange(payload(bytes)?),
        CommandType::ItemUse => CommandPayload::ItemUse(payload(bytes)?),
        CommandType::Equipment => CommandPayload::Equipment(payload(bytes)?),
        CommandType::Trigger => CommandPayload::Trigger(payload(bytes)?),
        CommandType::SkillLoad => CommandPayload::SkillLoad(payload(bytes)?),
        CommandType::SkillChanged => CommandPayload::SkillChanged(payload(bytes)?),
        CommandType::Skill => CommandPayload::Skill(payload(bytes)?),
        CommandType::ShopBuy => CommandPayload::ShopBuy(payload(bytes)?),
        CommandType::ShopSell => CommandPayload::ShopSell(payload(bytes)?),
        CommandType::ShopRefresh => CommandPayload::ShopRefresh(payload(bytes)?),
        CommandType::GoldChanged => CommandPayload::GoldChanged(payload(bytes)?),
        CommandType::PlayerTouchedBase => CommandPayload::PlayerTouchedBase(payload(bytes)?),
        CommandType::PlayerTraceOtherPlayerHp => CommandPayload::PlayerTraceOtherPlayerHp(payload(bytes)?),
        CommandType::Animation => CommandPayload::Animation(payload(bytes)?),
        CommandType::Attack => CommandPayload::Attack(payload(bytes)?),
        CommandType::AttackResult => CommandPayload::AttackResult(payload(bytes)?),
    };

    Ok(NetworkCommand { header, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculators::skill::SkillSlot;
    use crate::math::Vec3;

    fn sample() -> NetworkCommand {
        NetworkCommand::predicted(
            0x0102_0304,
            0x0A0B_0C0D,
            CommandPayload::Skill(SkillCommand {
                slot: SkillSlot::E,
                direction: Vec3::new(0.0, 0.0, 1.0),
                target: Vec3::new(3.0, 0.0, 4.0),
            }),
        )
    }

    #[test]
    fn test_header_fixed_positions() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(bytes[4], CommandType::Skill as u8);
        assert_eq!(bytes[5], 0);
        assert_eq!(bytes[6], 1);
        assert_eq!(&bytes[7..11], &[0x0D, 0x0C, 0x0B, 0x0A]);
    }

    #[test]
    fn test_roundtrip() {
        let command = sample();
        let decoded = decode(&encode(&command).unwrap()).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn test_truncated_header() {
        let bytes = encode(&sample()).unwrap();
        let err = decode(&bytes[..6]).unwrap_err();
        assert_eq!(err, CodecError::BufferTooShort { need: HEADER_LEN, have: 6 });
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = encode(&sample()).unwrap();
        let err = decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, CodecError::Payload(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_unknown_tag_is_fatal() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[4] = 0xEE;
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err, CodecError::UnknownCommandType(0xEE));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_invalid_authority_byte() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[5] = 9;
        assert_eq!(
            decode(&bytes).unwrap_err(),
            CodecError::InvalidField {
                field: "authority",
                value: 9
            }
        );
    }

    #[test]
    fn test_header_payload_mismatch_rejected() {
        let mut command = sample();
        command.header.command_type = CommandType::Input;
        assert!(matches!(
            encode(&command),
            Err(CodecError::TypeMismatch { .. })
        ));
    }
}
