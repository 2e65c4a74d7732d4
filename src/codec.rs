//! Wire payload codec (component C1).
//!
//! Matches `testbed/swarmit/protocol.py`: every frame is a single type tag
//! byte followed by fixed-width fields in declared order, little-endian,
//! with a single variable-length trailing field on a few payload kinds.

use thiserror::Error;

/// Single-byte payload type tags (spec.md §6.1).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    StatusRequest = 0x80,
    StartRequest = 0x81,
    StopRequest = 0x82,
    ResetRequest = 0x83,
    OtaStart = 0x84,
    OtaChunk = 0x85,
    StatusNotif = 0x90,
    OtaStartAck = 0x93,
    OtaChunkAck = 0x94,
    EventGpio = 0x95,
    EventLog = 0x96,
    Message = 0xA0,
}

impl TryFrom<u8> for MsgType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x80 => Ok(Self::StatusRequest),
            0x81 => Ok(Self::StartRequest),
            0x82 => Ok(Self::StopRequest),
            0x83 => Ok(Self::ResetRequest),
            0x84 => Ok(Self::OtaStart),
            0x85 => Ok(Self::OtaChunk),
            0x90 => Ok(Self::StatusNotif),
            0x93 => Ok(Self::OtaStartAck),
            0x94 => Ok(Self::OtaChunkAck),
            0x95 => Ok(Self::EventGpio),
            0x96 => Ok(Self::EventLog),
            0xA0 => Ok(Self::Message),
            other => Err(CodecError::UnknownPayloadType(other)),
        }
    }
}

/// Device type as carried in `STATUS_NOTIF` (spec.md §3).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Unknown = 0,
    DotBotV3 = 1,
    DotBotV2 = 2,
    Nrf5340Dk = 3,
}

impl DeviceType {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::DotBotV3,
            2 => Self::DotBotV2,
            3 => Self::Nrf5340Dk,
            _ => Self::Unknown,
        }
    }
}

/// Node lifecycle state as carried in `STATUS_NOTIF` (spec.md §3).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Bootloader = 0,
    Running = 1,
    Stopping = 2,
    Resetting = 3,
    Programming = 4,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Stopping,
            3 => Self::Resetting,
            4 => Self::Programming,
            _ => Self::Bootloader,
        }
    }
}

/// A decoded/to-be-encoded payload (spec.md §6.1).
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    StatusRequest,
    StartRequest,
    StopRequest,
    ResetRequest { pos_x: i32, pos_y: i32 },
    OtaStart { fw_length: u32, fw_chunk_count: u32 },
    OtaChunk { index: u32, count: u8, sha: [u8; 8], chunk: Vec<u8> },
    StatusNotif { device: DeviceType, status: Lifecycle, battery: u16, pos_x: i32, pos_y: i32 },
    OtaStartAck,
    OtaChunkAck { index: u32 },
    EventGpio { timestamp: u32, data: Vec<u8> },
    EventLog { timestamp: u32, data: Vec<u8> },
    Message { message: Vec<u8> },
}

impl Payload {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Payload::StatusRequest => MsgType::StatusRequest,
            Payload::StartRequest => MsgType::StartRequest,
            Payload::StopRequest => MsgType::StopRequest,
            Payload::ResetRequest { .. } => MsgType::ResetRequest,
            Payload::OtaStart { .. } => MsgType::OtaStart,
            Payload::OtaChunk { .. } => MsgType::OtaChunk,
            Payload::StatusNotif { .. } => MsgType::StatusNotif,
            Payload::OtaStartAck => MsgType::OtaStartAck,
            Payload::OtaChunkAck { .. } => MsgType::OtaChunkAck,
            Payload::EventGpio { .. } => MsgType::EventGpio,
            Payload::EventLog { .. } => MsgType::EventLog,
            Payload::Message { .. } => MsgType::Message,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("unknown payload type: 0x{0:02X}")]
    UnknownPayloadType(u8),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("{field} is {len} bytes, which does not fit in the wire count field (max 255)")]
    FieldTooLarge { field: &'static str, len: usize },
}

/// Check a trailing variable-length field fits the wire's `u8` count byte
/// before truncating it with `as u8` (spec.md §6.1's `count:u8` fields).
fn checked_count(field: &'static str, len: usize) -> Result<u8, CodecError> {
    u8::try_from(len).map_err(|_| CodecError::FieldTooLarge { field, len })
}

/// Encode a payload to `tag || body`.
pub fn encode(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![payload.msg_type() as u8];
    match payload {
        Payload::StatusRequest | Payload::StartRequest | Payload::StopRequest | Payload::OtaStartAck => {}
        Payload::ResetRequest { pos_x, pos_y } => {
            out.extend_from_slice(&pos_x.to_le_bytes());
            out.extend_from_slice(&pos_y.to_le_bytes());
        }
        Payload::OtaStart { fw_length, fw_chunk_count } => {
            out.extend_from_slice(&fw_length.to_le_bytes());
            out.extend_from_slice(&fw_chunk_count.to_le_bytes());
        }
        Payload::OtaChunk { index, count, sha, chunk } => {
            out.extend_from_slice(&index.to_le_bytes());
            out.push(*count);
            out.extend_from_slice(sha);
            out.extend_from_slice(chunk);
        }
        Payload::StatusNotif { device, status, battery, pos_x, pos_y } => {
            out.push(*device as u8);
            out.push(*status as u8);
            out.extend_from_slice(&battery.to_le_bytes());
            out.extend_from_slice(&pos_x.to_le_bytes());
            out.extend_from_slice(&pos_y.to_le_bytes());
        }
        Payload::OtaChunkAck { index } => {
            out.extend_from_slice(&index.to_le_bytes());
        }
        Payload::EventGpio { timestamp, data } | Payload::EventLog { timestamp, data } => {
            out.extend_from_slice(&timestamp.to_le_bytes());
            out.push(checked_count("event data", data.len())?);
            out.extend_from_slice(data);
        }
        Payload::Message { message } => {
            out.push(checked_count("message", message.len())?);
            out.extend_from_slice(message);
        }
    }
    Ok(out)
}

/// Decode `tag || body` into a typed payload.
///
/// Fails with [`CodecError::MalformedFrame`] if the buffer is too short for
/// the tag's fixed fields, or [`CodecError::UnknownPayloadType`] if the tag is
/// outside the defined set (spec.md §7).
pub fn decode(bytes: &[u8]) -> Result<Payload, CodecError> {
    let (&tag, body) = bytes
        .split_first()
        .ok_or_else(|| CodecError::MalformedFrame("empty frame".into()))?;
    let msg_type = MsgType::try_from(tag)?;

    let need = |n: usize| -> Result<(), CodecError> {
        if body.len() < n {
            Err(CodecError::MalformedFrame(format!(
                "expected at least {n} body bytes, got {}",
                body.len()
            )))
        } else {
            Ok(())
        }
    };

    match msg_type {
        MsgType::StatusRequest => Ok(Payload::StatusRequest),
        MsgType::StartRequest => Ok(Payload::StartRequest),
        MsgType::StopRequest => Ok(Payload::StopRequest),
        MsgType::OtaStartAck => Ok(Payload::OtaStartAck),
        MsgType::ResetRequest => {
            need(8)?;
            Ok(Payload::ResetRequest {
                pos_x: i32::from_le_bytes(body[0..4].try_into().unwrap()),
                pos_y: i32::from_le_bytes(body[4..8].try_into().unwrap()),
            })
        }
        MsgType::OtaStart => {
            need(8)?;
            Ok(Payload::OtaStart {
                fw_length: u32::from_le_bytes(body[0..4].try_into().unwrap()),
                fw_chunk_count: u32::from_le_bytes(body[4..8].try_into().unwrap()),
            })
        }
        MsgType::OtaChunk => {
            need(13)?;
            let index = u32::from_le_bytes(body[0..4].try_into().unwrap());
            let count = body[4];
            let mut sha = [0u8; 8];
            sha.copy_from_slice(&body[5..13]);
            let chunk = body[13..].to_vec();
            if chunk.len() != count as usize {
                return Err(CodecError::MalformedFrame(format!(
                    "OTA_CHUNK declared count {count} but payload carries {} trailing bytes",
                    chunk.len()
                )));
            }
            Ok(Payload::OtaChunk { index, count, sha, chunk })
        }
        MsgType::StatusNotif => {
            need(12)?;
            Ok(Payload::StatusNotif {
                device: DeviceType::from_u8(body[0]),
                status: Lifecycle::from_u8(body[1]),
                battery: u16::from_le_bytes(body[2..4].try_into().unwrap()),
                pos_x: i32::from_le_bytes(body[4..8].try_into().unwrap()),
                pos_y: i32::from_le_bytes(body[8..12].try_into().unwrap()),
            })
        }
        MsgType::OtaChunkAck => {
            need(4)?;
            Ok(Payload::OtaChunkAck {
                index: u32::from_le_bytes(body[0..4].try_into().unwrap()),
            })
        }
        MsgType::EventGpio | MsgType::EventLog => {
            need(5)?;
            let timestamp = u32::from_le_bytes(body[0..4].try_into().unwrap());
            let count = body[4];
            let data = body[5..].to_vec();
            if data.len() != count as usize {
                return Err(CodecError::MalformedFrame(format!(
                    "event declared count {count} but payload carries {} trailing bytes",
                    data.len()
                )));
            }
            if msg_type == MsgType::EventGpio {
                Ok(Payload::EventGpio { timestamp, data })
            } else {
                Ok(Payload::EventLog { timestamp, data })
            }
        }
        MsgType::Message => {
            need(1)?;
            let count = body[0];
            let message = body[1..].to_vec();
            if message.len() != count as usize {
                return Err(CodecError::MalformedFrame(format!(
                    "MESSAGE declared count {count} but payload carries {} trailing bytes",
                    message.len()
                )));
            }
            Ok(Payload::Message { message })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ota_chunk_roundtrip_matches_spec_example() {
        // encode(OTA_CHUNK{index=5, count=3, sha=0x0102030405060708, chunk=[0xAA,0xBB,0xCC]})
        // == 85 05 00 00 00 03 01 02 03 04 05 06 07 08 AA BB CC
        let payload = Payload::OtaChunk {
            index: 5,
            count: 3,
            sha: [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
            chunk: vec![0xAA, 0xBB, 0xCC],
        };
        let encoded = encode(&payload).unwrap();
        assert_eq!(
            encoded,
            vec![0x85, 0x05, 0x00, 0x00, 0x00, 0x03, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0xAA, 0xBB, 0xCC]
        );
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn reset_request_roundtrip() {
        let payload = Payload::ResetRequest { pos_x: -1_500_000, pos_y: 2_500_000 };
        let encoded = encode(&payload).unwrap();
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn status_notif_roundtrip() {
        let payload = Payload::StatusNotif {
            device: DeviceType::DotBotV3,
            status: Lifecycle::Running,
            battery: 2800,
            pos_x: 10,
            pos_y: -10,
        };
        let encoded = encode(&payload).unwrap();
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn message_roundtrip() {
        let payload = Payload::Message { message: b"hello fleet".to_vec() };
        let encoded = encode(&payload).unwrap();
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn message_over_255_bytes_is_rejected_instead_of_truncated() {
        let payload = Payload::Message { message: vec![0x41; 256] };
        assert_eq!(
            encode(&payload),
            Err(CodecError::FieldTooLarge { field: "message", len: 256 })
        );
    }

    #[test]
    fn message_at_255_bytes_is_the_largest_accepted() {
        let payload = Payload::Message { message: vec![0x41; 255] };
        let encoded = encode(&payload).unwrap();
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn event_log_over_255_bytes_is_rejected_instead_of_truncated() {
        let payload = Payload::EventLog { timestamp: 0, data: vec![0x00; 300] };
        assert_eq!(
            encode(&payload),
            Err(CodecError::FieldTooLarge { field: "event data", len: 300 })
        );
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        assert_eq!(decode(&[0x7F]), Err(CodecError::UnknownPayloadType(0x7F)));
    }

    #[test]
    fn decode_rejects_short_fixed_body() {
        assert!(matches!(decode(&[0x83, 0x01, 0x02]), Err(CodecError::MalformedFrame(_))));
    }

    #[test]
    fn decode_rejects_truncated_status_notif_instead_of_panicking() {
        // A full STATUS_NOTIF body is 12 bytes (device, status, battery:u16,
        // pos_x:i32, pos_y:i32); 10 bytes is missing the last field entirely.
        let mut bytes = vec![0x90];
        bytes.extend_from_slice(&[0u8; 10]);
        assert!(matches!(decode(&bytes), Err(CodecError::MalformedFrame(_))));
    }

    #[test]
    fn decode_rejects_inconsistent_trailing_length() {
        // OTA_CHUNK declares count=3 but only carries 2 trailing bytes
        let mut bytes = vec![0x85, 0, 0, 0, 0, 3, 1, 2, 3, 4, 5, 6, 7, 8];
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        assert!(matches!(decode(&bytes), Err(CodecError::MalformedFrame(_))));
    }

    #[test]
    fn empty_payload_types_encode_to_single_byte() {
        for payload in [Payload::StatusRequest, Payload::StartRequest, Payload::StopRequest, Payload::OtaStartAck] {
            assert_eq!(encode(&payload).unwrap().len(), 1);
            assert_eq!(decode(&encode(&payload).unwrap()).unwrap(), payload);
        }
    }
}
