//! Link-layer frame codec for the edge (serial) gateway adapter.
//!
//! The outer link frame is the serial-specific concern that multiplexes
//! many node addresses over one wire; it is distinct from the inner
//! application payload the [`crate::codec`] module encodes/decodes
//! (spec.md §6.1: "the codec operates on the inner payload only").
//!
//! Frame format, ported from the teacher's `transport::frame` streaming
//! decoder and CRC approach, extended to carry the node address the
//! `GatewayAdapter::send`/inbound-callback contract requires:
//!
//! `[0xAA][0x55][LenLE16][AddrLE64][InnerPayload][CRC32LE]`
//! - Length: 2 bytes little-endian, counts (addr + inner payload) bytes.
//! - CRC32: computed over (addr + inner payload), little-endian.

use crc32fast::Hasher;
use thiserror::Error;

const START_BYTE_0: u8 = 0xAA;
const START_BYTE_1: u8 = 0x55;

/// Generous upper bound: the largest inner payload is an OTA_CHUNK with a
/// 128-byte chunk (13 + 128 = 141 bytes), rounded up with headroom.
pub const MAX_INNER_PAYLOAD_SIZE: usize = 256;

const ADDR_SIZE: usize = 8;

#[derive(Debug, Error, PartialEq)]
pub enum LinkFrameError {
    #[error("inner payload too large: {0} > {MAX_INNER_PAYLOAD_SIZE}")]
    PayloadTooLarge(usize),
    #[error("invalid length field: {0}")]
    InvalidLength(u16),
    #[error("CRC mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")]
    CrcMismatch { expected: u32, actual: u32 },
}

/// Encode a link frame addressed to/from `addr`, carrying `inner_payload`
/// (an already-encoded [`crate::codec`] frame: tag byte plus body).
pub fn encode_link_frame(addr: u64, inner_payload: &[u8]) -> Result<Vec<u8>, LinkFrameError> {
    if inner_payload.len() > MAX_INNER_PAYLOAD_SIZE {
        return Err(LinkFrameError::PayloadTooLarge(inner_payload.len()));
    }

    let length = (ADDR_SIZE + inner_payload.len()) as u16;

    let mut hasher = Hasher::new();
    hasher.update(&addr.to_le_bytes());
    hasher.update(inner_payload);
    let crc = hasher.finalize();

    let mut frame = Vec::with_capacity(2 + 2 + ADDR_SIZE + inner_payload.len() + 4);
    frame.push(START_BYTE_0);
    frame.push(START_BYTE_1);
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&addr.to_le_bytes());
    frame.extend_from_slice(inner_payload);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// A decoded link frame: source/destination address plus the inner payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkFrame {
    pub addr: u64,
    pub inner_payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    WaitStart0,
    WaitStart1,
    WaitLenLow,
    WaitLenHigh,
    WaitAddr,
    WaitPayload,
    WaitCrc,
}

/// Streaming byte-at-a-time frame decoder, mirroring the teacher's
/// `FrameDecoder` state machine.
pub struct LinkFrameDecoder {
    state: DecoderState,
    length: u16,
    addr_bytes: [u8; ADDR_SIZE],
    addr_index: usize,
    payload: Vec<u8>,
    payload_index: usize,
    crc_bytes: [u8; 4],
    crc_index: usize,
}

impl Default for LinkFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkFrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::WaitStart0,
            length: 0,
            addr_bytes: [0; ADDR_SIZE],
            addr_index: 0,
            payload: Vec::new(),
            payload_index: 0,
            crc_bytes: [0; 4],
            crc_index: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feed one byte; returns `Some(result)` once a full frame (or a
    /// decode error) has been accumulated.
    pub fn feed_byte(&mut self, byte: u8) -> Option<Result<LinkFrame, LinkFrameError>> {
        match self.state {
            DecoderState::WaitStart0 => {
                if byte == START_BYTE_0 {
                    self.state = DecoderState::WaitStart1;
                }
                None
            }
            DecoderState::WaitStart1 => {
                if byte == START_BYTE_1 {
                    self.state = DecoderState::WaitLenLow;
                } else if byte != START_BYTE_0 {
                    self.state = DecoderState::WaitStart0;
                }
                None
            }
            DecoderState::WaitLenLow => {
                self.length = byte as u16;
                self.state = DecoderState::WaitLenHigh;
                None
            }
            DecoderState::WaitLenHigh => {
                self.length |= (byte as u16) << 8;
                if (self.length as usize) < ADDR_SIZE
                    || (self.length as usize) > ADDR_SIZE + MAX_INNER_PAYLOAD_SIZE
                {
                    let err = LinkFrameError::InvalidLength(self.length);
                    self.reset();
                    return Some(Err(err));
                }
                self.addr_index = 0;
                self.state = DecoderState::WaitAddr;
                None
            }
            DecoderState::WaitAddr => {
                self.addr_bytes[self.addr_index] = byte;
                self.addr_index += 1;
                if self.addr_index >= ADDR_SIZE {
                    let payload_len = self.length as usize - ADDR_SIZE;
                    self.payload = Vec::with_capacity(payload_len);
                    self.payload_index = 0;
                    if payload_len == 0 {
                        self.crc_index = 0;
                        self.state = DecoderState::WaitCrc;
                    } else {
                        self.state = DecoderState::WaitPayload;
                    }
                }
                None
            }
            DecoderState::WaitPayload => {
                self.payload.push(byte);
                self.payload_index += 1;
                let payload_len = self.length as usize - ADDR_SIZE;
                if self.payload_index >= payload_len {
                    self.crc_index = 0;
                    self.state = DecoderState::WaitCrc;
                }
                None
            }
            DecoderState::WaitCrc => {
                self.crc_bytes[self.crc_index] = byte;
                self.crc_index += 1;
                if self.crc_index < 4 {
                    return None;
                }
                let received_crc = u32::from_le_bytes(self.crc_bytes);
                let mut hasher = Hasher::new();
                hasher.update(&self.addr_bytes);
                hasher.update(&self.payload);
                let calculated_crc = hasher.finalize();

                let addr = u64::from_le_bytes(self.addr_bytes);
                let inner_payload = std::mem::take(&mut self.payload);
                self.reset();

                if received_crc != calculated_crc {
                    return Some(Err(LinkFrameError::CrcMismatch { expected: calculated_crc, actual: received_crc }));
                }
                Some(Ok(LinkFrame { addr, inner_payload }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(decoder: &mut LinkFrameDecoder, bytes: &[u8]) -> Option<Result<LinkFrame, LinkFrameError>> {
        let mut result = None;
        for &b in bytes {
            if let Some(r) = decoder.feed_byte(b) {
                result = Some(r);
            }
        }
        result
    }

    #[test]
    fn roundtrip() {
        let frame = encode_link_frame(0xABCD, &[0x90, 1, 2, 3]).unwrap();
        let mut decoder = LinkFrameDecoder::new();
        let decoded = feed_all(&mut decoder, &frame).unwrap().unwrap();
        assert_eq!(decoded.addr, 0xABCD);
        assert_eq!(decoded.inner_payload, vec![0x90, 1, 2, 3]);
    }

    #[test]
    fn roundtrip_empty_payload() {
        let frame = encode_link_frame(1, &[]).unwrap();
        let mut decoder = LinkFrameDecoder::new();
        let decoded = feed_all(&mut decoder, &frame).unwrap().unwrap();
        assert_eq!(decoded.addr, 1);
        assert!(decoded.inner_payload.is_empty());
    }

    #[test]
    fn crc_mismatch_detected() {
        let mut frame = encode_link_frame(1, &[1, 2, 3]).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let mut decoder = LinkFrameDecoder::new();
        assert!(matches!(feed_all(&mut decoder, &frame), Some(Err(LinkFrameError::CrcMismatch { .. }))));
    }

    #[test]
    fn noise_before_frame_is_ignored() {
        let frame = encode_link_frame(7, &[9]).unwrap();
        let mut decoder = LinkFrameDecoder::new();
        decoder.feed_byte(0x00);
        decoder.feed_byte(0xFF);
        let decoded = feed_all(&mut decoder, &frame).unwrap().unwrap();
        assert_eq!(decoded.addr, 7);
    }

    #[test]
    fn oversized_payload_rejected_at_encode() {
        let huge = vec![0u8; MAX_INNER_PAYLOAD_SIZE + 1];
        assert_eq!(encode_link_frame(1, &huge), Err(LinkFrameError::PayloadTooLarge(huge.len())));
    }
}
