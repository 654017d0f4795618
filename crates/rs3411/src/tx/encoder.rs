//! The ODID wire-frame encoder collaborator.
//!
//! ASTM frame building lives in an external library; the core calls these
//! entry points and never interprets the returned bytes.

use std::fmt;

use crate::odid::{BasicId, Location, OdidRecord, OperatorId, SelfId, System};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    InvalidData,
    BufferTooSmall,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidData => write!(f, "field contents not encodable"),
            Self::BufferTooSmall => write!(f, "encoded frame exceeds the limit"),
        }
    }
}

impl std::error::Error for EncodeError {}

pub type EncodeResult = Result<Vec<u8>, EncodeError>;

pub trait OdidEncoder {
    /// Single-message encodings (25-byte ASTM messages for BLE legacy).
    fn encode_basic_id(&self, basic_id: &BasicId) -> EncodeResult;
    fn encode_location(&self, location: &Location) -> EncodeResult;
    fn encode_self_id(&self, self_id: &SelfId) -> EncodeResult;
    fn encode_system(&self, system: &System) -> EncodeResult;
    fn encode_operator_id(&self, operator_id: &OperatorId) -> EncodeResult;

    /// Message pack: every valid group packed into one frame (BT-5 /
    /// NAN / Beacon), at most `max_len` bytes.
    fn build_pack(&self, record: &OdidRecord, max_len: usize) -> EncodeResult;

    /// NAN synchronisation beacon for the given transmitter address.
    fn build_nan_sync(&self, mac: &[u8; 6], max_len: usize) -> EncodeResult;

    /// NAN service-discovery action frame wrapping the message pack.
    fn build_nan_action(
        &self,
        record: &OdidRecord,
        mac: &[u8; 6],
        counter: u8,
        max_len: usize,
    ) -> EncodeResult;

    /// Full 802.11 beacon frame carrying the ODID vendor IE.
    #[allow(clippy::too_many_arguments)]
    fn build_beacon(
        &self,
        record: &OdidRecord,
        mac: &[u8; 6],
        ssid: &str,
        beacon_period_ms: u16,
        counter: u8,
        max_len: usize,
    ) -> EncodeResult;
}
