//! Payload definitions for the MAVLink messages the module speaks.
//!
//! Structs are declared in wire order (fields sorted by type size, as the
//! MAVLink generator does) so they serialise directly with deku. Each
//! carries its message id, CRC_EXTRA seed and full wire length.

use deku::prelude::*;

pub const MAV_TYPE_GCS: u8 = 6;
pub const MAV_TYPE_ODID: u8 = 34;
pub const MAV_AUTOPILOT_INVALID: u8 = 8;
pub const MAV_COMP_ID_ODID_TXRX_1: u8 = 236;
pub const MAV_PARAM_TYPE_REAL32: u8 = 9;
pub const MAV_SEVERITY_ERROR: u8 = 3;
pub const MAV_SEVERITY_INFO: u8 = 6;

macro_rules! msg_meta {
    ($ty:ty, $id:expr, $extra:expr, $len:expr) => {
        impl $ty {
            pub const ID: u32 = $id;
            pub const CRC_EXTRA: u8 = $extra;
            pub const WIRE_LEN: usize = $len;
        }
    };
}

#[derive(Debug, Default, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mavtype: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}
msg_meta!(Heartbeat, 0, 50, 9);

#[derive(Debug, Default, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct ParamRequestRead {
    pub param_index: i16,
    pub target_system: u8,
    pub target_component: u8,
    pub param_id: [u8; 16],
}
msg_meta!(ParamRequestRead, 20, 214, 20);

#[derive(Debug, Default, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct ParamRequestList {
    pub target_system: u8,
    pub target_component: u8,
}
msg_meta!(ParamRequestList, 21, 159, 2);

#[derive(Debug, Default, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct ParamValue {
    pub param_value: f32,
    pub param_count: u16,
    pub param_index: u16,
    pub param_id: [u8; 16],
    pub param_type: u8,
}
msg_meta!(ParamValue, 22, 220, 25);

#[derive(Debug, Default, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct ParamSet {
    pub param_value: f32,
    pub target_system: u8,
    pub target_component: u8,
    pub param_id: [u8; 16],
    pub param_type: u8,
}
msg_meta!(ParamSet, 23, 168, 23);

#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct Statustext {
    pub severity: u8,
    pub text: [u8; 50],
}
msg_meta!(Statustext, 253, 83, 51);

impl Default for Statustext {
    fn default() -> Self {
        Self {
            severity: 0,
            text: [0; 50],
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct OdidBasicIdMsg {
    pub target_system: u8,
    pub target_component: u8,
    pub id_or_mac: [u8; 20],
    pub id_type: u8,
    pub ua_type: u8,
    pub uas_id: [u8; 20],
}
msg_meta!(OdidBasicIdMsg, 12900, 114, 44);

#[derive(Debug, Default, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct OdidLocationMsg {
    pub latitude: i32,
    pub longitude: i32,
    pub altitude_barometric: f32,
    pub altitude_geodetic: f32,
    pub height: f32,
    pub timestamp: f32,
    pub direction: u16,
    pub speed_horizontal: u16,
    pub speed_vertical: i16,
    pub target_system: u8,
    pub target_component: u8,
    pub id_or_mac: [u8; 20],
    pub status: u8,
    pub height_reference: u8,
    pub horiz_accuracy: u8,
    pub vert_accuracy: u8,
    pub baro_accuracy: u8,
    pub speed_accuracy: u8,
    pub timestamp_accuracy: u8,
}
msg_meta!(OdidLocationMsg, 12901, 254, 59);

#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct OdidAuthenticationMsg {
    pub timestamp: u32,
    pub target_system: u8,
    pub target_component: u8,
    pub id_or_mac: [u8; 20],
    pub authentication_type: u8,
    pub data_page: u8,
    pub last_page_index: u8,
    pub length: u8,
    pub authentication_data: [u8; 23],
}
msg_meta!(OdidAuthenticationMsg, 12902, 140, 53);

impl Default for OdidAuthenticationMsg {
    fn default() -> Self {
        Self {
            timestamp: 0,
            target_system: 0,
            target_component: 0,
            id_or_mac: [0; 20],
            authentication_type: 0,
            data_page: 0,
            last_page_index: 0,
            length: 0,
            authentication_data: [0; 23],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct OdidSelfIdMsg {
    pub target_system: u8,
    pub target_component: u8,
    pub id_or_mac: [u8; 20],
    pub description_type: u8,
    pub description: [u8; 23],
}
msg_meta!(OdidSelfIdMsg, 12903, 249, 46);

impl Default for OdidSelfIdMsg {
    fn default() -> Self {
        Self {
            target_system: 0,
            target_component: 0,
            id_or_mac: [0; 20],
            description_type: 0,
            description: [0; 23],
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct OdidSystemMsg {
    pub operator_latitude: i32,
    pub operator_longitude: i32,
    pub area_ceiling: f32,
    pub area_floor: f32,
    pub operator_altitude_geo: f32,
    pub timestamp: u32,
    pub area_count: u16,
    pub area_radius: u16,
    pub target_system: u8,
    pub target_component: u8,
    pub id_or_mac: [u8; 20],
    pub operator_location_type: u8,
    pub classification_type: u8,
    pub category_eu: u8,
    pub class_eu: u8,
}
msg_meta!(OdidSystemMsg, 12904, 77, 54);

#[derive(Debug, Default, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct OdidOperatorIdMsg {
    pub target_system: u8,
    pub target_component: u8,
    pub id_or_mac: [u8; 20],
    pub operator_id_type: u8,
    pub operator_id: [u8; 20],
}
msg_meta!(OdidOperatorIdMsg, 12905, 49, 43);

#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct OdidArmStatusMsg {
    pub status: u8,
    pub error: [u8; 50],
}
msg_meta!(OdidArmStatusMsg, 12918, 139, 51);

impl Default for OdidArmStatusMsg {
    fn default() -> Self {
        Self {
            status: 0,
            error: [0; 50],
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct OdidSystemUpdateMsg {
    pub operator_latitude: i32,
    pub operator_longitude: i32,
    pub operator_altitude_geo: f32,
    pub timestamp: u32,
    pub target_system: u8,
    pub target_component: u8,
}
msg_meta!(OdidSystemUpdateMsg, 12919, 7, 18);

#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct SecureCommandMsg {
    pub sequence: u32,
    pub operation: u32,
    pub target_system: u8,
    pub target_component: u8,
    pub data_length: u8,
    pub sig_length: u8,
    pub data: [u8; 220],
}
msg_meta!(SecureCommandMsg, 11004, 11, 232);

impl Default for SecureCommandMsg {
    fn default() -> Self {
        Self {
            sequence: 0,
            operation: 0,
            target_system: 0,
            target_component: 0,
            data_length: 0,
            sig_length: 0,
            data: [0; 220],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct SecureCommandReplyMsg {
    pub sequence: u32,
    pub operation: u32,
    pub result: u8,
    pub data_length: u8,
    pub data: [u8; 220],
}
msg_meta!(SecureCommandReplyMsg, 11005, 93, 230);

impl Default for SecureCommandReplyMsg {
    fn default() -> Self {
        Self {
            sequence: 0,
            operation: 0,
            result: 0,
            data_length: 0,
            data: [0; 220],
        }
    }
}

/// CRC_EXTRA lookup for the parser. Unknown ids cannot be validated and
/// are dropped at the framing layer.
pub fn crc_extra(msgid: u32) -> Option<u8> {
    Some(match msgid {
        Heartbeat::ID => Heartbeat::CRC_EXTRA,
        ParamRequestRead::ID => ParamRequestRead::CRC_EXTRA,
        ParamRequestList::ID => ParamRequestList::CRC_EXTRA,
        ParamValue::ID => ParamValue::CRC_EXTRA,
        ParamSet::ID => ParamSet::CRC_EXTRA,
        Statustext::ID => Statustext::CRC_EXTRA,
        OdidBasicIdMsg::ID => OdidBasicIdMsg::CRC_EXTRA,
        OdidLocationMsg::ID => OdidLocationMsg::CRC_EXTRA,
        OdidAuthenticationMsg::ID => OdidAuthenticationMsg::CRC_EXTRA,
        OdidSelfIdMsg::ID => OdidSelfIdMsg::CRC_EXTRA,
        OdidSystemMsg::ID => OdidSystemMsg::CRC_EXTRA,
        OdidOperatorIdMsg::ID => OdidOperatorIdMsg::CRC_EXTRA,
        OdidArmStatusMsg::ID => OdidArmStatusMsg::CRC_EXTRA,
        OdidSystemUpdateMsg::ID => OdidSystemUpdateMsg::CRC_EXTRA,
        SecureCommandMsg::ID => SecureCommandMsg::CRC_EXTRA,
        SecureCommandReplyMsg::ID => SecureCommandReplyMsg::CRC_EXTRA,
        _ => return None,
    })
}

/// Decode a frame's payload into a typed message, zero-extending the
/// truncated v2 payload first.
pub fn decode_payload<T>(payload: &[u8], wire_len: usize) -> Option<T>
where
    T: for<'a> DekuContainerRead<'a>,
{
    let full = super::frame::zero_extend(payload, wire_len);
    T::from_bytes((&full, 0)).ok().map(|(_, msg)| msg)
}

/// NUL-padded copy into a fixed-size text field (param names, statustext).
pub fn str_to_field<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let n = s.len().min(N);
    out[..n].copy_from_slice(&s.as_bytes()[..n]);
    out
}

/// Text from a NUL-padded field.
pub fn field_to_str(field: &[u8]) -> &str {
    let n = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..n]).unwrap_or("")
}
