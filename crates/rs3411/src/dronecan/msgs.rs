//! DSDL codecs for the transfers the node speaks: the uavcan.protocol
//! plumbing (NodeStatus, GetNodeInfo, RestartNode, param.GetSet, DNA
//! Allocation, debug.LogMessage) and the dronecan.remoteid family.
//!
//! Data type ids and signatures follow the generated headers the
//! reference firmware links against.

use super::codec::{BitReader, BitWriter};

// uavcan.protocol
pub const NODE_STATUS_ID: u16 = 341;
pub const NODE_STATUS_SIGNATURE: u64 = 0x0f0868d0c1a7c6f1;
pub const ALLOCATION_ID: u16 = 1;
pub const ALLOCATION_SIGNATURE: u64 = 0x0b2a812620a11d40;
pub const LOG_MESSAGE_ID: u16 = 16383;
pub const LOG_MESSAGE_SIGNATURE: u64 = 0xd654a48e0c90d449;
pub const GET_NODE_INFO_ID: u8 = 1;
pub const GET_NODE_INFO_SIGNATURE: u64 = 0xee468a8121c46a9e;
pub const RESTART_NODE_ID: u8 = 5;
pub const RESTART_NODE_SIGNATURE: u64 = 0x569e05394a3017f0;
pub const PARAM_GETSET_ID: u8 = 11;
pub const PARAM_GETSET_SIGNATURE: u64 = 0xa7b622f939d1a4d5;

// dronecan.remoteid
pub const BASIC_ID_ID: u16 = 20030;
pub const BASIC_ID_SIGNATURE: u64 = 0x885ef7d9c1ee68b1;
pub const LOCATION_ID: u16 = 20031;
pub const LOCATION_SIGNATURE: u64 = 0xb0413eeae7c4c9ff;
pub const SELF_ID_ID: u16 = 20032;
pub const SELF_ID_SIGNATURE: u64 = 0xa2f482c21dbf1d8f;
pub const SYSTEM_ID: u16 = 20033;
pub const SYSTEM_SIGNATURE: u64 = 0xd32917ce96228bc4;
pub const OPERATOR_ID_ID: u16 = 20034;
pub const OPERATOR_ID_SIGNATURE: u64 = 0x96ab23b686a21c2b;
pub const ARM_STATUS_ID: u16 = 20035;
pub const ARM_STATUS_SIGNATURE: u64 = 0x91d6a01f23a892cd;
pub const SECURE_COMMAND_ID: u8 = 21;
pub const SECURE_COMMAND_SIGNATURE: u64 = 0x183e5e4c2f1d60de;

/// Magic value a RestartNode request must carry.
pub const RESTART_NODE_MAGIC: u64 = 0xACCE_551B_1E;

/// DNA timing constants from the Allocation definition.
pub const ALLOCATION_MIN_REQUEST_PERIOD_MS: u32 = 600;
pub const ALLOCATION_MAX_FOLLOWUP_DELAY_MS: u32 = 400;
pub const ALLOCATION_UNIQUE_ID_LEN: usize = 16;
pub const ALLOCATION_MAX_UID_PER_REQUEST: usize = 6;

fn dyn_bytes(w: &mut BitWriter, bytes: &[u8], len_bits: usize) {
    w.put_bits(bytes.len() as u64, len_bits);
    w.put_bytes(bytes);
}

fn get_dyn_bytes(r: &mut BitReader, len_bits: usize, max: usize) -> Option<Vec<u8>> {
    let len = r.get_bits(len_bits)? as usize;
    if len > max {
        return None;
    }
    r.get_bytes(len)
}

/// uavcan.protocol.NodeStatus
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub uptime_sec: u32,
    pub health: u8,
    pub mode: u8,
    pub sub_mode: u8,
    pub vendor_specific_status_code: u16,
}

pub const NODE_HEALTH_OK: u8 = 0;
pub const NODE_MODE_OPERATIONAL: u8 = 0;

impl NodeStatus {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_u32(self.uptime_sec);
        w.put_bits(u64::from(self.health), 2);
        w.put_bits(u64::from(self.mode), 3);
        w.put_bits(u64::from(self.sub_mode), 3);
        w.put_u16(self.vendor_specific_status_code);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        Some(Self {
            uptime_sec: r.get_u32()?,
            health: r.get_bits(2)? as u8,
            mode: r.get_bits(3)? as u8,
            sub_mode: r.get_bits(3)? as u8,
            vendor_specific_status_code: r.get_u16()?,
        })
    }
}

/// uavcan.protocol.dynamic_node_id.Allocation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub node_id: u8,
    pub first_part_of_unique_id: bool,
    pub unique_id: Vec<u8>,
}

impl Allocation {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_bits(u64::from(self.node_id), 7);
        w.put_bits(u64::from(self.first_part_of_unique_id), 1);
        w.put_bytes(&self.unique_id);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        Some(Self {
            node_id: r.get_bits(7)? as u8,
            first_part_of_unique_id: r.get_bits(1)? != 0,
            unique_id: r.get_tail_bytes(),
        })
    }
}

/// uavcan.protocol.SoftwareVersion
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareVersion {
    pub major: u8,
    pub minor: u8,
    pub optional_field_flags: u8,
    pub vcs_commit: u32,
    pub image_crc: u64,
}

pub const SOFTWARE_VERSION_FLAG_VCS_COMMIT: u8 = 1;
pub const SOFTWARE_VERSION_FLAG_IMAGE_CRC: u8 = 2;

/// uavcan.protocol.HardwareVersion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareVersion {
    pub major: u8,
    pub minor: u8,
    pub unique_id: [u8; 16],
    pub certificate_of_authenticity: Vec<u8>,
}

impl Default for HardwareVersion {
    fn default() -> Self {
        Self {
            major: 0,
            minor: 0,
            unique_id: [0; 16],
            certificate_of_authenticity: Vec::new(),
        }
    }
}

/// uavcan.protocol.GetNodeInfo response (the request is empty).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GetNodeInfoResponse {
    pub status: NodeStatus,
    pub software_version: SoftwareVersion,
    pub hardware_version: HardwareVersion,
    pub name: Vec<u8>,
}

impl GetNodeInfoResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_u32(self.status.uptime_sec);
        w.put_bits(u64::from(self.status.health), 2);
        w.put_bits(u64::from(self.status.mode), 3);
        w.put_bits(u64::from(self.status.sub_mode), 3);
        w.put_u16(self.status.vendor_specific_status_code);
        w.put_u8(self.software_version.major);
        w.put_u8(self.software_version.minor);
        w.put_u8(self.software_version.optional_field_flags);
        w.put_u32(self.software_version.vcs_commit);
        w.put_u64(self.software_version.image_crc);
        w.put_u8(self.hardware_version.major);
        w.put_u8(self.hardware_version.minor);
        w.put_bytes(&self.hardware_version.unique_id);
        dyn_bytes(&mut w, &self.hardware_version.certificate_of_authenticity, 8);
        w.put_bytes(&self.name);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        let status = NodeStatus {
            uptime_sec: r.get_u32()?,
            health: r.get_bits(2)? as u8,
            mode: r.get_bits(3)? as u8,
            sub_mode: r.get_bits(3)? as u8,
            vendor_specific_status_code: r.get_u16()?,
        };
        let software_version = SoftwareVersion {
            major: r.get_u8()?,
            minor: r.get_u8()?,
            optional_field_flags: r.get_u8()?,
            vcs_commit: r.get_u32()?,
            image_crc: r.get_u64()?,
        };
        let mut unique_id = [0u8; 16];
        let major = r.get_u8()?;
        let minor = r.get_u8()?;
        for b in unique_id.iter_mut() {
            *b = r.get_u8()?;
        }
        let certificate = get_dyn_bytes(&mut r, 8, 255)?;
        Some(Self {
            status,
            software_version,
            hardware_version: HardwareVersion {
                major,
                minor,
                unique_id,
                certificate_of_authenticity: certificate,
            },
            name: r.get_tail_bytes(),
        })
    }
}

/// uavcan.protocol.RestartNode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartNodeRequest {
    pub magic_number: u64,
}

impl RestartNodeRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        // uint40
        for b in self.magic_number.to_le_bytes().iter().take(5) {
            w.put_u8(*b);
        }
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        let mut magic = 0u64;
        for i in 0..5 {
            magic |= u64::from(r.get_u8()?) << (8 * i);
        }
        Some(Self {
            magic_number: magic,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartNodeResponse {
    pub ok: bool,
}

impl RestartNodeResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_bits(u64::from(self.ok), 1);
        w.finish()
    }
}

/// uavcan.protocol.debug.LogMessage
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: u8,
    pub source: Vec<u8>,
    pub text: Vec<u8>,
}

pub const LOG_LEVEL_INFO: u8 = 1;

impl LogMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_bits(u64::from(self.level), 3);
        dyn_bytes(&mut w, &self.source, 5);
        w.put_bytes(&self.text);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        Some(Self {
            level: r.get_bits(3)? as u8,
            source: get_dyn_bytes(&mut r, 5, 31)?,
            text: r.get_tail_bytes(),
        })
    }
}

/// uavcan.protocol.param.Value (3-bit union tag).
#[derive(Debug, Default, Clone, PartialEq)]
pub enum ParamUnionValue {
    #[default]
    Empty,
    Integer(i64),
    Real(f32),
    Boolean(u8),
    Str(Vec<u8>),
}

impl ParamUnionValue {
    fn encode(&self, w: &mut BitWriter) {
        match self {
            Self::Empty => w.put_bits(0, 3),
            Self::Integer(v) => {
                w.put_bits(1, 3);
                w.put_i64(*v);
            }
            Self::Real(v) => {
                w.put_bits(2, 3);
                w.put_f32(*v);
            }
            Self::Boolean(v) => {
                w.put_bits(3, 3);
                w.put_u8(*v);
            }
            Self::Str(v) => {
                w.put_bits(4, 3);
                dyn_bytes(w, v, 8);
            }
        }
    }

    fn decode(r: &mut BitReader) -> Option<Self> {
        Some(match r.get_bits(3)? {
            0 => Self::Empty,
            1 => Self::Integer(r.get_i64()?),
            2 => Self::Real(r.get_f32()?),
            3 => Self::Boolean(r.get_u8()?),
            4 => Self::Str(get_dyn_bytes(r, 8, 128)?),
            _ => return None,
        })
    }
}

/// uavcan.protocol.param.NumericValue (2-bit union tag).
#[derive(Debug, Default, Clone, PartialEq)]
pub enum NumericUnionValue {
    #[default]
    Empty,
    Integer(i64),
    Real(f32),
}

impl NumericUnionValue {
    fn encode(&self, w: &mut BitWriter) {
        match self {
            Self::Empty => w.put_bits(0, 2),
            Self::Integer(v) => {
                w.put_bits(1, 2);
                w.put_i64(*v);
            }
            Self::Real(v) => {
                w.put_bits(2, 2);
                w.put_f32(*v);
            }
        }
    }

    fn decode(r: &mut BitReader) -> Option<Self> {
        Some(match r.get_bits(2)? {
            0 => Self::Empty,
            1 => Self::Integer(r.get_i64()?),
            2 => Self::Real(r.get_f32()?),
            _ => return None,
        })
    }
}

/// uavcan.protocol.param.GetSet request.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParamGetSetRequest {
    pub index: u16,
    pub value: ParamUnionValue,
    pub name: Vec<u8>,
}

impl ParamGetSetRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_bits(u64::from(self.index), 13);
        self.value.encode(&mut w);
        w.put_bytes(&self.name);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        Some(Self {
            index: r.get_bits(13)? as u16,
            value: ParamUnionValue::decode(&mut r)?,
            name: r.get_tail_bytes(),
        })
    }
}

/// uavcan.protocol.param.GetSet response.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParamGetSetResponse {
    pub value: ParamUnionValue,
    pub default_value: ParamUnionValue,
    pub max_value: NumericUnionValue,
    pub min_value: NumericUnionValue,
    pub name: Vec<u8>,
}

impl ParamGetSetResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        self.value.encode(&mut w);
        self.default_value.encode(&mut w);
        self.max_value.encode(&mut w);
        self.min_value.encode(&mut w);
        w.put_bytes(&self.name);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        Some(Self {
            value: ParamUnionValue::decode(&mut r)?,
            default_value: ParamUnionValue::decode(&mut r)?,
            max_value: NumericUnionValue::decode(&mut r)?,
            min_value: NumericUnionValue::decode(&mut r)?,
            name: r.get_tail_bytes(),
        })
    }
}

/// dronecan.remoteid.BasicID
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BasicIdMsg {
    pub id_or_mac: Vec<u8>,
    pub id_type: u8,
    pub ua_type: u8,
    pub uas_id: Vec<u8>,
}

impl BasicIdMsg {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        dyn_bytes(&mut w, &self.id_or_mac, 5);
        w.put_u8(self.id_type);
        w.put_u8(self.ua_type);
        w.put_bytes(&self.uas_id);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        Some(Self {
            id_or_mac: get_dyn_bytes(&mut r, 5, 20)?,
            id_type: r.get_u8()?,
            ua_type: r.get_u8()?,
            uas_id: r.get_tail_bytes(),
        })
    }
}

/// dronecan.remoteid.Location
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LocationMsg {
    pub id_or_mac: Vec<u8>,
    pub status: u8,
    pub direction: u16,
    pub speed_horizontal: u16,
    pub speed_vertical: i16,
    pub latitude: i32,
    pub longitude: i32,
    pub altitude_barometric: f32,
    pub altitude_geodetic: f32,
    pub height_reference: u8,
    pub height: f32,
    pub horizontal_accuracy: u8,
    pub vertical_accuracy: u8,
    pub barometer_accuracy: u8,
    pub speed_accuracy: u8,
    pub timestamp: f32,
    pub timestamp_accuracy: u8,
}

impl LocationMsg {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        dyn_bytes(&mut w, &self.id_or_mac, 5);
        w.put_u8(self.status);
        w.put_u16(self.direction);
        w.put_u16(self.speed_horizontal);
        w.put_i16(self.speed_vertical);
        w.put_i32(self.latitude);
        w.put_i32(self.longitude);
        w.put_f32(self.altitude_barometric);
        w.put_f32(self.altitude_geodetic);
        w.put_u8(self.height_reference);
        w.put_f32(self.height);
        w.put_u8(self.horizontal_accuracy);
        w.put_u8(self.vertical_accuracy);
        w.put_u8(self.barometer_accuracy);
        w.put_u8(self.speed_accuracy);
        w.put_f32(self.timestamp);
        w.put_u8(self.timestamp_accuracy);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        Some(Self {
            id_or_mac: get_dyn_bytes(&mut r, 5, 20)?,
            status: r.get_u8()?,
            direction: r.get_u16()?,
            speed_horizontal: r.get_u16()?,
            speed_vertical: r.get_i16()?,
            latitude: r.get_i32()?,
            longitude: r.get_i32()?,
            altitude_barometric: r.get_f32()?,
            altitude_geodetic: r.get_f32()?,
            height_reference: r.get_u8()?,
            height: r.get_f32()?,
            horizontal_accuracy: r.get_u8()?,
            vertical_accuracy: r.get_u8()?,
            barometer_accuracy: r.get_u8()?,
            speed_accuracy: r.get_u8()?,
            timestamp: r.get_f32()?,
            timestamp_accuracy: r.get_u8()?,
        })
    }
}

/// dronecan.remoteid.SelfID
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SelfIdMsg {
    pub id_or_mac: Vec<u8>,
    pub description_type: u8,
    pub description: Vec<u8>,
}

impl SelfIdMsg {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        dyn_bytes(&mut w, &self.id_or_mac, 5);
        w.put_u8(self.description_type);
        w.put_bytes(&self.description);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        Some(Self {
            id_or_mac: get_dyn_bytes(&mut r, 5, 20)?,
            description_type: r.get_u8()?,
            description: r.get_tail_bytes(),
        })
    }
}

/// dronecan.remoteid.System
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SystemMsg {
    pub id_or_mac: Vec<u8>,
    pub operator_location_type: u8,
    pub classification_type: u8,
    pub operator_latitude: i32,
    pub operator_longitude: i32,
    pub area_count: u16,
    pub area_radius: u16,
    pub area_ceiling: f32,
    pub area_floor: f32,
    pub category_eu: u8,
    pub class_eu: u8,
    pub operator_altitude_geo: f32,
    pub timestamp: u32,
}

impl SystemMsg {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        dyn_bytes(&mut w, &self.id_or_mac, 5);
        w.put_u8(self.operator_location_type);
        w.put_u8(self.classification_type);
        w.put_i32(self.operator_latitude);
        w.put_i32(self.operator_longitude);
        w.put_u16(self.area_count);
        w.put_u16(self.area_radius);
        w.put_f32(self.area_ceiling);
        w.put_f32(self.area_floor);
        w.put_u8(self.category_eu);
        w.put_u8(self.class_eu);
        w.put_f32(self.operator_altitude_geo);
        w.put_u32(self.timestamp);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        Some(Self {
            id_or_mac: get_dyn_bytes(&mut r, 5, 20)?,
            operator_location_type: r.get_u8()?,
            classification_type: r.get_u8()?,
            operator_latitude: r.get_i32()?,
            operator_longitude: r.get_i32()?,
            area_count: r.get_u16()?,
            area_radius: r.get_u16()?,
            area_ceiling: r.get_f32()?,
            area_floor: r.get_f32()?,
            category_eu: r.get_u8()?,
            class_eu: r.get_u8()?,
            operator_altitude_geo: r.get_f32()?,
            timestamp: r.get_u32()?,
        })
    }
}

/// dronecan.remoteid.OperatorID
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperatorIdMsg {
    pub id_or_mac: Vec<u8>,
    pub operator_id_type: u8,
    pub operator_id: Vec<u8>,
}

impl OperatorIdMsg {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        dyn_bytes(&mut w, &self.id_or_mac, 5);
        w.put_u8(self.operator_id_type);
        w.put_bytes(&self.operator_id);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        Some(Self {
            id_or_mac: get_dyn_bytes(&mut r, 5, 20)?,
            operator_id_type: r.get_u8()?,
            operator_id: r.get_tail_bytes(),
        })
    }
}

/// dronecan.remoteid.ArmStatus
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArmStatusMsg {
    pub status: u8,
    pub error: Vec<u8>,
}

impl ArmStatusMsg {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_u8(self.status);
        w.put_bytes(&self.error);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        Some(Self {
            status: r.get_u8()?,
            error: r.get_tail_bytes(),
        })
    }
}

/// dronecan.remoteid.SecureCommand request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SecureCommandRequest {
    pub sequence: u32,
    pub operation: u32,
    pub sig_length: u8,
    /// Payload followed by `sig_length` signature bytes.
    pub data: Vec<u8>,
}

impl SecureCommandRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_u32(self.sequence);
        w.put_u32(self.operation);
        w.put_u8(self.sig_length);
        w.put_bytes(&self.data);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        Some(Self {
            sequence: r.get_u32()?,
            operation: r.get_u32()?,
            sig_length: r.get_u8()?,
            data: r.get_tail_bytes(),
        })
    }
}

/// dronecan.remoteid.SecureCommand response.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SecureCommandResponse {
    pub sequence: u32,
    pub operation: u32,
    pub result: u8,
    pub data: Vec<u8>,
}

impl SecureCommandResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_u32(self.sequence);
        w.put_u32(self.operation);
        w.put_u8(self.result);
        w.put_bytes(&self.data);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(data);
        Some(Self {
            sequence: r.get_u32()?,
            operation: r.get_u32()?,
            result: r.get_u8()?,
            data: r.get_tail_bytes(),
        })
    }
}
