use serde::Serialize;
use std::fmt;

/// Fixed field widths from ASTM F3411: 20-byte identifiers, 23-byte text.
pub const ODID_ID_SIZE: usize = 20;
pub const ODID_STR_SIZE: usize = 23;

/// Kind of identifier carried in a [`BasicId`] group.
///
/// Encoding:
///   - 0 = None
///   - 1 = Serial number (CTA-2063-A)
///   - 2 = CAA registration id
///   - 3 = UTM-assigned UUID
///   - 4 = Specific session id
#[derive(Debug, Default, PartialEq, Eq, Serialize, Copy, Clone)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    #[default]
    None = 0,
    SerialNumber = 1,
    CaaRegistrationId = 2,
    UtmAssignedUuid = 3,
    SpecificSessionId = 4,
}

impl TryFrom<u8> for IdType {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::SerialNumber),
            2 => Ok(Self::CaaRegistrationId),
            3 => Ok(Self::UtmAssignedUuid),
            4 => Ok(Self::SpecificSessionId),
            other => Err(other),
        }
    }
}

/// Airframe category of the unmanned aircraft.
#[derive(Debug, Default, PartialEq, Eq, Serialize, Copy, Clone)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum UaType {
    #[default]
    None = 0,
    Aeroplane = 1,
    HelicopterOrMultirotor = 2,
    Gyroplane = 3,
    HybridLift = 4,
    Ornithopter = 5,
    Glider = 6,
    Kite = 7,
    FreeBalloon = 8,
    CaptiveBalloon = 9,
    Airship = 10,
    FreeFallParachute = 11,
    Rocket = 12,
    TetheredPoweredAircraft = 13,
    GroundObstacle = 14,
    Other = 15,
}

impl TryFrom<u8> for UaType {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::Aeroplane),
            2 => Ok(Self::HelicopterOrMultirotor),
            3 => Ok(Self::Gyroplane),
            4 => Ok(Self::HybridLift),
            5 => Ok(Self::Ornithopter),
            6 => Ok(Self::Glider),
            7 => Ok(Self::Kite),
            8 => Ok(Self::FreeBalloon),
            9 => Ok(Self::CaptiveBalloon),
            10 => Ok(Self::Airship),
            11 => Ok(Self::FreeFallParachute),
            12 => Ok(Self::Rocket),
            13 => Ok(Self::TetheredPoweredAircraft),
            14 => Ok(Self::GroundObstacle),
            15 => Ok(Self::Other),
            other => Err(other),
        }
    }
}

/// Operational status broadcast in the Location group.
#[derive(Debug, Default, PartialEq, Eq, Serialize, Copy, Clone)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum OperationalStatus {
    #[default]
    Undeclared = 0,
    Ground = 1,
    Airborne = 2,
    Emergency = 3,
    RemoteIdSystemFailure = 4,
}

impl TryFrom<u8> for OperationalStatus {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(Self::Undeclared),
            1 => Ok(Self::Ground),
            2 => Ok(Self::Airborne),
            3 => Ok(Self::Emergency),
            4 => Ok(Self::RemoteIdSystemFailure),
            other => Err(other),
        }
    }
}

impl fmt::Display for OperationalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undeclared => "undeclared",
            Self::Ground => "ground",
            Self::Airborne => "airborne",
            Self::Emergency => "emergency",
            Self::RemoteIdSystemFailure => "remote id system failure",
        };
        write!(f, "{s}")
    }
}

/// Vehicle identity group. Two instances are kept to support dual-id
/// operation (e.g. serial number + session id).
#[derive(Debug, Default, PartialEq, Eq, Serialize, Copy, Clone)]
pub struct BasicId {
    pub id_or_mac: [u8; ODID_ID_SIZE],
    pub id_type: IdType,
    pub ua_type: UaType,
    pub uas_id: [u8; ODID_ID_SIZE],
}

impl BasicId {
    /// A basic id is usable once it carries a non-empty uas id of a
    /// declared type.
    pub fn is_well_formed(&self) -> bool {
        self.id_type != IdType::None && self.uas_id[0] != 0
    }

    /// uas_id as text, stopping at the first NUL.
    pub fn uas_id_str(&self) -> &str {
        str_field(&self.uas_id)
    }
}

/// Vehicle position/velocity group.
///
/// Units are kept as they arrive on the wire: latitude/longitude in 1e-7
/// degrees, direction in centidegrees, speeds in cm/s, altitudes and height
/// in metres, timestamp in seconds since the top of the hour. Accuracy
/// fields are the ASTM enum tiers, passed through uninterpreted.
#[derive(Debug, Default, PartialEq, Serialize, Copy, Clone)]
pub struct Location {
    pub status: OperationalStatus,
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

/// Free-text description group.
#[derive(Debug, PartialEq, Eq, Serialize, Copy, Clone)]
pub struct SelfId {
    pub description_type: u8,
    pub description: [u8; ODID_STR_SIZE],
}

impl Default for SelfId {
    fn default() -> Self {
        Self {
            description_type: 0,
            description: [0u8; ODID_STR_SIZE],
        }
    }
}

impl SelfId {
    pub fn description_str(&self) -> &str {
        str_field(&self.description)
    }
}

/// Operator location and operating-area group. `timestamp` is Unix seconds.
#[derive(Debug, Default, PartialEq, Serialize, Copy, Clone)]
pub struct System {
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

/// Operator registration group.
#[derive(Debug, Default, PartialEq, Eq, Serialize, Copy, Clone)]
pub struct OperatorId {
    pub operator_id_type: u8,
    pub operator_id: [u8; ODID_ID_SIZE],
}

impl OperatorId {
    pub fn operator_id_str(&self) -> &str {
        str_field(&self.operator_id)
    }
}

/// Authentication page as received; contents are opaque to the core.
#[derive(Debug, PartialEq, Eq, Serialize, Copy, Clone)]
pub struct Authentication {
    pub authentication_type: u8,
    pub data_page: u8,
    pub last_page_index: u8,
    pub length: u8,
    pub timestamp: u32,
    pub authentication_data: [u8; ODID_STR_SIZE],
}

impl Default for Authentication {
    fn default() -> Self {
        Self {
            authentication_type: 0,
            data_page: 0,
            last_page_index: 0,
            length: 0,
            timestamp: 0,
            authentication_data: [0u8; ODID_STR_SIZE],
        }
    }
}

/// One ODID group with its validity flag and freshness stamp.
///
/// `last_update_ms` is non-decreasing within a session: the store only ever
/// writes the current loop time into it.
#[derive(Debug, Default, PartialEq, Serialize, Copy, Clone)]
pub struct Slot<T> {
    pub value: T,
    pub valid: bool,
    pub last_update_ms: u32,
}

impl<T> Slot<T> {
    /// Fresh means: written at least once, and no older than `max_age_ms`.
    pub fn is_fresh(&self, now_ms: u32, max_age_ms: u32) -> bool {
        self.valid
            && self.last_update_ms != 0
            && now_ms.wrapping_sub(self.last_update_ms) <= max_age_ms
    }
}

/// The authoritative in-memory record: last-seen value of every ODID group,
/// whichever transport delivered it. There is exactly one of these per
/// process; transmit backends receive copies.
#[derive(Debug, Default, PartialEq, Serialize, Copy, Clone)]
pub struct OdidRecord {
    pub basic_id: [Slot<BasicId>; 2],
    pub location: Slot<Location>,
    pub self_id: Slot<SelfId>,
    pub system: Slot<System>,
    pub operator_id: Slot<OperatorId>,
    pub authentication: Slot<Authentication>,
}

impl OdidRecord {
    /// Dual-id operation: both basic id slots carry usable data.
    pub fn dual_basic_id(&self) -> bool {
        self.basic_id[1].valid
    }
}

/// Copy a str/byte source into a fixed-size NUL-padded field, truncating.
pub fn copy_str_field<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let n = src.iter().position(|&b| b == 0).unwrap_or(src.len()).min(N);
    out[..n].copy_from_slice(&src[..n]);
    out
}

fn str_field(field: &[u8]) -> &str {
    let n = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..n]).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_id_well_formed() {
        let mut b = BasicId {
            uas_id: copy_str_field(b"ABC123"),
            id_type: IdType::SerialNumber,
            ..Default::default()
        };
        assert!(b.is_well_formed());
        assert_eq!(b.uas_id_str(), "ABC123");

        b.id_type = IdType::None;
        assert!(!b.is_well_formed());

        b.id_type = IdType::SerialNumber;
        b.uas_id = [0u8; ODID_ID_SIZE];
        assert!(!b.is_well_formed());
    }

    #[test]
    fn str_field_truncates() {
        let f: [u8; 4] = copy_str_field(b"ABCDEFG");
        assert_eq!(&f, b"ABCD");
        let f: [u8; 8] = copy_str_field(b"AB\0CD");
        assert_eq!(&f, b"AB\0\0\0\0\0\0");
    }

    #[test]
    fn slot_freshness() {
        let mut slot = Slot::<Location>::default();
        assert!(!slot.is_fresh(0, 3000));
        slot.valid = true;
        slot.last_update_ms = 1000;
        assert!(slot.is_fresh(3500, 3000));
        assert!(!slot.is_fresh(4001, 3000));
    }

    #[test]
    fn record_serialises_for_status_dumps() {
        let mut record = OdidRecord::default();
        record.location.valid = true;
        record.location.value.status = OperationalStatus::Airborne;
        record.location.value.latitude = 470_000_000;
        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json["location"]["value"]["status"], "airborne");
        assert_eq!(json["location"]["value"]["latitude"], 470_000_000);
        assert_eq!(json["basic_id"][0]["valid"], false);
    }
}
