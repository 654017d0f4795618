//! Typed parameter table with key-value persistence.
//!
//! The descriptor table is static and its order is stable across boots:
//! MAVLink and DroneCAN both address parameters by index, so entries are
//! only ever appended. Values live in a [`Parameters`] struct; the
//! descriptors name a [`Field`] of it rather than holding pointers.

pub mod keys;

use std::fmt;

use tracing::{debug, warn};

pub use keys::{MAX_PUBLIC_KEYS, PUBLIC_KEY_LEN, PUBLIC_KEY_PREFIX};

pub const PARAM_NAME_MAX_LEN: usize = 16;

pub const PARAM_FLAG_NONE: u16 = 0;
pub const PARAM_FLAG_PASSWORD: u16 = 1 << 0;
pub const PARAM_FLAG_HIDDEN: u16 = 1 << 1;

/// Bits of the OPTIONS parameter.
pub const OPTIONS_FORCE_ARM_OK: u8 = 1 << 0;
pub const OPTIONS_DONT_SAVE_BASIC_ID: u8 = 1 << 1;
pub const OPTIONS_LOG_RID_INBOUND: u8 = 1 << 2;

/// Literal returned when reading a PASSWORD-flagged string.
pub const PASSWORD_MASK: &str = "********";

/// Persistence collaborator: one blob per parameter name. Implementations
/// may block briefly on `save`; the store treats them as synchronous.
pub trait KvStore {
    fn load(&mut self, name: &str) -> Option<Vec<u8>>;
    fn save(&mut self, name: &str, data: &[u8]);
    fn erase(&mut self, name: &str);
}

/// In-memory store, for tests and host-side runs.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: std::collections::HashMap<String, Vec<u8>>,
}

impl KvStore for MemoryKv {
    fn load(&mut self, name: &str) -> Option<Vec<u8>> {
        self.entries.get(name).cloned()
    }

    fn save(&mut self, name: &str, data: &[u8]) {
        self.entries.insert(name.to_string(), data.to_vec());
    }

    fn erase(&mut self, name: &str) {
        self.entries.remove(name);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    U8,
    I8,
    U32,
    F32,
    Char20,
    Char64,
}

impl ParamType {
    /// Types exposed through the MAVLink float view.
    pub fn float_viewable(self) -> bool {
        matches!(self, Self::U8 | Self::I8 | Self::U32 | Self::F32)
    }
}

/// Which field of [`Parameters`] a descriptor reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    LockLevel,
    CanNode,
    BcastPowerup,
    Baudrate,
    UaType,
    IdType,
    UasId,
    UaType2,
    IdType2,
    UasId2,
    Bt4Rate,
    Bt4Power,
    Bt5Rate,
    Bt5Power,
    WifiNanRate,
    WifiBeaconRate,
    WifiPower,
    WifiChannel,
    MavlinkSysid,
    Options,
    DoneInit,
    PublicKey(u8),
}

/// Current parameter values. Char fields keep one byte of spare for a
/// terminating NUL so they can always be viewed as C-compatible strings.
#[derive(Debug, Clone)]
pub struct Parameters {
    pub lock_level: i8,
    pub can_node: u8,
    pub bcast_powerup: u8,
    pub baudrate: u32,
    pub ua_type: u8,
    pub id_type: u8,
    pub uas_id: [u8; 21],
    pub ua_type_2: u8,
    pub id_type_2: u8,
    pub uas_id_2: [u8; 21],
    pub bt4_rate: f32,
    pub bt4_power: f32,
    pub bt5_rate: f32,
    pub bt5_power: f32,
    pub wifi_nan_rate: f32,
    pub wifi_beacon_rate: f32,
    pub wifi_power: f32,
    pub wifi_channel: u8,
    pub mavlink_sysid: u8,
    pub options: u8,
    pub done_init: u8,
    pub public_keys: [[u8; 65]; MAX_PUBLIC_KEYS],
}

impl Default for Parameters {
    fn default() -> Self {
        let mut p = Self {
            lock_level: 0,
            can_node: 0,
            bcast_powerup: 1,
            baudrate: 57600,
            ua_type: 0,
            id_type: 0,
            uas_id: [0; 21],
            ua_type_2: 0,
            id_type_2: 0,
            uas_id_2: [0; 21],
            bt4_rate: 1.0,
            bt4_power: 18.0,
            bt5_rate: 1.0,
            bt5_power: 18.0,
            wifi_nan_rate: 1.0,
            wifi_beacon_rate: 1.0,
            wifi_power: 20.0,
            wifi_channel: 6,
            mavlink_sysid: 0,
            options: 0,
            done_init: 0,
            public_keys: [[0; 65]; MAX_PUBLIC_KEYS],
        };
        for desc in PARAM_TABLE {
            if !desc.default_str.is_empty() {
                p.set_str(desc.field, desc.default_str);
            }
        }
        p
    }
}

/// Typed view of a single value, used by the get/set plumbing and by the
/// DroneCAN param.GetSet service.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    U8(u8),
    I8(i8),
    U32(u32),
    F32(f32),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParamDesc {
    pub name: &'static str,
    pub ptype: ParamType,
    pub field: Field,
    pub default_value: f32,
    pub min_value: f32,
    pub max_value: f32,
    pub flags: u16,
    pub min_len: u8,
    pub default_str: &'static str,
}

macro_rules! param {
    ($name:literal, $ptype:ident, $field:expr, $default:expr, $min:expr, $max:expr) => {
        param!($name, $ptype, $field, $default, $min, $max, PARAM_FLAG_NONE, 0, "")
    };
    ($name:literal, $ptype:ident, $field:expr, $default:expr, $min:expr, $max:expr, $flags:expr) => {
        param!($name, $ptype, $field, $default, $min, $max, $flags, 0, "")
    };
    ($name:literal, $ptype:ident, $field:expr, $default:expr, $min:expr, $max:expr, $flags:expr, $min_len:expr, $default_str:expr) => {
        ParamDesc {
            name: $name,
            ptype: ParamType::$ptype,
            field: $field,
            default_value: $default,
            min_value: $min,
            max_value: $max,
            flags: $flags,
            min_len: $min_len,
            default_str: $default_str,
        }
    };
}

/// The parameter table. Append only: index order is part of the external
/// interface.
pub static PARAM_TABLE: &[ParamDesc] = &[
    param!("LOCK_LEVEL", I8, Field::LockLevel, 0.0, -1.0, 2.0),
    param!("CAN_NODE", U8, Field::CanNode, 0.0, 0.0, 127.0),
    param!("BCAST_POWERUP", U8, Field::BcastPowerup, 1.0, 0.0, 1.0),
    param!("BAUDRATE", U32, Field::Baudrate, 57600.0, 9600.0, 921600.0),
    param!("UA_TYPE", U8, Field::UaType, 0.0, 0.0, 15.0),
    param!("ID_TYPE", U8, Field::IdType, 0.0, 0.0, 4.0),
    param!("UAS_ID", Char20, Field::UasId, 0.0, 0.0, 0.0, PARAM_FLAG_NONE, 0, ""),
    param!("UA_TYPE_2", U8, Field::UaType2, 0.0, 0.0, 15.0),
    param!("ID_TYPE_2", U8, Field::IdType2, 0.0, 0.0, 4.0),
    param!("UAS_ID_2", Char20, Field::UasId2, 0.0, 0.0, 0.0, PARAM_FLAG_NONE, 0, ""),
    param!("BT4_RATE", F32, Field::Bt4Rate, 1.0, 0.0, 5.0),
    param!("BT4_POWER", F32, Field::Bt4Power, 18.0, -27.0, 18.0),
    param!("BT5_RATE", F32, Field::Bt5Rate, 1.0, 0.0, 5.0),
    param!("BT5_POWER", F32, Field::Bt5Power, 18.0, -27.0, 18.0),
    param!("WIFI_NAN_RATE", F32, Field::WifiNanRate, 1.0, 0.0, 5.0),
    param!("WIFI_BEACON_RATE", F32, Field::WifiBeaconRate, 1.0, 0.0, 5.0),
    param!("WIFI_POWER", F32, Field::WifiPower, 20.0, 2.0, 20.0),
    param!("WIFI_CHANNEL", U8, Field::WifiChannel, 6.0, 1.0, 13.0),
    param!("MAVLINK_SYSID", U8, Field::MavlinkSysid, 0.0, 0.0, 255.0),
    param!("OPTIONS", U8, Field::Options, 0.0, 0.0, 255.0),
    param!("DONE_INIT", U8, Field::DoneInit, 0.0, 0.0, 1.0, PARAM_FLAG_HIDDEN),
    param!("PUBLIC_KEY1", Char64, Field::PublicKey(0), 0.0, 0.0, 0.0, PARAM_FLAG_HIDDEN | PARAM_FLAG_PASSWORD, 0, ""),
    param!("PUBLIC_KEY2", Char64, Field::PublicKey(1), 0.0, 0.0, 0.0, PARAM_FLAG_HIDDEN | PARAM_FLAG_PASSWORD, 0, ""),
    param!("PUBLIC_KEY3", Char64, Field::PublicKey(2), 0.0, 0.0, 0.0, PARAM_FLAG_HIDDEN | PARAM_FLAG_PASSWORD, 0, ""),
    param!("PUBLIC_KEY4", Char64, Field::PublicKey(3), 0.0, 0.0, 0.0, PARAM_FLAG_HIDDEN | PARAM_FLAG_PASSWORD, 0, ""),
    param!("PUBLIC_KEY5", Char64, Field::PublicKey(4), 0.0, 0.0, 0.0, PARAM_FLAG_HIDDEN | PARAM_FLAG_PASSWORD, 0, ""),
];

/// Find a descriptor by name.
pub fn find(name: &str) -> Option<&'static ParamDesc> {
    PARAM_TABLE.iter().find(|p| p.name == name)
}

/// Find a descriptor by table index.
pub fn find_by_index(index: u16) -> Option<&'static ParamDesc> {
    PARAM_TABLE.get(usize::from(index))
}

/// Find the n-th entry of the float view (numeric, not hidden).
pub fn find_by_index_float(index: u16) -> Option<&'static ParamDesc> {
    PARAM_TABLE
        .iter()
        .filter(|p| p.ptype.float_viewable() && p.flags & PARAM_FLAG_HIDDEN == 0)
        .nth(usize::from(index))
}

/// Number of entries in the float view.
pub fn param_count_float() -> u16 {
    PARAM_TABLE
        .iter()
        .filter(|p| p.ptype.float_viewable() && p.flags & PARAM_FLAG_HIDDEN == 0)
        .count() as u16
}

/// Index of a descriptor within the float view, or -1 if not viewable.
pub fn param_index_float(desc: &ParamDesc) -> i16 {
    let mut idx = 0i16;
    for p in PARAM_TABLE {
        if !(p.ptype.float_viewable() && p.flags & PARAM_FLAG_HIDDEN == 0) {
            continue;
        }
        if std::ptr::eq(p, desc) || p.name == desc.name {
            return idx;
        }
        idx += 1;
    }
    -1
}

impl Parameters {
    fn char_field(&self, field: Field) -> &[u8] {
        match field {
            Field::UasId => &self.uas_id,
            Field::UasId2 => &self.uas_id_2,
            Field::PublicKey(i) => &self.public_keys[usize::from(i)],
            _ => unreachable!("not a char field"),
        }
    }

    fn char_field_mut(&mut self, field: Field) -> &mut [u8] {
        match field {
            Field::UasId => &mut self.uas_id,
            Field::UasId2 => &mut self.uas_id_2,
            Field::PublicKey(i) => &mut self.public_keys[usize::from(i)],
            _ => unreachable!("not a char field"),
        }
    }

    /// Raw read of a field, ignoring the PASSWORD flag.
    pub fn get(&self, field: Field) -> ParamValue {
        match field {
            Field::LockLevel => ParamValue::I8(self.lock_level),
            Field::CanNode => ParamValue::U8(self.can_node),
            Field::BcastPowerup => ParamValue::U8(self.bcast_powerup),
            Field::Baudrate => ParamValue::U32(self.baudrate),
            Field::UaType => ParamValue::U8(self.ua_type),
            Field::IdType => ParamValue::U8(self.id_type),
            Field::UaType2 => ParamValue::U8(self.ua_type_2),
            Field::IdType2 => ParamValue::U8(self.id_type_2),
            Field::Bt4Rate => ParamValue::F32(self.bt4_rate),
            Field::Bt4Power => ParamValue::F32(self.bt4_power),
            Field::Bt5Rate => ParamValue::F32(self.bt5_rate),
            Field::Bt5Power => ParamValue::F32(self.bt5_power),
            Field::WifiNanRate => ParamValue::F32(self.wifi_nan_rate),
            Field::WifiBeaconRate => ParamValue::F32(self.wifi_beacon_rate),
            Field::WifiPower => ParamValue::F32(self.wifi_power),
            Field::WifiChannel => ParamValue::U8(self.wifi_channel),
            Field::MavlinkSysid => ParamValue::U8(self.mavlink_sysid),
            Field::Options => ParamValue::U8(self.options),
            Field::DoneInit => ParamValue::U8(self.done_init),
            Field::UasId | Field::UasId2 | Field::PublicKey(_) => {
                ParamValue::Str(bytes_to_str(self.char_field(field)).to_string())
            }
        }
    }

    fn set_str(&mut self, field: Field, value: &str) {
        let buf = self.char_field_mut(field);
        buf.fill(0);
        let cap = buf.len() - 1;
        let n = value.len().min(cap);
        buf[..n].copy_from_slice(&value.as_bytes()[..n]);
    }

    fn set_numeric(&mut self, field: Field, value: ParamValue) {
        match (field, value) {
            (Field::LockLevel, ParamValue::I8(v)) => self.lock_level = v,
            (Field::CanNode, ParamValue::U8(v)) => self.can_node = v,
            (Field::BcastPowerup, ParamValue::U8(v)) => self.bcast_powerup = v,
            (Field::Baudrate, ParamValue::U32(v)) => self.baudrate = v,
            (Field::UaType, ParamValue::U8(v)) => self.ua_type = v,
            (Field::IdType, ParamValue::U8(v)) => self.id_type = v,
            (Field::UaType2, ParamValue::U8(v)) => self.ua_type_2 = v,
            (Field::IdType2, ParamValue::U8(v)) => self.id_type_2 = v,
            (Field::Bt4Rate, ParamValue::F32(v)) => self.bt4_rate = v,
            (Field::Bt4Power, ParamValue::F32(v)) => self.bt4_power = v,
            (Field::Bt5Rate, ParamValue::F32(v)) => self.bt5_rate = v,
            (Field::Bt5Power, ParamValue::F32(v)) => self.bt5_power = v,
            (Field::WifiNanRate, ParamValue::F32(v)) => self.wifi_nan_rate = v,
            (Field::WifiBeaconRate, ParamValue::F32(v)) => {
                self.wifi_beacon_rate = v
            }
            (Field::WifiPower, ParamValue::F32(v)) => self.wifi_power = v,
            (Field::WifiChannel, ParamValue::U8(v)) => self.wifi_channel = v,
            (Field::MavlinkSysid, ParamValue::U8(v)) => self.mavlink_sysid = v,
            (Field::Options, ParamValue::U8(v)) => self.options = v,
            (Field::DoneInit, ParamValue::U8(v)) => self.done_init = v,
            _ => {}
        }
    }

    /// Basic id supplied via parameters (used by the arming gate when no
    /// transport has streamed one).
    pub fn have_basic_id_info(&self) -> bool {
        self.uas_id[0] != 0 && self.id_type > 0
    }

    pub fn have_basic_id_2_info(&self) -> bool {
        self.uas_id_2[0] != 0 && self.id_type_2 > 0
    }

    pub fn option_set(&self, bit: u8) -> bool {
        self.options & bit != 0
    }
}

fn bytes_to_str(buf: &[u8]) -> &str {
    let n = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..n]).unwrap_or("")
}

/// Parameter values bound to their persistence backend.
pub struct ParamStore<K: KvStore> {
    values: Parameters,
    kv: K,
}

impl<K: KvStore> ParamStore<K> {
    /// Load defaults, then overlay whatever the key-value store has.
    pub fn load(mut kv: K) -> Self {
        let mut values = Parameters::default();
        for desc in PARAM_TABLE {
            let Some(raw) = kv.load(desc.name) else {
                continue;
            };
            match decode_raw(desc, &raw) {
                Some(v) => values.apply(desc, v),
                None => warn!(name = desc.name, "discarding corrupt stored parameter"),
            }
        }
        Self { values, kv }
    }

    pub fn values(&self) -> &Parameters {
        &self.values
    }

    pub fn kv_mut(&mut self) -> &mut K {
        &mut self.kv
    }

    /// Read with PASSWORD masking applied.
    pub fn get(&self, desc: &ParamDesc) -> ParamValue {
        if desc.flags & PARAM_FLAG_PASSWORD != 0 {
            return ParamValue::Str(PASSWORD_MASK.to_string());
        }
        self.values.get(desc.field)
    }

    /// Float view read; `None` for hidden or non-numeric entries.
    pub fn get_as_float(&self, desc: &ParamDesc) -> Option<f32> {
        if !desc.ptype.float_viewable() || desc.flags & PARAM_FLAG_HIDDEN != 0 {
            return None;
        }
        Some(match self.values.get(desc.field) {
            ParamValue::U8(v) => f32::from(v),
            ParamValue::I8(v) => f32::from(v),
            ParamValue::U32(v) => v as f32,
            ParamValue::F32(v) => v,
            ParamValue::Str(_) => return None,
        })
    }

    /// Range-checked set through the float view. Out-of-range or
    /// wrong-typed writes are a no-op; the caller sees the unchanged value
    /// on read-back.
    pub fn set_as_float(&mut self, desc: &ParamDesc, value: f32) -> bool {
        if !desc.ptype.float_viewable() {
            return false;
        }
        if value < desc.min_value || value > desc.max_value {
            debug!(name = desc.name, value, "rejecting out-of-range parameter");
            return false;
        }
        let typed = match desc.ptype {
            ParamType::U8 => ParamValue::U8(value as u8),
            ParamType::I8 => ParamValue::I8(value as i8),
            ParamType::U32 => ParamValue::U32(value as u32),
            ParamType::F32 => ParamValue::F32(value),
            _ => return false,
        };
        self.set(desc, typed)
    }

    /// Typed set: updates RAM and persists through the key-value store.
    pub fn set(&mut self, desc: &ParamDesc, value: ParamValue) -> bool {
        match (&value, desc.ptype) {
            (ParamValue::Str(s), ParamType::Char20 | ParamType::Char64) => {
                if usize::from(desc.min_len) > 0 && s.len() < usize::from(desc.min_len) {
                    return false;
                }
                let mut cap = self.values.char_field(desc.field).len() - 1;
                let s = if s.len() > cap {
                    while !s.is_char_boundary(cap) {
                        cap -= 1;
                    }
                    &s[..cap]
                } else {
                    s.as_str()
                };
                self.values.set_str(desc.field, s);
                self.kv.save(desc.name, s.as_bytes());
                true
            }
            (_, ParamType::Char20 | ParamType::Char64) => false,
            _ => {
                self.values.set_numeric(desc.field, value.clone());
                self.kv.save(desc.name, &encode_raw(&value));
                true
            }
        }
    }

    /// Parse `value` according to the named parameter's type and set it.
    /// Used by the signed SET_REMOTEID_CONFIG command.
    pub fn set_by_name_string(&mut self, name: &str, value: &str) -> bool {
        let Some(desc) = find(name) else {
            return false;
        };
        match desc.ptype {
            ParamType::U8 => match value.parse::<u8>() {
                Ok(v) if range_ok(desc, f32::from(v)) => {
                    self.set(desc, ParamValue::U8(v))
                }
                _ => false,
            },
            ParamType::I8 => match value.parse::<i8>() {
                Ok(v) if range_ok(desc, f32::from(v)) => {
                    self.set(desc, ParamValue::I8(v))
                }
                _ => false,
            },
            ParamType::U32 => match value.parse::<u32>() {
                Ok(v) if range_ok(desc, v as f32) => {
                    self.set(desc, ParamValue::U32(v))
                }
                _ => false,
            },
            ParamType::F32 => match value.parse::<f32>() {
                Ok(v) if range_ok(desc, v) => self.set(desc, ParamValue::F32(v)),
                _ => false,
            },
            ParamType::Char20 | ParamType::Char64 => {
                self.set(desc, ParamValue::Str(value.to_string()))
            }
        }
    }
}

fn range_ok(desc: &ParamDesc, v: f32) -> bool {
    v >= desc.min_value && v <= desc.max_value
}

impl Parameters {
    fn apply(&mut self, desc: &ParamDesc, value: ParamValue) {
        match desc.ptype {
            ParamType::Char20 | ParamType::Char64 => {
                if let ParamValue::Str(s) = value {
                    self.set_str(desc.field, &s);
                }
            }
            _ => self.set_numeric(desc.field, value),
        }
    }
}

fn encode_raw(value: &ParamValue) -> Vec<u8> {
    match value {
        ParamValue::U8(v) => vec![*v],
        ParamValue::I8(v) => vec![*v as u8],
        ParamValue::U32(v) => v.to_le_bytes().to_vec(),
        ParamValue::F32(v) => v.to_le_bytes().to_vec(),
        ParamValue::Str(s) => s.as_bytes().to_vec(),
    }
}

fn decode_raw(desc: &ParamDesc, raw: &[u8]) -> Option<ParamValue> {
    match desc.ptype {
        ParamType::U8 => Some(ParamValue::U8(*raw.first()?)),
        ParamType::I8 => Some(ParamValue::I8(*raw.first()? as i8)),
        ParamType::U32 => {
            Some(ParamValue::U32(u32::from_le_bytes(raw.try_into().ok()?)))
        }
        ParamType::F32 => {
            Some(ParamValue::F32(f32::from_le_bytes(raw.try_into().ok()?)))
        }
        ParamType::Char20 | ParamType::Char64 => Some(ParamValue::Str(
            std::str::from_utf8(raw).ok()?.to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_unique() {
        for (i, a) in PARAM_TABLE.iter().enumerate() {
            assert!(a.name.len() <= PARAM_NAME_MAX_LEN);
            for b in &PARAM_TABLE[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn float_view_skips_hidden_and_strings() {
        for i in 0..param_count_float() {
            let p = find_by_index_float(i).unwrap();
            assert!(p.ptype.float_viewable());
            assert_eq!(p.flags & PARAM_FLAG_HIDDEN, 0);
            assert_eq!(param_index_float(p), i as i16);
        }
        assert!(find_by_index_float(param_count_float()).is_none());
        // DONE_INIT is numeric but hidden
        assert_eq!(param_index_float(find("DONE_INIT").unwrap()), -1);
    }

    #[test]
    fn set_get_roundtrip_with_persistence() {
        let mut store = ParamStore::load(MemoryKv::default());
        let desc = find("BT4_RATE").unwrap();
        assert!(store.set_as_float(desc, 2.0));
        assert_eq!(store.get_as_float(desc), Some(2.0));

        // persisted value survives a reload
        let kv = std::mem::take(store.kv_mut());
        let store2 = ParamStore::load(kv);
        assert_eq!(store2.values().bt4_rate, 2.0);
    }

    #[test]
    fn out_of_range_set_is_noop() {
        let mut store = ParamStore::load(MemoryKv::default());
        let desc = find("WIFI_CHANNEL").unwrap();
        assert!(!store.set_as_float(desc, 14.0));
        assert_eq!(store.get_as_float(desc), Some(6.0));
        assert!(!store.set_as_float(desc, 0.0));
        assert_eq!(store.get_as_float(desc), Some(6.0));
    }

    #[test]
    fn set_by_name_string_parses_types() {
        let mut store = ParamStore::load(MemoryKv::default());
        assert!(store.set_by_name_string("BT4_RATE", "2"));
        assert!(store.set_by_name_string("BT5_RATE", "3"));
        assert!(store.set_by_name_string("UAS_ID", "SN12345678"));
        assert!(store.set_by_name_string("CAN_NODE", "42"));
        assert_eq!(store.values().bt4_rate, 2.0);
        assert_eq!(store.values().bt5_rate, 3.0);
        assert_eq!(store.values().can_node, 42);
        assert!(!store.set_by_name_string("CAN_NODE", "200"));
        assert!(!store.set_by_name_string("NO_SUCH", "1"));
        assert!(!store.set_by_name_string("BT4_RATE", "fast"));
    }

    #[test]
    fn password_read_is_masked() {
        let mut store = ParamStore::load(MemoryKv::default());
        let desc = find("PUBLIC_KEY1").unwrap();
        store.set(desc, ParamValue::Str("PUBLIC_KEYV1:abcd".to_string()));
        assert_eq!(
            store.get(desc),
            ParamValue::Str(PASSWORD_MASK.to_string())
        );
    }

    #[test]
    fn char_set_truncates() {
        let mut store = ParamStore::load(MemoryKv::default());
        let desc = find("UAS_ID").unwrap();
        let long = "X".repeat(40);
        assert!(store.set(desc, ParamValue::Str(long)));
        assert_eq!(store.values().get(Field::UasId), ParamValue::Str("X".repeat(20)));
    }
}
