//! Bluetooth backends: legacy advertising (one phase-rotated ASTM message
//! per advertisement) and long-range extended advertising on the coded
//! PHY (packed multi-message frame).
//!
//! Both share one radio, one random static address and the per-group
//! sequence counters; the scheduler drives them through thin adapters.

use std::cell::RefCell;
use std::rc::Rc;

use rand::RngCore;
use tracing::debug;

use super::encoder::OdidEncoder;
use super::Transmitter;
use crate::odid::OdidRecord;

/// 5-byte ASTM service-data preamble for ODID over BLE.
pub const ASTM_HEADER: [u8; 5] = [0x1e, 0x16, 0xfa, 0xff, 0x0d];
/// AD type for the shortened local name phase.
pub const AD_TYPE_NAME_SHORT: u8 = 0x08;
/// Prefix of the advertised short name.
pub const NAME_PREFIX: &str = "ArduRemoteID_";
/// Upper bound for the long-range packed frame.
pub const LONG_RANGE_MAX_PAYLOAD: usize = 250;

/// Discrete chip power levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TxPowerLevel {
    N12,
    N9,
    N6,
    N3,
    P0,
    P3,
    P6,
    P9,
    P12,
    P15,
    P18,
}

/// Map a requested dBm figure onto the chip's discrete steps.
pub fn dbm_to_level(dbm: f32) -> TxPowerLevel {
    const STEPS: [(f32, TxPowerLevel); 11] = [
        (-12.0, TxPowerLevel::N12),
        (-9.0, TxPowerLevel::N9),
        (-6.0, TxPowerLevel::N6),
        (-3.0, TxPowerLevel::N3),
        (0.0, TxPowerLevel::P0),
        (3.0, TxPowerLevel::P3),
        (6.0, TxPowerLevel::P6),
        (9.0, TxPowerLevel::P9),
        (12.0, TxPowerLevel::P12),
        (15.0, TxPowerLevel::P15),
        (18.0, TxPowerLevel::P18),
    ];
    let mut level = TxPowerLevel::N12;
    for (threshold, step) in STEPS {
        if dbm >= threshold {
            level = step;
        }
    }
    level
}

/// Advertising intervals in 625 µs units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvIntervals {
    pub min_units: u16,
    pub max_units: u16,
}

/// Legacy sets rotate seven phases per record period, so the advertising
/// interval divides accordingly.
pub fn legacy_intervals(rate_hz: f32) -> AdvIntervals {
    let max_units = ((1000.0 / (rate_hz * 7.0)) / 0.625) as u16;
    AdvIntervals {
        min_units: (0.75 * f32::from(max_units)) as u16,
        max_units,
    }
}

pub fn long_range_intervals(rate_hz: f32) -> AdvIntervals {
    let max_units = ((1000.0 / rate_hz) / 0.625) as u16;
    AdvIntervals {
        min_units: (0.75 * f32::from(max_units)) as u16,
        max_units,
    }
}

/// The BLE radio collaborator: one legacy set (ADV_IND, 1M PHY,
/// non-connectable) and one extended set on the coded PHY, S8 preferred.
pub trait BleDriver {
    fn init(&mut self) -> bool;
    fn set_random_static_address(&mut self, mac: [u8; 6]);
    fn configure_legacy(&mut self, intervals: AdvIntervals, power: TxPowerLevel) -> bool;
    fn configure_long_range(&mut self, intervals: AdvIntervals, power: TxPowerLevel)
        -> bool;
    fn set_legacy_payload(&mut self, data: &[u8]) -> bool;
    fn set_long_range_payload(&mut self, data: &[u8]) -> bool;
    fn start(&mut self) -> bool;
}

/// Per-group sequence counters carried in the ASTM header. Wraparound at
/// 256 is part of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    Location = 0,
    BasicId0 = 1,
    SelfId = 2,
    System = 3,
    OperatorId = 4,
    BasicId1 = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Data(Group),
    Name,
}

#[derive(Debug, Clone, Copy)]
pub struct BleConfig {
    pub legacy_rate_hz: f32,
    pub long_range_rate_hz: f32,
    pub legacy_power_dbm: f32,
    pub long_range_power_dbm: f32,
}

/// One BLE transmitter per process; both backends are views of it.
pub struct BleTx<D: BleDriver> {
    driver: D,
    encoder: Rc<dyn OdidEncoder>,
    config: BleConfig,
    mac: [u8; 6],
    phase: usize,
    counters: [u8; 6],
    pack_counter: u8,
    initialised: bool,
    started: bool,
}

impl<D: BleDriver> BleTx<D> {
    pub fn new(driver: D, encoder: Rc<dyn OdidEncoder>, config: BleConfig) -> Self {
        Self {
            driver,
            encoder,
            config,
            mac: [0; 6],
            phase: 0,
            counters: [0; 6],
            pack_counter: 0,
            initialised: false,
            started: false,
        }
    }

    /// Idempotent: safe from every transmit entry point.
    pub fn ensure_init(&mut self) -> bool {
        if self.initialised {
            return true;
        }
        if !self.driver.init() {
            return false;
        }
        // random static address, shared by both advertising sets
        rand::thread_rng().fill_bytes(&mut self.mac);
        self.mac[0] |= 0xc0;
        self.driver.set_random_static_address(self.mac);
        if !self.driver.configure_legacy(
            legacy_intervals(self.config.legacy_rate_hz),
            dbm_to_level(self.config.legacy_power_dbm),
        ) {
            return false;
        }
        if !self.driver.configure_long_range(
            long_range_intervals(self.config.long_range_rate_hz),
            dbm_to_level(self.config.long_range_power_dbm),
        ) {
            return false;
        }
        self.initialised = true;
        debug!("BLE transmitter initialised");
        true
    }

    fn phases(record: &OdidRecord) -> Vec<Phase> {
        let mut phases = vec![
            Phase::Data(Group::Location),
            Phase::Data(Group::BasicId0),
            Phase::Data(Group::SelfId),
            Phase::Data(Group::System),
            Phase::Data(Group::OperatorId),
        ];
        if record.dual_basic_id() {
            phases.push(Phase::Data(Group::BasicId1));
        }
        phases.push(Phase::Name);
        phases
    }

    fn encode_group(&self, record: &OdidRecord, group: Group) -> Option<Vec<u8>> {
        let encoded = match group {
            Group::Location => record
                .location
                .valid
                .then(|| self.encoder.encode_location(&record.location.value)),
            Group::BasicId0 => record.basic_id[0]
                .valid
                .then(|| self.encoder.encode_basic_id(&record.basic_id[0].value)),
            Group::SelfId => record
                .self_id
                .valid
                .then(|| self.encoder.encode_self_id(&record.self_id.value)),
            Group::System => record
                .system
                .valid
                .then(|| self.encoder.encode_system(&record.system.value)),
            Group::OperatorId => record
                .operator_id
                .valid
                .then(|| self.encoder.encode_operator_id(&record.operator_id.value)),
            Group::BasicId1 => record.basic_id[1]
                .valid
                .then(|| self.encoder.encode_basic_id(&record.basic_id[1].value)),
        };
        encoded?.ok()
    }

    fn short_name(record: &OdidRecord) -> String {
        let uas_id = record.basic_id[0].value.uas_id_str();
        let tail_len = uas_id.len().min(4);
        format!("{NAME_PREFIX}{}", &uas_id[uas_id.len() - tail_len..])
    }

    /// One legacy advertisement: load the current phase's payload and
    /// advance. Skipped phases (invalid group) still advance, so the
    /// rotation never stalls.
    pub fn transmit_legacy(&mut self, record: &OdidRecord) -> bool {
        if !self.ensure_init() {
            return false;
        }
        let phases = Self::phases(record);
        let phase = phases[self.phase % phases.len()];
        self.phase = (self.phase + 1) % phases.len();

        let payload = match phase {
            Phase::Name => {
                let name = Self::short_name(record);
                let mut data = Vec::with_capacity(2 + name.len());
                data.push(name.len() as u8 + 1);
                data.push(AD_TYPE_NAME_SHORT);
                data.extend_from_slice(name.as_bytes());
                data
            }
            Phase::Data(group) => {
                let Some(encoded) = self.encode_group(record, group) else {
                    return false;
                };
                let counter = &mut self.counters[group as usize];
                let mut data = Vec::with_capacity(6 + encoded.len());
                data.extend_from_slice(&ASTM_HEADER);
                data.push(*counter);
                *counter = counter.wrapping_add(1);
                data.extend_from_slice(&encoded);
                data
            }
        };

        if !self.driver.set_legacy_payload(&payload) {
            return false;
        }
        if !self.started {
            self.started = self.driver.start();
        }
        self.started
    }

    /// One long-range advertisement: the full message pack in a single
    /// extended frame on the coded PHY.
    pub fn transmit_long_range(&mut self, record: &OdidRecord) -> bool {
        if !self.ensure_init() {
            return false;
        }
        let Ok(packed) = self.encoder.build_pack(record, LONG_RANGE_MAX_PAYLOAD)
        else {
            return false;
        };
        let mut data = Vec::with_capacity(6 + packed.len());
        data.push(packed.len() as u8 + 5);
        data.extend_from_slice(&ASTM_HEADER[1..]);
        data.push(self.pack_counter);
        self.pack_counter = self.pack_counter.wrapping_add(1);
        data.extend_from_slice(&packed);

        if !self.driver.set_long_range_payload(&data) {
            return false;
        }
        if !self.started {
            self.started = self.driver.start();
        }
        self.started
    }
}

/// Scheduler adapter for the legacy set.
pub struct BleLegacyBackend<D: BleDriver>(pub Rc<RefCell<BleTx<D>>>);

impl<D: BleDriver> Transmitter for BleLegacyBackend<D> {
    fn name(&self) -> &'static str {
        "ble-legacy"
    }

    fn ensure_init(&mut self) -> bool {
        self.0.borrow_mut().ensure_init()
    }

    fn transmit(&mut self, record: &OdidRecord) -> bool {
        self.0.borrow_mut().transmit_legacy(record)
    }

    fn rate_multiplier(&self) -> f32 {
        7.0
    }
}

/// Scheduler adapter for the long-range set.
pub struct BleLongRangeBackend<D: BleDriver>(pub Rc<RefCell<BleTx<D>>>);

impl<D: BleDriver> Transmitter for BleLongRangeBackend<D> {
    fn name(&self) -> &'static str {
        "ble-long-range"
    }

    fn ensure_init(&mut self) -> bool {
        self.0.borrow_mut().ensure_init()
    }

    fn transmit(&mut self, record: &OdidRecord) -> bool {
        self.0.borrow_mut().transmit_long_range(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odid::{copy_str_field, BasicId, IdType, OdidStore, SelfId, System};
    use crate::odid::{Location, OperatorId};
    use crate::tx::encoder::{EncodeResult, OdidEncoder};

    #[derive(Default)]
    struct RecordingDriver {
        legacy_payloads: Vec<Vec<u8>>,
        long_range_payloads: Vec<Vec<u8>>,
        mac: Option<[u8; 6]>,
        legacy_intervals: Option<AdvIntervals>,
        long_range_intervals: Option<AdvIntervals>,
        started: u32,
    }

    impl BleDriver for Rc<RefCell<RecordingDriver>> {
        fn init(&mut self) -> bool {
            true
        }

        fn set_random_static_address(&mut self, mac: [u8; 6]) {
            self.borrow_mut().mac = Some(mac);
        }

        fn configure_legacy(
            &mut self,
            intervals: AdvIntervals,
            _power: TxPowerLevel,
        ) -> bool {
            self.borrow_mut().legacy_intervals = Some(intervals);
            true
        }

        fn configure_long_range(
            &mut self,
            intervals: AdvIntervals,
            _power: TxPowerLevel,
        ) -> bool {
            self.borrow_mut().long_range_intervals = Some(intervals);
            true
        }

        fn set_legacy_payload(&mut self, data: &[u8]) -> bool {
            self.borrow_mut().legacy_payloads.push(data.to_vec());
            true
        }

        fn set_long_range_payload(&mut self, data: &[u8]) -> bool {
            self.borrow_mut().long_range_payloads.push(data.to_vec());
            true
        }

        fn start(&mut self) -> bool {
            self.borrow_mut().started += 1;
            true
        }
    }

    /// Encodes each group as 25 bytes of a recognisable marker.
    struct MarkerEncoder;

    fn marker(tag: u8) -> EncodeResult {
        Ok(vec![tag; 25])
    }

    impl OdidEncoder for MarkerEncoder {
        fn encode_basic_id(&self, b: &BasicId) -> EncodeResult {
            marker(if b.uas_id_str().ends_with('2') { 0xB2 } else { 0xB1 })
        }

        fn encode_location(&self, _: &Location) -> EncodeResult {
            marker(0x10)
        }

        fn encode_self_id(&self, _: &SelfId) -> EncodeResult {
            marker(0x53)
        }

        fn encode_system(&self, _: &System) -> EncodeResult {
            marker(0x5c)
        }

        fn encode_operator_id(&self, _: &OperatorId) -> EncodeResult {
            marker(0x0f)
        }

        fn build_pack(&self, _: &OdidRecord, max_len: usize) -> EncodeResult {
            Ok(vec![0xAA; max_len.min(100)])
        }

        fn build_nan_sync(&self, _: &[u8; 6], _: usize) -> EncodeResult {
            marker(0x4e)
        }

        fn build_nan_action(
            &self,
            _: &OdidRecord,
            _: &[u8; 6],
            _: u8,
            _: usize,
        ) -> EncodeResult {
            marker(0x4f)
        }

        fn build_beacon(
            &self,
            _: &OdidRecord,
            _: &[u8; 6],
            _: &str,
            _: u16,
            _: u8,
            _: usize,
        ) -> EncodeResult {
            marker(0xbc)
        }
    }

    fn full_record() -> OdidRecord {
        let mut store = OdidStore::new();
        store.update_basic_id(
            0,
            BasicId {
                id_type: IdType::SerialNumber,
                uas_id: copy_str_field(b"ABC123"),
                ..Default::default()
            },
            1,
        );
        store.update_location(
            Location {
                latitude: 1,
                longitude: 1,
                timestamp: 5.0,
                ..Default::default()
            },
            1,
        );
        store.update_self_id(SelfId::default(), 1);
        store.update_system(System::default(), 1);
        store.update_operator_id(OperatorId::default(), 1);
        store.snapshot()
    }

    fn ble() -> (BleTx<Rc<RefCell<RecordingDriver>>>, Rc<RefCell<RecordingDriver>>) {
        let driver = Rc::new(RefCell::new(RecordingDriver::default()));
        let tx = BleTx::new(
            driver.clone(),
            Rc::new(MarkerEncoder),
            BleConfig {
                legacy_rate_hz: 1.0,
                long_range_rate_hz: 1.0,
                legacy_power_dbm: 18.0,
                long_range_power_dbm: 18.0,
            },
        );
        (tx, driver)
    }

    #[test]
    fn legacy_phase_rotation_without_dual_id() {
        let (mut tx, driver) = ble();
        let record = full_record();
        for _ in 0..7 {
            assert!(tx.transmit_legacy(&record));
        }
        let payloads = driver.borrow().legacy_payloads.clone();
        assert_eq!(payloads.len(), 7);

        // data phases carry the ASTM header and the per-group marker
        for (i, expected) in [0x10u8, 0xB1, 0x53, 0x5c, 0x0f].iter().enumerate() {
            assert_eq!(&payloads[i][..5], &ASTM_HEADER);
            assert_eq!(payloads[i][6], *expected);
            assert_eq!(payloads[i].len(), 31);
        }
        // sixth phase is the short name with the UAS id tail
        assert_eq!(payloads[5][1], AD_TYPE_NAME_SHORT);
        assert_eq!(&payloads[5][2..], b"ArduRemoteID_C123");
        // the cycle wraps with nothing skipped
        assert_eq!(&payloads[6][..5], &ASTM_HEADER);
        assert_eq!(payloads[6][6], 0x10);
    }

    #[test]
    fn legacy_phase_rotation_with_dual_id() {
        let (mut tx, driver) = ble();
        let mut record = full_record();
        record.basic_id[1].value = BasicId {
            id_type: IdType::CaaRegistrationId,
            uas_id: copy_str_field(b"REG2"),
            ..Default::default()
        };
        record.basic_id[1].valid = true;
        for _ in 0..8 {
            assert!(tx.transmit_legacy(&record));
        }
        let payloads = driver.borrow().legacy_payloads.clone();
        // seven phases: the dual id slots in before the name
        assert_eq!(payloads[5][6], 0xB2);
        assert_eq!(payloads[6][1], AD_TYPE_NAME_SHORT);
        // and the eighth call wraps back to Location
        assert_eq!(payloads[7][6], 0x10);
    }

    #[test]
    fn per_group_counters_advance_independently() {
        let (mut tx, driver) = ble();
        let record = full_record();
        for _ in 0..12 {
            tx.transmit_legacy(&record);
        }
        let payloads = driver.borrow().legacy_payloads.clone();
        // location was sent twice; its counter went 0 then 1
        assert_eq!(payloads[0][5], 0);
        assert_eq!(payloads[6][5], 1);
        // basic id likewise
        assert_eq!(payloads[1][5], 0);
        assert_eq!(payloads[7][5], 1);
    }

    #[test]
    fn invalid_group_skips_payload_but_advances() {
        let (mut tx, driver) = ble();
        let mut record = full_record();
        record.self_id.valid = false;
        let results: Vec<bool> =
            (0..6).map(|_| tx.transmit_legacy(&record)).collect();
        // the SelfID slot produced nothing
        assert_eq!(results, vec![true, true, false, true, true, true]);
        assert_eq!(driver.borrow().legacy_payloads.len(), 5);
    }

    #[test]
    fn long_range_frame_layout() {
        let (mut tx, driver) = ble();
        let record = full_record();
        assert!(tx.transmit_long_range(&record));
        assert!(tx.transmit_long_range(&record));
        let payloads = driver.borrow().long_range_payloads.clone();
        let first = &payloads[0];
        assert_eq!(first[0] as usize, first.len() - 1);
        assert_eq!(&first[1..5], &ASTM_HEADER[1..]);
        assert_eq!(first[5], 0);
        assert_eq!(payloads[1][5], 1);
    }

    #[test]
    fn shared_random_static_address() {
        let (mut tx, driver) = ble();
        let record = full_record();
        tx.transmit_legacy(&record);
        tx.transmit_long_range(&record);
        let mac = driver.borrow().mac.expect("address set once at init");
        assert_eq!(mac[0] & 0xc0, 0xc0);
    }

    #[test]
    fn interval_derivation() {
        let i = legacy_intervals(1.0);
        // 1000 / 7 / 0.625
        assert_eq!(i.max_units, 228);
        assert_eq!(i.min_units, 171);
        let i = long_range_intervals(2.0);
        assert_eq!(i.max_units, 800);
        assert_eq!(i.min_units, 600);
    }

    #[test]
    fn power_mapping_is_stepwise() {
        assert_eq!(dbm_to_level(-40.0), TxPowerLevel::N12);
        assert_eq!(dbm_to_level(-10.0), TxPowerLevel::N12);
        assert_eq!(dbm_to_level(0.0), TxPowerLevel::P0);
        assert_eq!(dbm_to_level(10.0), TxPowerLevel::P9);
        assert_eq!(dbm_to_level(18.0), TxPowerLevel::P18);
        assert_eq!(dbm_to_level(30.0), TxPowerLevel::P18);
    }
}
