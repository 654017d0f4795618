//! Wi-Fi backends: NAN discovery frames sent raw, and the ODID vendor IE
//! injected into the soft-AP's own beacons.

use std::cell::RefCell;
use std::rc::Rc;

use rand::RngCore;
use tracing::debug;

use super::encoder::OdidEncoder;
use super::Transmitter;
use crate::odid::OdidRecord;

/// Vendor IE element id.
pub const VENDOR_IE_ELEMENT_ID: u8 = 0xDD;
/// ASD-STAN OUI carried in the ODID vendor IE.
pub const VENDOR_IE_OUI: [u8; 3] = [0xFA, 0x0B, 0xBC];
pub const VENDOR_IE_OUI_TYPE: u8 = 0x0D;
/// Offset of the ODID payload inside the encoder-built beacon frame.
pub const BEACON_IE_OFFSET: usize = 58;
/// Placeholder SSID in the encoder-built beacon.
pub const BEACON_SSID: &str = "UAS_ID_OPEN";

const FRAME_BUF_LEN: usize = 1024;

/// Map a dBm figure to the chip's quarter-dB transmit power register.
pub fn dbm_to_tx_power(dbm: f32) -> u8 {
    let dbm = dbm.clamp(2.0, 20.0);
    ((dbm + 1.125) * 4.0) as u8
}

/// The 802.11 driver collaborator: a hidden soft-AP (HT20) plus raw-frame
/// injection and vendor-IE management for Beacon and Probe Response.
pub trait WifiDriver {
    fn init_softap(&mut self, channel: u8, power: u8, mac: [u8; 6]) -> bool;
    fn tx_raw(&mut self, frame: &[u8]) -> bool;
    fn set_vendor_ie(&mut self, ie: &[u8]) -> bool;
    fn clear_vendor_ie(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct WifiConfig {
    pub channel: u8,
    pub power_dbm: f32,
    pub beacon_rate_hz: f32,
}

/// One Wi-Fi transmitter per process; NAN and Beacon backends are views.
pub struct WifiTx<D: WifiDriver> {
    driver: D,
    encoder: Rc<dyn OdidEncoder>,
    config: WifiConfig,
    mac: [u8; 6],
    send_counter: u8,
    beacon_counter: u8,
    initialised: bool,
}

impl<D: WifiDriver> WifiTx<D> {
    pub fn new(driver: D, encoder: Rc<dyn OdidEncoder>, config: WifiConfig) -> Self {
        Self {
            driver,
            encoder,
            config,
            mac: [0; 6],
            send_counter: 0,
            beacon_counter: 0,
            initialised: false,
        }
    }

    /// Idempotent: safe from every transmit entry point.
    pub fn ensure_init(&mut self) -> bool {
        if self.initialised {
            return true;
        }
        // locally administered random address so the transponder cannot
        // be tracked by hardware MAC
        rand::thread_rng().fill_bytes(&mut self.mac);
        self.mac[0] |= 0x02;
        self.mac[0] &= 0xFE;
        if !self.driver.init_softap(
            self.config.channel,
            dbm_to_tx_power(self.config.power_dbm),
            self.mac,
        ) {
            return false;
        }
        self.initialised = true;
        debug!(channel = self.config.channel, "Wi-Fi transmitter initialised");
        true
    }

    /// NAN: a sync beacon followed by the service-discovery action frame
    /// carrying the message pack, both injected raw.
    pub fn transmit_nan(&mut self, record: &OdidRecord) -> bool {
        if !self.ensure_init() {
            return false;
        }
        if let Ok(sync) = self.encoder.build_nan_sync(&self.mac, FRAME_BUF_LEN) {
            if !self.driver.tx_raw(&sync) {
                return false;
            }
        }
        self.send_counter = self.send_counter.wrapping_add(1);
        match self.encoder.build_nan_action(
            record,
            &self.mac,
            self.send_counter,
            FRAME_BUF_LEN,
        ) {
            Ok(action) => self.driver.tx_raw(&action),
            Err(_) => false,
        }
    }

    /// Beacon: rebuild the vendor IE from the current record and swap it
    /// in atomically (remove, then add) for Beacon and Probe Response.
    pub fn transmit_beacon(&mut self, record: &OdidRecord) -> bool {
        if !self.ensure_init() {
            return false;
        }
        let period_ms = (1000.0 / self.config.beacon_rate_hz) as u16;
        self.beacon_counter = self.beacon_counter.wrapping_add(1);
        let Ok(beacon) = self.encoder.build_beacon(
            record,
            &self.mac,
            BEACON_SSID,
            period_ms,
            self.beacon_counter,
            FRAME_BUF_LEN,
        ) else {
            return false;
        };
        if beacon.len() <= BEACON_IE_OFFSET {
            return false;
        }
        let payload = &beacon[BEACON_IE_OFFSET..];

        let mut ie = Vec::with_capacity(6 + payload.len());
        ie.push(VENDOR_IE_ELEMENT_ID);
        ie.push((payload.len() + 4) as u8);
        ie.extend_from_slice(&VENDOR_IE_OUI);
        ie.push(VENDOR_IE_OUI_TYPE);
        ie.extend_from_slice(payload);

        if !self.driver.clear_vendor_ie() {
            return false;
        }
        self.driver.set_vendor_ie(&ie)
    }
}

/// Scheduler adapter for the NAN backend.
pub struct WifiNanBackend<D: WifiDriver>(pub Rc<RefCell<WifiTx<D>>>);

impl<D: WifiDriver> Transmitter for WifiNanBackend<D> {
    fn name(&self) -> &'static str {
        "wifi-nan"
    }

    fn ensure_init(&mut self) -> bool {
        self.0.borrow_mut().ensure_init()
    }

    fn transmit(&mut self, record: &OdidRecord) -> bool {
        self.0.borrow_mut().transmit_nan(record)
    }
}

/// Scheduler adapter for the Beacon backend.
pub struct WifiBeaconBackend<D: WifiDriver>(pub Rc<RefCell<WifiTx<D>>>);

impl<D: WifiDriver> Transmitter for WifiBeaconBackend<D> {
    fn name(&self) -> &'static str {
        "wifi-beacon"
    }

    fn ensure_init(&mut self) -> bool {
        self.0.borrow_mut().ensure_init()
    }

    fn transmit(&mut self, record: &OdidRecord) -> bool {
        self.0.borrow_mut().transmit_beacon(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odid::{BasicId, Location, OperatorId, SelfId, System};
    use crate::tx::encoder::EncodeResult;

    #[derive(Default)]
    struct RecordingWifi {
        raw_frames: Vec<Vec<u8>>,
        vendor_ies: Vec<Vec<u8>>,
        clears: u32,
        channel: Option<u8>,
        mac: Option<[u8; 6]>,
    }

    impl WifiDriver for Rc<RefCell<RecordingWifi>> {
        fn init_softap(&mut self, channel: u8, _power: u8, mac: [u8; 6]) -> bool {
            let mut inner = self.borrow_mut();
            inner.channel = Some(channel);
            inner.mac = Some(mac);
            true
        }

        fn tx_raw(&mut self, frame: &[u8]) -> bool {
            self.borrow_mut().raw_frames.push(frame.to_vec());
            true
        }

        fn set_vendor_ie(&mut self, ie: &[u8]) -> bool {
            self.borrow_mut().vendor_ies.push(ie.to_vec());
            true
        }

        fn clear_vendor_ie(&mut self) -> bool {
            self.borrow_mut().clears += 1;
            true
        }
    }

    struct StubEncoder;

    impl OdidEncoder for StubEncoder {
        fn encode_basic_id(&self, _: &BasicId) -> EncodeResult {
            Ok(vec![0; 25])
        }

        fn encode_location(&self, _: &Location) -> EncodeResult {
            Ok(vec![0; 25])
        }

        fn encode_self_id(&self, _: &SelfId) -> EncodeResult {
            Ok(vec![0; 25])
        }

        fn encode_system(&self, _: &System) -> EncodeResult {
            Ok(vec![0; 25])
        }

        fn encode_operator_id(&self, _: &OperatorId) -> EncodeResult {
            Ok(vec![0; 25])
        }

        fn build_pack(&self, _: &OdidRecord, _: usize) -> EncodeResult {
            Ok(vec![0x50; 75])
        }

        fn build_nan_sync(&self, mac: &[u8; 6], _: usize) -> EncodeResult {
            let mut frame = vec![0x80; 10];
            frame.extend_from_slice(mac);
            Ok(frame)
        }

        fn build_nan_action(
            &self,
            _: &OdidRecord,
            _: &[u8; 6],
            counter: u8,
            _: usize,
        ) -> EncodeResult {
            Ok(vec![counter; 40])
        }

        fn build_beacon(
            &self,
            _: &OdidRecord,
            _: &[u8; 6],
            ssid: &str,
            _: u16,
            counter: u8,
            _: usize,
        ) -> EncodeResult {
            assert_eq!(ssid, BEACON_SSID);
            // 58 bytes of 802.11 header and fixed elements, then the
            // ODID payload the backend extracts
            let mut frame = vec![0x11; BEACON_IE_OFFSET];
            frame.extend_from_slice(&[counter, 0xAB, 0xCD]);
            Ok(frame)
        }
    }

    fn wifi() -> (WifiTx<Rc<RefCell<RecordingWifi>>>, Rc<RefCell<RecordingWifi>>) {
        let driver = Rc::new(RefCell::new(RecordingWifi::default()));
        let tx = WifiTx::new(
            driver.clone(),
            Rc::new(StubEncoder),
            WifiConfig {
                channel: 6,
                power_dbm: 20.0,
                beacon_rate_hz: 1.0,
            },
        );
        (tx, driver)
    }

    #[test]
    fn nan_sends_sync_then_action() {
        let (mut tx, driver) = wifi();
        let record = OdidRecord::default();
        assert!(tx.transmit_nan(&record));
        let frames = driver.borrow().raw_frames.clone();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][0], 0x80);
        // the action frame counter starts at 1 and advances per send
        assert_eq!(frames[1][0], 1);
        assert!(tx.transmit_nan(&record));
        assert_eq!(driver.borrow().raw_frames[3][0], 2);
    }

    #[test]
    fn beacon_vendor_ie_layout_and_atomic_swap() {
        let (mut tx, driver) = wifi();
        let record = OdidRecord::default();
        assert!(tx.transmit_beacon(&record));
        let inner = driver.borrow();
        assert_eq!(inner.clears, 1);
        let ie = &inner.vendor_ies[0];
        assert_eq!(ie[0], VENDOR_IE_ELEMENT_ID);
        assert_eq!(usize::from(ie[1]), ie.len() - 2);
        assert_eq!(&ie[2..5], &VENDOR_IE_OUI);
        assert_eq!(ie[5], VENDOR_IE_OUI_TYPE);
        // payload is exactly the bytes past the beacon header
        assert_eq!(&ie[6..], &[1, 0xAB, 0xCD]);
    }

    #[test]
    fn mac_is_locally_administered() {
        let (mut tx, driver) = wifi();
        tx.transmit_nan(&OdidRecord::default());
        let mac = driver.borrow().mac.unwrap();
        assert_eq!(mac[0] & 0x02, 0x02);
        assert_eq!(mac[0] & 0x01, 0x00);
        assert_eq!(driver.borrow().channel, Some(6));
    }

    #[test]
    fn power_register_mapping() {
        assert_eq!(dbm_to_tx_power(20.0), 84);
        assert_eq!(dbm_to_tx_power(2.0), 12);
        // out-of-range figures clamp
        assert_eq!(dbm_to_tx_power(-5.0), 12);
        assert_eq!(dbm_to_tx_power(50.0), 84);
    }
}
