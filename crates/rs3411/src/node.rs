//! The assembled transponder: every process singleton in one value,
//! updated by a single cooperative loop.
//!
//! Update order is fixed: serial link, CAN link, then the transmit
//! scheduler. Each `update()` call runs to completion before the next, so
//! the ODID record is never observed mid-write and the scheduler always
//! sees a consistent snapshot.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::dronecan::{CanIface, DroneCanLink};
use crate::firmware;
use crate::mavlink::{MavlinkLink, SerialPort};
use crate::odid::{copy_str_field, BasicId, IdType, OdidRecord, OdidStore, UaType};
use crate::params::{KvStore, ParamStore};
use crate::secure::SecureState;
use crate::transport::TransportContext;
use crate::tx::{
    BleConfig, BleDriver, BleLegacyBackend, BleLongRangeBackend, BleTx,
    OdidEncoder, TxScheduler, WifiBeaconBackend, WifiConfig, WifiDriver,
    WifiNanBackend, WifiTx,
};
use crate::{arm::ArmState, BUILTIN_PUBLIC_KEYS};

#[derive(Debug, Default, Clone, Copy)]
struct BackendIndices {
    bt4: Option<usize>,
    bt5: Option<usize>,
    wifi_nan: Option<usize>,
    wifi_beacon: Option<usize>,
}

pub struct RemoteIdNode<C, K, S, I>
where
    C: Clock,
    K: KvStore,
    S: SerialPort,
    I: CanIface,
{
    clock: C,
    store: OdidStore,
    params: ParamStore<K>,
    secure: SecureState,
    serial: Option<MavlinkLink<S>>,
    can: Option<DroneCanLink<I>>,
    scheduler: TxScheduler,
    indices: BackendIndices,
    parse_fail: Option<String>,
    mac: [u8; 6],
}

impl<C, K, S, I> RemoteIdNode<C, K, S, I>
where
    C: Clock,
    K: KvStore,
    S: SerialPort,
    I: CanIface,
{
    /// Boot the node: load parameters, seed first-boot keys, self-check
    /// the running firmware image and seed the record from the stored
    /// basic id.
    pub fn new(
        clock: C,
        kv: K,
        serial: Option<S>,
        can: Option<I>,
        mac: [u8; 6],
        running_image: Option<&[u8]>,
    ) -> Self {
        let mut params = ParamStore::load(kv);
        params.seed_builtin_keys(BUILTIN_PUBLIC_KEYS);

        let parse_fail = running_image.and_then(|image| {
            match firmware::check_ota_running(image, &params) {
                Ok(()) => None,
                Err(err) => {
                    warn!(%err, "running firmware failed its self-check");
                    Some(err.to_string())
                }
            }
        });

        let mut store = OdidStore::new();
        let now_ms = clock.now_ms();
        seed_basic_ids(&mut store, &params, now_ms);

        let serial = serial.map(MavlinkLink::new);
        let can = can.map(|iface| DroneCanLink::new(iface, mac));

        info!(
            "rs3411 {}.{} up",
            crate::FW_VERSION_MAJOR,
            crate::FW_VERSION_MINOR
        );
        Self {
            clock,
            store,
            params,
            secure: SecureState::new(),
            serial,
            can,
            scheduler: TxScheduler::new(),
            indices: BackendIndices::default(),
            parse_fail,
            mac,
        }
    }

    /// Register the BLE radio: one legacy and one long-range backend
    /// sharing a single transmitter.
    pub fn attach_ble<D: BleDriver + 'static>(
        &mut self,
        driver: D,
        encoder: Rc<dyn OdidEncoder>,
    ) {
        let values = self.params.values();
        let ble = Rc::new(RefCell::new(BleTx::new(
            driver,
            encoder,
            BleConfig {
                legacy_rate_hz: values.bt4_rate,
                long_range_rate_hz: values.bt5_rate,
                legacy_power_dbm: values.bt4_power,
                long_range_power_dbm: values.bt5_power,
            },
        )));
        self.indices.bt4 = Some(self.scheduler.add(
            Box::new(BleLegacyBackend(ble.clone())),
            values.bt4_rate,
        ));
        self.indices.bt5 = Some(
            self.scheduler
                .add(Box::new(BleLongRangeBackend(ble)), values.bt5_rate),
        );
    }

    /// Register the Wi-Fi radio: NAN and Beacon backends sharing one
    /// soft-AP.
    pub fn attach_wifi<D: WifiDriver + 'static>(
        &mut self,
        driver: D,
        encoder: Rc<dyn OdidEncoder>,
    ) {
        let values = self.params.values();
        let wifi = Rc::new(RefCell::new(WifiTx::new(
            driver,
            encoder,
            WifiConfig {
                channel: values.wifi_channel,
                power_dbm: values.wifi_power,
                beacon_rate_hz: values.wifi_beacon_rate,
            },
        )));
        self.indices.wifi_nan = Some(self.scheduler.add(
            Box::new(WifiNanBackend(wifi.clone())),
            values.wifi_nan_rate,
        ));
        self.indices.wifi_beacon = Some(self.scheduler.add(
            Box::new(WifiBeaconBackend(wifi)),
            values.wifi_beacon_rate,
        ));
    }

    /// One cooperative tick, called at roughly millisecond rate.
    pub fn update(&mut self) {
        let now_ms = self.clock.now_ms();
        let now_us = self.clock.now_us();
        let mut mac8 = [0u8; 8];
        mac8[..6].copy_from_slice(&self.mac);

        if let Some(link) = self.serial.as_mut() {
            let mut ctx = TransportContext {
                store: &mut self.store,
                params: &mut self.params,
                secure: &mut self.secure,
                parse_fail: self.parse_fail.as_deref(),
                now_ms,
                now_us,
                mac: mac8,
            };
            link.update(&mut ctx);
        }

        if let Some(link) = self.can.as_mut() {
            let mut ctx = TransportContext {
                store: &mut self.store,
                params: &mut self.params,
                secure: &mut self.secure,
                parse_fail: self.parse_fail.as_deref(),
                now_ms,
                now_us,
                mac: mac8,
            };
            link.update(&mut ctx);
        }

        // rates follow the parameters so signed reconfiguration takes
        // effect without a reboot
        let values = self.params.values();
        let rates = [
            (self.indices.bt4, values.bt4_rate),
            (self.indices.bt5, values.bt5_rate),
            (self.indices.wifi_nan, values.wifi_nan_rate),
            (self.indices.wifi_beacon, values.wifi_beacon_rate),
        ];
        for (index, rate) in rates {
            if let Some(index) = index {
                self.scheduler.set_rate(index, rate);
            }
        }

        if self.broadcast_enabled() {
            let record = self.store.snapshot();
            self.scheduler.update(&record, now_ms);
        }
    }

    /// Without the powerup option, stay silent until the flight
    /// controller has supplied something to broadcast.
    fn broadcast_enabled(&self) -> bool {
        if self.params.values().bcast_powerup != 0 {
            return true;
        }
        let record = self.store.record();
        record.location.valid || record.basic_id[0].valid
    }

    pub fn record(&self) -> &OdidRecord {
        self.store.record()
    }

    pub fn arm_state(&self) -> ArmState {
        crate::arm::arm_status_check(
            self.store.record(),
            self.params.values(),
            self.clock.now_ms(),
            self.parse_fail.as_deref(),
        )
    }

    pub fn params(&self) -> &ParamStore<K> {
        &self.params
    }

    /// A verified RestartNode / reboot command arrived over CAN.
    pub fn restart_requested(&mut self) -> bool {
        self.can
            .as_mut()
            .map(|link| link.take_restart_request())
            .unwrap_or(false)
    }
}

fn seed_basic_ids<K: KvStore>(
    store: &mut OdidStore,
    params: &ParamStore<K>,
    now_ms: u32,
) {
    let values = params.values();
    if values.have_basic_id_info() {
        if let (Ok(id_type), Ok(ua_type)) = (
            IdType::try_from(values.id_type),
            UaType::try_from(values.ua_type),
        ) {
            store.update_basic_id(
                0,
                BasicId {
                    id_or_mac: [0; 20],
                    id_type,
                    ua_type,
                    uas_id: copy_str_field(&values.uas_id),
                },
                now_ms,
            );
        }
    }
    if values.have_basic_id_2_info() {
        if let (Ok(id_type), Ok(ua_type)) = (
            IdType::try_from(values.id_type_2),
            UaType::try_from(values.ua_type_2),
        ) {
            store.update_basic_id(
                1,
                BasicId {
                    id_or_mac: [0; 20],
                    id_type,
                    ua_type,
                    uas_id: copy_str_field(&values.uas_id_2),
                },
                now_ms,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::params::{find, MemoryKv, ParamValue};

    type TestNode = RemoteIdNode<ManualClock, MemoryKv, NullSerial, NullCan>;

    struct NullSerial;

    impl SerialPort for NullSerial {
        fn read(&mut self, _buf: &mut [u8]) -> usize {
            0
        }

        fn write(&mut self, _data: &[u8]) {}
    }

    struct NullCan;

    impl CanIface for NullCan {
        fn send(
            &mut self,
            _frame: &crate::dronecan::CanFrame,
        ) -> Result<(), crate::dronecan::CanError> {
            Ok(())
        }

        fn receive(
            &mut self,
        ) -> Result<Option<crate::dronecan::CanFrame>, crate::dronecan::CanError>
        {
            Ok(None)
        }
    }

    fn node_with_params(
        set: &[(&str, ParamValue)],
    ) -> TestNode {
        let mut kv = MemoryKv::default();
        {
            let mut params = ParamStore::load(std::mem::take(&mut kv));
            for (name, value) in set {
                params.set(find(name).unwrap(), value.clone());
            }
            kv = std::mem::take(params.kv_mut());
        }
        RemoteIdNode::new(
            ManualClock::new(),
            kv,
            Some(NullSerial),
            None,
            [1, 2, 3, 4, 5, 6],
            None,
        )
    }

    #[test]
    fn basic_id_seeded_from_parameters() {
        let node = node_with_params(&[
            ("UAS_ID", ParamValue::Str("SNBOOT01".into())),
            ("ID_TYPE", ParamValue::U8(1)),
            ("UA_TYPE", ParamValue::U8(2)),
        ]);
        let slot = &node.record().basic_id[0];
        assert!(slot.valid);
        assert_eq!(slot.value.uas_id_str(), "SNBOOT01");
    }

    #[test]
    fn parse_fail_blocks_arming_until_reflash() {
        let kv = MemoryKv::default();
        // an image with no descriptor at all
        let image = vec![0u8; 64];
        let node: TestNode = RemoteIdNode::new(
            ManualClock::new(),
            kv,
            Some(NullSerial),
            None,
            [1, 2, 3, 4, 5, 6],
            Some(&image),
        );
        let state = node.arm_state();
        assert_eq!(state.status, crate::arm::ArmStatus::PreArmFailGeneric);
        assert!(state.reason.contains("app descriptor not found"));
    }

    #[test]
    fn no_image_no_parse_fail() {
        let node = node_with_params(&[]);
        // arming still fails on freshness, but with no firmware prefix
        let state = node.arm_state();
        assert!(!state.reason.contains("descriptor"));
    }
}
