//! Host-side stand-ins for the radio collaborators: every frame the core
//! would put on air is hex-dumped instead.

use rs3411::odid::{BasicId, Location, OdidRecord, OperatorId, SelfId, System};
use rs3411::tx::ble::{AdvIntervals, BleDriver, TxPowerLevel};
use rs3411::tx::encoder::{EncodeError, EncodeResult, OdidEncoder};
use rs3411::tx::wifi::WifiDriver;
use tracing::{debug, info};

#[derive(Default)]
pub struct LogBleDriver;

impl BleDriver for LogBleDriver {
    fn init(&mut self) -> bool {
        info!("ble: radio up");
        true
    }

    fn set_random_static_address(&mut self, mac: [u8; 6]) {
        info!(mac = %hex::encode(mac), "ble: random static address");
    }

    fn configure_legacy(&mut self, intervals: AdvIntervals, power: TxPowerLevel) -> bool {
        info!(?intervals, ?power, "ble: legacy set configured");
        true
    }

    fn configure_long_range(
        &mut self,
        intervals: AdvIntervals,
        power: TxPowerLevel,
    ) -> bool {
        info!(?intervals, ?power, "ble: coded-phy set configured");
        true
    }

    fn set_legacy_payload(&mut self, data: &[u8]) -> bool {
        debug!(frame = %hex::encode(data), "ble legacy");
        true
    }

    fn set_long_range_payload(&mut self, data: &[u8]) -> bool {
        debug!(frame = %hex::encode(data), "ble long-range");
        true
    }

    fn start(&mut self) -> bool {
        info!("ble: advertising started");
        true
    }
}

#[derive(Default)]
pub struct LogWifiDriver;

impl WifiDriver for LogWifiDriver {
    fn init_softap(&mut self, channel: u8, power: u8, mac: [u8; 6]) -> bool {
        info!(channel, power, mac = %hex::encode(mac), "wifi: soft-AP up");
        true
    }

    fn tx_raw(&mut self, frame: &[u8]) -> bool {
        debug!(frame = %hex::encode(frame), "wifi raw");
        true
    }

    fn set_vendor_ie(&mut self, ie: &[u8]) -> bool {
        debug!(ie = %hex::encode(ie), "wifi vendor IE");
        true
    }

    fn clear_vendor_ie(&mut self) -> bool {
        true
    }
}

/// Development placeholder for the ASTM encoder collaborator: frames are
/// tagged raw field dumps, not conformant ODID messages. Swap in a real
/// encoder binding for on-air use.
pub struct DevEncoder;

const MSG_LEN: usize = 25;

fn framed(tag: u8, fields: &[u8]) -> EncodeResult {
    let mut out = vec![tag];
    out.extend_from_slice(fields);
    out.resize(MSG_LEN, 0);
    Ok(out)
}

impl OdidEncoder for DevEncoder {
    fn encode_basic_id(&self, basic_id: &BasicId) -> EncodeResult {
        framed(0x00, &basic_id.uas_id)
    }

    fn encode_location(&self, location: &Location) -> EncodeResult {
        let mut fields = location.latitude.to_le_bytes().to_vec();
        fields.extend_from_slice(&location.longitude.to_le_bytes());
        fields.extend_from_slice(&location.timestamp.to_le_bytes());
        framed(0x10, &fields)
    }

    fn encode_self_id(&self, self_id: &SelfId) -> EncodeResult {
        framed(0x30, &self_id.description)
    }

    fn encode_system(&self, system: &System) -> EncodeResult {
        let mut fields = system.operator_latitude.to_le_bytes().to_vec();
        fields.extend_from_slice(&system.operator_longitude.to_le_bytes());
        framed(0x40, &fields)
    }

    fn encode_operator_id(&self, operator_id: &OperatorId) -> EncodeResult {
        framed(0x50, &operator_id.operator_id)
    }

    fn build_pack(&self, record: &OdidRecord, max_len: usize) -> EncodeResult {
        let mut out = Vec::new();
        let groups: [(bool, EncodeResult); 5] = [
            (
                record.basic_id[0].valid,
                self.encode_basic_id(&record.basic_id[0].value),
            ),
            (record.location.valid, self.encode_location(&record.location.value)),
            (record.self_id.valid, self.encode_self_id(&record.self_id.value)),
            (record.system.valid, self.encode_system(&record.system.value)),
            (
                record.operator_id.valid,
                self.encode_operator_id(&record.operator_id.value),
            ),
        ];
        for (valid, encoded) in groups {
            if valid {
                out.extend_from_slice(&encoded?);
            }
        }
        if out.len() > max_len {
            return Err(EncodeError::BufferTooSmall);
        }
        Ok(out)
    }

    fn build_nan_sync(&self, mac: &[u8; 6], _max_len: usize) -> EncodeResult {
        let mut out = vec![0x80, 0x00];
        out.extend_from_slice(mac);
        Ok(out)
    }

    fn build_nan_action(
        &self,
        record: &OdidRecord,
        mac: &[u8; 6],
        counter: u8,
        max_len: usize,
    ) -> EncodeResult {
        let mut out = vec![0xd0, 0x00];
        out.extend_from_slice(mac);
        out.push(counter);
        out.extend_from_slice(&self.build_pack(record, max_len)?);
        if out.len() > max_len {
            return Err(EncodeError::BufferTooSmall);
        }
        Ok(out)
    }

    fn build_beacon(
        &self,
        record: &OdidRecord,
        mac: &[u8; 6],
        ssid: &str,
        beacon_period_ms: u16,
        counter: u8,
        max_len: usize,
    ) -> EncodeResult {
        // 58 bytes of 802.11 header and fixed elements precede the ODID
        // payload, mirroring the layout the core extracts from
        let mut out = vec![0u8; 58];
        out[0] = 0x80;
        out[10..16].copy_from_slice(mac);
        out[32..34].copy_from_slice(&beacon_period_ms.to_le_bytes());
        let ssid_len = ssid.len().min(20);
        out[34] = ssid_len as u8;
        out[35..35 + ssid_len].copy_from_slice(&ssid.as_bytes()[..ssid_len]);
        out.push(counter);
        out.extend_from_slice(&self.build_pack(record, max_len)?);
        if out.len() > max_len {
            return Err(EncodeError::BufferTooSmall);
        }
        Ok(out)
    }
}
