//! The serial-side transport: MAVLink 2 over a UART.
//!
//! The link idles in `NoPeer` until any non-GCS heartbeat with a non-zero
//! system id arrives, then mirrors that system id for everything it sends
//! (component id `MAV_COMP_ID_ODID_TXRX_1`). While paired it emits a 1 Hz
//! heartbeat and the arming status alongside; inbound handlers feed the
//! ODID store, the parameter protocol and the secure-command subsystem.

use deku::DekuContainerWrite;
use tracing::{debug, info, warn};

use super::frame::{self, MavFrame, Parser};
use super::msgs::*;
use crate::odid::{
    Authentication, BasicId, IdType, Location, OperatorId, SelfId, System,
    UaType,
};
use crate::params::{
    find, KvStore, ParamValue as TypedValue, OPTIONS_DONT_SAVE_BASIC_ID,
    OPTIONS_LOG_RID_INBOUND, PARAM_FLAG_HIDDEN,
};
use crate::secure::SecureCommand;
use crate::transport::TransportContext;
use crate::{FW_VERSION_MAJOR, FW_VERSION_MINOR};

/// Non-blocking byte pipe to the flight controller. `read` returns however
/// many bytes are pending, zero when drained.
pub trait SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> usize;
    fn write(&mut self, data: &[u8]);
}

const HEARTBEAT_INTERVAL_MS: u32 = 1000;
const UNPAIRED_WARN_INTERVAL_MS: u32 = 2000;
const PARAM_STREAM_INTERVAL_MS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    NoPeer,
    Paired { sysid: u8 },
}

pub struct MavlinkLink<S: SerialPort> {
    port: S,
    parser: Parser,
    peer: PeerState,
    tx_seq: u8,
    last_hb_ms: u32,
    last_hb_warn_ms: u32,
    param_stream: Option<u16>,
    param_stream_last_ms: u32,
}

impl<S: SerialPort> MavlinkLink<S> {
    pub fn new(port: S) -> Self {
        info!(
            "rs3411 version {}.{} serial link up",
            FW_VERSION_MAJOR, FW_VERSION_MINOR
        );
        Self {
            port,
            parser: Parser::new(crc_extra),
            peer: PeerState::NoPeer,
            tx_seq: 0,
            last_hb_ms: 0,
            last_hb_warn_ms: 0,
            param_stream: None,
            param_stream_last_ms: 0,
        }
    }

    pub fn paired_sysid(&self) -> Option<u8> {
        match self.peer {
            PeerState::Paired { sysid } => Some(sysid),
            PeerState::NoPeer => None,
        }
    }

    /// One cooperative tick: drain the port, run the pairing/heartbeat
    /// state machine, pace the parameter stream.
    pub fn update<K: KvStore>(&mut self, ctx: &mut TransportContext<'_, K>) {
        self.receive(ctx);

        match self.peer {
            PeerState::Paired { .. } => {
                if ctx.now_ms.wrapping_sub(self.last_hb_ms)
                    >= HEARTBEAT_INTERVAL_MS
                {
                    self.last_hb_ms = ctx.now_ms;
                    self.send_heartbeat();
                    self.send_arm_status(ctx);
                }
            }
            PeerState::NoPeer => {
                let sysid = ctx.params.values().mavlink_sysid;
                if sysid != 0 {
                    self.peer = PeerState::Paired { sysid };
                } else if ctx.now_ms.wrapping_sub(self.last_hb_warn_ms)
                    >= UNPAIRED_WARN_INTERVAL_MS
                {
                    self.last_hb_warn_ms = ctx.now_ms;
                    warn!("waiting for heartbeat");
                }
            }
        }

        self.pace_param_stream(ctx);
    }

    fn receive<K: KvStore>(&mut self, ctx: &mut TransportContext<'_, K>) {
        let mut buf = [0u8; 256];
        loop {
            let n = self.port.read(&mut buf);
            if n == 0 {
                return;
            }
            for &byte in &buf[..n] {
                if let Some(msg) = self.parser.push(byte) {
                    self.process_packet(msg, ctx);
                }
            }
        }
    }

    fn sysid(&self) -> u8 {
        match self.peer {
            PeerState::Paired { sysid } => sysid,
            PeerState::NoPeer => 0,
        }
    }

    fn send_payload(&mut self, msgid: u32, crc_extra: u8, payload: &[u8]) {
        let bytes = frame::encode(
            self.tx_seq,
            self.sysid(),
            MAV_COMP_ID_ODID_TXRX_1,
            msgid,
            payload,
            crc_extra,
        );
        self.tx_seq = self.tx_seq.wrapping_add(1);
        self.port.write(&bytes);
    }

    fn send_heartbeat(&mut self) {
        let hb = Heartbeat {
            mavtype: MAV_TYPE_ODID,
            autopilot: MAV_AUTOPILOT_INVALID,
            ..Default::default()
        };
        if let Ok(payload) = hb.to_bytes() {
            self.send_payload(Heartbeat::ID, Heartbeat::CRC_EXTRA, &payload);
        }
    }

    fn send_arm_status<K: KvStore>(&mut self, ctx: &TransportContext<'_, K>) {
        let state = ctx.arm_state();
        let msg = OdidArmStatusMsg {
            status: state.status as u8,
            error: str_to_field(&state.reason),
        };
        if let Ok(payload) = msg.to_bytes() {
            self.send_payload(
                OdidArmStatusMsg::ID,
                OdidArmStatusMsg::CRC_EXTRA,
                &payload,
            );
        }
    }

    fn send_statustext(&mut self, severity: u8, text: &str) {
        let msg = Statustext {
            severity,
            text: str_to_field(text),
        };
        if let Ok(payload) = msg.to_bytes() {
            self.send_payload(Statustext::ID, Statustext::CRC_EXTRA, &payload);
        }
    }

    fn send_param_value<K: KvStore>(
        &mut self,
        ctx: &TransportContext<'_, K>,
        desc: &'static crate::params::ParamDesc,
    ) {
        let Some(value) = ctx.params.get_as_float(desc) else {
            return;
        };
        let msg = ParamValue {
            param_value: value,
            param_count: crate::params::param_count_float(),
            param_index: crate::params::param_index_float(desc) as u16,
            param_id: str_to_field(desc.name),
            param_type: MAV_PARAM_TYPE_REAL32,
        };
        if let Ok(payload) = msg.to_bytes() {
            self.send_payload(ParamValue::ID, ParamValue::CRC_EXTRA, &payload);
        }
    }

    fn pace_param_stream<K: KvStore>(
        &mut self,
        ctx: &TransportContext<'_, K>,
    ) {
        let Some(index) = self.param_stream else {
            return;
        };
        if ctx.now_ms.wrapping_sub(self.param_stream_last_ms)
            < PARAM_STREAM_INTERVAL_MS
        {
            return;
        }
        self.param_stream_last_ms = ctx.now_ms;
        match crate::params::find_by_index_float(index) {
            Some(desc) => {
                self.send_param_value(ctx, desc);
                self.param_stream = Some(index + 1);
            }
            None => self.param_stream = None,
        }
    }

    fn process_packet<K: KvStore>(
        &mut self,
        msg: MavFrame,
        ctx: &mut TransportContext<'_, K>,
    ) {
        let log_inbound =
            ctx.params.values().option_set(OPTIONS_LOG_RID_INBOUND);
        match msg.msgid {
            Heartbeat::ID => {
                let Some(hb) =
                    decode_payload::<Heartbeat>(&msg.payload, Heartbeat::WIRE_LEN)
                else {
                    return;
                };
                if self.peer == PeerState::NoPeer
                    && msg.sysid > 0
                    && hb.mavtype != MAV_TYPE_GCS
                {
                    info!(sysid = msg.sysid, "paired with flight controller");
                    self.peer = PeerState::Paired { sysid: msg.sysid };
                }
            }

            OdidLocationMsg::ID => {
                let Some(pkt) = decode_payload::<OdidLocationMsg>(
                    &msg.payload,
                    OdidLocationMsg::WIRE_LEN,
                ) else {
                    return;
                };
                if log_inbound {
                    debug!("mavlink: got Location");
                }
                let Ok(status) = pkt.status.try_into() else {
                    return;
                };
                let location = Location {
                    status,
                    direction: pkt.direction,
                    speed_horizontal: pkt.speed_horizontal,
                    speed_vertical: pkt.speed_vertical,
                    latitude: pkt.latitude,
                    longitude: pkt.longitude,
                    altitude_barometric: pkt.altitude_barometric,
                    altitude_geodetic: pkt.altitude_geodetic,
                    height_reference: pkt.height_reference,
                    height: pkt.height,
                    horizontal_accuracy: pkt.horiz_accuracy,
                    vertical_accuracy: pkt.vert_accuracy,
                    barometer_accuracy: pkt.baro_accuracy,
                    speed_accuracy: pkt.speed_accuracy,
                    timestamp: pkt.timestamp,
                    timestamp_accuracy: pkt.timestamp_accuracy,
                };
                ctx.store.update_location(location, ctx.now_ms);
            }

            OdidBasicIdMsg::ID => {
                let Some(pkt) = decode_payload::<OdidBasicIdMsg>(
                    &msg.payload,
                    OdidBasicIdMsg::WIRE_LEN,
                ) else {
                    return;
                };
                if log_inbound {
                    debug!("mavlink: got BasicID");
                }
                let (Ok(id_type), Ok(ua_type)) = (
                    IdType::try_from(pkt.id_type),
                    UaType::try_from(pkt.ua_type),
                ) else {
                    return;
                };
                let basic_id = BasicId {
                    id_or_mac: pkt.id_or_mac,
                    id_type,
                    ua_type,
                    uas_id: pkt.uas_id,
                };
                if ctx.store.update_basic_id(0, basic_id, ctx.now_ms) {
                    self.save_basic_id_params(ctx, &basic_id);
                }
            }

            OdidAuthenticationMsg::ID => {
                let Some(pkt) = decode_payload::<OdidAuthenticationMsg>(
                    &msg.payload,
                    OdidAuthenticationMsg::WIRE_LEN,
                ) else {
                    return;
                };
                if log_inbound {
                    debug!("mavlink: got Auth");
                }
                ctx.store.update_authentication(
                    Authentication {
                        authentication_type: pkt.authentication_type,
                        data_page: pkt.data_page,
                        last_page_index: pkt.last_page_index,
                        length: pkt.length,
                        timestamp: pkt.timestamp,
                        authentication_data: pkt.authentication_data,
                    },
                    ctx.now_ms,
                );
            }

            OdidSelfIdMsg::ID => {
                let Some(pkt) = decode_payload::<OdidSelfIdMsg>(
                    &msg.payload,
                    OdidSelfIdMsg::WIRE_LEN,
                ) else {
                    return;
                };
                if log_inbound {
                    debug!("mavlink: got SelfID");
                }
                ctx.store.update_self_id(
                    SelfId {
                        description_type: pkt.description_type,
                        description: pkt.description,
                    },
                    ctx.now_ms,
                );
            }

            OdidSystemMsg::ID => {
                let Some(pkt) = decode_payload::<OdidSystemMsg>(
                    &msg.payload,
                    OdidSystemMsg::WIRE_LEN,
                ) else {
                    return;
                };
                if log_inbound {
                    debug!("mavlink: got System");
                }
                ctx.store.update_system(
                    System {
                        operator_location_type: pkt.operator_location_type,
                        classification_type: pkt.classification_type,
                        operator_latitude: pkt.operator_latitude,
                        operator_longitude: pkt.operator_longitude,
                        area_count: pkt.area_count,
                        area_radius: pkt.area_radius,
                        area_ceiling: pkt.area_ceiling,
                        area_floor: pkt.area_floor,
                        category_eu: pkt.category_eu,
                        class_eu: pkt.class_eu,
                        operator_altitude_geo: pkt.operator_altitude_geo,
                        timestamp: pkt.timestamp,
                    },
                    ctx.now_ms,
                );
            }

            OdidSystemUpdateMsg::ID => {
                let Some(pkt) = decode_payload::<OdidSystemUpdateMsg>(
                    &msg.payload,
                    OdidSystemUpdateMsg::WIRE_LEN,
                ) else {
                    return;
                };
                if log_inbound {
                    debug!("mavlink: got System update");
                }
                ctx.store.update_system_operator(
                    pkt.operator_latitude,
                    pkt.operator_longitude,
                    pkt.operator_altitude_geo,
                    pkt.timestamp,
                    ctx.now_ms,
                );
            }

            OdidOperatorIdMsg::ID => {
                let Some(pkt) = decode_payload::<OdidOperatorIdMsg>(
                    &msg.payload,
                    OdidOperatorIdMsg::WIRE_LEN,
                ) else {
                    return;
                };
                if log_inbound {
                    debug!("mavlink: got OperatorID");
                }
                ctx.store.update_operator_id(
                    OperatorId {
                        operator_id_type: pkt.operator_id_type,
                        operator_id: pkt.operator_id,
                    },
                    ctx.now_ms,
                );
            }

            ParamRequestList::ID => {
                self.param_stream = Some(0);
                self.param_stream_last_ms = ctx.now_ms;
            }

            ParamRequestRead::ID => {
                let Some(pkt) = decode_payload::<ParamRequestRead>(
                    &msg.payload,
                    ParamRequestRead::WIRE_LEN,
                ) else {
                    return;
                };
                let desc = if pkt.param_index < 0 {
                    find(field_to_str(&pkt.param_id))
                } else {
                    crate::params::find_by_index_float(pkt.param_index as u16)
                };
                let Some(desc) = desc else {
                    return;
                };
                if desc.flags & PARAM_FLAG_HIDDEN != 0 {
                    return;
                }
                self.send_param_value(ctx, desc);
            }

            ParamSet::ID => self.handle_param_set(msg, ctx),

            SecureCommandMsg::ID => self.handle_secure_command(msg, ctx),

            _ => {
                // we don't care about other packets
            }
        }
    }

    /// Persist a streamed basic id into the parameters so the module can
    /// broadcast it before the flight controller comes up next boot.
    fn save_basic_id_params<K: KvStore>(
        &mut self,
        ctx: &mut TransportContext<'_, K>,
        basic_id: &BasicId,
    ) {
        if ctx.params.values().option_set(OPTIONS_DONT_SAVE_BASIC_ID) {
            return;
        }
        let uas_id = basic_id.uas_id_str();
        if uas_id.is_empty() {
            return;
        }
        let values = ctx.params.values();
        if values.get(crate::params::Field::UasId)
            == TypedValue::Str(uas_id.to_string())
            && values.id_type == basic_id.id_type as u8
            && values.ua_type == basic_id.ua_type as u8
        {
            return;
        }
        for (name, value) in [
            ("UAS_ID", TypedValue::Str(uas_id.to_string())),
            ("ID_TYPE", TypedValue::U8(basic_id.id_type as u8)),
            ("UA_TYPE", TypedValue::U8(basic_id.ua_type as u8)),
        ] {
            if let Some(desc) = find(name) {
                ctx.params.set(desc, value);
            }
        }
        info!(uas_id, "saved streamed basic id to parameters");
    }

    fn handle_param_set<K: KvStore>(
        &mut self,
        msg: MavFrame,
        ctx: &mut TransportContext<'_, K>,
    ) {
        let Some(pkt) =
            decode_payload::<ParamSet>(&msg.payload, ParamSet::WIRE_LEN)
        else {
            return;
        };
        if pkt.param_type != MAV_PARAM_TYPE_REAL32 {
            return;
        }
        let Some(desc) = find(field_to_str(&pkt.param_id)) else {
            return;
        };
        let Some(current) = ctx.params.get_as_float(desc) else {
            return;
        };
        let locked = ctx.params.values().lock_level > 0
            && !(desc.name == "LOCK_LEVEL" && pkt.param_value > current);
        if locked {
            // the only write allowed under lock is raising the lock itself
            self.send_statustext(MAV_SEVERITY_ERROR, "Parameters locked");
        } else {
            ctx.params.set_as_float(desc, pkt.param_value);
        }
        self.send_param_value(ctx, desc);
    }

    fn handle_secure_command<K: KvStore>(
        &mut self,
        msg: MavFrame,
        ctx: &mut TransportContext<'_, K>,
    ) {
        let Some(pkt) = decode_payload::<SecureCommandMsg>(
            &msg.payload,
            SecureCommandMsg::WIRE_LEN,
        ) else {
            return;
        };
        let total = usize::from(pkt.data_length) + usize::from(pkt.sig_length);
        let cmd = SecureCommand {
            sequence: pkt.sequence,
            operation: pkt.operation,
            data_length: u16::from(pkt.data_length),
            sig_length: pkt.sig_length,
            data: pkt.data[..total.min(pkt.data.len())].to_vec(),
        };
        let mac = ctx.mac;
        let outcome = ctx.secure.handle_command(
            ctx.params,
            &cmd,
            ctx.now_us,
            &mac,
        );
        let mut reply = SecureCommandReplyMsg {
            sequence: outcome.reply.sequence,
            operation: outcome.reply.operation,
            result: outcome.reply.result as u8,
            data_length: outcome.reply.data.len() as u8,
            ..Default::default()
        };
        let n = outcome.reply.data.len().min(reply.data.len());
        reply.data[..n].copy_from_slice(&outcome.reply.data[..n]);
        if let Ok(payload) = reply.to_bytes() {
            self.send_payload(
                SecureCommandReplyMsg::ID,
                SecureCommandReplyMsg::CRC_EXTRA,
                &payload,
            );
        }
        for note in &outcome.notes {
            self.send_statustext(MAV_SEVERITY_INFO, note);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odid::OdidStore;
    use crate::params::{MemoryKv, ParamStore};
    use crate::secure::SecureState;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct PortData {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
    }

    /// Cloneable handle so tests can keep injecting after the link takes
    /// its copy.
    #[derive(Clone, Default)]
    struct MockPort(std::rc::Rc<std::cell::RefCell<PortData>>);

    impl SerialPort for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> usize {
            let mut inner = self.0.borrow_mut();
            let mut n = 0;
            while n < buf.len() {
                match inner.rx.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            n
        }

        fn write(&mut self, data: &[u8]) {
            self.0.borrow_mut().tx.extend_from_slice(data);
        }
    }

    struct Fixture {
        store: OdidStore,
        params: ParamStore<MemoryKv>,
        secure: SecureState,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: OdidStore::new(),
                params: ParamStore::load(MemoryKv::default()),
                secure: SecureState::new(),
            }
        }

        fn ctx(&mut self, now_ms: u32) -> TransportContext<'_, MemoryKv> {
            TransportContext {
                store: &mut self.store,
                params: &mut self.params,
                secure: &mut self.secure,
                parse_fail: None,
                now_ms,
                now_us: now_ms.wrapping_mul(1000),
                mac: [0xaa; 8],
            }
        }
    }

    fn inject<T: DekuContainerWrite>(
        port: &MockPort,
        msgid: u32,
        extra: u8,
        msg: &T,
        sysid: u8,
    ) {
        let payload = msg.to_bytes().unwrap();
        let bytes = frame::encode(0, sysid, 1, msgid, &payload, extra);
        port.0.borrow_mut().rx.extend(bytes);
    }

    fn drain_frames(port: &MockPort) -> Vec<MavFrame> {
        let mut parser = Parser::new(crc_extra);
        let mut out = Vec::new();
        let bytes: Vec<u8> = port.0.borrow_mut().tx.drain(..).collect();
        for b in bytes {
            if let Some(f) = parser.push(b) {
                out.push(f);
            }
        }
        out
    }

    #[test]
    fn pairing_ignores_gcs() {
        let port = MockPort::default();
        let mut fixture = Fixture::new();

        inject(
            &port,
            Heartbeat::ID,
            Heartbeat::CRC_EXTRA,
            &Heartbeat {
                mavtype: MAV_TYPE_GCS,
                ..Default::default()
            },
            255,
        );
        let mut link = MavlinkLink::new(port.clone());
        link.update(&mut fixture.ctx(10));
        assert_eq!(link.paired_sysid(), None);

        inject(
            &port,
            Heartbeat::ID,
            Heartbeat::CRC_EXTRA,
            &Heartbeat {
                mavtype: 2,
                ..Default::default()
            },
            42,
        );
        link.update(&mut fixture.ctx(20));
        assert_eq!(link.paired_sysid(), Some(42));
    }

    #[test]
    fn paired_link_heartbeats_with_arm_status() {
        let port = MockPort::default();
        let mut fixture = Fixture::new();
        inject(
            &port,
            Heartbeat::ID,
            Heartbeat::CRC_EXTRA,
            &Heartbeat {
                mavtype: 2,
                ..Default::default()
            },
            42,
        );
        let mut link = MavlinkLink::new(port.clone());
        link.update(&mut fixture.ctx(10));
        link.update(&mut fixture.ctx(1500));

        let frames = drain_frames(&port);
        let ids: Vec<u32> = frames.iter().map(|f| f.msgid).collect();
        assert!(ids.contains(&Heartbeat::ID));
        assert!(ids.contains(&OdidArmStatusMsg::ID));
        // everything we send mirrors the peer's system id
        assert!(frames.iter().all(|f| f.sysid == 42));
        assert!(frames.iter().all(|f| f.compid == MAV_COMP_ID_ODID_TXRX_1));

        let arm = frames
            .iter()
            .find(|f| f.msgid == OdidArmStatusMsg::ID)
            .unwrap();
        let decoded: OdidArmStatusMsg =
            decode_payload(&arm.payload, OdidArmStatusMsg::WIRE_LEN).unwrap();
        assert_eq!(decoded.status, 1);
        assert!(field_to_str(&decoded.error).contains("LOC"));
    }

    #[test]
    fn location_feeds_store() {
        let port = MockPort::default();
        let mut fixture = Fixture::new();
        inject(
            &port,
            OdidLocationMsg::ID,
            OdidLocationMsg::CRC_EXTRA,
            &OdidLocationMsg {
                latitude: 470_000_000,
                longitude: 80_000_000,
                timestamp: 42.5,
                status: 2,
                ..Default::default()
            },
            1,
        );
        let mut link = MavlinkLink::new(port.clone());
        link.update(&mut fixture.ctx(321));
        let slot = &fixture.store.record().location;
        assert!(slot.valid);
        assert_eq!(slot.last_update_ms, 321);
        assert_eq!(slot.value.latitude, 470_000_000);
        assert_eq!(
            slot.value.status,
            crate::odid::OperationalStatus::Airborne
        );
    }

    #[test]
    fn basic_id_saved_to_parameters() {
        let port = MockPort::default();
        let mut fixture = Fixture::new();
        inject(
            &port,
            OdidBasicIdMsg::ID,
            OdidBasicIdMsg::CRC_EXTRA,
            &OdidBasicIdMsg {
                id_type: 1,
                ua_type: 2,
                uas_id: crate::odid::copy_str_field(b"SN0042"),
                ..Default::default()
            },
            1,
        );
        let mut link = MavlinkLink::new(port.clone());
        link.update(&mut fixture.ctx(5));
        assert!(fixture.store.record().basic_id[0].valid);
        assert!(fixture.params.values().have_basic_id_info());
        assert_eq!(fixture.params.values().id_type, 1);

        // the option bit disables the save
        let mut fixture2 = Fixture::new();
        let desc = find("OPTIONS").unwrap();
        fixture2
            .params
            .set(desc, TypedValue::U8(OPTIONS_DONT_SAVE_BASIC_ID));
        let port2 = MockPort::default();
        inject(
            &port2,
            OdidBasicIdMsg::ID,
            OdidBasicIdMsg::CRC_EXTRA,
            &OdidBasicIdMsg {
                id_type: 1,
                ua_type: 2,
                uas_id: crate::odid::copy_str_field(b"SN0042"),
                ..Default::default()
            },
            1,
        );
        let mut link2 = MavlinkLink::new(port2.clone());
        link2.update(&mut fixture2.ctx(5));
        assert!(!fixture2.params.values().have_basic_id_info());
    }

    #[test]
    fn param_request_list_streams_all_floats() {
        let port = MockPort::default();
        let mut fixture = Fixture::new();
        inject(
            &port,
            ParamRequestList::ID,
            ParamRequestList::CRC_EXTRA,
            &ParamRequestList::default(),
            255,
        );
        let mut link = MavlinkLink::new(port.clone());
        let mut now = 0;
        link.update(&mut fixture.ctx(now));
        let total = crate::params::param_count_float();
        for _ in 0..=total {
            now += 50;
            link.update(&mut fixture.ctx(now));
        }
        let frames = drain_frames(&port);
        let values: Vec<ParamValue> = frames
            .iter()
            .filter(|f| f.msgid == ParamValue::ID)
            .map(|f| decode_payload(&f.payload, ParamValue::WIRE_LEN).unwrap())
            .collect();
        assert_eq!(values.len(), usize::from(total));
        for (i, v) in values.iter().enumerate() {
            assert_eq!(v.param_index, i as u16);
            assert_eq!(v.param_count, total);
        }
        // hidden parameters must not leak into the stream
        assert!(values
            .iter()
            .all(|v| field_to_str(&v.param_id) != "DONE_INIT"));
    }

    #[test]
    fn param_set_honours_lock_level() {
        let port = MockPort::default();
        let mut fixture = Fixture::new();
        let lock = find("LOCK_LEVEL").unwrap();
        fixture.params.set(lock, TypedValue::I8(1));

        inject(
            &port,
            ParamSet::ID,
            ParamSet::CRC_EXTRA,
            &ParamSet {
                param_value: 3.0,
                param_id: str_to_field("BT4_RATE"),
                param_type: MAV_PARAM_TYPE_REAL32,
                ..Default::default()
            },
            255,
        );
        let mut link = MavlinkLink::new(port.clone());
        link.update(&mut fixture.ctx(10));
        assert_eq!(fixture.params.values().bt4_rate, 1.0);
        let frames = drain_frames(&port);
        let text = frames
            .iter()
            .find(|f| f.msgid == Statustext::ID)
            .map(|f| {
                decode_payload::<Statustext>(&f.payload, Statustext::WIRE_LEN)
                    .unwrap()
            })
            .unwrap();
        assert_eq!(field_to_str(&text.text), "Parameters locked");

        // raising the lock is the one permitted write
        inject(
            &port,
            ParamSet::ID,
            ParamSet::CRC_EXTRA,
            &ParamSet {
                param_value: 2.0,
                param_id: str_to_field("LOCK_LEVEL"),
                param_type: MAV_PARAM_TYPE_REAL32,
                ..Default::default()
            },
            255,
        );
        link.update(&mut fixture.ctx(20));
        assert_eq!(fixture.params.values().lock_level, 2);
    }

    #[test]
    fn secure_command_roundtrip_on_the_wire() {
        let port = MockPort::default();
        let mut fixture = Fixture::new();
        let mut cmd = SecureCommandMsg {
            sequence: 77,
            operation: crate::secure::ops::GET_SESSION_KEY,
            ..Default::default()
        };
        cmd.data_length = 0;
        cmd.sig_length = 0;
        inject(
            &port,
            SecureCommandMsg::ID,
            SecureCommandMsg::CRC_EXTRA,
            &cmd,
            255,
        );
        let mut link = MavlinkLink::new(port.clone());
        link.update(&mut fixture.ctx(10));
        let frames = drain_frames(&port);
        let reply: SecureCommandReplyMsg = frames
            .iter()
            .find(|f| f.msgid == SecureCommandReplyMsg::ID)
            .map(|f| {
                decode_payload(&f.payload, SecureCommandReplyMsg::WIRE_LEN)
                    .unwrap()
            })
            .unwrap();
        assert_eq!(reply.sequence, 77);
        assert_eq!(reply.result, 0);
        assert_eq!(usize::from(reply.data_length), 8);
    }
}
