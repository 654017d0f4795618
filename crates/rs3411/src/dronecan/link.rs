//! The CAN-side transport: a DroneCAN node speaking the remoteid family.
//!
//! Starts without a node id and runs dynamic node-id allocation
//! (requests carrying a growing prefix of the hardware UID, randomised
//! deadlines); once the allocator confirms the full UID the assigned id is
//! latched for the rest of the session. Allocated, the node broadcasts
//! NodeStatus and ArmStatus at 1 Hz and serves GetNodeInfo, RestartNode,
//! param.GetSet and SecureCommand while ingesting the remoteid broadcast
//! groups.

use rand::Rng;
use tracing::{debug, info, warn};

use super::driver::{CanIface, GuardedBus};
use super::msgs::*;
use super::transfer::{
    RxTransfer, TransferEngine, TransferType, PRIORITY_LOW,
};
use crate::clock::Micros64;
use crate::odid::{self, copy_str_field};
use crate::params::{
    KvStore, ParamDesc, ParamType, ParamValue as TypedValue, PARAM_FLAG_HIDDEN,
    PARAM_FLAG_PASSWORD,
};
use crate::secure::SecureCommand;
use crate::transport::TransportContext;
use crate::{BOARD_ID, FW_GIT_VERSION, FW_VERSION_MAJOR, FW_VERSION_MINOR};

pub const CAN_NODE_NAME: &str = "org.rs3411.remoteid";

const NODE_STATUS_INTERVAL_MS: u32 = 1000;
/// Consecutive send failures tolerated before the oldest transfer is
/// dropped.
const TX_RETRY_LIMIT: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DnaState {
    Unallocated {
        uid_offset: usize,
        next_request_ms: u32,
    },
    Allocated,
}

pub struct DroneCanLink<I: CanIface> {
    bus: GuardedBus<I>,
    engine: TransferEngine,
    dna: DnaState,
    micros64: Micros64,
    uid: [u8; 16],
    tx_fail_count: u8,
    last_node_status_ms: u32,
    restart_requested: bool,
}

impl<I: CanIface> DroneCanLink<I> {
    /// `mac` seeds the first six bytes of the 16-byte allocation UID.
    pub fn new(iface: I, mac: [u8; 6]) -> Self {
        let mut uid = [0u8; 16];
        uid[..6].copy_from_slice(&mac);
        Self {
            bus: GuardedBus::new(iface),
            engine: TransferEngine::new(),
            dna: DnaState::Unallocated {
                uid_offset: 0,
                next_request_ms: 0,
            },
            micros64: Micros64::default(),
            uid,
            tx_fail_count: 0,
            last_node_status_ms: 0,
            restart_requested: false,
        }
    }

    pub fn node_id(&self) -> u8 {
        self.engine.local_node_id()
    }

    /// A verified RestartNode request arrived; the platform layer decides
    /// what a reboot means.
    pub fn take_restart_request(&mut self) -> bool {
        std::mem::take(&mut self.restart_requested)
    }

    pub fn update<K: KvStore>(&mut self, ctx: &mut TransportContext<'_, K>) {
        if self.do_dna(ctx) {
            if ctx.now_ms.wrapping_sub(self.last_node_status_ms)
                >= NODE_STATUS_INTERVAL_MS
            {
                self.last_node_status_ms = ctx.now_ms;
                self.send_node_status(ctx.now_ms);
                self.send_arm_status(ctx);
            }
        }
        self.process_tx(ctx.now_ms);
        self.process_rx(ctx);
    }

    /// Returns true while a node id is held. Unallocated, broadcasts one
    /// allocation request per deadline window and reports not-ready.
    fn do_dna<K: KvStore>(&mut self, ctx: &TransportContext<'_, K>) -> bool {
        let DnaState::Unallocated {
            uid_offset,
            next_request_ms,
        } = self.dna
        else {
            return true;
        };
        if next_request_ms != 0 && ctx.now_ms < next_request_ms {
            return false;
        }

        let uid_size =
            (ALLOCATION_UNIQUE_ID_LEN - uid_offset).min(ALLOCATION_MAX_UID_PER_REQUEST);
        let request = Allocation {
            node_id: ctx.params.values().can_node,
            first_part_of_unique_id: uid_offset == 0,
            unique_id: self.uid[uid_offset..uid_offset + uid_size].to_vec(),
        };
        if self
            .engine
            .broadcast(
                PRIORITY_LOW,
                ALLOCATION_ID,
                ALLOCATION_SIGNATURE,
                &request.encode(),
            )
            .is_err()
        {
            warn!("allocation request too long for an anonymous frame");
        }

        self.dna = DnaState::Unallocated {
            // the confirmed prefix must be re-earned on every exchange
            uid_offset: 0,
            next_request_ms: ctx.now_ms
                + ALLOCATION_MIN_REQUEST_PERIOD_MS
                + rand::thread_rng().gen_range(1..=ALLOCATION_MAX_FOLLOWUP_DELAY_MS),
        };
        false
    }

    fn handle_allocation_response<K: KvStore>(
        &mut self,
        transfer: &RxTransfer,
        ctx: &TransportContext<'_, K>,
    ) {
        let DnaState::Unallocated { .. } = self.dna else {
            return;
        };
        let mut next_request_ms = ctx.now_ms
            + ALLOCATION_MIN_REQUEST_PERIOD_MS
            + rand::thread_rng().gen_range(1..=ALLOCATION_MAX_FOLLOWUP_DELAY_MS);

        let Some(msg) = Allocation::decode(&transfer.payload) else {
            return;
        };
        let confirmed = msg.unique_id.len().min(ALLOCATION_UNIQUE_ID_LEN);
        if msg.unique_id[..confirmed] != self.uid[..confirmed] {
            // someone else's allocation exchange
            self.dna = DnaState::Unallocated {
                uid_offset: 0,
                next_request_ms,
            };
            return;
        }

        if confirmed < ALLOCATION_UNIQUE_ID_LEN {
            // allocator confirmed a prefix; follow up quickly with the rest
            next_request_ms -= ALLOCATION_MIN_REQUEST_PERIOD_MS;
            self.dna = DnaState::Unallocated {
                uid_offset: confirmed,
                next_request_ms,
            };
        } else {
            self.engine.set_local_node_id(msg.node_id);
            self.dna = DnaState::Allocated;
            info!(node_id = msg.node_id, "node id allocated");
            self.send_log(&format!("node id {} allocated", msg.node_id));
        }
    }

    fn send_node_status(&mut self, now_ms: u32) {
        let status = NodeStatus {
            uptime_sec: now_ms / 1000,
            health: NODE_HEALTH_OK,
            mode: NODE_MODE_OPERATIONAL,
            sub_mode: 0,
            vendor_specific_status_code: 0,
        };
        let _ = self.engine.broadcast(
            PRIORITY_LOW,
            NODE_STATUS_ID,
            NODE_STATUS_SIGNATURE,
            &status.encode(),
        );
    }

    fn send_arm_status<K: KvStore>(&mut self, ctx: &TransportContext<'_, K>) {
        let state = ctx.arm_state();
        let mut error = state.reason.into_bytes();
        error.truncate(50);
        let msg = ArmStatusMsg {
            status: state.status as u8,
            error,
        };
        let _ = self.engine.broadcast(
            PRIORITY_LOW,
            ARM_STATUS_ID,
            ARM_STATUS_SIGNATURE,
            &msg.encode(),
        );
    }

    fn send_log(&mut self, text: &str) {
        let msg = LogMessage {
            level: LOG_LEVEL_INFO,
            source: b"rs3411".to_vec(),
            text: text.as_bytes().to_vec(),
        };
        let _ = self.engine.broadcast(
            PRIORITY_LOW,
            LOG_MESSAGE_ID,
            LOG_MESSAGE_SIGNATURE,
            &msg.encode(),
        );
    }

    fn process_tx(&mut self, now_ms: u32) {
        while let Some(frame) = self.engine.peek_tx().copied() {
            if self.bus.send(&frame, now_ms).is_ok() {
                self.engine.pop_tx();
                self.tx_fail_count = 0;
            } else {
                if self.tx_fail_count < TX_RETRY_LIMIT {
                    self.tx_fail_count += 1;
                } else {
                    // give up on the oldest transfer frame
                    self.engine.pop_tx();
                    self.tx_fail_count = 0;
                }
                break;
            }
        }
    }

    fn process_rx<K: KvStore>(&mut self, ctx: &mut TransportContext<'_, K>) {
        let timestamp_us = self.micros64.update(ctx.now_us);
        loop {
            let frame = match self.bus.receive() {
                Ok(Some(frame)) => frame,
                Ok(None) | Err(_) => return,
            };
            let allocated = self.engine.local_node_id() != 0;
            let transfer = self.engine.handle_rx_frame(
                &frame,
                timestamp_us,
                |data_type_id, transfer_type, _source| {
                    should_accept(allocated, data_type_id, transfer_type)
                },
            );
            if let Some(transfer) = transfer {
                self.dispatch(transfer, ctx);
            }
        }
    }

    fn dispatch<K: KvStore>(
        &mut self,
        transfer: RxTransfer,
        ctx: &mut TransportContext<'_, K>,
    ) {
        match (transfer.transfer_type, transfer.data_type_id) {
            (TransferType::Broadcast, ALLOCATION_ID) => {
                self.handle_allocation_response(&transfer, ctx);
            }
            (TransferType::Broadcast, BASIC_ID_ID) => {
                debug!("got BasicID");
                self.handle_basic_id(&transfer, ctx);
            }
            (TransferType::Broadcast, LOCATION_ID) => {
                debug!("got Location");
                self.handle_location(&transfer, ctx);
            }
            (TransferType::Broadcast, SELF_ID_ID) => {
                debug!("got SelfID");
                self.handle_self_id(&transfer, ctx);
            }
            (TransferType::Broadcast, SYSTEM_ID) => {
                debug!("got System");
                self.handle_system(&transfer, ctx);
            }
            (TransferType::Broadcast, OPERATOR_ID_ID) => {
                debug!("got OperatorID");
                self.handle_operator_id(&transfer, ctx);
            }
            (TransferType::Request, id) if id == u16::from(GET_NODE_INFO_ID) => {
                self.handle_get_node_info(&transfer, ctx.now_ms);
            }
            (TransferType::Request, id) if id == u16::from(RESTART_NODE_ID) => {
                self.handle_restart(&transfer);
            }
            (TransferType::Request, id) if id == u16::from(PARAM_GETSET_ID) => {
                self.handle_param_getset(&transfer, ctx);
            }
            (TransferType::Request, id) if id == u16::from(SECURE_COMMAND_ID) => {
                self.handle_secure_command(&transfer, ctx);
            }
            _ => {}
        }
    }

    fn handle_basic_id<K: KvStore>(
        &mut self,
        transfer: &RxTransfer,
        ctx: &mut TransportContext<'_, K>,
    ) {
        let Some(pkt) = BasicIdMsg::decode(&transfer.payload) else {
            return;
        };
        let (Ok(id_type), Ok(ua_type)) = (
            odid::IdType::try_from(pkt.id_type),
            odid::UaType::try_from(pkt.ua_type),
        ) else {
            return;
        };
        let basic_id = odid::BasicId {
            id_or_mac: copy_str_field(&pkt.id_or_mac),
            id_type,
            ua_type,
            uas_id: copy_str_field(&pkt.uas_id),
        };
        ctx.store.update_basic_id(0, basic_id, ctx.now_ms);
    }

    fn handle_location<K: KvStore>(
        &mut self,
        transfer: &RxTransfer,
        ctx: &mut TransportContext<'_, K>,
    ) {
        let Some(pkt) = LocationMsg::decode(&transfer.payload) else {
            return;
        };
        let Ok(status) = odid::OperationalStatus::try_from(pkt.status) else {
            return;
        };
        let location = odid::Location {
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
            horizontal_accuracy: pkt.horizontal_accuracy,
            vertical_accuracy: pkt.vertical_accuracy,
            barometer_accuracy: pkt.barometer_accuracy,
            speed_accuracy: pkt.speed_accuracy,
            timestamp: pkt.timestamp,
            timestamp_accuracy: pkt.timestamp_accuracy,
        };
        ctx.store.update_location(location, ctx.now_ms);
    }

    fn handle_self_id<K: KvStore>(
        &mut self,
        transfer: &RxTransfer,
        ctx: &mut TransportContext<'_, K>,
    ) {
        let Some(pkt) = SelfIdMsg::decode(&transfer.payload) else {
            return;
        };
        ctx.store.update_self_id(
            odid::SelfId {
                description_type: pkt.description_type,
                description: copy_str_field(&pkt.description),
            },
            ctx.now_ms,
        );
    }

    fn handle_system<K: KvStore>(
        &mut self,
        transfer: &RxTransfer,
        ctx: &mut TransportContext<'_, K>,
    ) {
        let Some(pkt) = SystemMsg::decode(&transfer.payload) else {
            return;
        };
        ctx.store.update_system(
            odid::System {
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

    fn handle_operator_id<K: KvStore>(
        &mut self,
        transfer: &RxTransfer,
        ctx: &mut TransportContext<'_, K>,
    ) {
        let Some(pkt) = OperatorIdMsg::decode(&transfer.payload) else {
            return;
        };
        ctx.store.update_operator_id(
            odid::OperatorId {
                operator_id_type: pkt.operator_id_type,
                operator_id: copy_str_field(&pkt.operator_id),
            },
            ctx.now_ms,
        );
    }

    fn handle_get_node_info(&mut self, transfer: &RxTransfer, now_ms: u32) {
        let response = GetNodeInfoResponse {
            status: NodeStatus {
                uptime_sec: now_ms / 1000,
                health: NODE_HEALTH_OK,
                mode: NODE_MODE_OPERATIONAL,
                sub_mode: 0,
                vendor_specific_status_code: 0,
            },
            software_version: SoftwareVersion {
                major: FW_VERSION_MAJOR,
                minor: FW_VERSION_MINOR,
                optional_field_flags: SOFTWARE_VERSION_FLAG_VCS_COMMIT
                    | SOFTWARE_VERSION_FLAG_IMAGE_CRC,
                vcs_commit: FW_GIT_VERSION,
                image_crc: 0,
            },
            hardware_version: HardwareVersion {
                major: (BOARD_ID >> 8) as u8,
                minor: (BOARD_ID & 0xFF) as u8,
                unique_id: self.uid,
                certificate_of_authenticity: Vec::new(),
            },
            name: CAN_NODE_NAME.as_bytes().to_vec(),
        };
        let _ = self.engine.respond(
            transfer.source_node_id,
            transfer.priority,
            GET_NODE_INFO_ID,
            GET_NODE_INFO_SIGNATURE,
            transfer.transfer_id,
            &response.encode(),
        );
    }

    fn handle_restart(&mut self, transfer: &RxTransfer) {
        let ok = RestartNodeRequest::decode(&transfer.payload)
            .map(|req| req.magic_number == RESTART_NODE_MAGIC)
            .unwrap_or(false);
        let _ = self.engine.respond(
            transfer.source_node_id,
            transfer.priority,
            RESTART_NODE_ID,
            RESTART_NODE_SIGNATURE,
            transfer.transfer_id,
            &RestartNodeResponse { ok }.encode(),
        );
        if ok {
            info!("restart requested over DroneCAN");
            self.restart_requested = true;
        }
    }

    fn handle_param_getset<K: KvStore>(
        &mut self,
        transfer: &RxTransfer,
        ctx: &mut TransportContext<'_, K>,
    ) {
        let Some(req) = ParamGetSetRequest::decode(&transfer.payload) else {
            return;
        };
        let desc = if !req.name.is_empty() {
            std::str::from_utf8(&req.name).ok().and_then(crate::params::find)
        } else {
            crate::params::find_by_index(req.index)
        };
        let response = match desc {
            Some(desc) if desc.flags & PARAM_FLAG_HIDDEN == 0 => {
                self.apply_param_write(ctx, desc, &req.value);
                param_response(ctx, desc)
            }
            _ => ParamGetSetResponse::default(),
        };
        let _ = self.engine.respond(
            transfer.source_node_id,
            transfer.priority,
            PARAM_GETSET_ID,
            PARAM_GETSET_SIGNATURE,
            transfer.transfer_id,
            &response.encode(),
        );
    }

    fn apply_param_write<K: KvStore>(
        &mut self,
        ctx: &mut TransportContext<'_, K>,
        desc: &'static ParamDesc,
        value: &ParamUnionValue,
    ) {
        match value {
            ParamUnionValue::Empty => {}
            ParamUnionValue::Integer(v) => {
                ctx.params.set_as_float(desc, *v as f32);
            }
            ParamUnionValue::Real(v) => {
                ctx.params.set_as_float(desc, *v);
            }
            ParamUnionValue::Boolean(v) => {
                ctx.params.set_as_float(desc, f32::from(*v));
            }
            ParamUnionValue::Str(bytes) => {
                if let Ok(s) = std::str::from_utf8(bytes) {
                    ctx.params.set(desc, TypedValue::Str(s.to_string()));
                }
            }
        }
    }

    fn handle_secure_command<K: KvStore>(
        &mut self,
        transfer: &RxTransfer,
        ctx: &mut TransportContext<'_, K>,
    ) {
        let Some(req) = SecureCommandRequest::decode(&transfer.payload) else {
            return;
        };
        let sig_length = usize::from(req.sig_length);
        if sig_length > req.data.len() {
            return;
        }
        let cmd = SecureCommand {
            sequence: req.sequence,
            operation: req.operation,
            data_length: (req.data.len() - sig_length) as u16,
            sig_length: req.sig_length,
            data: req.data,
        };
        let mac = ctx.mac;
        let outcome =
            ctx.secure.handle_command(ctx.params, &cmd, ctx.now_us, &mac);
        let response = SecureCommandResponse {
            sequence: outcome.reply.sequence,
            operation: outcome.reply.operation,
            result: outcome.reply.result as u8,
            data: outcome.reply.data,
        };
        let _ = self.engine.respond(
            transfer.source_node_id,
            transfer.priority,
            SECURE_COMMAND_ID,
            SECURE_COMMAND_SIGNATURE,
            transfer.transfer_id,
            &response.encode(),
        );
        for note in &outcome.notes {
            self.send_log(note);
        }
    }
}

fn param_response<K: KvStore>(
    ctx: &TransportContext<'_, K>,
    desc: &'static ParamDesc,
) -> ParamGetSetResponse {
    let (value, default_value) = match desc.ptype {
        ParamType::U8 | ParamType::I8 | ParamType::U32 => {
            let current = match ctx.params.values().get(desc.field) {
                TypedValue::U8(v) => i64::from(v),
                TypedValue::I8(v) => i64::from(v),
                TypedValue::U32(v) => i64::from(v),
                _ => 0,
            };
            (
                ParamUnionValue::Integer(current),
                ParamUnionValue::Integer(desc.default_value as i64),
            )
        }
        ParamType::F32 => {
            let current = match ctx.params.values().get(desc.field) {
                TypedValue::F32(v) => v,
                _ => 0.0,
            };
            (
                ParamUnionValue::Real(current),
                ParamUnionValue::Real(desc.default_value),
            )
        }
        ParamType::Char20 | ParamType::Char64 => {
            let current = if desc.flags & PARAM_FLAG_PASSWORD != 0 {
                crate::params::PASSWORD_MASK.to_string()
            } else {
                match ctx.params.values().get(desc.field) {
                    TypedValue::Str(s) => s,
                    _ => String::new(),
                }
            };
            (
                ParamUnionValue::Str(current.into_bytes()),
                ParamUnionValue::Empty,
            )
        }
    };
    let (max_value, min_value) = if desc.ptype.float_viewable() {
        (
            NumericUnionValue::Real(desc.max_value),
            NumericUnionValue::Real(desc.min_value),
        )
    } else {
        (NumericUnionValue::Empty, NumericUnionValue::Empty)
    };
    ParamGetSetResponse {
        value,
        default_value,
        max_value,
        min_value,
        name: desc.name.as_bytes().to_vec(),
    }
}

/// The acceptance predicate, polymorphic in the allocation state: before
/// a node id is held, only DNA traffic is relevant.
fn should_accept(
    allocated: bool,
    data_type_id: u16,
    transfer_type: TransferType,
) -> Option<u64> {
    if !allocated {
        return match (transfer_type, data_type_id) {
            (TransferType::Broadcast, ALLOCATION_ID) => Some(ALLOCATION_SIGNATURE),
            _ => None,
        };
    }
    match (transfer_type, data_type_id) {
        (TransferType::Broadcast, BASIC_ID_ID) => Some(BASIC_ID_SIGNATURE),
        (TransferType::Broadcast, LOCATION_ID) => Some(LOCATION_SIGNATURE),
        (TransferType::Broadcast, SELF_ID_ID) => Some(SELF_ID_SIGNATURE),
        (TransferType::Broadcast, SYSTEM_ID) => Some(SYSTEM_SIGNATURE),
        (TransferType::Broadcast, OPERATOR_ID_ID) => Some(OPERATOR_ID_SIGNATURE),
        (TransferType::Request, id) if id == u16::from(GET_NODE_INFO_ID) => {
            Some(GET_NODE_INFO_SIGNATURE)
        }
        (TransferType::Request, id) if id == u16::from(RESTART_NODE_ID) => {
            Some(RESTART_NODE_SIGNATURE)
        }
        (TransferType::Request, id) if id == u16::from(PARAM_GETSET_ID) => {
            Some(PARAM_GETSET_SIGNATURE)
        }
        (TransferType::Request, id) if id == u16::from(SECURE_COMMAND_ID) => {
            Some(SECURE_COMMAND_SIGNATURE)
        }
        _ => None,
    }
}
