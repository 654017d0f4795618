//! DroneCAN transfer engine in the canonical libcanard shape: a
//! priority-ordered tx queue, single- and multi-frame transfers with the
//! signature-seeded CRC and the toggle-bit discipline.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use crc::{Crc, CRC_16_IBM_3740};
use tracing::trace;

use super::driver::CanFrame;

pub const BROADCAST_NODE_ID: u8 = 0;
pub const MAX_NODE_ID: u8 = 127;

/// Transfer priorities (smaller wins arbitration).
pub const PRIORITY_HIGHEST: u8 = 0;
pub const PRIORITY_HIGH: u8 = 8;
pub const PRIORITY_MEDIUM: u8 = 16;
pub const PRIORITY_LOW: u8 = 24;
pub const PRIORITY_LOWEST: u8 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferType {
    Broadcast,
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    DataLength,
    FrameOrder,
    Crc,
    IdMismatch,
    Toggle,
    NotAllocated,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataLength => write!(f, "data length invalid"),
            Self::FrameOrder => write!(f, "transfer frame out of order"),
            Self::Crc => write!(f, "transfer CRC check failed"),
            Self::IdMismatch => write!(f, "transfer id mismatch"),
            Self::Toggle => write!(f, "toggle bit incorrect"),
            Self::NotAllocated => write!(f, "node id not allocated"),
        }
    }
}

impl std::error::Error for TransferError {}

/// Tail byte of every DroneCAN frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tail(u8);

impl Tail {
    fn new(start: bool, end: bool, toggle: bool, transfer_id: u8) -> Self {
        Self(
            (u8::from(start) << 7)
                | (u8::from(end) << 6)
                | (u8::from(toggle) << 5)
                | (transfer_id & 0x1F),
        )
    }

    fn start(&self) -> bool {
        self.0 & (1 << 7) != 0
    }

    fn end(&self) -> bool {
        self.0 & (1 << 6) != 0
    }

    fn toggle(&self) -> bool {
        self.0 & (1 << 5) != 0
    }

    fn transfer_id(&self) -> u8 {
        self.0 & 0x1F
    }
}

/// Parsed 29-bit identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Message {
        priority: u8,
        type_id: u16,
        source_node: u8,
    },
    Anonymous {
        priority: u8,
        discriminator: u16,
        type_id: u8,
    },
    Service {
        priority: u8,
        service_type: u8,
        request: bool,
        destination_node: u8,
        source_node: u8,
    },
}

pub fn parse_id(raw: u32) -> IdKind {
    let raw = raw & CanFrame::MASK_EXT_ID;
    let priority = (raw >> 24) as u8;
    let source_node = (raw & 0x7F) as u8;
    let service_not_message = raw & (1 << 7) != 0;

    if service_not_message {
        IdKind::Service {
            priority,
            service_type: ((raw >> 16) & 0xFF) as u8,
            request: raw & (1 << 15) != 0,
            destination_node: ((raw >> 8) & 0x7F) as u8,
            source_node,
        }
    } else if source_node == BROADCAST_NODE_ID {
        IdKind::Anonymous {
            priority,
            discriminator: ((raw >> 10) & 0x3FFF) as u16,
            type_id: ((raw >> 8) & 0x3) as u8,
        }
    } else {
        IdKind::Message {
            priority,
            type_id: ((raw >> 8) & 0xFFFF) as u16,
            source_node,
        }
    }
}

fn message_id(priority: u8, type_id: u16, source_node: u8) -> u32 {
    (u32::from(priority & 0x1F) << 24)
        | (u32::from(type_id) << 8)
        | u32::from(source_node & 0x7F)
}

fn anonymous_id(priority: u8, discriminator: u16, type_id: u16) -> u32 {
    (u32::from(priority & 0x1F) << 24)
        | (u32::from(discriminator & 0x3FFF) << 10)
        | (u32::from(type_id & 0x3) << 8)
}

fn service_id(
    priority: u8,
    service_type: u8,
    request: bool,
    destination: u8,
    source: u8,
) -> u32 {
    (u32::from(priority & 0x1F) << 24)
        | (u32::from(service_type) << 16)
        | (u32::from(request) << 15)
        | (u32::from(destination & 0x7F) << 8)
        | 0x80
        | u32::from(source & 0x7F)
}

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Multi-frame transfer CRC, seeded with the 64-bit data type signature.
fn transfer_crc(signature: u64, payload: &[u8]) -> u16 {
    let mut digest = CRC16.digest();
    digest.update(&signature.to_le_bytes());
    digest.update(payload);
    digest.finalize()
}

/// A reassembled inbound transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxTransfer {
    pub priority: u8,
    pub transfer_type: TransferType,
    pub data_type_id: u16,
    pub source_node_id: u8,
    pub transfer_id: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct RxState {
    buf: Vec<u8>,
    crc: u16,
    transfer_id: u8,
    toggle: bool,
    last_activity_us: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RxKey {
    source_node: u8,
    data_type_id: u16,
    transfer_type: TransferType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TxKey {
    data_type_id: u16,
    transfer_type: TransferType,
    destination: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedFrame {
    arbitration: u32,
    fifo: u64,
    frame: CanFrame,
}

impl Ord for QueuedFrame {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.arbitration, self.fifo).cmp(&(other.arbitration, other.fifo))
    }
}

impl PartialOrd for QueuedFrame {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Abandon reassembly when a transfer stalls this long.
const RX_TRANSFER_TIMEOUT_US: u64 = 2_000_000;

/// Single engine per bus: owns the tx queue, the per-destination transfer
/// id counters and the rx reassembly state.
#[derive(Debug, Default)]
pub struct TransferEngine {
    node_id: u8,
    tx_queue: BinaryHeap<Reverse<QueuedFrame>>,
    tx_fifo_seq: u64,
    tx_transfer_ids: HashMap<TxKey, u8>,
    rx_states: HashMap<RxKey, RxState>,
}

impl TransferEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 0 while unallocated.
    pub fn local_node_id(&self) -> u8 {
        self.node_id
    }

    /// Latch the DNA result. Never cleared within a session.
    pub fn set_local_node_id(&mut self, node_id: u8) {
        if self.node_id == BROADCAST_NODE_ID && (1..=MAX_NODE_ID).contains(&node_id)
        {
            self.node_id = node_id;
        }
    }

    fn next_transfer_id(&mut self, key: TxKey) -> u8 {
        let counter = self.tx_transfer_ids.entry(key).or_insert(0);
        let id = *counter;
        *counter = (*counter + 1) & 0x1F;
        id
    }

    fn enqueue(&mut self, id: u32, data: &[u8]) {
        let frame = CanFrame::new(id | CanFrame::FLAG_EFF, data);
        self.tx_queue.push(Reverse(QueuedFrame {
            arbitration: id & CanFrame::MASK_EXT_ID,
            fifo: self.tx_fifo_seq,
            frame,
        }));
        self.tx_fifo_seq += 1;
    }

    fn push_frames(&mut self, can_id: u32, signature: u64, transfer_id: u8, payload: &[u8]) {
        if payload.len() <= 7 {
            let mut data = payload.to_vec();
            data.push(Tail::new(true, true, false, transfer_id).0);
            self.enqueue(can_id, &data);
            return;
        }

        let crc = transfer_crc(signature, payload);
        let mut remaining = payload;
        let mut toggle = false;
        let mut first = true;
        while !remaining.is_empty() || first {
            let mut data = Vec::with_capacity(8);
            if first {
                data.extend_from_slice(&crc.to_le_bytes());
            }
            let room = 7 - data.len();
            let take = remaining.len().min(room);
            data.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            let end = remaining.is_empty();
            data.push(Tail::new(first, end, toggle, transfer_id).0);
            self.enqueue(can_id, &data);
            toggle = !toggle;
            first = false;
        }
    }

    /// Queue a broadcast transfer. Anonymous nodes (no id yet) may only
    /// send single-frame transfers and get a payload-CRC discriminator.
    pub fn broadcast(
        &mut self,
        priority: u8,
        data_type_id: u16,
        signature: u64,
        payload: &[u8],
    ) -> Result<(), TransferError> {
        let key = TxKey {
            data_type_id,
            transfer_type: TransferType::Broadcast,
            destination: BROADCAST_NODE_ID,
        };
        let transfer_id = self.next_transfer_id(key);

        if self.node_id == BROADCAST_NODE_ID {
            if payload.len() > 7 {
                return Err(TransferError::DataLength);
            }
            let discriminator = transfer_crc(signature, payload) & 0x3FFF;
            let id = anonymous_id(priority, discriminator, data_type_id);
            let mut data = payload.to_vec();
            data.push(Tail::new(true, true, false, transfer_id).0);
            self.enqueue(id, &data);
            return Ok(());
        }

        let id = message_id(priority, data_type_id, self.node_id);
        self.push_frames(id, signature, transfer_id, payload);
        Ok(())
    }

    /// Queue a service request; returns the transfer id used.
    pub fn request(
        &mut self,
        destination: u8,
        priority: u8,
        service_type: u8,
        signature: u64,
        payload: &[u8],
    ) -> Result<u8, TransferError> {
        if self.node_id == BROADCAST_NODE_ID {
            return Err(TransferError::NotAllocated);
        }
        let key = TxKey {
            data_type_id: u16::from(service_type),
            transfer_type: TransferType::Request,
            destination,
        };
        let transfer_id = self.next_transfer_id(key);
        let id = service_id(priority, service_type, true, destination, self.node_id);
        self.push_frames(id, signature, transfer_id, payload);
        Ok(transfer_id)
    }

    /// Queue a service response, echoing the request's transfer id.
    pub fn respond(
        &mut self,
        destination: u8,
        priority: u8,
        service_type: u8,
        signature: u64,
        transfer_id: u8,
        payload: &[u8],
    ) -> Result<(), TransferError> {
        if self.node_id == BROADCAST_NODE_ID {
            return Err(TransferError::NotAllocated);
        }
        let id = service_id(priority, service_type, false, destination, self.node_id);
        self.push_frames(id, signature, transfer_id, payload);
        Ok(())
    }

    pub fn peek_tx(&self) -> Option<&CanFrame> {
        self.tx_queue.peek().map(|Reverse(q)| &q.frame)
    }

    pub fn pop_tx(&mut self) -> Option<CanFrame> {
        self.tx_queue.pop().map(|Reverse(q)| q.frame)
    }

    pub fn tx_queue_len(&self) -> usize {
        self.tx_queue.len()
    }

    /// Feed one received frame. `should_accept` is consulted once per
    /// transfer with `(data_type_id, transfer_type, source_node)` and
    /// returns the data type signature when the transfer is wanted; it is
    /// polymorphic in the allocation state (the caller accepts only DNA
    /// traffic until a node id is latched).
    pub fn handle_rx_frame<F>(
        &mut self,
        frame: &CanFrame,
        timestamp_us: u64,
        should_accept: F,
    ) -> Option<RxTransfer>
    where
        F: Fn(u16, TransferType, u8) -> Option<u64>,
    {
        if !frame.is_extended() || frame.is_error_frame() {
            return None;
        }
        let payload = frame.payload();
        let tail = Tail(*payload.last()?);
        let body = &payload[..payload.len() - 1];

        let (priority, data_type_id, transfer_type, source_node) =
            match parse_id(frame.id) {
                IdKind::Message {
                    priority,
                    type_id,
                    source_node,
                } => (priority, type_id, TransferType::Broadcast, source_node),
                IdKind::Anonymous { .. } => {
                    // only allocators listen to anonymous traffic
                    return None;
                }
                IdKind::Service {
                    priority,
                    service_type,
                    request,
                    destination_node,
                    source_node,
                } => {
                    if destination_node != self.node_id {
                        return None;
                    }
                    let ttype = if request {
                        TransferType::Request
                    } else {
                        TransferType::Response
                    };
                    (priority, u16::from(service_type), ttype, source_node)
                }
            };

        let signature = should_accept(data_type_id, transfer_type, source_node)?;

        let deliver = |payload: Vec<u8>, transfer_id: u8| RxTransfer {
            priority,
            transfer_type,
            data_type_id,
            source_node_id: source_node,
            transfer_id,
            payload,
        };

        if tail.start() && tail.end() {
            if tail.toggle() {
                return None;
            }
            return Some(deliver(body.to_vec(), tail.transfer_id()));
        }

        let key = RxKey {
            source_node,
            data_type_id,
            transfer_type,
        };
        self.prune_rx_states(timestamp_us);

        if tail.start() {
            if body.len() < 2 {
                return None;
            }
            let crc = u16::from_le_bytes([body[0], body[1]]);
            self.rx_states.insert(
                key,
                RxState {
                    buf: body[2..].to_vec(),
                    crc,
                    transfer_id: tail.transfer_id(),
                    toggle: tail.toggle(),
                    last_activity_us: timestamp_us,
                },
            );
            return None;
        }

        let state = self.rx_states.get_mut(&key)?;
        if state.transfer_id != tail.transfer_id() {
            trace!("transfer id mismatch, dropping reassembly");
            self.rx_states.remove(&key);
            return None;
        }
        if state.toggle == tail.toggle() {
            trace!("toggle error, dropping reassembly");
            self.rx_states.remove(&key);
            return None;
        }
        state.toggle = tail.toggle();
        state.last_activity_us = timestamp_us;
        state.buf.extend_from_slice(body);

        if !tail.end() {
            return None;
        }

        let state = self.rx_states.remove(&key)?;
        if transfer_crc(signature, &state.buf) != state.crc {
            trace!("transfer CRC mismatch, dropping");
            return None;
        }
        Some(deliver(state.buf, state.transfer_id))
    }

    fn prune_rx_states(&mut self, now_us: u64) {
        self.rx_states.retain(|_, s| {
            now_us.saturating_sub(s.last_activity_us) < RX_TRANSFER_TIMEOUT_US
        });
    }
}
