//! The CAN-side transport: classic CAN driver policy, the DroneCAN
//! transfer engine (libcanard algorithms), DSDL codecs and the node logic
//! with dynamic node-id allocation.

pub mod codec;
pub mod driver;
pub mod link;
pub mod msgs;
pub mod transfer;

pub use driver::{
    compute_timings, compute_timings_with_pclk, BusState, CanError, CanFrame,
    CanIface, GuardedBus, Timings, ACCEPTANCE_CODE, ACCEPTANCE_MASK,
};
pub use link::DroneCanLink;
pub use transfer::{RxTransfer, TransferEngine, TransferType};
