//! The serial-side transport: MAVLink 2 framing, the Remote ID message
//! family and the link state machine.

pub mod frame;
pub mod link;
pub mod msgs;

pub use frame::{MavFrame, Parser};
pub use link::{MavlinkLink, SerialPort};
