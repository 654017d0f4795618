#![doc = include_str!("../readme.md")]

pub mod arm;
pub mod clock;
pub mod dronecan;
pub mod firmware;
pub mod mavlink;
pub mod node;
pub mod odid;
pub mod params;
pub mod secure;
pub mod transport;
pub mod tx;

/// Firmware version advertised on both transports.
pub const FW_VERSION_MAJOR: u8 = 1;
pub const FW_VERSION_MINOR: u8 = 0;
/// VCS commit baked in by the release tooling; zero for local builds.
pub const FW_GIT_VERSION: u32 = 0;

/// Board identity checked against OTA app descriptors.
pub const BOARD_ID: u32 = 10;

/// Build-time Ed25519 public keys (base64, no storage prefix) installed
/// into empty key slots on first boot. Release builds bake the vendor
/// keys in here; the library ships none.
pub const BUILTIN_PUBLIC_KEYS: &[&str] = &[];

pub mod prelude {
    pub use crate::arm::{arm_status_check, ArmState, ArmStatus};
    pub use crate::clock::{Clock, ManualClock, MonotonicClock};
    pub use crate::dronecan::{CanFrame, CanIface, DroneCanLink};
    pub use crate::mavlink::{MavlinkLink, SerialPort};
    pub use crate::node::RemoteIdNode;
    pub use crate::odid::{OdidRecord, OdidStore};
    pub use crate::params::{KvStore, MemoryKv, ParamStore};
    pub use crate::secure::{SecureCommand, SecureState};
    pub use crate::transport::TransportContext;
    pub use crate::tx::{
        BleDriver, OdidEncoder, Transmitter, TxScheduler, WifiDriver,
    };
}
