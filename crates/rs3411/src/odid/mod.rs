//! The OpenDroneID data model: one authoritative record of the last-seen
//! value for every ODID message group, and the normalising write path both
//! transports go through.

pub mod record;
pub mod store;

pub use record::{
    copy_str_field, Authentication, BasicId, IdType, Location, OdidRecord,
    OperationalStatus, OperatorId, SelfId, Slot, System, UaType, ODID_ID_SIZE,
    ODID_STR_SIZE,
};
pub use store::OdidStore;
