//! Shared state threaded through both transport `update()` calls.
//!
//! The ODID store, parameter store and secure-command session are process
//! singletons; bundling the borrows keeps the cooperative loop's call
//! sites flat and makes the sharing explicit.

use crate::arm::{arm_status_check, ArmState};
use crate::odid::OdidStore;
use crate::params::{KvStore, ParamStore};
use crate::secure::SecureState;

pub struct TransportContext<'a, K: KvStore> {
    pub store: &'a mut OdidStore,
    pub params: &'a mut ParamStore<K>,
    pub secure: &'a mut SecureState,
    /// Sticky boot-time failure (bad firmware signature); blocks arming.
    pub parse_fail: Option<&'a str>,
    pub now_ms: u32,
    pub now_us: u32,
    /// Hardware MAC, zero-padded to 8 bytes; session-key material.
    pub mac: [u8; 8],
}

impl<K: KvStore> TransportContext<'_, K> {
    /// Evaluate the arming gate against the current record.
    pub fn arm_state(&self) -> ArmState {
        arm_status_check(
            self.store.record(),
            self.params.values(),
            self.now_ms,
            self.parse_fail,
        )
    }
}
