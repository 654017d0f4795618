//! Outbound side: the multi-rate scheduler and the radio backends.

pub mod ble;
pub mod encoder;
pub mod wifi;

use tracing::trace;

use crate::odid::OdidRecord;

pub use ble::{
    AdvIntervals, BleConfig, BleDriver, BleLegacyBackend, BleLongRangeBackend,
    BleTx, TxPowerLevel,
};
pub use encoder::{EncodeError, EncodeResult, OdidEncoder};
pub use wifi::{WifiBeaconBackend, WifiConfig, WifiDriver, WifiNanBackend, WifiTx};

/// One broadcast backend as the scheduler sees it.
///
/// `ensure_init` must be idempotent; it runs before the first transmit
/// and again whenever a previous attempt failed.
pub trait Transmitter {
    fn name(&self) -> &'static str;

    fn ensure_init(&mut self) -> bool;

    fn transmit(&mut self, record: &OdidRecord) -> bool;

    /// Backends that rotate through per-message phases tick faster than
    /// their configured whole-record rate (BLE legacy: 7 phases).
    fn rate_multiplier(&self) -> f32 {
        1.0
    }
}

struct Entry {
    backend: Box<dyn Transmitter>,
    rate_hz: f32,
    next_due_ms: u32,
    initialised: bool,
}

/// Periodic ticks drive each backend at its configured rate. The
/// scheduler holds no per-phase state and hands every backend an
/// immutable snapshot of the record.
#[derive(Default)]
pub struct TxScheduler {
    entries: Vec<Entry>,
}

impl TxScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index used with [`TxScheduler::set_rate`].
    pub fn add(&mut self, backend: Box<dyn Transmitter>, rate_hz: f32) -> usize {
        self.entries.push(Entry {
            backend,
            rate_hz,
            next_due_ms: 0,
            initialised: false,
        });
        self.entries.len() - 1
    }

    /// Rates follow the parameters at runtime; zero disables a backend.
    pub fn set_rate(&mut self, index: usize, rate_hz: f32) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.rate_hz = rate_hz;
        }
    }

    pub fn update(&mut self, record: &OdidRecord, now_ms: u32) {
        for entry in &mut self.entries {
            let rate = entry.rate_hz * entry.backend.rate_multiplier();
            if rate <= 0.0 {
                continue;
            }
            if entry.next_due_ms != 0 && now_ms.wrapping_sub(entry.next_due_ms) > u32::MAX / 2
            {
                // not due yet
                continue;
            }
            if !entry.initialised {
                entry.initialised = entry.backend.ensure_init();
                if !entry.initialised {
                    trace!(backend = entry.backend.name(), "init failed, will retry");
                    continue;
                }
            }
            let period_ms = (1000.0 / rate) as u32;
            entry.next_due_ms = now_ms.wrapping_add(period_ms.max(1));
            if !entry.backend.transmit(record) {
                trace!(backend = entry.backend.name(), "transmit skipped");
            }
        }
    }
}
