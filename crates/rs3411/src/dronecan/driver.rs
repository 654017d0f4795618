//! CAN driver layer: raw frames, the acceptance filter constants, the
//! bit-timing solver and the bus-off recovery policy.
//!
//! The physical controller is a collaborator behind [`CanIface`]; only the
//! policy lives here.

use std::fmt;

use tracing::{debug, info};

/// 29-bit identifier with flag bits, matching the classic driver layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanFrame {
    /// CAN ID with EFF/RTR/ERR flags in the top bits.
    pub id: u32,
    pub data: [u8; 8],
    pub dlc: u8,
}

impl CanFrame {
    pub const MASK_STD_ID: u32 = 0x0000_07FF;
    pub const MASK_EXT_ID: u32 = 0x1FFF_FFFF;
    /// Extended frame format
    pub const FLAG_EFF: u32 = 1 << 31;
    /// Remote transmission request (unused by DroneCAN)
    pub const FLAG_RTR: u32 = 1 << 30;
    /// Error frame
    pub const FLAG_ERR: u32 = 1 << 29;

    pub const MAX_DATA_LEN: usize = 8;

    pub fn new(id: u32, data: &[u8]) -> Self {
        let mut frame = Self {
            id,
            ..Default::default()
        };
        let n = data.len().min(Self::MAX_DATA_LEN);
        frame.data[..n].copy_from_slice(&data[..n]);
        frame.dlc = n as u8;
        frame
    }

    pub fn is_extended(&self) -> bool {
        self.id & Self::FLAG_EFF != 0
    }

    pub fn is_error_frame(&self) -> bool {
        self.id & Self::FLAG_ERR != 0
    }

    pub fn extended_id(&self) -> Option<embedded_can::ExtendedId> {
        embedded_can::ExtendedId::new(self.id & Self::MASK_EXT_ID)
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.dlc).min(Self::MAX_DATA_LEN)]
    }
}

/// Acceptance filter: a single (code, mask) pair in the priority-shifted
/// representation. Only transfers with the priority-field top bit set
/// (priority >= MEDIUM) are delivered, so high-rate unrelated traffic
/// cannot saturate the CPU. High-priority filtered traffic remains the one
/// head-of-line blocking vector.
pub const ACCEPTANCE_CODE: u32 = 0x8000_0000;
pub const ACCEPTANCE_MASK: u32 = 0x7FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanError {
    Timeout,
    BusOff,
    Stopped,
}

impl fmt::Display for CanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "transmit timeout"),
            Self::BusOff => write!(f, "controller is bus-off"),
            Self::Stopped => write!(f, "controller stopped"),
        }
    }
}

impl std::error::Error for CanError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Running,
    Recovering,
    BusOff,
    Stopped,
}

/// The controller collaborator. `send`/`receive` use short native
/// timeouts (5 ms in the reference hardware); they are the only places
/// the cooperative loop may stall.
pub trait CanIface {
    fn send(&mut self, frame: &CanFrame) -> Result<(), CanError>;
    fn receive(&mut self) -> Result<Option<CanFrame>, CanError>;

    fn bus_state(&self) -> BusState {
        BusState::Running
    }

    /// Kick off bus-off recovery; rate limiting is the caller's business.
    fn initiate_recovery(&mut self) {}

    fn start(&mut self) {}
}

/// Bus-off recovery backoff.
const BUS_RECOVERY_INTERVAL_MS: u32 = 2000;

/// Wraps an interface with the recovery policy: a bus-off controller gets
/// a recovery attempt at most every two seconds, and `send` fails fast in
/// the meantime.
#[derive(Debug)]
pub struct GuardedBus<I: CanIface> {
    iface: I,
    last_bus_recovery_ms: u32,
}

impl<I: CanIface> GuardedBus<I> {
    pub fn new(iface: I) -> Self {
        Self {
            iface,
            last_bus_recovery_ms: 0,
        }
    }

    pub fn send(&mut self, frame: &CanFrame, now_ms: u32) -> Result<(), CanError> {
        if frame.is_error_frame() || usize::from(frame.dlc) > CanFrame::MAX_DATA_LEN {
            return Err(CanError::Stopped);
        }
        match self.iface.bus_state() {
            BusState::Stopped => self.iface.start(),
            BusState::Running | BusState::Recovering => {}
            BusState::BusOff => {
                if now_ms.wrapping_sub(self.last_bus_recovery_ms)
                    > BUS_RECOVERY_INTERVAL_MS
                {
                    self.last_bus_recovery_ms = now_ms;
                    info!("initiating CAN bus-off recovery");
                    self.iface.initiate_recovery();
                }
            }
        }
        let sent = self.iface.send(frame);
        if sent.is_ok() {
            self.last_bus_recovery_ms = 0;
        }
        sent
    }

    pub fn receive(&mut self) -> Result<Option<CanFrame>, CanError> {
        match self.iface.receive() {
            Ok(Some(frame)) if frame.is_error_frame() => Ok(None),
            other => other,
        }
    }

    pub fn iface_mut(&mut self) -> &mut I {
        &mut self.iface
    }
}

/// Reference peripheral clock for the solver. Informational only: real
/// controllers are configured from their own clock tree, this constant
/// reproduces the reference firmware's computation.
pub const SOLVER_PCLK: u32 = 100_000;

/// Logical bit timings (not the register-encoded minus-one values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timings {
    pub prescaler: u16,
    pub sjw: u8,
    pub bs1: u8,
    pub bs2: u8,
}

impl Timings {
    pub fn quanta_per_bit(&self) -> u32 {
        1 + u32::from(self.bs1) + u32::from(self.bs2)
    }

    pub fn sample_point_permille(&self) -> u32 {
        1000 * (1 + u32::from(self.bs1)) / self.quanta_per_bit()
    }
}

/// Solve `(prescaler, bs1, bs2)` so that
/// `pclk / (prescaler * (1 + bs1 + bs2)) == target_bitrate` exactly, with
/// the quanta count maximised (<= 10 at 1 Mbit and above, <= 17 below, per
/// Koppe, "Automatic Baudrate Detection in CANopen Networks", CiA 2003)
/// and the sample point as close to the ideal 87.5 % as possible without
/// exceeding 90 %.
pub fn compute_timings_with_pclk(pclk: u32, target_bitrate: u32) -> Option<Timings> {
    if target_bitrate < 1 {
        return None;
    }

    const MAX_BS1: u8 = 16;
    const MAX_BS2: u8 = 8;
    const MAX_SAMPLE_POINT_PERMILLE: u32 = 900;

    let max_quanta_per_bit: u8 = if target_bitrate >= 1_000_000 { 10 } else { 17 };

    // prescaler * quanta == pclk / bitrate; search the largest quanta
    // count that divides it
    let prescaler_bs = pclk / target_bitrate;
    let mut bs1_bs2_sum = max_quanta_per_bit - 1;
    while prescaler_bs % (1 + u32::from(bs1_bs2_sum)) != 0 {
        if bs1_bs2_sum <= 2 {
            return None;
        }
        bs1_bs2_sum -= 1;
    }

    let prescaler = prescaler_bs / (1 + u32::from(bs1_bs2_sum));
    if !(1..=1024).contains(&prescaler) {
        return None;
    }

    // ideal sample point 7/8: bs1 = (7 * sum - 1) / 8, tried rounded to
    // nearest first, then rounded down if that lands above 90 %
    let make = |bs1: u8| -> Timings {
        Timings {
            prescaler: prescaler as u16,
            sjw: 1,
            bs1,
            bs2: bs1_bs2_sum - bs1,
        }
    };
    let mut solution = make(((7 * bs1_bs2_sum - 1) + 4) / 8);
    if solution.sample_point_permille() > MAX_SAMPLE_POINT_PERMILLE {
        solution = make((7 * bs1_bs2_sum - 1) / 8);
    }

    let valid = (1..=MAX_BS1).contains(&solution.bs1)
        && (1..=MAX_BS2).contains(&solution.bs2);
    let exact = target_bitrate
        == pclk / (prescaler * solution.quanta_per_bit());
    if !valid || !exact {
        return None;
    }

    debug!(
        quanta = solution.quanta_per_bit(),
        sample_permille = solution.sample_point_permille(),
        "CAN timings solved"
    );
    Some(solution)
}

pub fn compute_timings(target_bitrate: u32) -> Option<Timings> {
    compute_timings_with_pclk(SOLVER_PCLK, target_bitrate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn solver_is_exact_when_it_succeeds() {
        for target in [1_000, 2_000, 4_000, 5_000, 10_000, 20_000, 50_000] {
            if let Some(t) = compute_timings(target) {
                assert_eq!(
                    SOLVER_PCLK / (u32::from(t.prescaler) * t.quanta_per_bit()),
                    target,
                    "inexact solution for {target}"
                );
                assert!(t.sample_point_permille() <= 900);
                assert!((1..=16).contains(&t.bs1));
                assert!((1..=8).contains(&t.bs2));
            }
        }
    }

    #[test]
    fn solver_maximises_quanta_at_low_rate() {
        let t = compute_timings(10_000).unwrap();
        assert_eq!(t.prescaler, 1);
        assert_eq!(t.quanta_per_bit(), 10);
        assert_eq!(t.sample_point_permille(), 900);
    }

    #[test]
    fn one_megabit_with_matching_pclk() {
        // the 100 kHz reference clock cannot express 1 Mbit; a 10 MHz
        // clock reproduces the canonical 10-quanta solution
        assert!(compute_timings(1_000_000).is_none());

        let t = compute_timings_with_pclk(10_000_000, 1_000_000).unwrap();
        assert_eq!(t.prescaler, 1);
        assert!(t.quanta_per_bit() >= 8 && t.quanta_per_bit() <= 10);
        assert_eq!(
            10_000_000 / (u32::from(t.prescaler) * t.quanta_per_bit()),
            1_000_000
        );
        assert!(t.sample_point_permille() <= 900);
    }

    #[test]
    fn solver_rejects_impossible_rates() {
        assert!(compute_timings(0).is_none());
        assert!(compute_timings(3_000_000).is_none());
    }

    struct FlakyIface {
        state: BusState,
        recoveries: u32,
        sent: VecDeque<CanFrame>,
    }

    impl CanIface for FlakyIface {
        fn send(&mut self, frame: &CanFrame) -> Result<(), CanError> {
            match self.state {
                BusState::Running => {
                    self.sent.push_back(*frame);
                    Ok(())
                }
                BusState::BusOff => Err(CanError::BusOff),
                _ => Err(CanError::Timeout),
            }
        }

        fn receive(&mut self) -> Result<Option<CanFrame>, CanError> {
            Ok(None)
        }

        fn bus_state(&self) -> BusState {
            self.state
        }

        fn initiate_recovery(&mut self) {
            self.recoveries += 1;
        }
    }

    #[test]
    fn bus_off_recovery_is_rate_limited() {
        let iface = FlakyIface {
            state: BusState::BusOff,
            recoveries: 0,
            sent: VecDeque::new(),
        };
        let mut bus = GuardedBus::new(iface);
        let frame = CanFrame::new(CanFrame::FLAG_EFF | 0x100, &[1, 2, 3]);

        assert!(bus.send(&frame, 2500).is_err());
        assert_eq!(bus.iface_mut().recoveries, 1);
        // within the backoff window nothing more happens
        assert!(bus.send(&frame, 3000).is_err());
        assert_eq!(bus.iface_mut().recoveries, 1);
        // past it, another attempt
        assert!(bus.send(&frame, 5000).is_err());
        assert_eq!(bus.iface_mut().recoveries, 2);

        // once the bus heals, a success clears the backoff clock
        bus.iface_mut().state = BusState::Running;
        assert!(bus.send(&frame, 5100).is_ok());
    }

    #[test]
    fn error_frames_are_filtered() {
        let iface = FlakyIface {
            state: BusState::Running,
            recoveries: 0,
            sent: VecDeque::new(),
        };
        let mut bus = GuardedBus::new(iface);
        let err = CanFrame::new(CanFrame::FLAG_ERR | 0x5, &[]);
        assert!(bus.send(&err, 0).is_err());
        assert!(bus.iface_mut().sent.is_empty());
    }
}
