use std::cell::Cell;
use std::time::Instant;

/// Monotonic time source for the cooperative loop.
///
/// Everything in the core is scheduled off a millisecond counter; the
/// microsecond counter is only used for session-key entropy and CAN rx
/// timestamps. Both wrap at 32 bits like the hardware counters they stand
/// in for, and [`Micros64`] widens the latter.
pub trait Clock {
    fn now_ms(&self) -> u32;
    fn now_us(&self) -> u32;
}

/// Wall clock counting from process start.
#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }

    fn now_us(&self) -> u32 {
        self.start.elapsed().as_micros() as u32
    }
}

/// Manually stepped clock for deterministic tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: Cell<u32>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ms(&self, ms: u32) {
        self.now_ms.set(ms);
    }

    pub fn advance_ms(&self, ms: u32) {
        self.now_ms.set(self.now_ms.get().wrapping_add(ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now_ms.get()
    }

    fn now_us(&self) -> u32 {
        self.now_ms.get().wrapping_mul(1000)
    }
}

/// Synthesises a 64-bit microsecond count from a wrapping 32-bit counter.
///
/// Callers must feed it at least once per 2^32 µs (~71 minutes) or a
/// rollover is missed; the 1 ms main loop satisfies this by orders of
/// magnitude.
#[derive(Debug, Default)]
pub struct Micros64 {
    base: u64,
    last: u32,
}

impl Micros64 {
    pub fn update(&mut self, now_us: u32) -> u64 {
        if now_us < self.last {
            self.base += 0x1_0000_0000;
        }
        self.last = now_us;
        self.base + u64::from(now_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros64_rollover() {
        let mut m = Micros64::default();
        assert_eq!(m.update(100), 100);
        assert_eq!(m.update(0xffff_ff00), 0xffff_ff00);
        // 32-bit counter wrapped; the high word must advance
        assert_eq!(m.update(44), 0x1_0000_0000 + 44);
        assert_eq!(m.update(45), 0x1_0000_0000 + 45);
    }

    #[test]
    fn manual_clock_steps() {
        let clock = ManualClock::new();
        clock.set_ms(1000);
        assert_eq!(clock.now_ms(), 1000);
        clock.advance_ms(234);
        assert_eq!(clock.now_ms(), 1234);
        assert_eq!(clock.now_us(), 1_234_000);
    }
}
