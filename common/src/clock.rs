use std::{
    thread,
    time::{Duration, Instant},
};

use embedded_hal::delay::DelayNs;

pub trait Monotonic {
    fn now_ms(&self) -> u64;

    fn elapsed_since(&self, start_ms: u64) -> Duration {
        Duration::from_millis(self.now_ms().saturating_sub(start_ms))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Monotonic for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

pub fn delay_for<D: DelayNs>(delay: &mut D, duration: Duration) {
    let mut remaining = duration.as_millis();
    while remaining > 0 {
        let chunk = remaining.min(u128::from(u32::MAX)) as u32;
        delay.delay_ms(chunk);
        remaining -= u128::from(chunk);
    }
}
