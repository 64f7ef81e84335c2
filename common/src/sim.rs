use std::{
    collections::VecDeque,
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, InputPin, OutputPin},
};
use log::info;

use crate::clock::Monotonic;

const JOURNAL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now_ns: Arc<AtomicU64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.now_ns.fetch_add(ns, Ordering::SeqCst);
    }
}

impl Monotonic for SimClock {
    fn now_ms(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst) / 1_000_000
    }
}

#[derive(Debug, Clone)]
pub struct SimDelay {
    clock: SimClock,
}

impl SimDelay {
    pub fn new(clock: SimClock) -> Self {
        Self { clock }
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.clock.advance(Duration::from_nanos(u64::from(ns)));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.clock.advance(Duration::from_millis(u64::from(ms)));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relay {
    Up,
    Down,
}

impl Relay {
    fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayEvent {
    pub relay: Relay,
    pub on: bool,
    pub at_ms: u64,
}

#[derive(Clone)]
pub struct SimRelay {
    relay: Relay,
    clock: Arc<dyn Monotonic + Send + Sync>,
    journal: Arc<Mutex<VecDeque<RelayEvent>>>,
}

impl SimRelay {
    pub fn new<C>(relay: Relay, clock: C) -> Self
    where
        C: Monotonic + Send + Sync + 'static,
    {
        Self {
            relay,
            clock: Arc::new(clock),
            journal: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn sibling(&self, relay: Relay) -> Self {
        Self {
            relay,
            clock: Arc::clone(&self.clock),
            journal: Arc::clone(&self.journal),
        }
    }

    pub fn events(&self) -> Vec<RelayEvent> {
        self.journal().iter().copied().collect()
    }

    pub fn is_on(&self, relay: Relay) -> bool {
        self.journal()
            .iter()
            .rev()
            .find(|event| event.relay == relay)
            .map(|event| event.on)
            .unwrap_or(false)
    }

    pub fn on_durations(&self, relay: Relay) -> Vec<Duration> {
        let mut durations = Vec::new();
        let mut since: Option<u64> = None;

        for event in self.journal().iter().filter(|event| event.relay == relay) {
            match (event.on, since) {
                (true, None) => since = Some(event.at_ms),
                (false, Some(start)) => {
                    durations.push(Duration::from_millis(event.at_ms.saturating_sub(start)));
                    since = None;
                }
                _ => {}
            }
        }

        durations
    }

    pub fn never_both_on(&self) -> bool {
        let mut up = false;
        let mut down = false;

        for event in self.journal().iter() {
            match event.relay {
                Relay::Up => up = event.on,
                Relay::Down => down = event.on,
            }
            if up && down {
                return false;
            }
        }

        true
    }

    fn journal(&self) -> std::sync::MutexGuard<'_, VecDeque<RelayEvent>> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, on: bool) {
        let was_on = self.is_on(self.relay);
        let mut journal = self.journal();
        if journal.len() == JOURNAL_CAPACITY {
            journal.pop_front();
        }
        journal.push_back(RelayEvent {
            relay: self.relay,
            on,
            at_ms: self.clock.now_ms(),
        });
        drop(journal);

        if was_on != on {
            info!(
                "sim relay {} {}",
                self.relay.as_str(),
                if on { "energized" } else { "released" }
            );
        }
    }
}

impl ErrorType for SimRelay {
    type Error = Infallible;
}

impl OutputPin for SimRelay {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.record(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.record(true);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimButton {
    levels: Arc<Mutex<VecDeque<bool>>>,
}

impl SimButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self) {
        self.queue().push_back(true);
    }

    pub fn hold(&self, level: bool, reads: usize) {
        self.queue().extend(std::iter::repeat(level).take(reads));
    }

    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<bool>> {
        self.levels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ErrorType for SimButton {
    type Error = Infallible;
}

impl InputPin for SimButton {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.queue().pop_front().unwrap_or(false))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_reads_queued_levels_then_released() {
        let mut button = SimButton::new();
        button.hold(false, 1);
        button.press();

        assert_eq!(button.is_high(), Ok(false));
        assert_eq!(button.is_high(), Ok(true));
        assert_eq!(button.is_high(), Ok(false));
        assert_eq!(button.pending(), 0);
    }

    #[test]
    fn delay_moves_shared_clock() {
        let clock = SimClock::new();
        let mut delay = SimDelay::new(clock.clone());

        delay.delay_ms(250);
        delay.delay_us(500);
        delay.delay_us(500);

        assert_eq!(clock.now_ms(), 251);
    }
}
