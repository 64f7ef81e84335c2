use std::time::Duration;

use embedded_hal::{
    delay::DelayNs,
    digital::{Error as _, OutputPin},
};
use log::{error, info};

use crate::{
    clock::{delay_for, Monotonic},
    error::BlindError,
    types::Direction,
};

// Drives the pin low again on drop, including on `?` and unwinding.
struct RelayGuard<'a, P: OutputPin> {
    pin: &'a mut P,
    direction: Direction,
}

impl<'a, P: OutputPin> RelayGuard<'a, P> {
    fn energize(pin: &'a mut P, direction: Direction) -> Result<Self, BlindError> {
        pin.set_high().map_err(BlindError::gpio)?;
        Ok(Self { pin, direction })
    }
}

impl<P: OutputPin> Drop for RelayGuard<'_, P> {
    fn drop(&mut self) {
        if let Err(err) = self.pin.set_low() {
            error!(
                "failed to release {} relay: {:?}",
                self.direction.as_str(),
                err.kind()
            );
        }
    }
}

pub struct MotorDriver<P, D, C> {
    up: P,
    down: P,
    delay: D,
    clock: C,
}

impl<P, D, C> MotorDriver<P, D, C>
where
    P: OutputPin,
    D: DelayNs,
    C: Monotonic,
{
    pub fn new(mut up: P, mut down: P, delay: D, clock: C) -> Result<Self, BlindError> {
        up.set_low().map_err(BlindError::gpio)?;
        down.set_low().map_err(BlindError::gpio)?;
        Ok(Self {
            up,
            down,
            delay,
            clock,
        })
    }

    pub fn activate_timed(
        &mut self,
        direction: Direction,
        duration: Duration,
    ) -> Result<Duration, BlindError> {
        let start_ms = self.clock.now_ms();
        info!("rolling {}...", direction.as_str());
        {
            let _relay = energize(&mut self.up, &mut self.down, direction)?;
            delay_for(&mut self.delay, duration);
        }
        let elapsed = self.clock.elapsed_since(start_ms);
        info!("blinds fully rolled {}", direction.as_str());
        Ok(elapsed)
    }

    pub fn activate_until<F>(
        &mut self,
        direction: Direction,
        poll: Duration,
        stop: F,
    ) -> Result<Duration, BlindError>
    where
        F: FnMut() -> Result<bool, BlindError>,
    {
        let start_ms = self.clock.now_ms();
        {
            let _relay = energize(&mut self.up, &mut self.down, direction)?;
            poll_until(&mut self.delay, poll, stop)?;
        }
        Ok(self.clock.elapsed_since(start_ms))
    }

    pub fn wait_until<F>(&mut self, poll: Duration, stop: F) -> Result<Duration, BlindError>
    where
        F: FnMut() -> Result<bool, BlindError>,
    {
        let start_ms = self.clock.now_ms();
        poll_until(&mut self.delay, poll, stop)?;
        Ok(self.clock.elapsed_since(start_ms))
    }
}

fn energize<'a, P: OutputPin>(
    up: &'a mut P,
    down: &'a mut P,
    direction: Direction,
) -> Result<RelayGuard<'a, P>, BlindError> {
    let (active, idle) = match direction {
        Direction::Up => (up, down),
        Direction::Down => (down, up),
    };
    idle.set_low().map_err(BlindError::gpio)?;
    RelayGuard::energize(active, direction)
}

fn poll_until<D, F>(delay: &mut D, poll: Duration, mut stop: F) -> Result<(), BlindError>
where
    D: DelayNs,
    F: FnMut() -> Result<bool, BlindError>,
{
    while !stop()? {
        delay_for(delay, poll);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Relay, SimClock, SimDelay, SimRelay};

    fn driver() -> (MotorDriver<SimRelay, SimDelay, SimClock>, SimRelay, SimClock) {
        let clock = SimClock::new();
        let up = SimRelay::new(Relay::Up, clock.clone());
        let down = up.sibling(Relay::Down);
        let journal = up.clone();
        let motor = MotorDriver::new(up, down, SimDelay::new(clock.clone()), clock.clone())
            .unwrap();
        (motor, journal, clock)
    }

    #[test]
    fn timed_activation_holds_relay_for_duration() {
        let (mut motor, journal, _) = driver();

        let elapsed = motor
            .activate_timed(Direction::Up, Duration::from_secs(4))
            .unwrap();

        assert_eq!(elapsed, Duration::from_secs(4));
        assert_eq!(journal.on_durations(Relay::Up), vec![Duration::from_secs(4)]);
        assert!(journal.on_durations(Relay::Down).is_empty());
        assert!(!journal.is_on(Relay::Up));
    }

    #[test]
    fn stop_condition_error_still_releases_relay() {
        let (mut motor, journal, _) = driver();
        let mut polls = 0;

        let result = motor.activate_until(Direction::Down, Duration::from_millis(10), || {
            polls += 1;
            if polls == 3 {
                Err(BlindError::Gpio(embedded_hal::digital::ErrorKind::Other))
            } else {
                Ok(false)
            }
        });

        assert!(matches!(result, Err(BlindError::Gpio(_))));
        assert!(!journal.is_on(Relay::Down));
        assert_eq!(
            journal.events().last().map(|event| (event.relay, event.on)),
            Some((Relay::Down, false))
        );
    }

    #[test]
    fn open_ended_activation_measures_until_stop() {
        let (mut motor, journal, _) = driver();
        let mut polls = 0;

        let elapsed = motor
            .activate_until(Direction::Down, Duration::from_millis(10), || {
                polls += 1;
                Ok(polls > 500)
            })
            .unwrap();

        assert_eq!(elapsed, Duration::from_secs(5));
        assert_eq!(journal.on_durations(Relay::Down), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn relays_are_never_energized_together() {
        let (mut motor, journal, _) = driver();

        motor
            .activate_timed(Direction::Down, Duration::from_secs(1))
            .unwrap();
        motor
            .activate_timed(Direction::Up, Duration::from_secs(1))
            .unwrap();

        assert!(journal.never_both_on());
        assert_eq!(journal.on_durations(Relay::Down), vec![Duration::from_secs(1)]);
        assert_eq!(journal.on_durations(Relay::Up), vec![Duration::from_secs(1)]);
    }
}
