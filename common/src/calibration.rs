use std::time::Duration;

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};
use log::info;

use crate::{
    button::{read_level, EdgeDetector},
    clock::Monotonic,
    error::BlindError,
    motor::MotorDriver,
    types::{CalibrationData, Direction},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    AwaitStart,
    RollingDown,
    AwaitMid,
    RollingUp,
    Done,
}

pub struct Calibrator<'a, B> {
    button: &'a mut B,
    poll: Duration,
    phase: CalibrationPhase,
}

impl<'a, B: InputPin> Calibrator<'a, B> {
    pub fn new(button: &'a mut B, poll: Duration) -> Self {
        Self {
            button,
            poll,
            phase: CalibrationPhase::AwaitStart,
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn run<P, D, C>(
        &mut self,
        motor: &mut MotorDriver<P, D, C>,
    ) -> Result<CalibrationData, BlindError>
    where
        P: OutputPin,
        D: DelayNs,
        C: Monotonic,
    {
        self.enter(CalibrationPhase::AwaitStart);
        info!("press button to begin setup...");
        self.await_press(motor)?;

        self.enter(CalibrationPhase::RollingDown);
        info!("rolling down, press button when blinds are fully down...");
        let down = self.roll_until_press(motor, Direction::Down)?;
        info!("blinds took {} ms to roll down", down.as_millis());

        self.enter(CalibrationPhase::AwaitMid);
        info!("press button again to proceed...");
        self.await_press(motor)?;

        self.enter(CalibrationPhase::RollingUp);
        info!("rolling up, press button when blinds are fully up...");
        let up = self.roll_until_press(motor, Direction::Up)?;
        info!("blinds took {} ms to roll up", up.as_millis());

        let data = CalibrationData::new(down, up)?;
        self.enter(CalibrationPhase::Done);
        info!("setup completed successfully");
        Ok(data)
    }

    fn enter(&mut self, phase: CalibrationPhase) {
        self.phase = phase;
    }

    fn await_press<P, D, C>(&mut self, motor: &mut MotorDriver<P, D, C>) -> Result<(), BlindError>
    where
        P: OutputPin,
        D: DelayNs,
        C: Monotonic,
    {
        let mut edges = EdgeDetector::seeded(read_level(self.button)?);
        let button = &mut *self.button;
        motor.wait_until(self.poll, || Ok(edges.rising(read_level(button)?)))?;
        Ok(())
    }

    fn roll_until_press<P, D, C>(
        &mut self,
        motor: &mut MotorDriver<P, D, C>,
        direction: Direction,
    ) -> Result<Duration, BlindError>
    where
        P: OutputPin,
        D: DelayNs,
        C: Monotonic,
    {
        let mut edges = EdgeDetector::seeded(read_level(self.button)?);
        let button = &mut *self.button;
        motor.activate_until(direction, self.poll, || {
            Ok(edges.rising(read_level(button)?))
        })
    }
}
