use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};
use log::{info, warn};

use crate::{
    calibration::Calibrator,
    clock::Monotonic,
    error::BlindError,
    motor::MotorDriver,
    types::{BlindStatus, CalibrationData, Direction, Position},
};

#[derive(Debug, Clone, Copy)]
struct BlindState {
    position: Position,
    calibration: Option<CalibrationData>,
}

pub(crate) struct MotionGuard<'a> {
    busy: &'a AtomicBool,
}

impl Drop for MotionGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

pub struct BlindController<P, D, C> {
    motor: Mutex<MotorDriver<P, D, C>>,
    state: Mutex<BlindState>,
    busy: AtomicBool,
    calibration_poll: Duration,
}

impl<P, D, C> BlindController<P, D, C>
where
    P: OutputPin,
    D: DelayNs,
    C: Monotonic,
{
    pub fn new(motor: MotorDriver<P, D, C>, calibration_poll: Duration) -> Self {
        Self {
            motor: Mutex::new(motor),
            state: Mutex::new(BlindState {
                position: Position::Unknown,
                calibration: None,
            }),
            busy: AtomicBool::new(false),
            calibration_poll,
        }
    }

    pub fn position(&self) -> Position {
        self.state().position
    }

    pub fn calibration(&self) -> Option<CalibrationData> {
        self.state().calibration
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration().is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn status(&self) -> BlindStatus {
        let state = *self.state();
        BlindStatus {
            position: state.position.as_str(),
            calibrated: state.calibration.is_some(),
            busy: self.is_busy(),
            down_ms: state
                .calibration
                .map(|data| duration_ms(data.down_duration())),
            up_ms: state.calibration.map(|data| duration_ms(data.up_duration())),
        }
    }

    pub fn roll(&self, direction: Direction) -> Result<Position, BlindError> {
        let duration = self
            .calibration()
            .ok_or(BlindError::NotCalibrated)?
            .duration_for(direction);
        let _motion = self.begin_motion()?;

        self.motor().activate_timed(direction, duration)?;

        let position = Position::after(direction);
        self.state().position = position;
        Ok(position)
    }

    pub fn toggle(&self) -> Result<Position, BlindError> {
        let direction = match self.position() {
            Position::Up => Direction::Down,
            Position::Down => Direction::Up,
            Position::Unknown => return Err(BlindError::PositionUnknown),
        };
        self.roll(direction)
    }

    pub fn calibrate<B: InputPin>(&self, button: &mut B) -> Result<CalibrationData, BlindError> {
        let _motion = self.begin_motion()?;
        info!("setting up blinds...");

        let data = {
            let mut motor = self.motor();
            Calibrator::new(button, self.calibration_poll).run(&mut *motor)?
        };

        self.install_calibration(data);
        Ok(data)
    }

    pub(crate) fn install_calibration(&self, data: CalibrationData) {
        let mut state = self.state();
        if state.calibration.is_some() {
            warn!("overwriting existing calibration");
        }
        state.calibration = Some(data);
        state.position = Position::Up;
    }

    pub(crate) fn begin_motion(&self) -> Result<MotionGuard<'_>, BlindError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BlindError::Busy)?;
        Ok(MotionGuard { busy: &self.busy })
    }

    fn state(&self) -> MutexGuard<'_, BlindState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn motor(&self) -> MutexGuard<'_, MotorDriver<P, D, C>> {
        self.motor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
