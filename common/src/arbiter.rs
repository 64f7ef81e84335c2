use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};
use log::{debug, info, warn};

use crate::{
    button::{read_level, EdgeDetector},
    clock::Monotonic,
    controller::BlindController,
    error::BlindError,
    schedule::{ScheduleEngine, ScheduleFiring, WallMinute},
    types::{CalibrationData, Position},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub calibration: Option<Result<CalibrationData, BlindError>>,
    pub toggle: Option<Result<Position, BlindError>>,
    pub schedule: Option<ScheduleFiring>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.calibration.is_none() && self.toggle.is_none() && self.schedule.is_none()
    }
}

pub struct InputArbiter<B> {
    button: B,
    edges: EdgeDetector,
    schedule: ScheduleEngine,
}

impl<B: InputPin> InputArbiter<B> {
    pub fn new(button: B, schedule: ScheduleEngine) -> Self {
        Self {
            button,
            edges: EdgeDetector::new(),
            schedule,
        }
    }

    pub fn tick<P, D, C>(
        &mut self,
        controller: &BlindController<P, D, C>,
        now: Option<WallMinute>,
    ) -> Result<TickReport, BlindError>
    where
        P: OutputPin,
        D: DelayNs,
        C: Monotonic,
    {
        let mut report = TickReport::default();
        let level = read_level(&mut self.button)?;

        if !controller.is_calibrated() {
            if level {
                let result = controller.calibrate(&mut self.button);
                if let Err(err) = &result {
                    warn!("calibration failed: {err}");
                }
                report.calibration = Some(result);
                self.edges = EdgeDetector::seeded(read_level(&mut self.button)?);
            } else {
                self.edges.update(level);
            }
            return Ok(report);
        }

        if self.edges.rising(level) {
            info!("button pressed, toggling blinds");
            let result = controller.toggle();
            match &result {
                Ok(position) => info!("blinds now {}", position.as_str()),
                Err(err) => warn!("button toggle rejected: {err}"),
            }
            report.toggle = Some(result);
            // The roll took seconds, `now` is stale.
            return Ok(report);
        }

        match now {
            Some(now) => report.schedule = self.schedule.evaluate(now, controller),
            None => debug!("wall clock unavailable, skipping schedule"),
        }

        Ok(report)
    }
}
