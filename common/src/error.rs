use embedded_hal::digital::ErrorKind;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlindError {
    #[error("blinds have not been calibrated")]
    NotCalibrated,
    #[error("motor is busy with another roll")]
    Busy,
    #[error("blind position is unknown")]
    PositionUnknown,
    #[error("malformed request line")]
    MalformedRequest,
    #[error("calibration produced a zero duration")]
    InvalidCalibration,
    #[error("invalid schedule time `{0}`, expected HH:MM")]
    InvalidScheduleTime(String),
    #[error("gpio failure: {0:?}")]
    Gpio(ErrorKind),
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("clock sync failed: {0}")]
    ClockSyncFailed(String),
}

impl BlindError {
    pub(crate) fn gpio<E: embedded_hal::digital::Error>(err: E) -> Self {
        Self::Gpio(err.kind())
    }
}
