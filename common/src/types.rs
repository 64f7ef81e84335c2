use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BlindError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Position {
    Up,
    Down,
    Unknown,
}

impl Position {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn after(direction: Direction) -> Self {
        match direction {
            Direction::Up => Self::Up,
            Direction::Down => Self::Down,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationData {
    down: Duration,
    up: Duration,
}

impl CalibrationData {
    pub fn new(down: Duration, up: Duration) -> Result<Self, BlindError> {
        if down.is_zero() || up.is_zero() {
            return Err(BlindError::InvalidCalibration);
        }
        Ok(Self { down, up })
    }

    pub fn down_duration(&self) -> Duration {
        self.down
    }

    pub fn up_duration(&self) -> Duration {
        self.up
    }

    pub fn duration_for(&self, direction: Direction) -> Duration {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BlindStatus {
    pub position: &'static str,
    pub calibrated: bool,
    pub busy: bool,
    #[serde(rename = "downMs")]
    pub down_ms: Option<u64>,
    #[serde(rename = "upMs")]
    pub up_ms: Option<u64>,
}
