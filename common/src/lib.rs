pub mod arbiter;
pub mod button;
pub mod calibration;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod motor;
pub mod schedule;
pub mod sim;
pub mod types;

pub use arbiter::{InputArbiter, TickReport};
pub use button::{ButtonEdge, EdgeDetector};
pub use calibration::{CalibrationPhase, Calibrator};
pub use clock::{Monotonic, StdDelay, SystemClock};
pub use config::{BlindConfig, NetworkConfig, PinConfig, RuntimeConfig, ScheduleConfig};
pub use controller::BlindController;
pub use error::BlindError;
pub use http::{HttpResponse, RequestLine, Route};
pub use motor::MotorDriver;
pub use schedule::{ScheduleEngine, ScheduleFiring, ScheduleRule, WallMinute};
pub use types::{BlindStatus, CalibrationData, Direction, Position};
