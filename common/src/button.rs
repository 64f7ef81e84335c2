use embedded_hal::digital::InputPin;

use crate::error::BlindError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEdge {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeDetector {
    previous: Option<bool>,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self { previous: None }
    }

    pub fn seeded(level: bool) -> Self {
        Self {
            previous: Some(level),
        }
    }

    pub fn update(&mut self, level: bool) -> Option<ButtonEdge> {
        let edge = match (self.previous, level) {
            (Some(false), true) => Some(ButtonEdge::Rising),
            (Some(true), false) => Some(ButtonEdge::Falling),
            _ => None,
        };
        self.previous = Some(level);
        edge
    }

    pub fn rising(&mut self, level: bool) -> bool {
        self.update(level) == Some(ButtonEdge::Rising)
    }
}

pub fn read_level<B: InputPin>(button: &mut B) -> Result<bool, BlindError> {
    button.is_high().map_err(BlindError::gpio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_low_to_high_is_rising() {
        let mut edges = EdgeDetector::new();

        assert_eq!(edges.update(true), None);
        assert_eq!(edges.update(true), None);
        assert_eq!(edges.update(false), Some(ButtonEdge::Falling));
        assert_eq!(edges.update(true), Some(ButtonEdge::Rising));
        assert_eq!(edges.update(true), None);
    }

    #[test]
    fn seeded_high_needs_release_before_press() {
        let mut edges = EdgeDetector::seeded(true);

        assert!(!edges.rising(true));
        assert!(!edges.rising(false));
        assert!(edges.rising(true));
    }
}
