use std::fmt;

use chrono::{NaiveTime, Timelike};
use embedded_hal::{delay::DelayNs, digital::OutputPin};
use log::{info, warn};

use crate::{
    clock::Monotonic,
    config::ScheduleConfig,
    controller::BlindController,
    error::BlindError,
    types::{Direction, Position},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WallMinute {
    hour: u8,
    minute: u8,
}

impl WallMinute {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn parse(value: &str) -> Result<Self, BlindError> {
        let time = NaiveTime::parse_from_str(value.trim(), "%H:%M")
            .map_err(|_| BlindError::InvalidScheduleTime(value.to_string()))?;
        Ok(Self::from_time(&time))
    }

    pub fn from_time<T: Timelike>(time: &T) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }
}

impl fmt::Display for WallMinute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleRule {
    pub label: &'static str,
    pub trigger: WallMinute,
    pub required_position: Position,
    pub action: Direction,
}

impl ScheduleRule {
    pub fn wake(trigger: WallMinute) -> Self {
        Self {
            label: "wake",
            trigger,
            required_position: Position::Down,
            action: Direction::Up,
        }
    }

    pub fn sleep(trigger: WallMinute) -> Self {
        Self {
            label: "sleep",
            trigger,
            required_position: Position::Up,
            action: Direction::Down,
        }
    }

    fn matches(&self, now: WallMinute, position: Position) -> bool {
        self.trigger == now && self.required_position == position
    }
}

#[derive(Debug, Clone, Copy)]
struct RuleSlot {
    rule: ScheduleRule,
    fired_at: Option<WallMinute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleFiring {
    pub rule: ScheduleRule,
    pub result: Result<Position, BlindError>,
}

#[derive(Debug, Clone)]
pub struct ScheduleEngine {
    slots: Vec<RuleSlot>,
}

impl ScheduleEngine {
    pub fn new(rules: impl IntoIterator<Item = ScheduleRule>) -> Self {
        Self {
            slots: rules
                .into_iter()
                .map(|rule| RuleSlot {
                    rule,
                    fired_at: None,
                })
                .collect(),
        }
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self, BlindError> {
        Ok(Self::new([
            ScheduleRule::wake(WallMinute::parse(&config.wake_time)?),
            ScheduleRule::sleep(WallMinute::parse(&config.sleep_time)?),
        ]))
    }

    pub fn rules(&self) -> impl Iterator<Item = &ScheduleRule> {
        self.slots.iter().map(|slot| &slot.rule)
    }

    pub fn advance(&mut self, now: WallMinute) {
        for slot in &mut self.slots {
            if slot.fired_at.is_some_and(|fired| fired != now) {
                slot.fired_at = None;
            }
        }
    }

    pub fn due(&self, now: WallMinute, position: Position) -> Option<ScheduleRule> {
        self.slots
            .iter()
            .find(|slot| slot.fired_at != Some(now) && slot.rule.matches(now, position))
            .map(|slot| slot.rule)
    }

    pub fn mark_fired(&mut self, rule: &ScheduleRule, now: WallMinute) {
        for slot in self.slots.iter_mut().filter(|slot| slot.rule == *rule) {
            slot.fired_at = Some(now);
        }
    }

    pub fn evaluate<P, D, C>(
        &mut self,
        now: WallMinute,
        controller: &BlindController<P, D, C>,
    ) -> Option<ScheduleFiring>
    where
        P: OutputPin,
        D: DelayNs,
        C: Monotonic,
    {
        self.advance(now);
        let rule = self.due(now, controller.position())?;
        info!(
            "{} trigger at {now}, rolling {}",
            rule.label,
            rule.action.as_str()
        );

        let result = controller.roll(rule.action);
        match &result {
            Ok(_) => self.mark_fired(&rule, now),
            Err(err) => warn!("{} trigger at {now} failed: {err}", rule.label),
        }

        Some(ScheduleFiring { rule, result })
    }
}
