use serde::{Deserialize, Serialize};

use crate::http::MAX_REQUEST_BYTES;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlindConfig {
    pub poll_interval_ms: u64,
    pub calibration_poll_ms: u64,
    pub http_port: u16,
    pub max_request_bytes: usize,
    pub request_timeout_ms: u64,
    pub status_log_interval_ms: u64,
    pub clock_sync_timeout_secs: u64,
}

impl Default for BlindConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            calibration_poll_ms: 10,
            http_port: 8080,
            max_request_bytes: MAX_REQUEST_BYTES,
            request_timeout_ms: 5_000,
            status_log_interval_ms: 30_000,
            clock_sync_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScheduleConfig {
    #[serde(rename = "wakeTime")]
    pub wake_time: String,
    #[serde(rename = "sleepTime")]
    pub sleep_time: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            wake_time: "18:24".to_string(),
            sleep_time: "22:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PinConfig {
    pub up_relay_gpio: i32,
    pub down_relay_gpio: i32,
    pub button_gpio: i32,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            up_relay_gpio: 27,
            down_relay_gpio: 23,
            button_gpio: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub blind: BlindConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub pins: PinConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            blind: BlindConfig::default(),
            schedule: ScheduleConfig::default(),
            pins: PinConfig::default(),
            network: NetworkConfig::default(),
            timezone: default_timezone(),
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl RuntimeConfig {
    pub fn from_json_slice(raw: &[u8]) -> serde_json::Result<Self> {
        let mut runtime: Self = serde_json::from_slice(raw)?;
        runtime.sanitize();
        Ok(runtime)
    }

    pub fn sanitize(&mut self) {
        self.blind.sanitize();
        self.pins.sanitize();
        if self.timezone.trim().is_empty() {
            self.timezone = default_timezone();
        }
    }
}

impl BlindConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        self.poll_interval_ms = self.poll_interval_ms.clamp(10, 1_000);
        self.calibration_poll_ms = self.calibration_poll_ms.clamp(1, 100);
        if self.http_port == 0 {
            self.http_port = defaults.http_port;
        }
        self.max_request_bytes = self.max_request_bytes.clamp(64, 4096);
        self.request_timeout_ms = self.request_timeout_ms.clamp(100, 60_000);
        if self.status_log_interval_ms == 0 {
            self.status_log_interval_ms = defaults.status_log_interval_ms;
        }
    }
}

impl PinConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if self.up_relay_gpio < 0 {
            self.up_relay_gpio = defaults.up_relay_gpio;
        }
        if self.down_relay_gpio < 0 {
            self.down_relay_gpio = defaults.down_relay_gpio;
        }
        if self.button_gpio < 0 {
            self.button_gpio = defaults.button_gpio;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let runtime =
            RuntimeConfig::from_json_slice(br#"{"schedule":{"wakeTime":"07:15","sleepTime":"21:30"}}"#)
                .unwrap();

        assert_eq!(runtime.schedule.wake_time, "07:15");
        assert_eq!(runtime.schedule.sleep_time, "21:30");
        assert_eq!(runtime.blind.http_port, 8080);
        assert_eq!(runtime.blind.max_request_bytes, MAX_REQUEST_BYTES);
        assert_eq!(runtime.pins, PinConfig::default());
        assert_eq!(runtime.timezone, "UTC");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let runtime =
            RuntimeConfig::from_json_slice(br#"{"blind":{"http_port":9090},"timezone":"Europe/Stockholm"}"#)
                .unwrap();

        assert_eq!(runtime.blind.http_port, 9090);
        assert_eq!(runtime.blind.poll_interval_ms, 100);
        assert_eq!(runtime.schedule, ScheduleConfig::default());
        assert_eq!(runtime.timezone, "Europe/Stockholm");
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let mut runtime = RuntimeConfig::default();
        runtime.blind.poll_interval_ms = 0;
        runtime.blind.http_port = 0;
        runtime.blind.max_request_bytes = 1;
        runtime.blind.request_timeout_ms = 0;
        runtime.pins.button_gpio = -3;
        runtime.timezone = "  ".to_string();

        runtime.sanitize();

        assert_eq!(runtime.blind.poll_interval_ms, 10);
        assert_eq!(runtime.blind.http_port, 8080);
        assert_eq!(runtime.blind.max_request_bytes, 64);
        assert_eq!(runtime.blind.request_timeout_ms, 100);
        assert_eq!(runtime.pins.button_gpio, 4);
        assert_eq!(runtime.timezone, "UTC");
    }
}
