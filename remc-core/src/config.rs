//! Controller configuration: network endpoints, timing, capture depths, and
//! GPIO line assignments, loadable from a JSON file with full defaults.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub network: NetworkConfig,
    pub timing: TimingConfig,
    pub capture: CaptureConfig,
    pub gpio: GpioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address of the controller's own interface.
    pub local_ip: Ipv4Addr,
    /// Telemetry multicast group (outbound).
    pub telemetry_group: Ipv4Addr,
    pub telemetry_port: u16,
    /// Command multicast group (inbound).
    pub command_group: Ipv4Addr,
    pub command_port: u16,
    /// NTP server, dotted quad or hostname.
    pub ntp_server: String,
    pub ntp_server_port: u16,
    /// Local port the NTP client binds.
    pub ntp_local_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            local_ip: Ipv4Addr::new(192, 168, 1, 50),
            telemetry_group: Ipv4Addr::new(239, 9, 9, 33),
            telemetry_port: 13013,
            command_group: Ipv4Addr::new(239, 9, 9, 32),
            command_port: 13012,
            ntp_server: "192.168.1.10".to_string(),
            ntp_server_port: 123,
            ntp_local_port: 13014,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Analog acquisition rate.
    pub sample_rate_hz: u32,
    /// Timeout of a single NTP exchange.
    pub ntp_timeout_ms: u64,
    /// Interval between automatic NTP resyncs.
    pub ntp_resync_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10_000,
            ntp_timeout_ms: 1000,
            ntp_resync_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Slot count of the cross-thread sample ring (power of two).
    pub ring_capacity: u32,
    /// Slot count of the rolling capture buffer.
    pub storage_capacity: usize,
    /// Default pre-trigger bound of a collect window, in samples.
    pub window_start: i64,
    /// Default post-trigger bound of a collect window, in samples.
    pub window_stop: i64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ring_capacity: crate::ring::DEFAULT_RING_CAPACITY,
            storage_capacity: crate::capture::DEFAULT_CAPTURE_CAPACITY,
            window_start: -50_000,
            window_stop: 50_000,
        }
    }
}

/// GPIO chip and line assignments for the real-hardware daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub chip: String,
    pub actuator_fwd_line: u32,
    pub actuator_bwd_line: u32,
    pub em_line: u32,
    pub ready_line: u32,
    pub msw_mirror_a_line: u32,
    pub msw_mirror_b_line: u32,
    pub msw_a_line: u32,
    pub msw_b_line: u32,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            chip: "gpiochip0".to_string(),
            actuator_fwd_line: 27,
            actuator_bwd_line: 25,
            em_line: 29,
            ready_line: 4,
            msw_mirror_a_line: 5,
            msw_mirror_b_line: 6,
            msw_a_line: 51,
            msw_b_line: 53,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            timing: TimingConfig::default(),
            capture: CaptureConfig::default(),
            gpio: GpioConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Microseconds between samples at the configured rate.
    pub fn sample_period_us(&self) -> u64 {
        1_000_000 / self.timing.sample_rate_hz as u64
    }
}
