//! Validated configuration for every pipeline component.
//!
//! Each component consumes a closed configuration struct with explicit
//! defaults enumerated once at construction. Required fields are validated
//! up front with [`FrameExtractorConfig::validate`] /
//! [`ConnectionConfig::validate`] and rejected with a
//! [`FramewireError::Configuration`](crate::FramewireError) before any driver
//! or extractor is constructed — never silently defaulted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checksum;
use crate::error::{FramewireError, Result};

/// Overall framing dialect of the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationMode {
    /// Framing rules come from a project file: configurable delimiters and
    /// optional checksum trailer
    ProjectFile,
    /// Device emits self-delimited JSON objects
    DeviceSendsJson,
    /// Bare line-oriented samples; `\n`, `\r\n` and `\r` all terminate a frame
    QuickPlot,
}

/// Delimiter strategy used to locate frame boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameDetection {
    /// Scan for the finish sequence; frame is everything before it
    EndDelimiterOnly,
    /// Frames run between consecutive start sequences
    StartDelimiterOnly,
    /// Frames run between a start sequence and the following finish sequence
    StartAndEndDelimiter,
    /// Every fed chunk is exactly one frame; no cross-call buffering
    NoDelimiters,
}

/// Default ring-buffer capacity for a frame extractor: 10 MiB.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10 * 1024 * 1024;

/// Frame-extractor configuration.
///
/// Mutable at runtime: a mid-stream mutation only affects subsequent scans,
/// it never reprocesses bytes that were already buffered. Setting
/// `operation_mode` away from [`OperationMode::ProjectFile`] forces
/// `checksum_algorithm` to empty — checksum trailers only apply to
/// project-file framed data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameExtractorConfig {
    /// Framing dialect
    pub operation_mode: OperationMode,
    /// Delimiter strategy
    pub frame_detection: FrameDetection,
    /// Start-of-frame byte sequence (used by the start-delimited modes)
    pub start_sequence: Vec<u8>,
    /// End-of-frame byte sequence (used by the end-delimited modes)
    pub finish_sequence: Vec<u8>,
    /// Checksum algorithm name (`""`/`"none"` disables validation)
    pub checksum_algorithm: String,
    /// Ring-buffer capacity in bytes
    pub buffer_capacity: usize,
}

impl Default for FrameExtractorConfig {
    fn default() -> Self {
        Self {
            operation_mode: OperationMode::QuickPlot,
            frame_detection: FrameDetection::EndDelimiterOnly,
            start_sequence: Vec::new(),
            finish_sequence: vec![b'\n'],
            checksum_algorithm: String::new(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl FrameExtractorConfig {
    /// Validate the configuration, rejecting combinations the scan loop
    /// cannot execute.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(FramewireError::invalid_config("buffer_capacity", "must be non-zero"));
        }

        let needs_start = matches!(
            self.frame_detection,
            FrameDetection::StartDelimiterOnly | FrameDetection::StartAndEndDelimiter
        ) && self.operation_mode == OperationMode::ProjectFile;
        if needs_start && self.start_sequence.is_empty() {
            return Err(FramewireError::invalid_config(
                "start_sequence",
                "must not be empty for start-delimited detection",
            ));
        }

        // QuickPlot carries built-in line terminators; JSON mode has brace
        // defaults applied by the extractor.
        let needs_finish = self.operation_mode == OperationMode::ProjectFile
            && matches!(
                self.frame_detection,
                FrameDetection::EndDelimiterOnly | FrameDetection::StartAndEndDelimiter
            );
        if needs_finish && self.finish_sequence.is_empty() {
            return Err(FramewireError::invalid_config(
                "finish_sequence",
                "must not be empty for end-delimited detection",
            ));
        }

        if !self.checksum_algorithm.is_empty() && !checksum::is_known(&self.checksum_algorithm) {
            return Err(FramewireError::invalid_config(
                "checksum_algorithm",
                format!("unknown algorithm '{}'", self.checksum_algorithm),
            ));
        }

        Ok(())
    }

    /// Effective checksum algorithm after the operation-mode override:
    /// checksums only apply to project-file framed data.
    pub fn effective_checksum(&self) -> &str {
        if self.operation_mode == OperationMode::ProjectFile {
            &self.checksum_algorithm
        } else {
            ""
        }
    }
}

/// Transport-specific connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportProfile {
    /// Serial line
    Serial {
        /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
        port: String,
        /// Baud rate
        baud_rate: u32,
    },
    /// TCP client socket
    Tcp { host: String, port: u16 },
    /// UDP socket
    Udp { host: String, port: u16 },
    /// BLE characteristic subscription
    Ble { device: String, characteristic: String },
}

/// Connection configuration owned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Transport-specific parameters
    pub profile: TransportProfile,
    /// Retry automatically after an unexpected drop
    pub auto_reconnect: bool,
    /// Fixed interval between reconnect attempts
    pub reconnect_interval: Duration,
    /// Give up and enter the `Error` state after this many failed attempts
    pub max_reconnect_attempts: u32,
    /// Open/write timeout
    pub timeout: Duration,
}

impl ConnectionConfig {
    /// Construct a config for the given transport profile with shared-field
    /// defaults: auto-reconnect on, 5 s retry interval, 10 attempts, 10 s
    /// timeout.
    pub fn new(profile: TransportProfile) -> Self {
        Self {
            profile,
            auto_reconnect: true,
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            timeout: Duration::from_secs(10),
        }
    }

    /// Validate shared and transport-specific fields.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(FramewireError::invalid_config("timeout", "must be non-zero"));
        }
        if self.auto_reconnect && self.reconnect_interval.is_zero() {
            return Err(FramewireError::invalid_config(
                "reconnect_interval",
                "must be non-zero when auto_reconnect is enabled",
            ));
        }

        match &self.profile {
            TransportProfile::Serial { port, baud_rate } => {
                if port.is_empty() {
                    return Err(FramewireError::invalid_config("port", "must not be empty"));
                }
                if *baud_rate == 0 {
                    return Err(FramewireError::invalid_config("baud_rate", "must be non-zero"));
                }
            }
            TransportProfile::Tcp { host, port } | TransportProfile::Udp { host, port } => {
                if host.is_empty() {
                    return Err(FramewireError::invalid_config("host", "must not be empty"));
                }
                if *port == 0 {
                    return Err(FramewireError::invalid_config("port", "must be non-zero"));
                }
            }
            TransportProfile::Ble { device, characteristic } => {
                if device.is_empty() {
                    return Err(FramewireError::invalid_config("device", "must not be empty"));
                }
                if characteristic.is_empty() {
                    return Err(FramewireError::invalid_config(
                        "characteristic",
                        "must not be empty",
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Worker-pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker threads to spawn
    pub max_workers: usize,
    /// Per-worker request queue depth
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        // Leave one core for the orchestrator thread, clamp to a sane band
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self { max_workers: cores.saturating_sub(1).clamp(2, 8), queue_capacity: 1024 }
    }
}

impl PoolConfig {
    /// Validate pool sizing.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(FramewireError::invalid_config("max_workers", "must be non-zero"));
        }
        if self.queue_capacity == 0 {
            return Err(FramewireError::invalid_config("queue_capacity", "must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_extractor_config_is_valid() {
        let config = FrameExtractorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.operation_mode, OperationMode::QuickPlot);
        assert_eq!(config.finish_sequence, b"\n");
        assert_eq!(config.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn start_delimited_requires_start_sequence() {
        let config = FrameExtractorConfig {
            operation_mode: OperationMode::ProjectFile,
            frame_detection: FrameDetection::StartDelimiterOnly,
            start_sequence: Vec::new(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, FramewireError::Configuration { field, .. } if field == "start_sequence"));
    }

    #[test]
    fn unknown_checksum_is_rejected() {
        let config = FrameExtractorConfig {
            operation_mode: OperationMode::ProjectFile,
            checksum_algorithm: "crc17".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn checksum_is_forced_off_outside_project_mode() {
        let config = FrameExtractorConfig {
            operation_mode: OperationMode::QuickPlot,
            checksum_algorithm: "crc16".to_string(),
            ..Default::default()
        };
        assert_eq!(config.effective_checksum(), "");

        let config = FrameExtractorConfig {
            operation_mode: OperationMode::ProjectFile,
            checksum_algorithm: "crc16".to_string(),
            ..Default::default()
        };
        assert_eq!(config.effective_checksum(), "crc16");
    }

    #[test]
    fn connection_config_validates_profiles() {
        let ok = ConnectionConfig::new(TransportProfile::Tcp {
            host: "192.168.1.10".to_string(),
            port: 5000,
        });
        assert!(ok.validate().is_ok());

        let bad_host =
            ConnectionConfig::new(TransportProfile::Tcp { host: String::new(), port: 5000 });
        assert!(bad_host.validate().is_err());

        let bad_baud = ConnectionConfig::new(TransportProfile::Serial {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 0,
        });
        assert!(bad_baud.validate().is_err());
    }

    #[test]
    fn reconnect_interval_required_when_auto_reconnect() {
        let mut config = ConnectionConfig::new(TransportProfile::Udp {
            host: "localhost".to_string(),
            port: 9000,
        });
        config.reconnect_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config.auto_reconnect = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn pool_config_defaults_within_band() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert!((2..=8).contains(&config.max_workers));
    }
}
