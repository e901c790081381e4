// Rig constants and run configuration
//
// The constants are the bench defaults. A JSON file can override any of
// them, and the CLI overrides the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::daq::TerminalConfig;
use crate::motor::{DeviceIdentity, DriveTrain};

// Motion profile
pub const TARGET_POS_MM: f64 = 55.0; // amplitude of the stretch
pub const STEP_MM: f64 = 2.0; // displacement increment per sample point
pub const INITIAL_POS_MM: f64 = 0.0;
pub const MOTOR_SPEED_RPM: u32 = 2000;
// Rated limit of the motor. Running at max speed can damage it.
pub const MOTOR_MAX_SPEED_RPM: u32 = 8000;
pub const PROFILE_ACCELERATION: u32 = 100_000;
pub const PROFILE_DECELERATION: u32 = 100_000;
pub const WAIT_TIMEOUT_MS: u64 = 60_000;
pub const SETTLE_MS: u64 = 1000;

// EPOS session
pub const NODE_ID: u8 = 2;
pub const EPOS_BAUD_RATE: u32 = 115_200;
pub const EPOS_TIMEOUT_MS: u64 = 500;
pub const EPOS_DEVICE_NAME: &str = "EPOS2";
pub const EPOS_PROTOCOL_STACK: &str = "MAXON SERIAL V2";
pub const EPOS_INTERFACE: &str = "USB";
pub const EPOS_PORT: &str = "/dev/ttyUSB0";

// Drive train: single-start leadscrew, 29:1 gearhead, 256 CPT encoder
pub const SCREW_LEAD_MM: f64 = 2.0;
pub const GEAR_HEAD_RATIO: f64 = 29.0;
pub const ENCODER_COUNTS_PER_TURN: u32 = 256;

// DAQ
pub const DAQ_SERIAL: &str = "01C27A73";
pub const DAQ_SAMPLE_RATE_HZ: f64 = 1000.0;
pub const DAQ_ACQUISITION_S: f64 = 1.0;
pub const DAQ_CHANNELS: [u32; 12] = [0, 1, 2, 3, 4, 5, 8, 9, 10, 11, 12, 13];
pub const DAQ_TERMINAL: TerminalConfig = TerminalConfig::Differential;

// Bias window: 2 s at 1 kHz
pub const BIAS_SAMPLE_RATE_HZ: f64 = 1000.0;
pub const BIAS_SAMPLES: usize = 2000;

// Files
pub const CALIBRATION_FILE: &str = "Calibration Files/FT21484_cal_mat.txt";
pub const OUTPUT_DIR: &str = "Force Data";
pub const OUTPUT_FILE: &str = "Test4SP.csv";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MotionConfig {
    pub target_mm: f64,
    pub step_mm: f64,
    pub initial_mm: f64,
    pub speed_rpm: u32,
    pub max_speed_rpm: u32,
    pub acceleration: u32,
    pub deceleration: u32,
    pub wait_timeout_ms: u64,
    pub settle_ms: u64,
    pub node_id: u8,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub device: DeviceIdentity,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            target_mm: TARGET_POS_MM,
            step_mm: STEP_MM,
            initial_mm: INITIAL_POS_MM,
            speed_rpm: MOTOR_SPEED_RPM,
            max_speed_rpm: MOTOR_MAX_SPEED_RPM,
            acceleration: PROFILE_ACCELERATION,
            deceleration: PROFILE_DECELERATION,
            wait_timeout_ms: WAIT_TIMEOUT_MS,
            settle_ms: SETTLE_MS,
            node_id: NODE_ID,
            baud_rate: EPOS_BAUD_RATE,
            timeout_ms: EPOS_TIMEOUT_MS,
            device: DeviceIdentity::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaqConfig {
    /// Hex serial number as printed on the device label
    pub serial: String,
    pub sample_rate_hz: f64,
    pub acquisition_s: f64,
    pub channels: Vec<u32>,
    pub terminal: TerminalConfig,
}

impl Default for DaqConfig {
    fn default() -> Self {
        Self {
            serial: DAQ_SERIAL.to_string(),
            sample_rate_hz: DAQ_SAMPLE_RATE_HZ,
            acquisition_s: DAQ_ACQUISITION_S,
            channels: DAQ_CHANNELS.to_vec(),
            terminal: DAQ_TERMINAL,
        }
    }
}

impl DaqConfig {
    /// Samples per channel for one acquisition window
    pub fn samples_per_window(&self) -> usize {
        (self.sample_rate_hz * self.acquisition_s).round() as usize
    }

    /// Serial number as the integer the driver reports
    pub fn serial_number(&self) -> Result<u32> {
        parse_hex_serial(&self.serial)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(OUTPUT_DIR),
            file: OUTPUT_FILE.to_string(),
        }
    }
}

impl OutputConfig {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file)
    }
}

/// Full configuration of one stretch run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RigConfig {
    pub motion: MotionConfig,
    pub drive: DriveTrain,
    pub daq: DaqConfig,
    pub calibration_file: PathBuf,
    pub output: OutputConfig,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            motion: MotionConfig::default(),
            drive: DriveTrain::default(),
            daq: DaqConfig::default(),
            calibration_file: PathBuf::from(CALIBRATION_FILE),
            output: OutputConfig::default(),
        }
    }
}

impl RigConfig {
    /// Load a JSON config. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.motion;
        if !(m.step_mm.is_finite() && m.step_mm != 0.0) {
            return Err(invalid("motion.step_mm", "must be finite and non-zero"));
        }
        if !m.target_mm.is_finite() || !m.initial_mm.is_finite() {
            return Err(invalid("motion.target_mm", "positions must be finite"));
        }
        if m.max_speed_rpm == 0 {
            return Err(invalid("motion.max_speed_rpm", "must be positive"));
        }

        let d = &self.drive;
        if !(d.screw_lead_mm > 0.0 && d.gear_ratio > 0.0 && d.encoder_counts_per_turn > 0) {
            return Err(invalid("drive", "lead, gear ratio and encoder counts must be positive"));
        }

        // Every commanded position, including the last step past the target,
        // must be a valid encoder count
        let per_mm = d.counts_per_mm();
        let step_counts = (m.step_mm * per_mm).round();
        if step_counts == 0.0 {
            return Err(invalid("motion.step_mm", "smaller than one encoder count"));
        }
        let fits = |counts: f64| counts.abs() <= i32::MAX as f64;
        if !fits(m.initial_mm * per_mm) || !fits(m.target_mm * per_mm + step_counts) {
            return Err(invalid("motion.target_mm", "travel exceeds the encoder range"));
        }

        let daq = &self.daq;
        if !(daq.sample_rate_hz > 0.0) {
            return Err(invalid("daq.sample_rate_hz", "must be positive"));
        }
        if daq.samples_per_window() == 0 {
            return Err(invalid("daq.acquisition_s", "window holds no samples"));
        }
        if daq.channels.is_empty() {
            return Err(invalid("daq.channels", "no channels configured"));
        }
        daq.serial_number()?;

        if self.output.file.is_empty() {
            return Err(invalid("output.file", "empty file name"));
        }
        Ok(())
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            device_name: EPOS_DEVICE_NAME.to_string(),
            protocol_stack: EPOS_PROTOCOL_STACK.to_string(),
            interface: EPOS_INTERFACE.to_string(),
            port: EPOS_PORT.to_string(),
        }
    }
}

impl Default for DriveTrain {
    fn default() -> Self {
        Self {
            screw_lead_mm: SCREW_LEAD_MM,
            gear_ratio: GEAR_HEAD_RATIO,
            encoder_counts_per_turn: ENCODER_COUNTS_PER_TURN,
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

/// Parse the DAQ serial number, given in hex
pub fn parse_hex_serial(serial: &str) -> Result<u32> {
    let trimmed = serial.trim().trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(trimmed, 16).map_err(|e| ConfigError::Invalid {
        field: "daq.serial",
        reason: format!("'{}' is not a hex serial number: {}", serial, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_serial() {
        assert_eq!(parse_hex_serial("01C27A73").unwrap(), 0x01C2_7A73);
        assert_eq!(parse_hex_serial("0x1F").unwrap(), 31);
        assert!(parse_hex_serial("not-hex").is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "motion": { "target_mm": 40.0 }, "daq": { "channels": [0, 1] } }"#;
        let config: RigConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.motion.target_mm, 40.0);
        assert_eq!(config.motion.step_mm, STEP_MM);
        assert_eq!(config.daq.channels, vec![0, 1]);
        assert_eq!(config.daq.terminal, TerminalConfig::Differential);
        assert_eq!(config.drive.gear_ratio, GEAR_HEAD_RATIO);
    }

    #[test]
    fn test_defaults_validate() {
        let config = RigConfig::default();
        config.validate().unwrap();
        assert_eq!(config.daq.samples_per_window(), 1000);
        assert_eq!(config.output.path(), PathBuf::from("Force Data/Test4SP.csv"));
    }

    #[test]
    fn test_travel_beyond_encoder_range_rejected() {
        let mut config = RigConfig::default();
        config.motion.target_mm = 1e6;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "motion.target_mm", .. })
        ));

        let mut config = RigConfig::default();
        config.motion.initial_mm = -1e6;
        assert!(config.validate().is_err());

        let mut config = RigConfig::default();
        config.motion.step_mm = 1e-9;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "motion.step_mm", .. })
        ));
    }

    #[test]
    fn test_zero_step_rejected() {
        let mut config = RigConfig::default();
        config.motion.step_mm = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "motion.step_mm", .. })
        ));
    }
}
