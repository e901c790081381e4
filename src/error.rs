// Top-level error for a rig run

use crate::calibration::CalibrationError;
use crate::config::ConfigError;
use crate::daq::DaqError;
use crate::motor::MotorError;
use crate::output::OutputError;

/// Exit status when the operator declines a prompt
pub const EXIT_OPERATOR_ABORT: i32 = 2;
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum RigError {
    #[error("Motion controller: {0}")]
    Motor(#[from] MotorError),

    #[error("DAQ: {0}")]
    Daq(#[from] DaqError),

    #[error("Calibration: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Config: {0}")]
    Config(#[from] ConfigError),

    #[error("Output: {0}")]
    Output(#[from] OutputError),

    #[error("Prompt failed: {0}")]
    Prompt(#[from] std::io::Error),

    #[error("Aborted by operator at: {prompt}")]
    OperatorAbort { prompt: String },

    #[error("{channels} channels configured but calibration expects {expected}")]
    ChannelMismatch { channels: usize, expected: usize },
}

impl RigError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::OperatorAbort { .. } => EXIT_OPERATOR_ABORT,
            _ => EXIT_FAILURE,
        }
    }
}

pub type Result<T> = std::result::Result<T, RigError>;
