// Narrow interface to the motion controller
//
// Mirrors the handful of EPOS command library primitives the rig uses.
// The serial protocol implementation and the simulator both sit behind it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Object dictionary entries used by the rig (CiA 402 + EPOS2 specific)
pub mod object {
    pub const CONTROLWORD: u16 = 0x6040;
    pub const STATUSWORD: u16 = 0x6041;
    pub const MODES_OF_OPERATION: u16 = 0x6060;
    pub const MODES_OF_OPERATION_DISPLAY: u16 = 0x6061;
    pub const POSITION_ACTUAL: u16 = 0x6064;
    pub const TARGET_POSITION: u16 = 0x607A;
    pub const PROFILE_VELOCITY: u16 = 0x6081;
    pub const PROFILE_ACCELERATION: u16 = 0x6083;
    pub const PROFILE_DECELERATION: u16 = 0x6084;
    pub const HOMING_METHOD: u16 = 0x6098;
    pub const HOME_POSITION: u16 = 0x2081;
}

/// Statusword bits
pub mod status {
    pub const READY_TO_SWITCH_ON: u16 = 1 << 0;
    pub const SWITCHED_ON: u16 = 1 << 1;
    pub const OPERATION_ENABLED: u16 = 1 << 2;
    pub const FAULT: u16 = 1 << 3;
    pub const TARGET_REACHED: u16 = 1 << 10;
    pub const HOMING_ATTAINED: u16 = 1 << 12;
}

/// Identity of the controller as the command library names it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceIdentity {
    pub device_name: String,
    pub protocol_stack: String,
    pub interface: String,
    pub port: String,
}

/// Controller operation modes (value of object 0x6060/0x6061)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    ProfilePosition,
    ProfileVelocity,
    Homing,
    Other(i8),
}

impl OperationMode {
    pub fn from_raw(raw: i8) -> Self {
        match raw {
            1 => Self::ProfilePosition,
            3 => Self::ProfileVelocity,
            6 => Self::Homing,
            other => Self::Other(other),
        }
    }

    pub fn as_raw(self) -> i8 {
        match self {
            Self::ProfilePosition => 1,
            Self::ProfileVelocity => 3,
            Self::Homing => 6,
            Self::Other(raw) => raw,
        }
    }
}

/// Profile parameters for a position move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionProfile {
    pub velocity_rpm: u32,
    pub acceleration: u32,
    pub deceleration: u32,
}

/// Outcome of a blocking wait for target reached
#[derive(Debug)]
pub enum TargetWait {
    Reached,
    TimedOut,
    Error(MotorError),
}

/// Error types for motion controller communication
#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not establish communication with {device} on {port}: {reason}")]
    Connection {
        device: String,
        port: String,
        reason: String,
    },

    #[error("No open session with the motion controller")]
    NotConnected,

    #[error("Invalid frame from node {node}: {reason}")]
    InvalidFrame { node: u8, reason: String },

    #[error("CRC mismatch in frame from node {node}")]
    CrcMismatch { node: u8 },

    #[error(
        "Node {node} rejected access to 0x{index:04X}/{subindex}: 0x{code:08X} ({})",
        describe_error_code(*.code)
    )]
    Device {
        node: u8,
        index: u16,
        subindex: u8,
        code: u32,
    },

    #[error("Node {node} is in fault state (statusword 0x{statusword:04X})")]
    Fault { node: u8, statusword: u16 },

    #[error("Controller not in Profile Position Mode (mode is {actual:?})")]
    WrongMode { actual: OperationMode },
}

pub type Result<T> = std::result::Result<T, MotorError>;

/// Text for the device error codes seen in practice
pub fn describe_error_code(code: u32) -> &'static str {
    match code {
        0x0000_0000 => "no error",
        0x0503_0000 => "toggle bit not alternated",
        0x0504_0000 => "SDO protocol timed out",
        0x0601_0000 => "unsupported access to an object",
        0x0601_0001 => "attempt to read a write-only object",
        0x0601_0002 => "attempt to write a read-only object",
        0x0602_0000 => "object does not exist",
        0x0604_0047 => "general internal incompatibility",
        0x0606_0000 => "access failed due to hardware error",
        0x0607_0010 => "data type length mismatch",
        0x0609_0011 => "subindex does not exist",
        0x0609_0030 => "value range exceeded",
        0x0800_0000 => "general error",
        0x0800_0020 => "data cannot be transferred or stored",
        0x0800_0022 => "wrong device state",
        0x0F00_FFC0 => "device is in wrong NMT state",
        0x0F00_FFBF => "illegal command",
        0x0F00_FFBE => "password incorrect",
        0x0F00_FFBC => "device not in service mode",
        0x0F00_FFB9 => "error node id",
        _ => "unknown error",
    }
}

/// The primitives the rig needs from a motion controller session
///
/// One binding owns one controller session. Every call blocks until the
/// controller answers.
pub trait MotorBinding {
    /// Open the session to `node_id`
    fn open(&mut self, node_id: u8, baud_rate: u32, timeout: Duration) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn is_open(&self) -> bool;

    fn clear_fault(&mut self) -> Result<()>;
    fn set_enable_state(&mut self) -> Result<()>;
    fn set_disable_state(&mut self) -> Result<()>;

    fn activate_profile_position_mode(&mut self) -> Result<()>;
    fn activate_homing_mode(&mut self) -> Result<()>;
    fn operation_mode(&mut self) -> Result<OperationMode>;

    fn set_position_profile(&mut self, profile: PositionProfile) -> Result<()>;
    fn move_to_position(&mut self, target: i32, absolute: bool, immediately: bool) -> Result<()>;
    fn halt_position_movement(&mut self) -> Result<()>;
    fn wait_for_target_reached(&mut self, timeout: Duration) -> TargetWait;

    fn position_is(&mut self) -> Result<i32>;
    fn target_position(&mut self) -> Result<i32>;
    /// Redefine the current position as `position` without moving
    fn define_position(&mut self, position: i32) -> Result<()>;

    /// Raw object dictionary read, up to 4 bytes, zero extended
    fn get_object(&mut self, index: u16, subindex: u8, len: u8) -> Result<u32>;
    /// Raw object dictionary write of `len` bytes of `value`
    fn set_object(&mut self, index: u16, subindex: u8, len: u8, value: u32) -> Result<()>;
}
