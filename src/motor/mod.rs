// Motion controller module for the linear stretch axis
//
// Provides:
// - The binding interface to an EPOS motion controller
// - EPOS2 serial protocol implementation and an in-memory simulator
// - High-level motor adapter with mode and speed checks
// - Leadscrew unit conversion and step sequence generation

mod binding;
mod driver;
pub mod epos;
pub mod sim;
pub mod units;

pub use binding::{
    describe_error_code, object, status, DeviceIdentity, MotorBinding, MotorError, OperationMode,
    PositionProfile, TargetWait,
};
pub use driver::{MotionCommand, Motor, MotorStatus};
pub use epos::Epos2Serial;
pub use sim::{MotorCall, SimulatedMotor};
pub use units::{step_positions, DriveTrain};
