// Force/torque datalogger for a motorised linear stretch rig
//
// An EPOS2-driven leadscrew stretches a sample in fixed steps. At every
// step a multichannel DAQ samples a 6-axis force/torque transducer, and the
// bias-corrected readings are calibrated into Fx, Fy, Fz, Tx, Ty, Tz.

pub mod calibration;
pub mod config;
pub mod daq;
pub mod error;
pub mod motor;
pub mod output;
pub mod prompt;
pub mod records;
pub mod runtime;

pub use error::{Result, RigError};
