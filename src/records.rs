// Data produced by a stretch run

use ndarray::Array1;
use serde::Serialize;

use crate::calibration::ForceTorque;

/// Raw result of one step, before calibration
#[derive(Debug, Clone, PartialEq)]
pub struct RawStep {
    /// 1-based
    pub index: usize,
    /// Commanded position (encoder counts)
    pub commanded: i32,
    /// Position read back after sampling (encoder counts)
    pub measured: i32,
    /// Per-channel mean voltage
    pub means: Array1<f64>,
}

/// One row of the run output
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub commanded_counts: i32,
    pub displacement_mm: f64,
    pub force: ForceTorque,
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Connected,
    Homed,
    BiasCaptured,
    Stepping { step: usize, of: usize },
    Transforming,
    Homing,
    Done,
}
