// Leadscrew drive train: millimetres <-> encoder quadcounts
//
// counts = mm * quadcounts * gear_ratio / screw_lead
// where quadcounts = 4 * encoder counts per turn.

use serde::{Deserialize, Serialize};

/// Mechanical constants of the linear axis
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriveTrain {
    /// Linear travel per screw revolution (mm)
    pub screw_lead_mm: f64,
    /// Gearhead reduction (motor turns per screw turn)
    pub gear_ratio: f64,
    /// Encoder counts per motor turn, before quadrature
    pub encoder_counts_per_turn: u32,
}

impl DriveTrain {
    /// Quadrature counts per motor turn
    pub fn quad_counts(&self) -> f64 {
        4.0 * self.encoder_counts_per_turn as f64
    }

    /// Encoder counts per millimetre of travel
    pub fn counts_per_mm(&self) -> f64 {
        self.quad_counts() * self.gear_ratio / self.screw_lead_mm
    }

    /// Motion targets are whole counts, so this rounds to the nearest count
    pub fn mm_to_counts(&self, mm: f64) -> i32 {
        let counts = (mm * self.counts_per_mm()).round();
        counts.clamp(i32::MIN as f64, i32::MAX as f64) as i32
    }

    /// Reported displacement is unsigned
    pub fn counts_to_mm(&self, counts: i32) -> f64 {
        (counts as f64).abs() * self.screw_lead_mm / (self.quad_counts() * self.gear_ratio)
    }
}

/// Positions visited by a stretch run
///
/// Half-open range `[initial + step, target + step)` walked in `step`
/// increments. The target itself is visited when `target - initial` is a
/// multiple of `step`; otherwise the last position overshoots it by less
/// than one step. Returns an empty sequence for a zero step.
///
/// Positions that do not fit an encoder count end the sequence.
pub fn step_positions(initial: i32, target: i32, step: i32) -> Vec<i32> {
    if step == 0 {
        return Vec::new();
    }
    let step = i64::from(step);
    let start = i64::from(initial) + step;
    let stop = i64::from(target) + step;

    let mut positions = Vec::new();
    let mut position = start;
    while (step > 0 && position < stop) || (step < 0 && position > stop) {
        match i32::try_from(position) {
            Ok(counts) => positions.push(counts),
            Err(_) => break,
        }
        position += step;
    }
    positions
}
