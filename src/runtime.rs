// Stretch run: step the axis, sample the transducer, return to zero
//
// Idle -> Connected -> Homed -> BiasCaptured -> Stepping(1..N)
//      -> Transforming -> Homing -> Done
//
// Everything is blocking. Sampling only starts after the motion wait for
// the step has returned.

use std::path::PathBuf;
use std::time::Duration;

use ndarray::{Array1, Array2};
use tracing::{debug, info, warn};

use crate::calibration::{Calibration, ForceTorque, AXES};
use crate::config::RigConfig;
use crate::daq::{DaqBackend, DaqSampler, PhysicalChannel};
use crate::error::{Result, RigError};
use crate::motor::{
    step_positions, MotionCommand, Motor, MotorBinding, MotorError, MotorStatus, TargetWait,
};
use crate::output::RunTable;
use crate::prompt::Operator;
use crate::records::{RawStep, RunState, StepRecord};

pub const BIAS_PROMPT: &str =
    "Getting Force Sensor bias vector, please remove any weight from the sensor. Continue?";
pub const START_PROMPT: &str = "Ready to start?";

/// What a completed run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub records: Vec<StepRecord>,
    pub output_path: PathBuf,
    /// Encoder counts after the return to zero
    pub final_position: i32,
}

/// One motion session, one DAQ session and the data of one run
pub struct Rig<M: MotorBinding, D: DaqBackend, O: Operator> {
    config: RigConfig,
    calibration: Calibration,
    motor: Motor<M>,
    sampler: DaqSampler<D>,
    operator: O,
    state: RunState,
    bias: Option<Array1<f64>>,
    steps: Vec<RawStep>,
}

impl<M: MotorBinding, D: DaqBackend, O: Operator> Rig<M, D, O> {
    pub fn new(config: RigConfig, calibration: Calibration, motor: M, daq: D, operator: O) -> Self {
        let max_speed = config.motion.max_speed_rpm;
        Self {
            config,
            calibration,
            motor: Motor::new(motor, max_speed),
            sampler: DaqSampler::new(daq),
            operator,
            state: RunState::Idle,
            bias: None,
            steps: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn motor(&self) -> &Motor<M> {
        &self.motor
    }

    pub fn sampler(&self) -> &DaqSampler<D> {
        &self.sampler
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    pub fn bias(&self) -> Option<&Array1<f64>> {
        self.bias.as_ref()
    }

    /// Raw step data collected so far
    pub fn steps(&self) -> &[RawStep] {
        &self.steps
    }

    fn enter(&mut self, state: RunState) {
        debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Full run, ending with the output table on disk
    pub fn run(&mut self) -> Result<RunReport> {
        let channels = self.connect()?;
        self.go_to_initial()?;
        self.capture_bias(&channels)?;
        self.confirm(START_PROMPT)?;
        self.step(&channels)?;
        let records = self.transform()?;
        let final_position = match self.return_to_zero() {
            Ok(position) => position,
            Err(e) => {
                // The steps are already measured; keep them on disk
                let path = self.config.output.path();
                match self.table(records).save(&path) {
                    Ok(()) => warn!("Return to zero failed, data saved to {}", path.display()),
                    Err(save) => warn!("Return to zero failed and data was not saved: {}", save),
                }
                return Err(e);
            }
        };
        self.finish(records, final_position)
    }

    /// Open the DAQ first so a missing device aborts before the drive is enabled
    fn connect(&mut self) -> Result<Vec<PhysicalChannel>> {
        let daq = &self.config.daq;
        self.sampler.open(daq.serial_number()?)?;
        let channels = self.sampler.channels(&daq.channels, daq.terminal)?;
        if channels.len() != self.calibration.channels() {
            return Err(RigError::ChannelMismatch {
                channels: channels.len(),
                expected: self.calibration.channels(),
            });
        }

        let m = &self.config.motion;
        self.motor
            .connect(m.node_id, m.baud_rate, Duration::from_millis(m.timeout_ms))?;
        self.motor.activate_profile_position_mode()?;
        self.enter(RunState::Connected);
        Ok(channels)
    }

    fn go_to_initial(&mut self) -> Result<()> {
        let initial = self.config.drive.mm_to_counts(self.config.motion.initial_mm);
        let position = self.motor.position()?;
        if position != initial {
            info!("Moving from {} to initial position {}", position, initial);
            self.move_and_wait(initial, true)?;
            self.settle();
        }
        self.enter(RunState::Homed);
        Ok(())
    }

    fn capture_bias(&mut self, channels: &[PhysicalChannel]) -> Result<()> {
        self.confirm(BIAS_PROMPT)?;
        let bias = self
            .sampler
            .capture_bias(channels, self.config.daq.terminal)?;
        info!("Bias vector: {:?}", bias.to_vec());
        self.bias = Some(bias);
        self.enter(RunState::BiasCaptured);
        Ok(())
    }

    fn confirm(&mut self, prompt: &str) -> Result<()> {
        if self.operator.confirm(prompt)? {
            Ok(())
        } else {
            warn!("Operator declined: {}", prompt);
            Err(RigError::OperatorAbort {
                prompt: prompt.to_string(),
            })
        }
    }

    fn step(&mut self, channels: &[PhysicalChannel]) -> Result<()> {
        let drive = self.config.drive;
        let m = &self.config.motion;
        let positions = step_positions(
            drive.mm_to_counts(m.initial_mm),
            drive.mm_to_counts(m.target_mm),
            drive.mm_to_counts(m.step_mm),
        );
        let total = positions.len();
        info!("Stepping through {} positions", total);

        let daq = self.config.daq.clone();
        let samples = daq.samples_per_window();
        for (i, target) in positions.into_iter().enumerate() {
            let index = i + 1;
            self.enter(RunState::Stepping { step: index, of: total });
            self.move_and_wait(target, false)?;
            let means = self
                .sampler
                .read_channels(channels, daq.sample_rate_hz, samples, daq.terminal)?;
            let measured = self.motor.position()?;
            info!(
                "Step {}/{}: commanded {}, at {} ({:.3} mm)",
                index,
                total,
                target,
                measured,
                drive.counts_to_mm(measured)
            );
            self.steps.push(RawStep {
                index,
                commanded: target,
                measured,
                means,
            });
        }
        Ok(())
    }

    /// Calibrate every step in one matrix product
    fn transform(&mut self) -> Result<Vec<StepRecord>> {
        self.enter(RunState::Transforming);
        let channels = self.calibration.channels();
        let bias = match &self.bias {
            Some(bias) => bias.clone(),
            None => Array1::zeros(channels),
        };

        let mut raw = Array2::zeros((channels, self.steps.len()));
        for (col, step) in self.steps.iter().enumerate() {
            self.calibration.check_channels(step.means.len())?;
            raw.column_mut(col).assign(&step.means);
        }
        let forces = self.calibration.apply_batch(&raw, &bias)?;

        let drive = self.config.drive;
        Ok(self
            .steps
            .iter()
            .zip(forces.columns())
            .map(|(step, column)| {
                let mut axes = [0.0; AXES];
                for (axis, value) in axes.iter_mut().zip(column.iter()) {
                    *axis = *value;
                }
                StepRecord {
                    index: step.index,
                    commanded_counts: step.commanded,
                    displacement_mm: drive.counts_to_mm(step.measured),
                    force: ForceTorque::from(axes),
                }
            })
            .collect())
    }

    fn return_to_zero(&mut self) -> Result<i32> {
        self.enter(RunState::Homing);
        if self.motor.position()? != 0 {
            self.settle();
            info!("Returning to zero");
            self.move_and_wait(0, true)?;
        }
        Ok(self.motor.position()?)
    }

    fn finish(&mut self, records: Vec<StepRecord>, final_position: i32) -> Result<RunReport> {
        self.motor.shutdown()?;

        let path = self.config.output.path();
        let table = self.table(records);
        table.save(&path)?;
        self.enter(RunState::Done);
        Ok(RunReport {
            records: table.records,
            output_path: path,
            final_position,
        })
    }

    fn table(&self, records: Vec<StepRecord>) -> RunTable {
        RunTable {
            duration_s: self.config.daq.acquisition_s,
            sample_rate_hz: self.config.daq.sample_rate_hz,
            records,
        }
    }

    /// A move outside Profile Position Mode is skipped, not fatal
    fn move_and_wait(&mut self, target: i32, immediately: bool) -> Result<()> {
        let command = motion_command(&self.config, target, true, immediately);
        match self.motor.move_to(&command) {
            Ok(()) => wait_for(&mut self.motor, &self.config, target),
            Err(MotorError::WrongMode { actual }) => {
                warn!("Controller in {:?}, move to {} skipped", actual, target);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn settle(&self) {
        let settle = Duration::from_millis(self.config.motion.settle_ms);
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
    }
}

fn motion_command(
    config: &RigConfig,
    target: i32,
    absolute: bool,
    immediately: bool,
) -> MotionCommand {
    let m = &config.motion;
    MotionCommand {
        target,
        speed_rpm: m.speed_rpm,
        acceleration: m.acceleration,
        deceleration: m.deceleration,
        absolute,
        immediately,
    }
}

/// A timed-out wait is reported and the run goes on; a controller error ends it
fn wait_for<M: MotorBinding>(motor: &mut Motor<M>, config: &RigConfig, target: i32) -> Result<()> {
    let timeout = Duration::from_millis(config.motion.wait_timeout_ms);
    match motor.wait_for_target_reached(timeout) {
        TargetWait::Reached => Ok(()),
        TargetWait::TimedOut => {
            warn!("Target {} not reached within {:?}", target, timeout);
            Ok(())
        }
        TargetWait::Error(e) => Err(e.into()),
    }
}

/// Single move then software re-zero
///
/// Returns the position after re-zeroing, in encoder counts.
pub fn move_once<M: MotorBinding>(
    motor: &mut Motor<M>,
    config: &RigConfig,
    distance_mm: f64,
    relative: bool,
) -> Result<i32> {
    let m = &config.motion;
    motor.connect(m.node_id, m.baud_rate, Duration::from_millis(m.timeout_ms))?;
    motor.activate_profile_position_mode()?;

    // Sign survives here; only reported displacement is unsigned
    let counts = (distance_mm * config.drive.counts_per_mm()).round() as i32;
    info!(
        "Moving {} {} mm ({} counts)",
        if relative { "by" } else { "to" },
        distance_mm,
        counts
    );
    motor.move_to(&motion_command(config, counts, !relative, false))?;
    wait_for(motor, config, counts)?;
    let reached = motor.position()?;
    info!("Reached {} ({:.3} mm)", reached, config.drive.counts_to_mm(reached));

    motor.home()?;
    let position = motor.position()?;
    motor.shutdown()?;
    Ok(position)
}

/// Read-only controller snapshot
pub fn read_status<M: MotorBinding>(
    motor: &mut Motor<M>,
    config: &RigConfig,
) -> Result<MotorStatus> {
    let m = &config.motion;
    motor.connect_read_only(m.node_id, m.baud_rate, Duration::from_millis(m.timeout_ms))?;
    let status = motor.status()?;
    motor.close()?;
    Ok(status)
}
