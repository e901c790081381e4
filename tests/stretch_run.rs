// End-to-end runs against the simulated motor and DAQ

use std::path::Path;

use stretch_rig::calibration::Calibration;
use stretch_rig::config::RigConfig;
use stretch_rig::daq::{DaqError, SimulatedDaq};
use stretch_rig::motor::{MotorCall, MotorError, SimulatedMotor};
use stretch_rig::prompt::ScriptedOperator;
use stretch_rig::records::RunState;
use stretch_rig::runtime::{Rig, START_PROMPT};
use stretch_rig::RigError;

const SERIAL: u32 = 0x01C2_7A73;

const FT21484: &str = "\
-0.25125 -0.06105 1.17338 -13.52482 -0.47675 14.42734
-1.00959 16.23421 0.48377 -7.75925 0.49090 -8.31992
25.07049 -0.43117 25.14917 -0.09450 25.11196 -0.27838
-0.01317 0.19581 -0.72139 -0.09435 0.72986 -0.10509
0.83684 -0.00962 -0.43756 0.16328 -0.41280 -0.17187
0.02547 -0.43748 0.03185 -0.41796 0.02164 -0.44538
";

/// Five 2 mm steps with short acquisition windows
fn config(dir: &Path) -> RigConfig {
    let mut config = RigConfig::default();
    config.motion.target_mm = 10.0;
    config.motion.step_mm = 2.0;
    config.motion.settle_ms = 0;
    config.daq.acquisition_s = 0.05;
    config.output.dir = dir.join("Force Data");
    config.output.file = "run.csv".to_string();
    config.calibration_file = dir.join("cal.txt");
    std::fs::write(&config.calibration_file, FT21484).unwrap();
    config
}

fn calibration(config: &RigConfig) -> Calibration {
    Calibration::load(&config.calibration_file).unwrap()
}

type SimRig = Rig<SimulatedMotor, SimulatedDaq, ScriptedOperator>;

fn rig(config: RigConfig, motor: SimulatedMotor, daq: SimulatedDaq, answers: [bool; 2]) -> SimRig {
    let cal = calibration(&config);
    Rig::new(config, cal, motor, daq, ScriptedOperator::new(answers))
}

fn daq() -> SimulatedDaq {
    SimulatedDaq::new("Dev1", SERIAL).with_levels(vec![0.1, -0.2, 0.3, 0.05, 0.0, 1.0])
}

fn homing_calls(history: &[MotorCall]) -> usize {
    history
        .iter()
        .filter(|c| matches!(c, MotorCall::ActivateHoming | MotorCall::DefinePosition(_)))
        .count()
}

#[test]
fn five_steps_write_a_full_table() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let mut rig = rig(config, SimulatedMotor::new(), daq(), [true, true]);

    let report = rig.run().unwrap();
    assert_eq!(rig.state(), RunState::Done);

    let indices: Vec<usize> = report.records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    let displacements: Vec<f64> = report.records.iter().map(|r| r.displacement_mm).collect();
    assert_eq!(displacements, vec![2.0, 4.0, 6.0, 8.0, 10.0]);
    for record in &report.records {
        assert!(record.force.as_array().iter().all(|v| v.abs() < 1e-9));
    }

    let text = std::fs::read_to_string(&report.output_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5 + 3);
    assert!(lines[0].starts_with("Data Collection Duration (s):,0.05"));
    assert!(lines[1].starts_with("Force Sensor Sample rate (Hz):,1000"));
    assert_eq!(lines[2], "Sample No.,Fx,Fy,Fz,Tx,Ty,Tz,Motor Pos (mm)");
    assert!(lines[7].starts_with("5,"));
    assert!(lines[7].ends_with(",10"));

    // Steps go out in order, then back to zero; the drive ends disabled
    let moves = rig.motor().binding().moves();
    assert_eq!(moves.len(), 6);
    assert!(moves[..5].windows(2).all(|w| w[0] < w[1]));
    assert_eq!(moves[5], 0);
    assert_eq!(report.final_position, 0);
    assert!(!rig.motor().binding().is_enabled());
    assert_eq!(homing_calls(rig.motor().binding().history()), 0);
}

#[test]
fn one_acquisition_per_step_plus_bias() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let mut rig = rig(config, SimulatedMotor::new(), daq(), [true, true]);
    rig.run().unwrap();

    let requests = rig.sampler().backend().requests();
    assert_eq!(requests.len(), 6);
    assert_eq!(requests[0].task_name, "biasTask");
    assert_eq!(requests[0].samples_per_channel, 2000);
    assert!(requests[1..].iter().all(|r| r.task_name == "forceTask"));
    assert!(requests[1..].iter().all(|r| r.samples_per_channel == 50));
    // Differential filtering leaves ai0-ai5
    let names: Vec<String> = requests[1].channels.iter().map(|c| c.to_string()).collect();
    assert_eq!(
        names,
        ["Dev1/ai0", "Dev1/ai1", "Dev1/ai2", "Dev1/ai3", "Dev1/ai4", "Dev1/ai5"]
    );
}

#[test]
fn declining_the_start_prompt_moves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let output = config.output.path();
    let mut rig = rig(config, SimulatedMotor::new(), daq(), [true, false]);

    let err = rig.run().unwrap_err();
    assert!(matches!(&err, RigError::OperatorAbort { prompt } if prompt == START_PROMPT));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(rig.state(), RunState::BiasCaptured);

    let history = rig.motor().binding().history();
    assert!(!history.iter().any(|c| matches!(c, MotorCall::MoveTo { .. })));
    assert_eq!(homing_calls(history), 0);
    assert!(!output.exists());
}

#[test]
fn missing_daq_aborts_before_motion() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let daq = SimulatedDaq::new("Dev1", 0x0BAD_F00D);
    let mut rig = rig(config, SimulatedMotor::new(), daq, [true, true]);

    let err = rig.run().unwrap_err();
    assert!(matches!(err, RigError::Daq(DaqError::DeviceNotFound { serial: SERIAL })));
    assert_eq!(err.exit_code(), 1);
    assert!(rig.motor().binding().history().is_empty());
    assert!(rig.operator().asked().is_empty());
}

#[test]
fn unreachable_controller_is_a_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let mut rig = rig(config, SimulatedMotor::unreachable(), daq(), [true, true]);

    let err = rig.run().unwrap_err();
    assert!(matches!(err, RigError::Motor(MotorError::Connection { .. })));
    assert_eq!(rig.state(), RunState::Idle);
    assert!(rig.operator().asked().is_empty());
}

#[test]
fn acquisition_timeout_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let daq = SimulatedDaq::new("Dev1", SERIAL).timing_out();
    let mut rig = rig(config, SimulatedMotor::new(), daq, [true, true]);

    let err = rig.run().unwrap_err();
    assert!(matches!(err, RigError::Daq(DaqError::AcquisitionTimeout { .. })));
    assert!(rig.motor().binding().moves().is_empty());
    assert!(rig.steps().is_empty());
}

#[test]
fn speed_is_clamped_to_the_rated_maximum() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.motion.speed_rpm = 12_000;
    let max = config.motion.max_speed_rpm;
    let mut rig = rig(config, SimulatedMotor::new(), daq(), [true, true]);
    rig.run().unwrap();

    let profile = rig.motor().binding().profile().unwrap();
    assert_eq!(profile.velocity_rpm, max);
}

#[test]
fn moves_outside_profile_position_mode_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let motor = SimulatedMotor::new().ignoring_mode_changes();
    let mut rig = rig(config, motor, daq(), [true, true]);

    let report = rig.run().unwrap();
    assert_eq!(rig.state(), RunState::Done);
    assert!(rig.motor().binding().moves().is_empty());
    assert!(!rig.motor().binding().history().iter().any(|c| matches!(c, MotorCall::Wait)));

    // Every step is still sampled, at the unmoved position
    assert_eq!(report.records.len(), 5);
    assert!(report.records.iter().all(|r| r.displacement_mm == 0.0));
    let text = std::fs::read_to_string(&report.output_path).unwrap();
    assert_eq!(text.lines().count(), 5 + 3);
}

#[test]
fn failed_return_to_zero_still_saves_the_table() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let output = config.output.path();
    // Five steps, then the sixth move (back to zero) faults the drive
    let motor = SimulatedMotor::new().faulting_on_move(6);
    let mut rig = rig(config, motor, daq(), [true, true]);

    let err = rig.run().unwrap_err();
    assert!(matches!(err, RigError::Motor(MotorError::Fault { .. })));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(rig.state(), RunState::Homing);
    assert_eq!(rig.steps().len(), 5);

    let text = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5 + 3);
    assert!(lines[7].starts_with("5,"));
}
