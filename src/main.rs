use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stretch_rig::calibration::Calibration;
use stretch_rig::config::{ConfigError, RigConfig};
use stretch_rig::daq::{DaqBackend, SimulatedDaq, TerminalConfig};
#[cfg(not(feature = "nidaqmx"))]
use stretch_rig::daq::DaqError;
use stretch_rig::motor::{Epos2Serial, Motor, MotorBinding, SimulatedMotor};
use stretch_rig::prompt::{AssumeYes, ConsoleOperator};
use stretch_rig::runtime::{move_once, read_status, Rig, RunReport};
use stretch_rig::Result;

/// Name the simulated DAQ reports
const SIM_DEVICE: &str = "SimDev1";

/// Stepped stretch test with force/torque logging
#[derive(Parser, Debug)]
#[command(name = "stretch-rig")]
#[command(version)]
struct Args {
    /// JSON config file; missing fields keep the built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the simulated motor and DAQ
    #[arg(long, global = true)]
    simulate: bool,

    /// Answer yes to every confirmation prompt
    #[arg(short, long, global = true)]
    yes: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long, global = true)]
    print_config: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Args, Debug, Default)]
struct Overrides {
    /// Stretch amplitude (mm)
    #[arg(long, global = true)]
    target: Option<f64>,

    /// Displacement per step (mm)
    #[arg(long, global = true)]
    step: Option<f64>,

    /// Position the run starts from (mm)
    #[arg(long, global = true)]
    initial: Option<f64>,

    /// Motor speed (rpm), clamped to the rated maximum
    #[arg(long, global = true)]
    speed: Option<u32>,

    /// DAQ sample rate (Hz)
    #[arg(long, global = true)]
    rate: Option<f64>,

    /// Acquisition window per step (s)
    #[arg(long, global = true)]
    duration: Option<f64>,

    /// Analog input channels, comma separated
    #[arg(long, global = true, value_delimiter = ',')]
    channels: Option<Vec<u32>>,

    #[arg(long, global = true, value_enum)]
    terminal: Option<TerminalConfig>,

    /// Output CSV path
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// 6x6 calibration matrix file
    #[arg(long, global = true)]
    calibration: Option<PathBuf>,

    /// Serial port of the motion controller
    #[arg(long, global = true)]
    port: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut RigConfig) {
        let m = &mut config.motion;
        if let Some(v) = self.target {
            m.target_mm = v;
        }
        if let Some(v) = self.step {
            m.step_mm = v;
        }
        if let Some(v) = self.initial {
            m.initial_mm = v;
        }
        if let Some(v) = self.speed {
            m.speed_rpm = v;
        }
        if let Some(v) = self.port {
            m.device.port = v;
        }

        let daq = &mut config.daq;
        if let Some(v) = self.rate {
            daq.sample_rate_hz = v;
        }
        if let Some(v) = self.duration {
            daq.acquisition_s = v;
        }
        if let Some(v) = self.channels {
            daq.channels = v;
        }
        if let Some(v) = self.terminal {
            daq.terminal = v;
        }

        if let Some(path) = self.output {
            if let Some(dir) = path.parent() {
                config.output.dir = dir.to_path_buf();
            }
            if let Some(file) = path.file_name() {
                config.output.file = file.to_string_lossy().into_owned();
            }
        }
        if let Some(path) = self.calibration {
            config.calibration_file = path;
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the stepped datalogger (default)
    Log,

    /// Move the axis, then re-zero at the new position
    Move {
        /// Distance or absolute target (mm)
        #[arg(allow_negative_numbers = true)]
        distance: f64,

        /// Move relative to the current target
        #[arg(long)]
        relative: bool,
    },

    /// Read the controller state without moving
    Status,
}

fn main() {
    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => RigConfig::from_file(path)?,
        None => RigConfig::default(),
    };
    args.overrides.apply(&mut config);
    config.validate()?;

    if args.print_config {
        let json = serde_json::to_string_pretty(&config).map_err(ConfigError::from)?;
        println!("{}", json);
        return Ok(());
    }

    match args.command.unwrap_or(Command::Log) {
        Command::Log => {
            let report = log(config, args.simulate, args.yes)?;
            print_summary(&report);
        }
        Command::Move { distance, relative } => {
            let position = if args.simulate {
                let mut motor = Motor::new(SimulatedMotor::new(), config.motion.max_speed_rpm);
                move_once(&mut motor, &config, distance, relative)?
            } else {
                let binding = Epos2Serial::new(config.motion.device.clone());
                let mut motor = Motor::new(binding, config.motion.max_speed_rpm);
                move_once(&mut motor, &config, distance, relative)?
            };
            println!("Final position: {} counts", position);
        }
        Command::Status => {
            let status = if args.simulate {
                let mut motor = Motor::new(SimulatedMotor::new(), config.motion.max_speed_rpm);
                read_status(&mut motor, &config)?
            } else {
                let binding = Epos2Serial::new(config.motion.device.clone());
                let mut motor = Motor::new(binding, config.motion.max_speed_rpm);
                read_status(&mut motor, &config)?
            };
            println!("Position:     {} counts", status.position);
            println!("Target:       {} counts", status.target);
            println!("Mode:         {:?}", status.mode);
            println!("Statusword:   0x{:04X}", status.statusword);
            println!("Enabled:      {}", status.is_enabled());
            println!("Fault:        {}", status.is_faulted());
            println!("At target:    {}", status.target_reached());
        }
    }
    Ok(())
}

fn log(config: RigConfig, simulate: bool, yes: bool) -> Result<RunReport> {
    let calibration = Calibration::load(&config.calibration_file)?;
    let serial = config.daq.serial_number()?;

    if simulate {
        let initial = config.drive.mm_to_counts(config.motion.initial_mm);
        let motor = SimulatedMotor::at_position(initial);
        let daq = SimulatedDaq::new(SIM_DEVICE, serial).with_drift(0.001);
        return run_rig(config, calibration, motor, daq, yes);
    }

    run_hardware(config, calibration, serial, yes)
}

#[cfg(feature = "nidaqmx")]
fn run_hardware(
    config: RigConfig,
    calibration: Calibration,
    _serial: u32,
    yes: bool,
) -> Result<RunReport> {
    let motor = Epos2Serial::new(config.motion.device.clone());
    let daq = stretch_rig::daq::nidaqmx::NiDaqmx::new();
    run_rig(config, calibration, motor, daq, yes)
}

/// Without the DAQmx driver no real device can be found; nothing is moved
#[cfg(not(feature = "nidaqmx"))]
fn run_hardware(
    _config: RigConfig,
    _calibration: Calibration,
    serial: u32,
    _yes: bool,
) -> Result<RunReport> {
    tracing::error!(
        "Built without the nidaqmx feature; rebuild with --features nidaqmx or pass --simulate"
    );
    Err(DaqError::DeviceNotFound { serial }.into())
}

fn run_rig<M: MotorBinding, D: DaqBackend>(
    config: RigConfig,
    calibration: Calibration,
    motor: M,
    daq: D,
    yes: bool,
) -> Result<RunReport> {
    if yes {
        Rig::new(config, calibration, motor, daq, AssumeYes).run()
    } else {
        Rig::new(config, calibration, motor, daq, ConsoleOperator).run()
    }
}

fn print_summary(report: &RunReport) {
    let last = report.records.last().map_or(0.0, |r| r.displacement_mm);
    println!();
    println!("Run complete");
    println!("  Steps:          {}", report.records.len());
    println!("  Max stretch:    {:.3} mm", last);
    println!("  Final position: {} counts", report.final_position);
    println!("  Output:         {}", report.output_path.display());
}
