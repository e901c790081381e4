// Multichannel analog input sampling for the force/torque transducer
//
// Provides:
// - Terminal configuration and differential channel filtering
// - The backend interface to a DAQ driver (NI-DAQmx, simulator)
// - A sampler that runs finite acquisitions and reduces them to means

#[cfg(feature = "nidaqmx")]
pub mod nidaqmx;
pub mod sim;

use std::fmt;
use std::time::Duration;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use sim::SimulatedDaq;

/// Extra time allowed beyond the theoretical acquisition time
pub const ACQUISITION_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Analog inputs that can be wired as differential pairs (ai0-7, ai16-23)
pub const DIFFERENTIAL_CHANNELS: [std::ops::Range<u32>; 2] = [0..8, 16..24];

/// Raw voltages, one row per channel, one column per sample
pub type SampleBlock = Array2<f64>;

/// Analog front-end wiring mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalConfig {
    Default,
    Differential,
    Nrse,
    PseudoDifferential,
    Rse,
}

impl TerminalConfig {
    /// Whether `index` can be used in this configuration
    pub fn supports(self, index: u32) -> bool {
        match self {
            Self::Differential => DIFFERENTIAL_CHANNELS.iter().any(|r| r.contains(&index)),
            _ => true,
        }
    }

    /// Keep the usable channels, in their original order
    ///
    /// Unsupported channels are dropped without error.
    pub fn filter_channels(self, indices: &[u32]) -> Vec<u32> {
        indices.iter().copied().filter(|&i| self.supports(i)).collect()
    }
}

/// Analog input `<device>/ai<index>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalChannel {
    pub device: String,
    pub index: u32,
}

impl fmt::Display for PhysicalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/ai{}", self.device, self.index)
    }
}

/// One finite acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRequest {
    pub task_name: String,
    pub channels: Vec<PhysicalChannel>,
    pub sample_rate_hz: f64,
    pub samples_per_channel: usize,
    pub terminal: TerminalConfig,
    pub timeout: Duration,
}

impl AcquisitionRequest {
    /// The theoretical acquisition time plus a generous margin
    pub fn default_timeout(sample_rate_hz: f64, samples_per_channel: usize) -> Duration {
        Duration::from_secs_f64(samples_per_channel as f64 / sample_rate_hz)
            + ACQUISITION_TIMEOUT_MARGIN
    }
}

/// Error types for DAQ access
#[derive(Debug, thiserror::Error)]
pub enum DaqError {
    #[error("DAQ device with serial number {serial:08X} not found")]
    DeviceNotFound { serial: u32 },

    #[error("No DAQ device opened")]
    NotOpen,

    #[error("Acquisition did not complete within {timeout:?}")]
    AcquisitionTimeout { timeout: Duration },

    #[error("DAQ driver error {code}: {message}")]
    Driver { code: i32, message: String },

    #[error("No usable channels left for {terminal:?} configuration")]
    NoChannels { terminal: TerminalConfig },

    #[error("Expected {expected_channels}x{expected_samples} samples, got {channels}x{samples}")]
    Shape {
        expected_channels: usize,
        expected_samples: usize,
        channels: usize,
        samples: usize,
    },
}

pub type Result<T> = std::result::Result<T, DaqError>;

/// The driver operations the sampler needs
pub trait DaqBackend {
    /// Names of all devices known to the driver
    fn device_names(&mut self) -> Result<Vec<String>>;
    fn serial_number(&mut self, device: &str) -> Result<u32>;
    /// Run a finite acquisition, blocking until every sample is in
    fn acquire(&mut self, request: &AcquisitionRequest) -> Result<SampleBlock>;
}

/// Task names, matching what the operators see in NI MAX
pub const FORCE_TASK: &str = "forceTask";
pub const BIAS_TASK: &str = "biasTask";

/// Finite-acquisition sampler on one DAQ device
pub struct DaqSampler<B: DaqBackend> {
    backend: B,
    device: Option<String>,
}

impl<B: DaqBackend> DaqSampler<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            device: None,
        }
    }

    /// Look the device up by serial number and keep its name
    pub fn open(&mut self, serial: u32) -> Result<&str> {
        let mut found = None;
        for name in self.backend.device_names()? {
            if self.backend.serial_number(&name)? == serial {
                found = Some(name);
                break;
            }
        }
        let name = found.ok_or(DaqError::DeviceNotFound { serial })?;
        info!("Using DAQ device {} (serial {:08X})", name, serial);
        Ok(self.device.insert(name).as_str())
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Physical channels for `indices` under `terminal`
    pub fn channels(
        &self,
        indices: &[u32],
        terminal: TerminalConfig,
    ) -> Result<Vec<PhysicalChannel>> {
        let device = self.device.as_ref().ok_or(DaqError::NotOpen)?;
        let usable = terminal.filter_channels(indices);
        if usable.len() != indices.len() {
            debug!(
                "{:?} configuration dropped channels {:?}",
                terminal,
                indices.iter().filter(|i| !usable.contains(i)).collect::<Vec<_>>()
            );
        }
        if usable.is_empty() {
            return Err(DaqError::NoChannels { terminal });
        }
        Ok(usable
            .into_iter()
            .map(|index| PhysicalChannel {
                device: device.clone(),
                index,
            })
            .collect())
    }

    /// Acquire `sample_count` samples per channel and return per-channel means
    pub fn read_channels(
        &mut self,
        channels: &[PhysicalChannel],
        sample_rate_hz: f64,
        sample_count: usize,
        terminal: TerminalConfig,
    ) -> Result<Array1<f64>> {
        self.read_with_task(FORCE_TASK, channels, sample_rate_hz, sample_count, terminal)
    }

    /// Baseline with no load: 2 s at 1 kHz
    pub fn capture_bias(
        &mut self,
        channels: &[PhysicalChannel],
        terminal: TerminalConfig,
    ) -> Result<Array1<f64>> {
        self.read_with_task(
            BIAS_TASK,
            channels,
            crate::config::BIAS_SAMPLE_RATE_HZ,
            crate::config::BIAS_SAMPLES,
            terminal,
        )
    }

    fn read_with_task(
        &mut self,
        task_name: &str,
        channels: &[PhysicalChannel],
        sample_rate_hz: f64,
        sample_count: usize,
        terminal: TerminalConfig,
    ) -> Result<Array1<f64>> {
        let request = AcquisitionRequest {
            task_name: task_name.to_string(),
            channels: channels.to_vec(),
            sample_rate_hz,
            samples_per_channel: sample_count,
            terminal,
            timeout: AcquisitionRequest::default_timeout(sample_rate_hz, sample_count),
        };
        debug!(
            "{}: {} channels x {} samples at {} Hz",
            task_name,
            channels.len(),
            sample_count,
            sample_rate_hz
        );
        let block = self.backend.acquire(&request)?;
        channel_means(&block, channels.len(), sample_count)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// Reduce a sample block to the mean of each channel
pub fn channel_means(block: &SampleBlock, channels: usize, samples: usize) -> Result<Array1<f64>> {
    let (rows, cols) = block.dim();
    let shape_error = DaqError::Shape {
        expected_channels: channels,
        expected_samples: samples,
        channels: rows,
        samples: cols,
    };
    if rows != channels || cols != samples {
        return Err(shape_error);
    }
    block.mean_axis(Axis(1)).ok_or(shape_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_differential_filter_keeps_order() {
        let input = [0, 1, 2, 3, 4, 5, 8, 9, 10, 11, 12, 13];
        assert_eq!(
            TerminalConfig::Differential.filter_channels(&input),
            vec![0, 1, 2, 3, 4, 5]
        );
        assert_eq!(
            TerminalConfig::Differential.filter_channels(&[23, 16, 7, 15, 24]),
            vec![23, 16, 7]
        );
    }

    #[test]
    fn test_other_configs_keep_everything() {
        let input = [0, 8, 13, 31];
        for terminal in [
            TerminalConfig::Default,
            TerminalConfig::Nrse,
            TerminalConfig::PseudoDifferential,
            TerminalConfig::Rse,
        ] {
            assert_eq!(terminal.filter_channels(&input), input.to_vec());
        }
    }

    #[test]
    fn test_channel_name() {
        let ch = PhysicalChannel {
            device: "Dev1".to_string(),
            index: 12,
        };
        assert_eq!(ch.to_string(), "Dev1/ai12");
    }

    #[test]
    fn test_terminal_config_names() {
        let t: TerminalConfig = serde_json::from_str("\"PSEUDO_DIFFERENTIAL\"").unwrap();
        assert_eq!(t, TerminalConfig::PseudoDifferential);
        assert_eq!(serde_json::to_string(&TerminalConfig::Rse).unwrap(), "\"RSE\"");
    }

    #[test]
    fn test_channel_means() {
        let block = array![[1.0, 2.0, 3.0], [-1.0, -1.0, -4.0]];
        let means = channel_means(&block, 2, 3).unwrap();
        assert_eq!(means, array![2.0, -2.0]);
        assert!(matches!(channel_means(&block, 3, 3), Err(DaqError::Shape { .. })));
    }

    #[test]
    fn test_timeout_has_margin() {
        let timeout = AcquisitionRequest::default_timeout(1000.0, 2000);
        assert_eq!(timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_open_by_serial() {
        let backend = SimulatedDaq::new("Dev1", 0x01C2_7A73).with_device("Dev2", 0x1234);
        let mut sampler = DaqSampler::new(backend);
        assert_eq!(sampler.open(0x1234).unwrap(), "Dev2");
        assert!(matches!(
            sampler.open(0xDEAD),
            Err(DaqError::DeviceNotFound { serial: 0xDEAD })
        ));
    }

    #[test]
    fn test_channels_need_open_device() {
        let sampler = DaqSampler::new(SimulatedDaq::new("Dev1", 1));
        assert!(matches!(
            sampler.channels(&[0], TerminalConfig::Rse),
            Err(DaqError::NotOpen)
        ));
    }

    #[test]
    fn test_all_channels_dropped_is_an_error() {
        let mut sampler = DaqSampler::new(SimulatedDaq::new("Dev1", 1));
        sampler.open(1).unwrap();
        assert!(matches!(
            sampler.channels(&[8, 9], TerminalConfig::Differential),
            Err(DaqError::NoChannels { .. })
        ));
    }

    #[test]
    fn test_bias_uses_two_second_window() {
        let daq = SimulatedDaq::new("Dev1", 1).with_levels(vec![0.5, 0.25]);
        let mut sampler = DaqSampler::new(daq);
        sampler.open(1).unwrap();
        let channels = sampler.channels(&[0, 1], TerminalConfig::Differential).unwrap();
        let bias = sampler.capture_bias(&channels, TerminalConfig::Differential).unwrap();
        assert_eq!(bias, array![0.5, 0.25]);

        let request = &sampler.backend().requests()[0];
        assert_eq!(request.task_name, BIAS_TASK);
        assert_eq!(request.samples_per_channel, 2000);
        assert_eq!(request.sample_rate_hz, 1000.0);
        assert_eq!(request.channels[1].to_string(), "Dev1/ai1");
    }
}
