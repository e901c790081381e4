// Simulated DAQ driver
//
// Returns constant per-channel voltages, optionally drifting by a fixed
// amount per acquisition. Requests are kept for inspection.

use ndarray::Array2;

use super::{AcquisitionRequest, DaqBackend, DaqError, Result, SampleBlock};

#[derive(Debug, Clone)]
pub struct SimulatedDaq {
    devices: Vec<(String, u32)>,
    levels: Vec<f64>,
    drift: f64,
    time_out: bool,
    requests: Vec<AcquisitionRequest>,
}

impl SimulatedDaq {
    pub fn new(device: &str, serial: u32) -> Self {
        Self {
            devices: vec![(device.to_string(), serial)],
            levels: vec![0.0],
            drift: 0.0,
            time_out: false,
            requests: Vec::new(),
        }
    }

    /// Add another device to the simulated system
    pub fn with_device(mut self, device: &str, serial: u32) -> Self {
        self.devices.push((device.to_string(), serial));
        self
    }

    /// Voltage of each requested channel, by position in the request.
    /// Cycles when the request has more channels than levels.
    pub fn with_levels(mut self, levels: Vec<f64>) -> Self {
        if !levels.is_empty() {
            self.levels = levels;
        }
        self
    }

    /// Added to every channel once per completed acquisition
    pub fn with_drift(mut self, drift: f64) -> Self {
        self.drift = drift;
        self
    }

    /// Every acquisition times out
    pub fn timing_out(mut self) -> Self {
        self.time_out = true;
        self
    }

    pub fn requests(&self) -> &[AcquisitionRequest] {
        &self.requests
    }
}

impl DaqBackend for SimulatedDaq {
    fn device_names(&mut self) -> Result<Vec<String>> {
        Ok(self.devices.iter().map(|(name, _)| name.clone()).collect())
    }

    fn serial_number(&mut self, device: &str) -> Result<u32> {
        self.devices
            .iter()
            .find(|(name, _)| name == device)
            .map(|&(_, serial)| serial)
            .ok_or_else(|| DaqError::Driver {
                code: -200220,
                message: format!("device identifier '{}' is invalid", device),
            })
    }

    fn acquire(&mut self, request: &AcquisitionRequest) -> Result<SampleBlock> {
        if self.time_out {
            return Err(DaqError::AcquisitionTimeout {
                timeout: request.timeout,
            });
        }
        let offset = self.drift * self.requests.len() as f64;
        self.requests.push(request.clone());

        let levels = &self.levels;
        Ok(Array2::from_shape_fn(
            (request.channels.len(), request.samples_per_channel),
            |(channel, _)| levels[channel % levels.len()] + offset,
        ))
    }
}
