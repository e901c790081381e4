// NI-DAQmx C API binding
//
// Only the calls needed for a finite analog-input acquisition. Built with
// the `nidaqmx` feature; requires the NI-DAQmx runtime to be installed.

use std::ffi::{c_char, c_void, CString};
use std::ptr;

use ndarray::Array2;
use tracing::debug;

use super::{AcquisitionRequest, DaqBackend, DaqError, Result, SampleBlock, TerminalConfig};

type TaskHandle = *mut c_void;

// Constants from NIDAQmx.h
const DAQMX_VAL_CFG_DEFAULT: i32 = -1;
const DAQMX_VAL_RSE: i32 = 10083;
const DAQMX_VAL_NRSE: i32 = 10078;
const DAQMX_VAL_DIFF: i32 = 10106;
const DAQMX_VAL_PSEUDO_DIFF: i32 = 12529;
const DAQMX_VAL_VOLTS: i32 = 10348;
const DAQMX_VAL_RISING: i32 = 10280;
const DAQMX_VAL_FINITE_SAMPS: i32 = 10178;
const DAQMX_VAL_GROUP_BY_CHANNEL: u32 = 0;
const DAQMX_ERROR_SAMPLES_NOT_YET_AVAILABLE: i32 = -200284;

/// Input range of the transducer amplifier outputs
const MIN_VOLTS: f64 = -5.0;
const MAX_VOLTS: f64 = 5.0;

#[cfg_attr(windows, link(name = "NIDAQmx"))]
#[cfg_attr(not(windows), link(name = "nidaqmx"))]
unsafe extern "C" {
    fn DAQmxGetSysDevNames(data: *mut c_char, buffer_size: u32) -> i32;
    fn DAQmxGetDevSerialNum(device: *const c_char, data: *mut u32) -> i32;
    fn DAQmxCreateTask(task_name: *const c_char, task: *mut TaskHandle) -> i32;
    fn DAQmxCreateAIVoltageChan(
        task: TaskHandle,
        physical_channel: *const c_char,
        name_to_assign: *const c_char,
        terminal_config: i32,
        min_val: f64,
        max_val: f64,
        units: i32,
        custom_scale_name: *const c_char,
    ) -> i32;
    fn DAQmxCfgSampClkTiming(
        task: TaskHandle,
        source: *const c_char,
        rate: f64,
        active_edge: i32,
        sample_mode: i32,
        samps_per_chan: u64,
    ) -> i32;
    fn DAQmxReadAnalogF64(
        task: TaskHandle,
        num_samps_per_chan: i32,
        timeout: f64,
        fill_mode: u32,
        read_array: *mut f64,
        array_size_in_samps: u32,
        samps_per_chan_read: *mut i32,
        reserved: *mut u32,
    ) -> i32;
    fn DAQmxClearTask(task: TaskHandle) -> i32;
    fn DAQmxGetExtendedErrorInfo(error_string: *mut c_char, buffer_size: u32) -> i32;
}

fn terminal_value(terminal: TerminalConfig) -> i32 {
    match terminal {
        TerminalConfig::Default => DAQMX_VAL_CFG_DEFAULT,
        TerminalConfig::Differential => DAQMX_VAL_DIFF,
        TerminalConfig::Nrse => DAQMX_VAL_NRSE,
        TerminalConfig::PseudoDifferential => DAQMX_VAL_PSEUDO_DIFF,
        TerminalConfig::Rse => DAQMX_VAL_RSE,
    }
}

fn extended_error() -> String {
    let mut buffer = vec![0u8; 2048];
    // SAFETY: the buffer outlives the call and its size is passed along
    unsafe {
        DAQmxGetExtendedErrorInfo(buffer.as_mut_ptr() as *mut c_char, buffer.len() as u32);
    }
    let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..end]).into_owned()
}

/// Negative status codes are errors, positive ones warnings
fn check(status: i32) -> Result<()> {
    if status < 0 {
        return Err(DaqError::Driver {
            code: status,
            message: extended_error(),
        });
    }
    if status > 0 {
        debug!("DAQmx warning {}", status);
    }
    Ok(())
}

fn c_string(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| DaqError::Driver {
        code: 0,
        message: format!("'{}' contains a NUL byte", s),
    })
}

/// Task handle, cleared when dropped
struct Task(TaskHandle);

impl Task {
    fn create(name: &str) -> Result<Self> {
        let name = c_string(name)?;
        let mut handle: TaskHandle = ptr::null_mut();
        // SAFETY: valid C string and out pointer
        check(unsafe { DAQmxCreateTask(name.as_ptr(), &mut handle) })?;
        Ok(Self(handle))
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // SAFETY: handle came from DAQmxCreateTask and is cleared once
        unsafe {
            DAQmxClearTask(self.0);
        }
    }
}

/// The local NI-DAQmx system
#[derive(Debug, Default)]
pub struct NiDaqmx;

impl NiDaqmx {
    pub fn new() -> Self {
        Self
    }
}

impl DaqBackend for NiDaqmx {
    fn device_names(&mut self) -> Result<Vec<String>> {
        // A null buffer returns the required size
        // SAFETY: null buffer with zero size is the documented size query
        let size = unsafe { DAQmxGetSysDevNames(ptr::null_mut(), 0) };
        check(size.min(0))?;
        if size <= 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; size as usize];
        // SAFETY: buffer is `size` bytes long
        check(unsafe { DAQmxGetSysDevNames(buffer.as_mut_ptr() as *mut c_char, size as u32) })?;
        let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
        let names = String::from_utf8_lossy(&buffer[..end]).into_owned();
        Ok(names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn serial_number(&mut self, device: &str) -> Result<u32> {
        let device = c_string(device)?;
        let mut serial = 0u32;
        // SAFETY: valid C string and out pointer
        check(unsafe { DAQmxGetDevSerialNum(device.as_ptr(), &mut serial) })?;
        Ok(serial)
    }

    fn acquire(&mut self, request: &AcquisitionRequest) -> Result<SampleBlock> {
        let task = Task::create(&request.task_name)?;
        let empty = c_string("")?;

        for channel in &request.channels {
            let name = c_string(&channel.to_string())?;
            // SAFETY: live task handle and C strings
            check(unsafe {
                DAQmxCreateAIVoltageChan(
                    task.0,
                    name.as_ptr(),
                    empty.as_ptr(),
                    terminal_value(request.terminal),
                    MIN_VOLTS,
                    MAX_VOLTS,
                    DAQMX_VAL_VOLTS,
                    ptr::null(),
                )
            })?;
        }

        // SAFETY: live task handle; empty source selects the onboard clock
        check(unsafe {
            DAQmxCfgSampClkTiming(
                task.0,
                empty.as_ptr(),
                request.sample_rate_hz,
                DAQMX_VAL_RISING,
                DAQMX_VAL_FINITE_SAMPS,
                request.samples_per_channel as u64,
            )
        })?;

        let channels = request.channels.len();
        let samples = request.samples_per_channel;
        let mut data = vec![0f64; channels * samples];
        let mut read = 0i32;
        // SAFETY: `data` holds channels * samples values, matching the size argument
        let status = unsafe {
            DAQmxReadAnalogF64(
                task.0,
                samples as i32,
                request.timeout.as_secs_f64(),
                DAQMX_VAL_GROUP_BY_CHANNEL,
                data.as_mut_ptr(),
                data.len() as u32,
                &mut read,
                ptr::null_mut(),
            )
        };
        if status == DAQMX_ERROR_SAMPLES_NOT_YET_AVAILABLE {
            return Err(DaqError::AcquisitionTimeout {
                timeout: request.timeout,
            });
        }
        check(status)?;
        if read as usize != samples {
            return Err(DaqError::Shape {
                expected_channels: channels,
                expected_samples: samples,
                channels,
                samples: read.max(0) as usize,
            });
        }

        // Grouped by channel: row-major (channels, samples)
        Array2::from_shape_vec((channels, samples), data).map_err(|e| DaqError::Driver {
            code: 0,
            message: e.to_string(),
        })
    }
}
