// EPOS2 serial protocol (maxon "MAXON SERIAL V2")
//
// Frame format: [DLE, STX, OpCode, Len, Data (Len words, LE)..., CRC (LE)]
// Every DLE inside OpCode..CRC is sent twice. The CRC is CRC-CCITT over the
// header word (Len << 8 | OpCode), the data words and a zero word.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::binding::{
    object, status, DeviceIdentity, MotorBinding, MotorError, OperationMode, PositionProfile,
    Result, TargetWait,
};

/// Sync bytes
const DLE: u8 = 0x90;
const STX: u8 = 0x02;

/// How often the statusword is polled while waiting
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Homing method 35: current position becomes the home position
const HOMING_METHOD_ACTUAL_POSITION: i8 = 35;
const HOMING_TIMEOUT: Duration = Duration::from_secs(2);

/// Controlword commands (CiA 402 device control)
mod control {
    pub const SHUTDOWN: u16 = 0x0006;
    pub const SWITCH_ON_ENABLE: u16 = 0x000F;
    pub const FAULT_RESET: u16 = 0x0080;
    pub const NEW_SETPOINT: u16 = 0x0010;
    pub const CHANGE_IMMEDIATELY: u16 = 0x0020;
    pub const RELATIVE: u16 = 0x0040;
    pub const HALT: u16 = 0x0100;
    pub const HOMING_START: u16 = 0x0010;
}

/// Protocol op codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    Answer = 0x00,
    ReadObject = 0x60,
    WriteObject = 0x68,
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub op_code: u8,
    pub data: Vec<u8>,
}

/// CRC-CCITT (poly 0x1021, init 0) over 16-bit words, MSB first
pub fn crc_ccitt(words: &[u16]) -> u16 {
    let mut crc: u16 = 0;
    for &word in words {
        let mut shifter: u16 = 0x8000;
        while shifter != 0 {
            let carry = crc & 0x8000 != 0;
            crc <<= 1;
            if word & shifter != 0 {
                crc |= 1;
            }
            if carry {
                crc ^= 0x1021;
            }
            shifter >>= 1;
        }
    }
    crc
}

/// CRC of a frame body (op code, length, data), with the CRC field zeroed
fn frame_crc(op_code: u8, data: &[u8]) -> u16 {
    let len_words = (data.len() / 2) as u8;
    let mut words = Vec::with_capacity(data.len() / 2 + 2);
    words.push(u16::from_le_bytes([op_code, len_words]));
    words.extend(data.chunks_exact(2).map(|w| u16::from_le_bytes([w[0], w[1]])));
    words.push(0);
    crc_ccitt(&words)
}

/// Build a stuffed frame ready for the wire. `data` is padded to whole words.
pub fn encode_frame(op_code: OpCode, data: &[u8]) -> Vec<u8> {
    let mut padded = data.to_vec();
    if padded.len() % 2 != 0 {
        padded.push(0);
    }
    let crc = frame_crc(op_code as u8, &padded);

    let mut body = Vec::with_capacity(padded.len() + 4);
    body.push(op_code as u8);
    body.push((padded.len() / 2) as u8);
    body.extend_from_slice(&padded);
    body.extend_from_slice(&crc.to_le_bytes());

    let mut frame = Vec::with_capacity(body.len() * 2 + 2);
    frame.push(DLE);
    frame.push(STX);
    for byte in body {
        frame.push(byte);
        if byte == DLE {
            frame.push(DLE);
        }
    }
    frame
}

/// Read one unstuffed byte. A DLE must be followed by a second DLE.
fn read_stuffed<R: Read>(reader: &mut R, node: u8) -> Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    if byte[0] == DLE {
        let mut next = [0u8; 1];
        reader.read_exact(&mut next)?;
        if next[0] != DLE {
            return Err(MotorError::InvalidFrame {
                node,
                reason: format!("unexpected byte 0x{:02X} after DLE", next[0]),
            });
        }
    }
    Ok(byte[0])
}

/// Read and verify one frame from `reader`
pub fn read_frame<R: Read>(reader: &mut R, node: u8) -> Result<Frame> {
    // Skip noise until the sync sequence
    let mut prev = 0u8;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        if prev == DLE && byte[0] == STX {
            break;
        }
        prev = byte[0];
    }

    let op_code = read_stuffed(reader, node)?;
    let len_words = read_stuffed(reader, node)? as usize;
    let mut data = Vec::with_capacity(len_words * 2);
    for _ in 0..len_words * 2 {
        data.push(read_stuffed(reader, node)?);
    }
    let crc = u16::from_le_bytes([read_stuffed(reader, node)?, read_stuffed(reader, node)?]);

    if crc != frame_crc(op_code, &data) {
        return Err(MotorError::CrcMismatch { node });
    }
    Ok(Frame { op_code, data })
}

/// Check an answer frame and split off the 32-bit device error code
fn answer_payload(frame: Frame, node: u8, index: u16, subindex: u8) -> Result<Vec<u8>> {
    if frame.op_code != OpCode::Answer as u8 {
        return Err(MotorError::InvalidFrame {
            node,
            reason: format!("expected answer, got op code 0x{:02X}", frame.op_code),
        });
    }
    if frame.data.len() < 4 {
        return Err(MotorError::InvalidFrame {
            node,
            reason: format!("answer too short ({} bytes)", frame.data.len()),
        });
    }
    let code = u32::from_le_bytes([frame.data[0], frame.data[1], frame.data[2], frame.data[3]]);
    if code != 0 {
        return Err(MotorError::Device {
            node,
            index,
            subindex,
            code,
        });
    }
    Ok(frame.data[4..].to_vec())
}

fn mask(len: u8) -> u32 {
    match len {
        0 => 0,
        1 => 0xFF,
        2 => 0xFFFF,
        3 => 0x00FF_FFFF,
        _ => 0xFFFF_FFFF,
    }
}

/// EPOS2 session over an RS232 / USB serial port
pub struct Epos2Serial {
    identity: DeviceIdentity,
    port: Option<Box<dyn SerialPort>>,
    node_id: u8,
}

impl Epos2Serial {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            port: None,
            node_id: 0,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn connection_error(&self, reason: impl Into<String>) -> MotorError {
        MotorError::Connection {
            device: self.identity.device_name.clone(),
            port: self.identity.port.clone(),
            reason: reason.into(),
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(MotorError::NotConnected)
    }

    fn transact(&mut self, op_code: OpCode, data: &[u8]) -> Result<Frame> {
        let node = self.node_id;
        let packet = encode_frame(op_code, data);
        let port = self.port()?;
        port.write_all(&packet)?;
        port.flush()?;
        read_frame(port, node).map_err(|e| match e {
            MotorError::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
                MotorError::InvalidFrame {
                    node,
                    reason: "no answer before timeout".to_string(),
                }
            }
            other => other,
        })
    }

    fn read_object(&mut self, index: u16, subindex: u8) -> Result<[u8; 4]> {
        let [lo, hi] = index.to_le_bytes();
        let frame = self.transact(OpCode::ReadObject, &[self.node_id, lo, hi, subindex])?;
        let payload = answer_payload(frame, self.node_id, index, subindex)?;
        if payload.len() < 4 {
            return Err(MotorError::InvalidFrame {
                node: self.node_id,
                reason: format!("expected 4 data bytes, got {}", payload.len()),
            });
        }
        Ok([payload[0], payload[1], payload[2], payload[3]])
    }

    fn write_object(&mut self, index: u16, subindex: u8, value: [u8; 4]) -> Result<()> {
        let [lo, hi] = index.to_le_bytes();
        let params = [
            self.node_id,
            lo,
            hi,
            subindex,
            value[0],
            value[1],
            value[2],
            value[3],
        ];
        debug!(
            "Write object 0x{:04X}/{} on node {}: {:02X?}",
            index, subindex, self.node_id, value
        );
        let frame = self.transact(OpCode::WriteObject, &params)?;
        answer_payload(frame, self.node_id, index, subindex)?;
        Ok(())
    }

    fn write_controlword(&mut self, word: u16) -> Result<()> {
        self.set_object(object::CONTROLWORD, 0, 2, word as u32)
    }

    fn statusword(&mut self) -> Result<u16> {
        Ok(self.get_object(object::STATUSWORD, 0, 2)? as u16)
    }

    fn wait_for_status(&mut self, bit: u16, timeout: Duration) -> TargetWait {
        let deadline = Instant::now() + timeout;
        loop {
            match self.statusword() {
                Ok(word) if word & status::FAULT != 0 => {
                    return TargetWait::Error(MotorError::Fault {
                        node: self.node_id,
                        statusword: word,
                    });
                }
                Ok(word) if word & bit != 0 => return TargetWait::Reached,
                Ok(_) => {}
                Err(e) => return TargetWait::Error(e),
            }
            if Instant::now() >= deadline {
                return TargetWait::TimedOut;
            }
            sleep(POLL_INTERVAL);
        }
    }
}

impl MotorBinding for Epos2Serial {
    fn open(&mut self, node_id: u8, baud_rate: u32, timeout: Duration) -> Result<()> {
        let stack = self.identity.protocol_stack.to_ascii_uppercase();
        if stack != "MAXON SERIAL V2" {
            return Err(self.connection_error(format!("unsupported protocol stack '{}'", stack)));
        }
        let interface = self.identity.interface.to_ascii_uppercase();
        if interface != "RS232" && interface != "USB" {
            return Err(self.connection_error(format!("unsupported interface '{}'", interface)));
        }

        info!(
            "Opening {} on {} (node {}, {} baud)",
            self.identity.device_name, self.identity.port, node_id, baud_rate
        );
        let port = serialport::new(&self.identity.port, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| self.connection_error(e.to_string()))?;
        self.port = Some(port);
        self.node_id = node_id;

        // An unanswered statusword read means there is no controller behind the port
        if let Err(e) = self.statusword() {
            self.port = None;
            return Err(self.connection_error(e.to_string()));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            info!("Closed {} session", self.identity.device_name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn clear_fault(&mut self) -> Result<()> {
        self.write_controlword(control::FAULT_RESET)
    }

    fn set_enable_state(&mut self) -> Result<()> {
        self.write_controlword(control::SHUTDOWN)?;
        self.write_controlword(control::SWITCH_ON_ENABLE)
    }

    fn set_disable_state(&mut self) -> Result<()> {
        self.write_controlword(control::SHUTDOWN)
    }

    fn activate_profile_position_mode(&mut self) -> Result<()> {
        let raw = OperationMode::ProfilePosition.as_raw() as u8;
        self.set_object(object::MODES_OF_OPERATION, 0, 1, raw as u32)
    }

    fn activate_homing_mode(&mut self) -> Result<()> {
        let raw = OperationMode::Homing.as_raw() as u8;
        self.set_object(object::MODES_OF_OPERATION, 0, 1, raw as u32)
    }

    fn operation_mode(&mut self) -> Result<OperationMode> {
        let raw = self.get_object(object::MODES_OF_OPERATION_DISPLAY, 0, 1)? as u8;
        Ok(OperationMode::from_raw(raw as i8))
    }

    fn set_position_profile(&mut self, profile: PositionProfile) -> Result<()> {
        self.set_object(object::PROFILE_VELOCITY, 0, 4, profile.velocity_rpm)?;
        self.set_object(object::PROFILE_ACCELERATION, 0, 4, profile.acceleration)?;
        self.set_object(object::PROFILE_DECELERATION, 0, 4, profile.deceleration)
    }

    fn move_to_position(&mut self, target: i32, absolute: bool, immediately: bool) -> Result<()> {
        self.set_object(object::TARGET_POSITION, 0, 4, target as u32)?;

        let mut word = control::SWITCH_ON_ENABLE;
        if !absolute {
            word |= control::RELATIVE;
        }
        if immediately {
            word |= control::CHANGE_IMMEDIATELY;
        }
        // The setpoint is taken on the rising edge of bit 4
        self.write_controlword(word)?;
        self.write_controlword(word | control::NEW_SETPOINT)
    }

    fn halt_position_movement(&mut self) -> Result<()> {
        self.write_controlword(control::SWITCH_ON_ENABLE | control::HALT)
    }

    fn wait_for_target_reached(&mut self, timeout: Duration) -> TargetWait {
        if self.port.is_none() {
            return TargetWait::Error(MotorError::NotConnected);
        }
        self.wait_for_status(status::TARGET_REACHED, timeout)
    }

    fn position_is(&mut self) -> Result<i32> {
        Ok(self.get_object(object::POSITION_ACTUAL, 0, 4)? as i32)
    }

    fn target_position(&mut self) -> Result<i32> {
        Ok(self.get_object(object::TARGET_POSITION, 0, 4)? as i32)
    }

    fn define_position(&mut self, position: i32) -> Result<()> {
        self.set_object(object::HOME_POSITION, 0, 4, position as u32)?;
        let method = HOMING_METHOD_ACTUAL_POSITION as u8;
        self.set_object(object::HOMING_METHOD, 0, 1, method as u32)?;
        self.write_controlword(control::SWITCH_ON_ENABLE)?;
        self.write_controlword(control::SWITCH_ON_ENABLE | control::HOMING_START)?;

        let outcome = self.wait_for_status(status::HOMING_ATTAINED, HOMING_TIMEOUT);
        self.write_controlword(control::SWITCH_ON_ENABLE)?;
        match outcome {
            TargetWait::Reached => Ok(()),
            TargetWait::TimedOut => Err(MotorError::InvalidFrame {
                node: self.node_id,
                reason: "homing not attained".to_string(),
            }),
            TargetWait::Error(e) => Err(e),
        }
    }

    fn get_object(&mut self, index: u16, subindex: u8, len: u8) -> Result<u32> {
        let raw = self.read_object(index, subindex)?;
        Ok(u32::from_le_bytes(raw) & mask(len))
    }

    fn set_object(&mut self, index: u16, subindex: u8, len: u8, value: u32) -> Result<()> {
        self.write_object(index, subindex, (value & mask(len)).to_le_bytes())
    }
}
