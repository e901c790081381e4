// In-memory motion controller
//
// Moves complete instantly when waited on. Every call is recorded so tests
// can check what the rig asked the controller to do, and in which order.

use std::time::Duration;
use tracing::debug;

use super::binding::{
    object, status, MotorBinding, MotorError, OperationMode, PositionProfile, Result, TargetWait,
};

/// One recorded call into the simulator
#[derive(Debug, Clone, PartialEq)]
pub enum MotorCall {
    Open { node_id: u8 },
    Close,
    ClearFault,
    Enable,
    Disable,
    ActivateProfilePosition,
    ActivateHoming,
    SetProfile(PositionProfile),
    MoveTo { target: i32, absolute: bool, immediately: bool },
    Halt,
    Wait,
    DefinePosition(i32),
    SetObject { index: u16, value: u32 },
}

/// Simulated EPOS session
#[derive(Debug, Default)]
pub struct SimulatedMotor {
    open: bool,
    enabled: bool,
    faulted: bool,
    mode: i8,
    node_id: u8,
    position: i32,
    target: i32,
    // Offset applied by define_position
    offset: i32,
    profile: Option<PositionProfile>,
    fail_open: bool,
    stall: bool,
    // Mode requests are recorded but not applied
    ignore_mode: bool,
    // 1-based index of the move that faults the drive
    fault_on_move: Option<usize>,
    history: Vec<MotorCall>,
}

impl SimulatedMotor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the encoder at `counts`
    pub fn at_position(counts: i32) -> Self {
        Self {
            position: counts,
            target: counts,
            ..Self::default()
        }
    }

    /// Make `open` fail as if no controller answered
    pub fn unreachable() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Moves never complete, so every wait times out
    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Accept mode requests without switching, leaving the drive out of
    /// Profile Position Mode
    pub fn ignoring_mode_changes(mut self) -> Self {
        self.ignore_mode = true;
        self
    }

    /// Fault the drive when the `n`th move is issued
    pub fn faulting_on_move(mut self, n: usize) -> Self {
        self.fault_on_move = Some(n);
        self
    }

    /// Put the drive into fault state
    pub fn inject_fault(&mut self) {
        self.faulted = true;
        self.enabled = false;
    }

    pub fn history(&self) -> &[MotorCall] {
        &self.history
    }

    pub fn moves(&self) -> Vec<i32> {
        self.history
            .iter()
            .filter_map(|call| match call {
                MotorCall::MoveTo { target, .. } => Some(*target),
                _ => None,
            })
            .collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn profile(&self) -> Option<PositionProfile> {
        self.profile
    }

    fn session(&self) -> Result<()> {
        if self.open { Ok(()) } else { Err(MotorError::NotConnected) }
    }

    fn logical(&self, raw: i32) -> i32 {
        raw - self.offset
    }

    fn statusword(&self) -> u16 {
        let mut word = 0;
        if self.enabled {
            word |= status::READY_TO_SWITCH_ON | status::SWITCHED_ON | status::OPERATION_ENABLED;
        }
        if self.faulted {
            word |= status::FAULT;
        }
        if self.position == self.target {
            word |= status::TARGET_REACHED;
        }
        word
    }
}

impl MotorBinding for SimulatedMotor {
    fn open(&mut self, node_id: u8, _baud_rate: u32, _timeout: Duration) -> Result<()> {
        self.history.push(MotorCall::Open { node_id });
        if self.fail_open {
            return Err(MotorError::Connection {
                device: "simulated EPOS".to_string(),
                port: "sim".to_string(),
                reason: "no answer".to_string(),
            });
        }
        self.open = true;
        self.node_id = node_id;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.history.push(MotorCall::Close);
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn clear_fault(&mut self) -> Result<()> {
        self.session()?;
        self.history.push(MotorCall::ClearFault);
        self.faulted = false;
        Ok(())
    }

    fn set_enable_state(&mut self) -> Result<()> {
        self.session()?;
        self.history.push(MotorCall::Enable);
        if self.faulted {
            return Err(MotorError::Fault {
                node: self.node_id,
                statusword: self.statusword(),
            });
        }
        self.enabled = true;
        Ok(())
    }

    fn set_disable_state(&mut self) -> Result<()> {
        self.session()?;
        self.history.push(MotorCall::Disable);
        self.enabled = false;
        Ok(())
    }

    fn activate_profile_position_mode(&mut self) -> Result<()> {
        self.session()?;
        self.history.push(MotorCall::ActivateProfilePosition);
        if !self.ignore_mode {
            self.mode = OperationMode::ProfilePosition.as_raw();
        }
        Ok(())
    }

    fn activate_homing_mode(&mut self) -> Result<()> {
        self.session()?;
        self.history.push(MotorCall::ActivateHoming);
        if !self.ignore_mode {
            self.mode = OperationMode::Homing.as_raw();
        }
        Ok(())
    }

    fn operation_mode(&mut self) -> Result<OperationMode> {
        self.session()?;
        Ok(OperationMode::from_raw(self.mode))
    }

    fn set_position_profile(&mut self, profile: PositionProfile) -> Result<()> {
        self.session()?;
        self.history.push(MotorCall::SetProfile(profile));
        self.profile = Some(profile);
        Ok(())
    }

    fn move_to_position(&mut self, target: i32, absolute: bool, immediately: bool) -> Result<()> {
        self.session()?;
        self.history.push(MotorCall::MoveTo {
            target,
            absolute,
            immediately,
        });
        let raw_target = if absolute {
            target + self.offset
        } else {
            self.target + target
        };
        debug!("sim: move to {} (raw {})", target, raw_target);
        self.target = raw_target;
        if self.fault_on_move == Some(self.moves().len()) {
            self.inject_fault();
        }
        Ok(())
    }

    fn halt_position_movement(&mut self) -> Result<()> {
        self.session()?;
        self.history.push(MotorCall::Halt);
        self.target = self.position;
        Ok(())
    }

    fn wait_for_target_reached(&mut self, _timeout: Duration) -> TargetWait {
        if let Err(e) = self.session() {
            return TargetWait::Error(e);
        }
        self.history.push(MotorCall::Wait);
        if self.faulted {
            return TargetWait::Error(MotorError::Fault {
                node: self.node_id,
                statusword: self.statusword(),
            });
        }
        if self.stall {
            return TargetWait::TimedOut;
        }
        if self.enabled {
            self.position = self.target;
        }
        if self.position == self.target {
            TargetWait::Reached
        } else {
            TargetWait::TimedOut
        }
    }

    fn position_is(&mut self) -> Result<i32> {
        self.session()?;
        Ok(self.logical(self.position))
    }

    fn target_position(&mut self) -> Result<i32> {
        self.session()?;
        Ok(self.logical(self.target))
    }

    fn define_position(&mut self, position: i32) -> Result<()> {
        self.session()?;
        self.history.push(MotorCall::DefinePosition(position));
        self.offset = self.position - position;
        Ok(())
    }

    fn get_object(&mut self, index: u16, _subindex: u8, _len: u8) -> Result<u32> {
        self.session()?;
        let value = match index {
            object::STATUSWORD => self.statusword() as u32,
            object::MODES_OF_OPERATION | object::MODES_OF_OPERATION_DISPLAY => {
                self.mode as u8 as u32
            }
            object::POSITION_ACTUAL => self.logical(self.position) as u32,
            object::TARGET_POSITION => self.logical(self.target) as u32,
            _ => {
                return Err(MotorError::Device {
                    node: self.node_id,
                    index,
                    subindex: 0,
                    code: 0x0602_0000,
                });
            }
        };
        Ok(value)
    }

    fn set_object(&mut self, index: u16, _subindex: u8, _len: u8, value: u32) -> Result<()> {
        self.session()?;
        self.history.push(MotorCall::SetObject { index, value });
        match index {
            object::TARGET_POSITION => self.target = value as i32 + self.offset,
            object::MODES_OF_OPERATION if !self.ignore_mode => self.mode = value as u8 as i8,
            _ => {}
        }
        Ok(())
    }
}
