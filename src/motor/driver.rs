// High-level motion controller adapter
//
// Wraps a binding with the checks the raw primitives don't do: mode
// preconditions before mode-sensitive calls, the speed limit, and
// disable + close when the session is dropped.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::binding::{
    object, status, MotorBinding, MotorError, OperationMode, PositionProfile, Result, TargetWait,
};

/// A single profile-position move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionCommand {
    /// Target in encoder counts
    pub target: i32,
    pub speed_rpm: u32,
    pub acceleration: u32,
    pub deceleration: u32,
    /// Absolute target, or relative to the current target
    pub absolute: bool,
    /// Abort the move in progress instead of queueing behind it
    pub immediately: bool,
}

/// Decoded controller state, read without writing anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorStatus {
    pub position: i32,
    pub target: i32,
    pub mode: OperationMode,
    pub statusword: u16,
}

impl MotorStatus {
    pub fn is_enabled(&self) -> bool {
        self.statusword & status::OPERATION_ENABLED != 0
    }

    pub fn is_faulted(&self) -> bool {
        self.statusword & status::FAULT != 0
    }

    pub fn target_reached(&self) -> bool {
        self.statusword & status::TARGET_REACHED != 0
    }
}

/// Motion controller session for one node
pub struct Motor<B: MotorBinding> {
    binding: B,
    max_speed_rpm: u32,
}

impl<B: MotorBinding> Motor<B> {
    /// Wrap a binding. `max_speed_rpm` is the motor's rated speed.
    pub fn new(binding: B, max_speed_rpm: u32) -> Self {
        Self {
            binding,
            max_speed_rpm,
        }
    }

    /// Open the session, clear any fault and enable the drive
    pub fn connect(&mut self, node_id: u8, baud_rate: u32, timeout: Duration) -> Result<()> {
        self.binding.open(node_id, baud_rate, timeout)?;
        self.binding.clear_fault()?;
        self.binding.set_enable_state()?;
        info!("Motion controller node {} connected and enabled", node_id);
        Ok(())
    }

    /// Open the session without touching the drive state
    pub fn connect_read_only(
        &mut self,
        node_id: u8,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<()> {
        self.binding.open(node_id, baud_rate, timeout)
    }

    pub fn is_connected(&self) -> bool {
        self.binding.is_open()
    }

    pub fn clear_fault(&mut self) -> Result<()> {
        self.binding.clear_fault()
    }

    pub fn enable(&mut self) -> Result<()> {
        self.binding.set_enable_state()
    }

    pub fn disable(&mut self) -> Result<()> {
        info!("Disabling motion controller");
        self.binding.set_disable_state()
    }

    pub fn close(&mut self) -> Result<()> {
        self.binding.close()
    }

    /// Must be called before any move
    pub fn activate_profile_position_mode(&mut self) -> Result<()> {
        self.binding.activate_profile_position_mode()
    }

    pub fn operation_mode(&mut self) -> Result<OperationMode> {
        self.binding.operation_mode()
    }

    fn require_profile_position(&mut self) -> Result<()> {
        match self.binding.operation_mode()? {
            OperationMode::ProfilePosition => Ok(()),
            actual => Err(MotorError::WrongMode { actual }),
        }
    }

    /// Issue a profile-position move
    ///
    /// The speed is clamped to the rated maximum. Nothing is sent when the
    /// controller is not in Profile Position Mode.
    pub fn move_to(&mut self, command: &MotionCommand) -> Result<()> {
        self.require_profile_position()?;

        let speed = if command.speed_rpm > self.max_speed_rpm {
            warn!(
                "Requested {} rpm exceeds the motor limit, using {} rpm",
                command.speed_rpm, self.max_speed_rpm
            );
            self.max_speed_rpm
        } else {
            command.speed_rpm
        };

        debug!(
            "Move to {} ({}) at {} rpm",
            command.target,
            if command.absolute { "absolute" } else { "relative" },
            speed
        );
        self.binding.set_position_profile(PositionProfile {
            velocity_rpm: speed,
            acceleration: command.acceleration,
            deceleration: command.deceleration,
        })?;
        self.binding
            .move_to_position(command.target, command.absolute, command.immediately)
    }

    /// Write the target position object directly
    pub fn set_target_position(&mut self, target: i32) -> Result<()> {
        self.require_profile_position()?;
        self.binding.set_object(object::TARGET_POSITION, 0, 4, target as u32)
    }

    pub fn target_position(&mut self) -> Result<i32> {
        self.binding.target_position()
    }

    /// Block until the controller reports target reached or `timeout` elapses
    pub fn wait_for_target_reached(&mut self, timeout: Duration) -> TargetWait {
        self.binding.wait_for_target_reached(timeout)
    }

    /// Non-blocking check of statusword bit 10
    pub fn is_target_reached(&mut self) -> Result<bool> {
        let word = self.binding.get_object(object::STATUSWORD, 0, 2)? as u16;
        Ok(word & status::TARGET_REACHED != 0)
    }

    pub fn halt(&mut self) -> Result<()> {
        warn!("Halting motion");
        self.binding.halt_position_movement()
    }

    /// Actual position in encoder counts
    pub fn position(&mut self) -> Result<i32> {
        self.binding.position_is()
    }

    /// Software re-zero: the current position becomes logical zero
    ///
    /// Leaves the controller in homing mode; activate Profile Position Mode
    /// again before the next move.
    pub fn home(&mut self) -> Result<()> {
        self.binding.activate_homing_mode()?;
        let position = self.binding.position_is()?;
        info!("Defining position {} as home", position);
        self.binding.define_position(0)
    }

    pub fn status(&mut self) -> Result<MotorStatus> {
        Ok(MotorStatus {
            position: self.binding.position_is()?,
            target: self.binding.target_position()?,
            mode: self.binding.operation_mode()?,
            statusword: self.binding.get_object(object::STATUSWORD, 0, 2)? as u16,
        })
    }

    pub fn get_object(&mut self, index: u16, subindex: u8, len: u8) -> Result<u32> {
        self.binding.get_object(index, subindex, len)
    }

    pub fn set_object(&mut self, index: u16, subindex: u8, len: u8, value: u32) -> Result<()> {
        self.binding.set_object(index, subindex, len, value)
    }

    /// Disable the drive and close the session if still open
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.binding.is_open() {
            return Ok(());
        }
        let disabled = self.disable();
        let closed = self.binding.close();
        disabled.and(closed)
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    pub fn binding_mut(&mut self) -> &mut B {
        &mut self.binding
    }
}

impl<B: MotorBinding> Drop for Motor<B> {
    fn drop(&mut self) {
        // Never leave the drive enabled behind an abandoned session
        if let Err(e) = self.shutdown() {
            warn!("Failed to shut down motion controller on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::sim::{MotorCall, SimulatedMotor};

    fn command(target: i32, speed_rpm: u32) -> MotionCommand {
        MotionCommand {
            target,
            speed_rpm,
            acceleration: 100_000,
            deceleration: 100_000,
            absolute: true,
            immediately: false,
        }
    }

    fn connected(max_speed: u32) -> Motor<SimulatedMotor> {
        let mut motor = Motor::new(SimulatedMotor::new(), max_speed);
        motor.connect(2, 115_200, Duration::from_millis(500)).unwrap();
        motor
    }

    #[test]
    fn test_connect_clears_fault_then_enables() {
        let motor = connected(8000);
        assert_eq!(
            motor.binding().history(),
            &[MotorCall::Open { node_id: 2 }, MotorCall::ClearFault, MotorCall::Enable]
        );
    }

    #[test]
    fn test_move_outside_profile_position_is_rejected() {
        let mut motor = connected(8000);
        let err = motor.move_to(&command(1000, 2000)).unwrap_err();
        assert!(matches!(err, MotorError::WrongMode { .. }));
        assert!(motor.binding().moves().is_empty());

        let err = motor.set_target_position(1000).unwrap_err();
        assert!(matches!(err, MotorError::WrongMode { .. }));
    }

    #[test]
    fn test_speed_clamped_to_rated_maximum() {
        let mut motor = connected(8000);
        motor.activate_profile_position_mode().unwrap();
        motor.move_to(&command(1000, 12_000)).unwrap();
        assert_eq!(motor.binding().profile().unwrap().velocity_rpm, 8000);

        motor.move_to(&command(2000, 1500)).unwrap();
        assert_eq!(motor.binding().profile().unwrap().velocity_rpm, 1500);
    }

    #[test]
    fn test_move_and_wait() {
        let mut motor = connected(8000);
        motor.activate_profile_position_mode().unwrap();
        motor.move_to(&command(29_696, 2000)).unwrap();
        assert!(matches!(
            motor.wait_for_target_reached(Duration::from_secs(60)),
            TargetWait::Reached
        ));
        assert_eq!(motor.position().unwrap(), 29_696);
        assert!(motor.is_target_reached().unwrap());
    }

    #[test]
    fn test_home_rezeroes_without_moving() {
        let mut motor = Motor::new(SimulatedMotor::at_position(5000), 8000);
        motor.connect(2, 115_200, Duration::from_millis(500)).unwrap();
        motor.home().unwrap();
        assert_eq!(motor.position().unwrap(), 0);
        assert_eq!(motor.operation_mode().unwrap(), OperationMode::Homing);
        assert!(motor.binding().moves().is_empty());
    }

    #[test]
    fn test_status_snapshot() {
        let mut motor = connected(8000);
        motor.activate_profile_position_mode().unwrap();
        let status = motor.status().unwrap();
        assert!(status.is_enabled());
        assert!(!status.is_faulted());
        assert!(status.target_reached());
        assert_eq!(status.mode, OperationMode::ProfilePosition);
    }

    #[test]
    fn test_shutdown_disables_and_closes_once() {
        let mut motor = connected(8000);
        motor.shutdown().unwrap();
        assert!(!motor.is_connected());
        motor.shutdown().unwrap();
        let history = motor.binding().history();
        assert_eq!(&history[history.len() - 2..], &[MotorCall::Disable, MotorCall::Close]);
    }
}
