//! Generic `Actuator` trait for the vehicle's position-controlled servos.
//!
//! Drivers implement this trait and are handed to the safety controller at
//! startup.  Nothing above the HAL knows whether a real board, a simulation,
//! or the no-op stub is attached.

use rcrelay_types::RelayError;

/// A single-axis, position-controlled actuator (throttle or steering servo).
pub trait Actuator: Send {
    /// Stable identifier for this actuator, e.g. `"throttle"`.
    fn id(&self) -> &str;

    /// Command the actuator to move to `target` (servo degrees).
    ///
    /// The value is passed through exactly as the interpreter resolved it;
    /// range enforcement is the driver's business.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HardwareFault`] if the command cannot be
    /// delivered to the device.
    fn set_position(&mut self, target: f32) -> Result<(), RelayError>;

    /// Return the most recently applied position.
    fn position(&self) -> f32;
}
