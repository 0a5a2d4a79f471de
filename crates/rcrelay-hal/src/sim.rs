//! In-process actuators for running without a servo board.
//!
//! * [`SimActuator`] records every commanded position so tests and dry runs
//!   can observe exactly what the safety controller asked for.
//! * [`NullActuator`] is the stub selected when hardware binding is disabled
//!   at startup: it accepts every command and does nothing.
//!
//! # Example
//!
//! ```rust
//! use rcrelay_hal::{Actuator, SimActuator};
//!
//! let mut throttle = SimActuator::new("throttle", 90.0);
//! let log = throttle.log();
//! throttle.set_position(65.0).unwrap();
//! assert_eq!(log.positions(), vec![65.0]);
//! ```

use std::sync::{Arc, Mutex};

use rcrelay_types::RelayError;

use crate::actuator::Actuator;

/// Cloneable view onto the positions a [`SimActuator`] has been sent.
#[derive(Clone, Default)]
pub struct ActuatorLog(Arc<Mutex<Vec<f32>>>);

impl ActuatorLog {
    /// Every commanded position, oldest first.
    pub fn positions(&self) -> Vec<f32> {
        self.0.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// The most recent commanded position, if any.
    pub fn last(&self) -> Option<f32> {
        self.0.lock().ok().and_then(|v| v.last().copied())
    }

    /// Number of commands received.
    pub fn len(&self) -> usize {
        self.0.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, position: f32) {
        if let Ok(mut v) = self.0.lock() {
            v.push(position);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Recording actuator
// ────────────────────────────────────────────────────────────────────────────

/// A simulated servo that records every commanded position.  Always succeeds.
pub struct SimActuator {
    id: String,
    position: f32,
    log: ActuatorLog,
}

impl SimActuator {
    /// Create a simulated actuator resting at `initial`.
    pub fn new(id: impl Into<String>, initial: f32) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            position: initial,
            log: ActuatorLog::default(),
        })
    }

    /// Handle onto this actuator's command history.  Grab it before handing
    /// the actuator to its owner.
    pub fn log(&self) -> ActuatorLog {
        self.log.clone()
    }
}

impl Actuator for SimActuator {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_position(&mut self, target: f32) -> Result<(), RelayError> {
        self.position = target;
        self.log.record(target);
        Ok(())
    }

    fn position(&self) -> f32 {
        self.position
    }
}

// ────────────────────────────────────────────────────────────────────────────
// No-op stub
// ────────────────────────────────────────────────────────────────────────────

/// Hardware-disabled stand-in.  Commands are accepted and discarded.
pub struct NullActuator {
    id: String,
    position: f32,
}

impl NullActuator {
    pub fn new(id: impl Into<String>, position: f32) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            position,
        })
    }
}

impl Actuator for NullActuator {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_position(&mut self, _target: f32) -> Result<(), RelayError> {
        Ok(())
    }

    fn position(&self) -> f32 {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_actuator_records_every_command() {
        let mut act = SimActuator::new("throttle", 90.0);
        let log = act.log();
        assert!(log.is_empty());

        act.set_position(65.0).unwrap();
        act.set_position(90.0).unwrap();

        assert_eq!(log.positions(), vec![65.0, 90.0]);
        assert_eq!(log.last(), Some(90.0));
        assert_eq!(act.position(), 90.0);
    }

    #[test]
    fn sim_actuator_keeps_nan_as_given() {
        let mut act = SimActuator::new("steering", 75.0);
        act.set_position(f32::NAN).unwrap();
        assert!(act.position().is_nan());
    }

    #[test]
    fn null_actuator_ignores_commands() {
        let mut act = NullActuator::new("steering", 75.0);
        act.set_position(40.0).unwrap();
        assert_eq!(act.id(), "steering");
        assert_eq!(act.position(), 75.0);
    }
}
