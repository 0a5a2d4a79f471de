//! [`SafetyController`] – actuator owner and throttle cutoff.
//!
//! Every throttle command may carry a safety window.  When the window
//! elapses without a newer throttle command, the throttle is forced to
//! `stop`.  The controller keeps at most one pending cutoff: arming a new
//! window always replaces the old one, so a stale cutoff can never fire over
//! a later command.
//!
//! The controller never sleeps.  It exposes the pending deadline and the
//! owner (the session task) waits on it and calls [`SafetyController::expire`].

use std::time::Duration;

use rcrelay_hal::Actuator;
use rcrelay_types::RelayError;
use tokio::time::Instant;
use tracing::{debug, info};

/// Upper bound on any single safety window.
pub const MAX_SAFETY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

pub struct SafetyController {
    throttle: Box<dyn Actuator>,
    steering: Box<dyn Actuator>,
    stop: f32,
    neutral: f32,
    cutoff: Option<Instant>,
}

impl SafetyController {
    /// Take ownership of both actuators.  `stop` and `neutral` are the
    /// throttle and steering rest positions.
    pub fn new(
        throttle: Box<dyn Actuator>,
        steering: Box<dyn Actuator>,
        stop: f32,
        neutral: f32,
    ) -> Self {
        Self {
            throttle,
            steering,
            stop,
            neutral,
            cutoff: None,
        }
    }

    /// Move the steering servo now.  No timer semantics.
    pub fn set_steering(&mut self, position: f32) -> Result<(), RelayError> {
        debug!(position, "steering");
        self.steering.set_position(position)
    }

    /// Cancel any pending cutoff, arm a new one when `timeout` is non-zero,
    /// then move the throttle.
    pub fn set_throttle(&mut self, position: f32, timeout: Option<Duration>) -> Result<(), RelayError> {
        self.cutoff = timeout
            .filter(|t| !t.is_zero())
            .map(|t| Instant::now() + t.min(MAX_SAFETY_WINDOW));
        debug!(position, ?timeout, "throttle");
        self.throttle.set_position(position)
    }

    /// When the pending cutoff is due at `now`, clear it and force the
    /// throttle to `stop`.  Returns whether the cutoff fired.
    pub fn expire(&mut self, now: Instant) -> Result<bool, RelayError> {
        match self.cutoff {
            Some(deadline) if deadline <= now => {
                self.cutoff = None;
                info!(stop = self.stop, "throttle window elapsed; stopping");
                self.throttle.set_position(self.stop)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Steer neutral and stop the throttle, leaving no cutoff armed.
    pub fn halt(&mut self) -> Result<(), RelayError> {
        self.set_steering(self.neutral)?;
        self.set_throttle(self.stop, None)
    }

    /// Deadline of the pending cutoff, if one is armed.
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.cutoff
    }

    pub fn throttle_target(&self) -> f32 {
        self.throttle.position()
    }

    pub fn steering_target(&self) -> f32 {
        self.steering.position()
    }
}
