//! `rcrelay-hal` – Actuator Interface
//!
//! The relay drives two single-axis servos: throttle and steering.  The rest
//! of the workspace only ever talks to the [`Actuator`] trait; which concrete
//! driver sits behind it is decided once at startup.
//!
//! # Modules
//!
//! - [`actuator`] – the [`Actuator`] trait.
//! - [`servo`] – static pin/range/start-position constants for both servos.
//! - [`firmata`] – servo driver for a Firmata-speaking board on a serial port.
//! - [`sim`] – [`SimActuator`] (records commands) and [`NullActuator`] (the
//!   hardware-disabled stub).

pub mod actuator;
pub mod firmata;
pub mod servo;
pub mod sim;

pub use actuator::Actuator;
pub use firmata::{BoardHandle, FirmataBoard, FirmataServo};
pub use servo::{STEERING_SERVO, THROTTLE_SERVO, ServoSpec};
pub use sim::{ActuatorLog, NullActuator, SimActuator};
