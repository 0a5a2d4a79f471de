//! `rcrelay-middleware` – status fan-out
//!
//! Carries `robot status` updates from the session to every connected
//! observer without caring what the status fields mean.
//!
//! # Modules
//!
//! - [`bus`] – broadcast channel of [`RobotStatus`][rcrelay_types::RobotStatus]
//!   payloads built on Tokio.
//! - [`broadcaster`] – stamps server-known fields onto a status mapping and
//!   publishes it on the bus.

pub mod broadcaster;
pub mod bus;

pub use broadcaster::{ARDUINO_ATTACHED_KEY, StatusBroadcaster, TIME_KEY};
pub use bus::EventBus;
