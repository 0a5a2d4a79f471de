//! `rcrelay-kernel` – Command Interpreter & Actuator Safety Controller
//!
//! Turns raw dash-delimited command strings into servo moves and keeps the
//! one safety rule the vehicle depends on: an unconfirmed throttle command
//! always falls back to `stop` after a bounded window.
//!
//! # Modules
//!
//! - [`symbols`] – [`SymbolTable`]: keyword → position/duration presets.
//! - [`command`] – [`Command`]: the parsed, typed form of a raw command.
//! - [`safety`] – [`SafetyController`]: owns both actuators and the single
//!   pending throttle cutoff.
//! - [`session`] – [`Session`]: interpreter plus server status, run as one
//!   Tokio task and driven through a [`SessionHandle`].

pub mod command;
pub mod safety;
pub mod session;
pub mod symbols;

pub use command::Command;
pub use safety::SafetyController;
pub use session::{Session, SessionHandle, SessionRequest};
pub use symbols::SymbolTable;
