//! [`StatusBroadcaster`] – enriches status mappings and fans them out.
//!
//! A status mapping arrives from a transport (HTTP `POST /command/` or a
//! `robot update` socket event).  The broadcaster stamps it with the current
//! wall-clock time and whether the servo board is attached, then publishes it
//! to every subscriber.  Nothing is retained between broadcasts.

use chrono::{SecondsFormat, Utc};
use rcrelay_types::RobotStatus;
use serde_json::{Map, Value};
use tracing::debug;

use crate::bus::EventBus;

/// Key holding the broadcast wall-clock time.
pub const TIME_KEY: &str = "Time";
/// Key holding the live hardware-attached flag.
pub const ARDUINO_ATTACHED_KEY: &str = "Arduino Attached";

#[derive(Clone, Debug)]
pub struct StatusBroadcaster {
    bus: EventBus,
}

impl StatusBroadcaster {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// The bus observers subscribe to.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Stamp `fields` and publish them to every observer.
    ///
    /// Existing keys other than [`TIME_KEY`] and [`ARDUINO_ATTACHED_KEY`] are
    /// left untouched.  Returns the number of observers reached.
    pub fn broadcast(&self, mut fields: Map<String, Value>, has_arduino: bool) -> usize {
        fields.insert(
            TIME_KEY.to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        fields.insert(ARDUINO_ATTACHED_KEY.to_string(), Value::Bool(has_arduino));
        self.publish(Value::Object(fields))
    }

    /// Publish a plain notice string, unenriched.
    pub fn announce(&self, text: &str) -> usize {
        self.publish(Value::String(text.to_string()))
    }

    fn publish(&self, data: Value) -> usize {
        match self.bus.publish(RobotStatus { data }) {
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "status broadcast had no observers");
                0
            }
        }
    }
}
