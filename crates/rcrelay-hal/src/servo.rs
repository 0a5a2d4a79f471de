//! Static servo configuration.
//!
//! Pin assignments, travel ranges, and attach positions are compile-time
//! constants; nothing at runtime can change them.

/// Wiring and travel limits for one hobby servo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoSpec {
    /// Identifier reported by the driver, e.g. `"throttle"`.
    pub id: &'static str,
    /// Board pin the servo signal wire is connected to.
    pub pin: u8,
    /// Inclusive travel range in degrees.
    pub range: (f32, f32),
    /// Position to move to when the servo is attached.
    pub start_at: f32,
    /// When `true`, attach at the midpoint of `range` instead of `start_at`.
    pub center: bool,
    /// Pulse width range in microseconds sent with the servo config.
    pub pulse_range_us: (u16, u16),
}

/// Electronic speed controller on pin 9.  Full servo travel is accepted;
/// forward/stop/reverse presets live in the symbol table.
pub const THROTTLE_SERVO: ServoSpec = ServoSpec {
    id: "throttle",
    pin: 9,
    range: (0.0, 180.0),
    start_at: 90.0,
    center: false,
    pulse_range_us: (600, 2400),
};

/// Steering servo on pin 10, mechanically limited to 40..=100 degrees.
pub const STEERING_SERVO: ServoSpec = ServoSpec {
    id: "steering",
    pin: 10,
    range: (40.0, 100.0),
    start_at: 75.0,
    center: true,
    pulse_range_us: (600, 2400),
};

impl ServoSpec {
    /// Constrain `target` to the travel range and round to whole degrees.
    ///
    /// Non-finite input is returned unchanged; drivers decide what to do
    /// with it.
    pub fn clamp(&self, target: f32) -> f32 {
        if !target.is_finite() {
            return target;
        }
        target.clamp(self.range.0, self.range.1).round()
    }

    /// Position the servo is driven to on attach.
    pub fn initial_position(&self) -> f32 {
        if self.center {
            self.clamp((self.range.0 + self.range.1) / 2.0)
        } else {
            self.clamp(self.start_at)
        }
    }
}
