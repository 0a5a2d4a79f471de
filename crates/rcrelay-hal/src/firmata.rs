//! Servo driver for a board running StandardFirmata over a serial port.
//!
//! Only the handful of Firmata messages a servo needs are spoken:
//!
//! | Message | Bytes |
//! |---|---|
//! | version query / reply | `F9` / `F9 major minor` |
//! | servo config | `F0 70 pin minLSB minMSB maxLSB maxMSB F7` |
//! | set pin mode | `F4 pin 04` |
//! | analog write (pin < 16) | `E0+pin lsb msb` |
//! | extended analog write | `F0 6F pin v0 v1 … F7` |
//!
//! After the handshake the board moves onto its own writer thread.  Both
//! servos queue frames to it through a cloned [`BoardHandle`], so a servo
//! move never waits on the serial port.  A failed write stops the thread and
//! every later move reports [`RelayError::HardwareFault`].

use std::io::{ErrorKind, Read, Write};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rcrelay_types::RelayError;
use tracing::{debug, error, info, warn};

use crate::actuator::Actuator;
use crate::servo::ServoSpec;

const REPORT_VERSION: u8 = 0xF9;
const START_SYSEX: u8 = 0xF0;
const END_SYSEX: u8 = 0xF7;
const SERVO_CONFIG: u8 = 0x70;
const EXTENDED_ANALOG: u8 = 0x6F;
const SET_PIN_MODE: u8 = 0xF4;
const ANALOG_MESSAGE: u8 = 0xE0;
const PIN_MODE_SERVO: u8 = 0x04;

/// Interval between repeated version queries while waiting for the board.
const VERSION_QUERY_INTERVAL: Duration = Duration::from_secs(1);

/// Anything byte-oriented the board can be reached through.
pub trait SerialLink: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> SerialLink for T {}

// ────────────────────────────────────────────────────────────────────────────
// Message encoding
// ────────────────────────────────────────────────────────────────────────────

fn split14(value: u16) -> [u8; 2] {
    [(value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
}

/// `SERVO_CONFIG` sysex for `pin` with the given pulse range.
pub fn encode_servo_config(pin: u8, min_pulse_us: u16, max_pulse_us: u16) -> Vec<u8> {
    let [min_lsb, min_msb] = split14(min_pulse_us);
    let [max_lsb, max_msb] = split14(max_pulse_us);
    vec![
        START_SYSEX,
        SERVO_CONFIG,
        pin & 0x7F,
        min_lsb,
        min_msb,
        max_lsb,
        max_msb,
        END_SYSEX,
    ]
}

/// `SET_PIN_MODE` switching `pin` to servo output.
pub fn encode_servo_mode(pin: u8) -> Vec<u8> {
    vec![SET_PIN_MODE, pin & 0x7F, PIN_MODE_SERVO]
}

/// Analog (servo angle) write, using the extended form above pin 15.
pub fn encode_analog_write(pin: u8, value: u16) -> Vec<u8> {
    if pin < 16 {
        let [lsb, msb] = split14(value);
        return vec![ANALOG_MESSAGE | pin, lsb, msb];
    }
    let mut frame = vec![START_SYSEX, EXTENDED_ANALOG, pin & 0x7F];
    let mut rest = value;
    loop {
        frame.push((rest & 0x7F) as u8);
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    frame.push(END_SYSEX);
    frame
}

/// Find a `REPORT_VERSION` reply in `buf`, returning `(major, minor)`.
pub fn scan_version(buf: &[u8]) -> Option<(u8, u8)> {
    buf.windows(3)
        .find(|w| w[0] == REPORT_VERSION && w[1] < 0x80 && w[2] < 0x80)
        .map(|w| (w[1], w[2]))
}

// ────────────────────────────────────────────────────────────────────────────
// Board
// ────────────────────────────────────────────────────────────────────────────

/// A Firmata board reachable over a [`SerialLink`].
pub struct FirmataBoard {
    name: String,
    link: Box<dyn SerialLink>,
}

impl FirmataBoard {
    /// Wrap an already-open link without performing the handshake.
    pub fn with_link(name: impl Into<String>, link: Box<dyn SerialLink>) -> Self {
        Self {
            name: name.into(),
            link,
        }
    }

    /// Open `path` at `baud_rate` and wait up to `handshake_timeout` for the
    /// board to report its Firmata version.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HardwareFault`] when the port cannot be opened or
    /// the board never answers.
    pub fn open(path: &str, baud_rate: u32, handshake_timeout: Duration) -> Result<Self, RelayError> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| RelayError::hardware(path, format!("cannot open serial port: {e}")))?;
        info!(path, baud_rate, "serial port opened; waiting for Firmata");

        let mut board = Self::with_link(path, Box::new(port));
        let (major, minor) = board.handshake(handshake_timeout)?;
        info!(path, major, minor, "Firmata board ready");
        Ok(board)
    }

    /// Board name (the serial path for real hardware).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Query the firmware version until the board answers or `timeout`
    /// elapses.  Boards that reset on connect need a second or two.
    pub fn handshake(&mut self, timeout: Duration) -> Result<(u8, u8), RelayError> {
        let started = Instant::now();
        let mut last_query: Option<Instant> = None;
        let mut received = Vec::new();
        let mut chunk = [0u8; 64];

        while started.elapsed() < timeout {
            if last_query.is_none_or(|t| t.elapsed() >= VERSION_QUERY_INTERVAL) {
                self.write_frame(&[REPORT_VERSION])?;
                last_query = Some(Instant::now());
            }
            match self.link.read(&mut chunk) {
                Ok(0) => std::thread::sleep(Duration::from_millis(5)),
                Ok(n) => {
                    received.extend_from_slice(&chunk[..n]);
                    if let Some(version) = scan_version(&received) {
                        return Ok(version);
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(RelayError::hardware(&self.name, format!("read failed: {e}"))),
            }
        }

        Err(RelayError::hardware(
            &self.name,
            format!("no Firmata version reply within {timeout:?}"),
        ))
    }

    /// Write one complete message and flush it to the device.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<(), RelayError> {
        debug!(board = %self.name, ?frame, "firmata write");
        self.link
            .write_all(frame)
            .and_then(|_| self.link.flush())
            .map_err(|e| RelayError::hardware(&self.name, format!("write failed: {e}")))
    }

    /// Move the board onto a writer thread and return the handle servos
    /// queue frames through.  The thread ends when every handle is dropped
    /// or on the first failed write.
    pub fn spawn_writer(mut self) -> Result<(BoardHandle, JoinHandle<()>), RelayError> {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let name = self.name.clone();
        let writer = thread::Builder::new()
            .name("firmata-writer".to_string())
            .spawn(move || {
                for frame in rx {
                    if let Err(e) = self.write_frame(&frame) {
                        error!(error = %e, "firmata writer stopped");
                        return;
                    }
                }
                debug!(board = %self.name, "firmata writer finished");
            })
            .map_err(|e| RelayError::hardware(&name, format!("cannot spawn writer thread: {e}")))?;
        Ok((BoardHandle { name, tx }, writer))
    }
}

/// Sender side of a board's writer thread.  Cheap to clone.
#[derive(Clone, Debug)]
pub struct BoardHandle {
    name: String,
    tx: mpsc::Sender<Vec<u8>>,
}

impl BoardHandle {
    /// Queue `frame` for the writer thread.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), RelayError> {
        self.tx
            .send(frame)
            .map_err(|_| RelayError::hardware(&self.name, "serial writer stopped"))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Servo
// ────────────────────────────────────────────────────────────────────────────

/// One servo driven through a [`BoardHandle`].
pub struct FirmataServo {
    spec: ServoSpec,
    board: BoardHandle,
    position: f32,
}

impl FirmataServo {
    /// Configure `spec.pin` as a servo and move it to its attach position.
    pub fn attach(board: &BoardHandle, spec: ServoSpec) -> Result<Self, RelayError> {
        let mut servo = Self {
            spec,
            board: board.clone(),
            position: spec.initial_position(),
        };
        let (min_us, max_us) = spec.pulse_range_us;
        servo.board.send(encode_servo_config(spec.pin, min_us, max_us))?;
        servo.board.send(encode_servo_mode(spec.pin))?;
        let start = servo.position;
        servo.write_angle(start)?;
        info!(servo = spec.id, pin = spec.pin, position = start, "servo attached");
        Ok(servo)
    }

    fn write_angle(&mut self, degrees: f32) -> Result<(), RelayError> {
        self.board.send(encode_analog_write(self.spec.pin, degrees as u16))?;
        self.position = degrees;
        Ok(())
    }
}

impl Actuator for FirmataServo {
    fn id(&self) -> &str {
        self.spec.id
    }

    fn set_position(&mut self, target: f32) -> Result<(), RelayError> {
        if !target.is_finite() {
            warn!(servo = self.spec.id, "ignoring non-numeric servo target");
            return Ok(());
        }
        let degrees = self.spec.clamp(target);
        self.write_angle(degrees)
    }

    fn position(&self) -> f32 {
        self.position
    }
}
