//! [`Command`] – the typed form of a raw command string.
//!
//! Commands arrive as dash-delimited strings such as
//! `manual-throttle-forward-500`.  Field 0 picks the family, field 1 the
//! sub-command, and the meaning of later fields depends on both:
//!
//! | Raw form | Parsed |
//! |---|---|
//! | `manual-throttle-<pos>[-<ms>]` | [`Command::Throttle`] |
//! | `manual-turn-<pos>` | [`Command::Turn`] |
//! | `manual-<other>` | [`Command::Idle`] |
//! | `face-begin`, `red-begin` | [`Command::Ai`] with that mode |
//! | `face-<other>`, `red-<other>` | [`Command::Ai`] with [`AiMode::None`] |
//! | anything else | [`Command::Stop`] |
//!
//! `<pos>` is a symbol-table keyword or an integer literal.  Input is not
//! validated: a token that is neither resolves to `NaN` and is handed on
//! as-is.

use std::time::Duration;

use rcrelay_types::AiMode;

use crate::symbols::SymbolTable;

/// Field separator.
pub const DELIMITER: char = '-';

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Move the throttle; `timeout` is the safety window after which it is
    /// forced back to `stop` (`None` arms nothing).
    Throttle {
        position: f32,
        timeout: Option<Duration>,
    },
    /// Move the steering servo.
    Turn { position: f32 },
    /// Select the active vision behaviour.
    Ai(AiMode),
    /// A `manual` command with an unknown sub-command.  No effect.
    Idle,
    /// Unknown family: steer neutral and stop the throttle.
    Stop,
}

impl Command {
    /// Parse `raw` against `table`.  Never fails; see the module docs for how
    /// malformed input resolves.
    pub fn parse(raw: &str, table: &SymbolTable) -> Self {
        let fields: Vec<&str> = raw.split(DELIMITER).collect();
        let field = |i: usize| fields.get(i).copied();

        match field(0) {
            Some("manual") => match field(1) {
                Some("throttle") => Command::Throttle {
                    position: resolve_position(field(2), table),
                    timeout: resolve_timeout(field(3), table),
                },
                Some("turn") => Command::Turn {
                    position: resolve_position(field(2), table),
                },
                _ => Command::Idle,
            },
            Some("face") => Command::Ai(ai_mode(field(1), AiMode::Face)),
            Some("red") => Command::Ai(ai_mode(field(1), AiMode::Red)),
            _ => Command::Stop,
        }
    }
}

fn ai_mode(action: Option<&str>, mode: AiMode) -> AiMode {
    if action == Some("begin") { mode } else { AiMode::None }
}

/// Symbol-table keyword, else integer prefix, else `NaN`.
fn resolve_position(token: Option<&str>, table: &SymbolTable) -> f32 {
    let Some(token) = token else {
        return f32::NAN;
    };
    table
        .get(token)
        .or_else(|| parse_int_prefix(token).map(|v| v as f32))
        .unwrap_or(f32::NAN)
}

/// Absent → the default window.  Empty or zero → no window.  A token with no
/// leading digits falls back to the default window so a garbled duration
/// still leaves the throttle bounded.
fn resolve_timeout(token: Option<&str>, table: &SymbolTable) -> Option<Duration> {
    let Some(token) = token else {
        return Some(table.throttle_time());
    };
    if token.is_empty() {
        return None;
    }
    match parse_int_prefix(token) {
        Some(ms) if ms > 0.0 => Some(Duration::from_millis(ms as u64)),
        Some(_) => None,
        None => Some(table.throttle_time()),
    }
}

/// Lenient integer parse: optional leading whitespace and sign, then as many
/// digits as are present (`"70abc"` → 70).  A `0x`/`0X` prefix switches to
/// hexadecimal (`"0x50"` → 80).  `None` when no digit follows.
pub fn parse_int_prefix(token: &str) -> Option<f64> {
    let s = token.trim_start();
    let (sign, rest) = match s.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, s.strip_prefix('+').unwrap_or(s)),
    };
    let (radix, digits) = match rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        Some(hex) => (16, hex),
        None => (10, rest),
    };
    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end]
        .chars()
        .try_fold(0.0_f64, |acc, c| c.to_digit(radix).map(|d| acc * f64::from(radix) + f64::from(d)))
        .map(|v| sign * v)
}
