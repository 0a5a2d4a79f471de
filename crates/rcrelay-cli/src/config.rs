//! Relay configuration – `~/.rcrelay/config.toml`, then `RCRELAY_*`
//! environment variables, then command-line flags.

use rcrelay_types::RelayError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted relay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// TCP port for HTTP and the socket channel.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Serial device the servo board is attached to.
    #[serde(default = "default_serial_port")]
    pub serial_port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// How long to wait for the board's firmware version reply.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Run without a servo board.
    #[serde(default)]
    pub no_hardware: bool,

    /// Directory served for unmatched `GET` paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_dir: Option<PathBuf>,
}

fn default_http_port() -> u16 {
    80
}
fn default_serial_port() -> String {
    "/dev/ttyACM0".to_string()
}
fn default_baud_rate() -> u32 {
    57_600
}
fn default_handshake_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            serial_port: default_serial_port(),
            baud_rate: default_baud_rate(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            no_hardware: false,
            public_dir: None,
        }
    }
}

impl Config {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Return the path to `~/.rcrelay/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rcrelay").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, RelayError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| RelayError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| RelayError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
    Ok(Some(cfg))
}

/// Apply `RCRELAY_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RCRELAY_HTTP_PORT` | `http_port` |
/// | `RCRELAY_SERIAL_PORT` | `serial_port` |
/// | `RCRELAY_NO_HARDWARE` | `no_hardware` (`1`/`true`/`0`/`false`) |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

/// Same as [`apply_env_overrides`] with an arbitrary variable source.
/// Unparseable values are ignored.
pub(crate) fn apply_overrides_from(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("RCRELAY_HTTP_PORT") {
        if let Ok(port) = v.trim().parse::<u16>() {
            cfg.http_port = port;
        }
    }
    if let Some(v) = var("RCRELAY_SERIAL_PORT") {
        cfg.serial_port = v;
    }
    if let Some(v) = var("RCRELAY_NO_HARDWARE") {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => cfg.no_hardware = true,
            "0" | "false" | "no" => cfg.no_hardware = false,
            _ => {}
        }
    }
}
