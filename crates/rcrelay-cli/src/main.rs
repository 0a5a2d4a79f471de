//! `rcrelay` – remote-control relay for an RC car.
//!
//! This binary wires the stack together.  It:
//!
//! 1. Resolves configuration: `~/.rcrelay/config.toml`, then `RCRELAY_*`
//!    environment variables, then command-line flags.
//! 2. Opens the Firmata servo board (unless `--no-hardware`) and attaches the
//!    throttle and steering servos.
//! 3. Spawns the command session and serves HTTP + the socket channel.
//! 4. Optionally runs an operator console on stdin (`--console`).
//! 5. On Ctrl-C, brings the car to rest before exiting.

mod config;
mod console;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tracing::{error, info, warn};

use rcrelay_cockpit::CockpitServer;
use rcrelay_hal::{Actuator, FirmataBoard, FirmataServo, NullActuator, STEERING_SERVO, THROTTLE_SERVO};
use rcrelay_kernel::{SafetyController, Session, SymbolTable};
use rcrelay_middleware::{EventBus, StatusBroadcaster};
use rcrelay_types::{RelayError, ServerStatus};

use config::Config;

/// Command-line flags.  Each one overrides the config file and environment.
#[derive(Debug, Parser)]
#[command(name = "rcrelay", version, about = "Relay remote-control commands to an RC car's servos")]
struct Args {
    /// Config file to read instead of ~/.rcrelay/config.toml.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// TCP port for HTTP and the socket channel.
    #[arg(long, short)]
    port: Option<u16>,

    /// Serial device of the servo board.
    #[arg(long, value_name = "DEVICE")]
    serial: Option<String>,

    /// Run without a servo board; commands are parsed and logged only.
    #[arg(long, alias = "no-arduino")]
    no_hardware: bool,

    /// Directory served for unmatched GET paths.
    #[arg(long, value_name = "DIR")]
    public_dir: Option<PathBuf>,

    /// Read raw commands from stdin.
    #[arg(long)]
    console: bool,
}

impl Args {
    fn apply(&self, cfg: &mut Config) {
        if let Some(port) = self.port {
            cfg.http_port = port;
        }
        if let Some(serial) = &self.serial {
            cfg.serial_port = serial.clone();
        }
        if self.no_hardware {
            cfg.no_hardware = true;
        }
        if let Some(dir) = &self.public_dir {
            cfg.public_dir = Some(dir.clone());
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info").  RCRELAY_LOG_FORMAT=json switches to
    // newline-delimited JSON.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("RCRELAY_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    let args = Args::parse();
    print_banner();

    let cfg = resolve_config(&args);
    match run(cfg, args.console).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "relay stopped");
            eprintln!("{}: {}", "Fatal".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn resolve_config(args: &Args) -> Config {
    let path = args.config.clone().unwrap_or_else(config::config_path);
    let mut cfg = match config::load_from(&path) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}", e.to_string().red());
            println!("  Using default configuration.");
            Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    args.apply(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup
// ─────────────────────────────────────────────────────────────────────────────

/// Open the board and attach both servos, or stand in no-op actuators.
async fn attach_actuators(
    cfg: &Config,
) -> Result<(Box<dyn Actuator>, Box<dyn Actuator>, bool), RelayError> {
    if cfg.no_hardware {
        warn!("hardware disabled; commands will be logged but not applied");
        return Ok((
            NullActuator::new(THROTTLE_SERVO.id, THROTTLE_SERVO.initial_position()),
            NullActuator::new(STEERING_SERVO.id, STEERING_SERVO.initial_position()),
            false,
        ));
    }

    let path = cfg.serial_port.clone();
    let baud = cfg.baud_rate;
    let timeout = cfg.handshake_timeout();
    println!("  Waiting for servo board on {} …", path.bold());

    // Serial I/O blocks; keep it off the async workers.
    let (throttle, steering) = tokio::task::spawn_blocking(move || {
        // The writer thread is detached; it ends with the last servo.
        let (board, _writer) = FirmataBoard::open(&path, baud, timeout)?.spawn_writer()?;
        let throttle = FirmataServo::attach(&board, THROTTLE_SERVO)?;
        let steering = FirmataServo::attach(&board, STEERING_SERVO)?;
        Ok::<_, RelayError>((throttle, steering))
    })
    .await
    .map_err(|e| RelayError::Channel(format!("board setup task failed: {e}")))??;

    println!("  {} servo board ready", "✓".green().bold());
    Ok((Box::new(throttle), Box::new(steering), true))
}

async fn run(cfg: Config, with_console: bool) -> Result<(), RelayError> {
    info!(?cfg, "starting relay");

    let table = SymbolTable::default();
    let (throttle, steering, has_arduino) = attach_actuators(&cfg).await?;
    let controller = SafetyController::new(throttle, steering, table.stop(), table.neutral());

    let bus = EventBus::default();
    let broadcaster = StatusBroadcaster::new(bus.clone());
    let status = ServerStatus {
        has_arduino,
        ..ServerStatus::default()
    };
    let (session, mut session_task) =
        Session::new(table, controller, status, broadcaster.clone()).spawn();

    let mut server = CockpitServer::new(session.clone(), bus).with_port(cfg.http_port);
    if let Some(dir) = &cfg.public_dir {
        server = server.with_public_dir(dir);
    }
    println!(
        "  Control page at {}",
        format!("http://localhost:{}/", cfg.http_port).bold().cyan()
    );

    if with_console {
        let console_session = session.clone();
        std::thread::spawn(move || {
            if let Err(e) = console::run(console_session) {
                warn!(error = %e, "console stopped");
            }
        });
        println!("  Type {} for console commands.\n", "/help".bold().cyan());
    }

    tokio::select! {
        served = server.run() => {
            // The server only returns on a bind failure.
            session.shutdown().await.ok();
            served
        }
        ended = &mut session_task => {
            ended.map_err(|e| RelayError::Channel(format!("session task failed: {e}")))?
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("{}", "⚠  Ctrl-C received – stopping the car …".yellow().bold());
            broadcaster.announce("server shutting down");
            session.shutdown().await?;
            session_task
                .await
                .map_err(|e| RelayError::Channel(format!("session task failed: {e}")))??;
            println!("{}", "  ✓ Car at rest. Exiting.".green());
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("  {} {}",
        "rcrelay".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Remote-control relay for an RC car");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "rcrelay",
            "--port",
            "8080",
            "--serial",
            "/dev/ttyUSB1",
            "--no-arduino",
            "--public-dir",
            "/srv/car",
        ]);
        let mut cfg = Config::default();
        args.apply(&mut cfg);

        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.serial_port, "/dev/ttyUSB1");
        assert!(cfg.no_hardware);
        assert_eq!(cfg.public_dir, Some(PathBuf::from("/srv/car")));
    }

    #[test]
    fn absent_flags_leave_config_alone() {
        let args = Args::parse_from(["rcrelay"]);
        let mut cfg = Config {
            http_port: 9000,
            no_hardware: true,
            ..Config::default()
        };
        args.apply(&mut cfg);
        assert_eq!(cfg.http_port, 9000);
        assert!(cfg.no_hardware);
        assert!(!args.console);
    }

    #[test]
    fn config_flag_selects_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("car.toml");
        std::fs::write(&path, "http_port = 8088\n").expect("write");

        let args = Args::parse_from(["rcrelay", "--config", path.to_str().unwrap(), "--no-hardware"]);
        let cfg = resolve_config(&args);

        assert!(cfg.no_hardware);
        // RCRELAY_HTTP_PORT may be set in the environment running the tests.
        if std::env::var("RCRELAY_HTTP_PORT").is_err() {
            assert_eq!(cfg.http_port, 8088);
        }
    }

    #[tokio::test]
    async fn no_hardware_uses_null_actuators() {
        let cfg = Config {
            no_hardware: true,
            ..Config::default()
        };
        let (throttle, steering, has_arduino) = attach_actuators(&cfg).await.unwrap();
        assert!(!has_arduino);
        assert_eq!(throttle.id(), "throttle");
        assert_eq!(steering.id(), "steering");
    }

    #[tokio::test]
    async fn missing_board_is_a_hardware_fault() {
        let cfg = Config {
            serial_port: "/dev/rcrelay-does-not-exist".to_string(),
            handshake_timeout_ms: 10,
            ..Config::default()
        };
        let err = attach_actuators(&cfg).await.err().unwrap();
        assert!(matches!(err, RelayError::HardwareFault { .. }), "{err}");
    }
}
