//! Operator console – a stdin prompt that feeds raw command strings to the
//! session.
//!
//! Supported slash-commands:
//!   /help         – show this list
//!   /status       – print the current server status
//!   /quit | /exit – bring the car to rest and stop the relay
//!
//! Any other non-empty line is submitted verbatim, e.g.
//! `manual-throttle-forward-1000`.

use colored::Colorize;
use std::io::{BufRead, Write};

use rcrelay_kernel::SessionHandle;
use rcrelay_types::RelayError;

/// One parsed console line.
#[derive(Debug, PartialEq)]
pub enum ConsoleInput<'a> {
    Empty,
    Help,
    Status,
    Quit,
    Unknown(&'a str),
    Command(&'a str),
}

impl<'a> ConsoleInput<'a> {
    /// Only the line terminator is stripped; a command goes out byte for byte.
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return ConsoleInput::Empty;
        }
        match line {
            "/help" => ConsoleInput::Help,
            "/status" => ConsoleInput::Status,
            "/quit" | "/exit" => ConsoleInput::Quit,
            other if other.starts_with('/') => ConsoleInput::Unknown(other),
            other => ConsoleInput::Command(other),
        }
    }
}

/// Run the prompt on the process's stdin/stdout.  Must be called from a
/// thread outside the async runtime.
pub fn run(session: SessionHandle) -> Result<(), RelayError> {
    let stdin = std::io::stdin();
    run_with(stdin.lock(), std::io::stdout(), &session)
}

/// Run the prompt until `/quit` or end of input.
///
/// `/quit` shuts the session down; end of input just leaves the relay
/// running headless.
pub fn run_with<R: BufRead, W: Write>(
    mut input: R,
    mut out: W,
    session: &SessionHandle,
) -> Result<(), RelayError> {
    loop {
        write!(out, "{} ", "rcrelay>".bold().cyan()).ok();
        out.flush().ok();

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(e) => {
                writeln!(out, "{}: {}", "Read error".red(), e).ok();
                return Ok(());
            }
        }

        match ConsoleInput::parse(&line) {
            ConsoleInput::Empty => {}
            ConsoleInput::Help => print_help(&mut out),
            ConsoleInput::Status => {
                let status = session.blocking_snapshot()?;
                let json = serde_json::to_string(&status).unwrap_or_else(|e| e.to_string());
                writeln!(out, "  {}", json.yellow()).ok();
            }
            ConsoleInput::Quit => {
                writeln!(out, "{}", "Stopping the car and shutting down.".green()).ok();
                return session.blocking_shutdown();
            }
            ConsoleInput::Unknown(other) => {
                writeln!(
                    out,
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                )
                .ok();
            }
            ConsoleInput::Command(raw) => session.blocking_submit(raw)?,
        }
    }
}

fn print_help<W: Write>(out: &mut W) {
    writeln!(out).ok();
    writeln!(out, "{}", "rcrelay console".bold().underline()).ok();
    writeln!(out, "  {}        – print the current server status", "/status".bold().cyan()).ok();
    writeln!(out, "  {}  – stop the car and exit", "/quit  /exit".bold().cyan()).ok();
    writeln!(out, "  {}  – send a raw command, e.g. manual-turn-left", "<command>".bold().cyan()).ok();
    writeln!(out).ok();
}
