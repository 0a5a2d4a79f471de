//! [`Session`] – the command interpreter and server status, run as one task.
//!
//! All command handling, cutoff expiry, and status broadcasting happen on a
//! single Tokio task, so actuator state is never shared between threads.
//! Transports reach the session through a cloneable [`SessionHandle`].
//!
//! # Example
//!
//! ```rust,no_run
//! use rcrelay_hal::{NullActuator, STEERING_SERVO, THROTTLE_SERVO};
//! use rcrelay_kernel::{SafetyController, Session, SymbolTable};
//! use rcrelay_middleware::{EventBus, StatusBroadcaster};
//! use rcrelay_types::ServerStatus;
//!
//! #[tokio::main]
//! async fn main() {
//!     let table = SymbolTable::default();
//!     let controller = SafetyController::new(
//!         NullActuator::new(THROTTLE_SERVO.id, table.stop()),
//!         NullActuator::new(STEERING_SERVO.id, table.neutral()),
//!         table.stop(),
//!         table.neutral(),
//!     );
//!     let broadcaster = StatusBroadcaster::new(EventBus::default());
//!     let session = Session::new(table, controller, ServerStatus::default(), broadcaster);
//!     let (handle, task) = session.spawn();
//!     handle.submit("manual-throttle-forward").await.unwrap();
//!     handle.shutdown().await.unwrap();
//!     task.await.unwrap().unwrap();
//! }
//! ```

use rcrelay_middleware::StatusBroadcaster;
use rcrelay_types::{RelayError, ServerStatus};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use crate::command::Command;
use crate::safety::SafetyController;
use crate::symbols::SymbolTable;

/// Buffered requests before senders wait.
const REQUEST_CAPACITY: usize = 64;

/// Messages a [`SessionHandle`] sends to the session task.
#[derive(Debug)]
pub enum SessionRequest {
    /// Interpret a raw command string; `reply` receives the status after
    /// dispatch.
    Command {
        raw: String,
        reply: Option<oneshot::Sender<ServerStatus>>,
    },
    /// Enrich and broadcast a status mapping.
    StatusUpdate(Map<String, Value>),
    /// Report the current status.
    Snapshot(oneshot::Sender<ServerStatus>),
    /// Bring the vehicle to rest and end the task.
    Shutdown,
}

pub struct Session {
    table: SymbolTable,
    controller: SafetyController,
    status: ServerStatus,
    broadcaster: StatusBroadcaster,
}

impl Session {
    pub fn new(
        table: SymbolTable,
        controller: SafetyController,
        status: ServerStatus,
        broadcaster: StatusBroadcaster,
    ) -> Self {
        Self {
            table,
            controller,
            status,
            broadcaster,
        }
    }

    pub fn status(&self) -> &ServerStatus {
        &self.status
    }

    pub fn controller(&self) -> &SafetyController {
        &self.controller
    }

    /// Parse `raw` and, when hardware is attached, act on it.
    ///
    /// Without hardware the command is still parsed and logged but nothing
    /// else happens, including AI mode changes.
    pub fn interpret(&mut self, raw: &str) -> Result<(), RelayError> {
        let command = Command::parse(raw, &self.table);
        info!(raw, ?command, "command received");
        if !self.status.has_arduino {
            debug!("no hardware attached; command not dispatched");
            return Ok(());
        }
        self.dispatch(command)
    }

    /// Apply an already-parsed command.
    pub fn dispatch(&mut self, command: Command) -> Result<(), RelayError> {
        match command {
            Command::Throttle { position, timeout } => self.controller.set_throttle(position, timeout),
            Command::Turn { position } => self.controller.set_steering(position),
            Command::Ai(mode) => {
                self.status.current_ai = mode;
                info!(mode = %mode, "AI mode");
                Ok(())
            }
            Command::Idle => Ok(()),
            Command::Stop => self.controller.halt(),
        }
    }

    /// Stamp and broadcast a status mapping.  Returns observers reached.
    pub fn update_status(&self, fields: Map<String, Value>) -> usize {
        self.broadcaster.broadcast(fields, self.status.has_arduino)
    }

    /// Move the session onto its own task.
    ///
    /// The task ends with `Ok` after [`SessionRequest::Shutdown`] or once
    /// every handle is dropped (halting the vehicle either way), and with
    /// `Err` on the first hardware fault.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<Result<(), RelayError>>) {
        let (tx, rx) = mpsc::channel(REQUEST_CAPACITY);
        let task = tokio::spawn(self.run(rx));
        (SessionHandle { tx }, task)
    }

    /// Serve requests and cutoff expiries until shutdown.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SessionRequest>) -> Result<(), RelayError> {
        loop {
            // Re-read every turn: a replaced cutoff is never waited on.
            let deadline = self.controller.pending_deadline();
            tokio::select! {
                biased;
                () = wait_until(deadline) => {
                    self.controller.expire(Instant::now())?;
                }
                request = rx.recv() => {
                    let Some(request) = request else {
                        info!("all session handles dropped; session ending");
                        return self.bring_to_rest();
                    };
                    if !self.handle(request)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Returns `false` when the session should end.
    fn handle(&mut self, request: SessionRequest) -> Result<bool, RelayError> {
        match request {
            SessionRequest::Command { raw, reply } => {
                self.interpret(&raw)?;
                if let Some(reply) = reply {
                    let _ = reply.send(self.status.clone());
                }
            }
            SessionRequest::StatusUpdate(fields) => {
                self.update_status(fields);
            }
            SessionRequest::Snapshot(reply) => {
                let _ = reply.send(self.status.clone());
            }
            SessionRequest::Shutdown => {
                self.bring_to_rest()?;
                info!("session shut down");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn bring_to_rest(&mut self) -> Result<(), RelayError> {
        if self.status.has_arduino {
            self.controller.halt()?;
        }
        Ok(())
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Cloneable sender side of a running [`Session`].
#[derive(Clone, Debug)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
}

impl SessionHandle {
    async fn send(&self, request: SessionRequest) -> Result<(), RelayError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| RelayError::SessionClosed)
    }

    fn blocking_send(&self, request: SessionRequest) -> Result<(), RelayError> {
        self.tx
            .blocking_send(request)
            .map_err(|_| RelayError::SessionClosed)
    }

    /// Interpret `raw` and wait for the resulting status.
    pub async fn command(&self, raw: impl Into<String>) -> Result<ServerStatus, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionRequest::Command {
            raw: raw.into(),
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| RelayError::SessionClosed)
    }

    /// Queue `raw` for interpretation without waiting.
    pub async fn submit(&self, raw: impl Into<String>) -> Result<(), RelayError> {
        self.send(SessionRequest::Command {
            raw: raw.into(),
            reply: None,
        })
        .await
    }

    /// [`SessionHandle::submit`] for non-async threads.
    pub fn blocking_submit(&self, raw: impl Into<String>) -> Result<(), RelayError> {
        self.blocking_send(SessionRequest::Command {
            raw: raw.into(),
            reply: None,
        })
    }

    /// Queue a status mapping for broadcast.
    pub async fn update_status(&self, fields: Map<String, Value>) -> Result<(), RelayError> {
        self.send(SessionRequest::StatusUpdate(fields)).await
    }

    pub async fn snapshot(&self) -> Result<ServerStatus, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionRequest::Snapshot(reply)).await?;
        rx.await.map_err(|_| RelayError::SessionClosed)
    }

    /// [`SessionHandle::snapshot`] for non-async threads.
    pub fn blocking_snapshot(&self) -> Result<ServerStatus, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.blocking_send(SessionRequest::Snapshot(reply))?;
        rx.blocking_recv().map_err(|_| RelayError::SessionClosed)
    }

    pub async fn shutdown(&self) -> Result<(), RelayError> {
        self.send(SessionRequest::Shutdown).await
    }

    /// [`SessionHandle::shutdown`] for non-async threads.
    pub fn blocking_shutdown(&self) -> Result<(), RelayError> {
        self.blocking_send(SessionRequest::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcrelay_hal::{Actuator, ActuatorLog, SimActuator};
    use rcrelay_middleware::{ARDUINO_ATTACHED_KEY, EventBus, TIME_KEY};
    use rcrelay_types::AiMode;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::advance;

    struct Rig {
        session: Session,
        throttle: ActuatorLog,
        steering: ActuatorLog,
        bus: EventBus,
    }

    fn rig(has_arduino: bool) -> Rig {
        let table = SymbolTable::default();
        let throttle = SimActuator::new("throttle", table.stop());
        let steering = SimActuator::new("steering", table.neutral());
        let (t_log, s_log) = (throttle.log(), steering.log());
        let controller = SafetyController::new(throttle, steering, table.stop(), table.neutral());
        let bus = EventBus::default();
        let status = ServerStatus {
            has_arduino,
            ..ServerStatus::default()
        };
        Rig {
            session: Session::new(table, controller, status, StatusBroadcaster::new(bus.clone())),
            throttle: t_log,
            steering: s_log,
            bus,
        }
    }

    // ── Interpreter dispatch ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn throttle_without_window_arms_default_cutoff() {
        let mut rig = rig(true);
        let start = Instant::now();

        rig.session.interpret("manual-throttle-forward").unwrap();

        assert_eq!(rig.throttle.positions(), vec![65.0]);
        assert_eq!(
            rig.session.controller().pending_deadline(),
            Some(start + Duration::from_millis(500))
        );
    }

    #[tokio::test]
    async fn turn_left_moves_steering_without_timer() {
        let mut rig = rig(true);

        rig.session.interpret("manual-turn-left").unwrap();

        assert_eq!(rig.steering.positions(), vec![40.0]);
        assert!(rig.throttle.is_empty());
        assert_eq!(rig.session.controller().pending_deadline(), None);
    }

    #[tokio::test]
    async fn face_begin_then_stop_toggles_ai_mode() {
        let mut rig = rig(true);

        rig.session.interpret("face-begin").unwrap();
        assert_eq!(rig.session.status().current_ai, AiMode::Face);

        rig.session.interpret("red-begin").unwrap();
        assert_eq!(rig.session.status().current_ai, AiMode::Red);

        rig.session.interpret("face-stop").unwrap();
        assert_eq!(rig.session.status().current_ai, AiMode::None);
        assert!(rig.throttle.is_empty() && rig.steering.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_family_forces_full_stop_and_disarms() {
        let mut rig = rig(true);
        rig.session.interpret("manual-throttle-forward-2000").unwrap();
        assert!(rig.session.controller().pending_deadline().is_some());

        rig.session.interpret("foo-bar").unwrap();

        assert_eq!(rig.steering.last(), Some(75.0));
        assert_eq!(rig.throttle.last(), Some(90.0));
        assert_eq!(rig.session.controller().pending_deadline(), None);
    }

    #[tokio::test]
    async fn manual_with_unknown_subcommand_does_nothing() {
        let mut rig = rig(true);
        rig.session.interpret("manual-wave").unwrap();
        assert!(rig.throttle.is_empty() && rig.steering.is_empty());
    }

    #[tokio::test]
    async fn without_hardware_nothing_is_dispatched() {
        let mut rig = rig(false);

        for raw in [
            "manual-throttle-forward",
            "manual-turn-right",
            "face-begin",
            "foo-bar",
            "manual-turn-garbage",
            "",
        ] {
            rig.session.interpret(raw).unwrap();
        }

        assert!(rig.throttle.is_empty());
        assert!(rig.steering.is_empty());
        assert_eq!(rig.session.status().current_ai, AiMode::None);
        assert_eq!(rig.session.controller().pending_deadline(), None);
    }

    #[tokio::test]
    async fn garbage_position_reaches_the_actuator_untouched() {
        let mut rig = rig(true);
        rig.session.interpret("manual-turn-sideways").unwrap();
        assert!(rig.steering.last().is_some_and(f32::is_nan));
    }

    // ── Session task ────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn second_throttle_command_supersedes_first_cutoff() {
        let rig = rig(true);
        let throttle = rig.throttle.clone();
        let (handle, _task) = rig.session.spawn();

        handle.command("manual-throttle-forward-500").await.unwrap();
        advance(Duration::from_millis(400)).await;
        handle.command("manual-throttle-reverse-1000").await.unwrap();

        // Past the first window: the stale cutoff must not fire.
        advance(Duration::from_millis(200)).await;
        handle.snapshot().await.unwrap();
        assert_eq!(throttle.positions(), vec![65.0, 105.0]);

        // Past the second window.
        advance(Duration::from_millis(850)).await;
        handle.snapshot().await.unwrap();
        assert_eq!(throttle.positions(), vec![65.0, 105.0, 90.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn default_window_expires_after_500ms() {
        let rig = rig(true);
        let throttle = rig.throttle.clone();
        let (handle, _task) = rig.session.spawn();

        handle.command("manual-throttle-forward").await.unwrap();
        advance(Duration::from_millis(499)).await;
        handle.snapshot().await.unwrap();
        assert_eq!(throttle.last(), Some(65.0));

        advance(Duration::from_millis(2)).await;
        handle.snapshot().await.unwrap();
        assert_eq!(throttle.last(), Some(90.0));
    }

    #[tokio::test]
    async fn command_reply_carries_post_dispatch_status() {
        let rig = rig(true);
        let (handle, _task) = rig.session.spawn();

        let status = handle.command("red-begin").await.unwrap();
        assert_eq!(status.current_ai, AiMode::Red);
        assert!(status.has_arduino);
    }

    #[tokio::test]
    async fn status_update_is_enriched_and_broadcast() {
        let rig = rig(true);
        let mut rx1 = rig.bus.subscribe();
        let mut rx2 = rig.bus.subscribe();
        let (handle, _task) = rig.session.spawn();

        let fields = json!({ "temperature": 42 }).as_object().cloned().unwrap();
        handle.update_status(fields).await.unwrap();

        for rx in [&mut rx1, &mut rx2] {
            let status = rx.recv().await.unwrap();
            assert_eq!(status.data["temperature"], 42);
            assert_eq!(status.data[ARDUINO_ATTACHED_KEY], true);
            assert!(status.data[TIME_KEY].is_string());
        }
    }

    #[tokio::test]
    async fn shutdown_halts_vehicle_and_ends_task() {
        let rig = rig(true);
        let (throttle, steering) = (rig.throttle.clone(), rig.steering.clone());
        let (handle, task) = rig.session.spawn();

        handle.command("manual-turn-right").await.unwrap();
        handle.shutdown().await.unwrap();

        assert!(task.await.unwrap().is_ok());
        assert_eq!(steering.last(), Some(75.0));
        assert_eq!(throttle.last(), Some(90.0));
        assert!(matches!(handle.snapshot().await, Err(RelayError::SessionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_halts_the_vehicle() {
        let rig = rig(true);
        let (throttle, steering) = (rig.throttle.clone(), rig.steering.clone());
        let (handle, task) = rig.session.spawn();

        handle.command("manual-throttle-forward-2000").await.unwrap();
        drop(handle);

        assert!(task.await.unwrap().is_ok());
        assert_eq!(throttle.positions(), vec![65.0, 90.0]);
        assert_eq!(steering.last(), Some(75.0));
    }

    struct BrokenServo;

    impl Actuator for BrokenServo {
        fn id(&self) -> &str {
            "throttle"
        }
        fn set_position(&mut self, _target: f32) -> Result<(), RelayError> {
            Err(RelayError::hardware("throttle", "serial link lost"))
        }
        fn position(&self) -> f32 {
            90.0
        }
    }

    #[tokio::test]
    async fn hardware_fault_ends_the_session() {
        let table = SymbolTable::default();
        let controller = SafetyController::new(
            Box::new(BrokenServo),
            SimActuator::new("steering", 75.0),
            table.stop(),
            table.neutral(),
        );
        let status = ServerStatus {
            has_arduino: true,
            ..ServerStatus::default()
        };
        let session = Session::new(table, controller, status, StatusBroadcaster::new(EventBus::default()));
        let (handle, task) = session.spawn();

        let reply = handle.command("manual-throttle-forward").await;
        assert!(matches!(reply, Err(RelayError::SessionClosed)));
        assert!(matches!(
            task.await.unwrap(),
            Err(RelayError::HardwareFault { .. })
        ));
    }
}
