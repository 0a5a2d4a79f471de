//! `rcrelay-cockpit` – HTTP + socket transport for the relay
//!
//! Boots one TCP listener (default port `80`) that:
//!
//! 1. **Serves** the embedded control page at `/` and, when configured, any
//!    static file under a public directory.
//!
//! 2. **Accepts commands** over HTTP (`GET /command/?command=…` and
//!    `POST /command/`) and over a Socket.IO channel (`robot command`),
//!    forwarding each raw string to the [`SessionHandle`].
//!
//! 3. **Relays status**: `robot update` events and `POST` status bodies are
//!    handed to the session for enrichment, and every payload on the
//!    [`EventBus`] is pushed to each connected socket as `robot status`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use rcrelay_cockpit::CockpitServer;
//! use rcrelay_kernel::SessionHandle;
//! use rcrelay_middleware::EventBus;
//!
//! async fn serve(session: SessionHandle, bus: EventBus) {
//!     CockpitServer::new(session, bus)
//!         .with_port(8080)
//!         .run()
//!         .await
//!         .expect("cockpit server failed");
//! }
//! ```
//!
//! [`SessionHandle`]: rcrelay_kernel::SessionHandle
//! [`EventBus`]: rcrelay_middleware::EventBus

pub mod http;
pub mod server;
pub mod socket;
pub mod wire;

pub use server::{CockpitServer, DEFAULT_PORT};
pub use socket::Heartbeat;
