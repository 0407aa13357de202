//! `carewatch-runtime` – Sessions & Identity
//!
//! Wires the pure rules in `carewatch-kernel` to the feeds in
//! `carewatch-middleware` and drives them from authentication events.
//!
//! # Modules
//!
//! - [`auth`] – [`Authenticator`][auth::Authenticator] with the REST
//!   ([`RestAuthenticator`][auth::RestAuthenticator]) and simulated
//!   ([`SimulatedAuthenticator`][auth::SimulatedAuthenticator]) variants.
//! - [`session`] – [`DashboardSession`][session::DashboardSession]: one task
//!   per signed-in session that drains the data-source queue and operator
//!   commands, evaluates readings, drives dispatch and publishes results on
//!   the [`EventBus`][carewatch_middleware::EventBus].
//! - [`manager`] – [`SessionManager`][manager::SessionManager]: builds a
//!   fresh session on every sign-in and tears it down on sign-out.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP export.

pub mod auth;
pub mod manager;
pub mod session;
pub mod telemetry;

pub use auth::{Authenticator, RestAuthenticator, SimulatedAuthenticator};
pub use manager::{AuthEvent, SessionManager};
pub use session::{DashboardSession, RunningSession, SessionCommand, SessionHandle};
pub use telemetry::{TracerProviderGuard, init_tracing};
