//! `carewatch-kernel` – Monitoring & Dispatch Rules
//!
//! The synchronous core of CareWatch. It does no I/O; it classifies readings
//! and decides when the assistive robot must be called.
//!
//! # Modules
//!
//! - [`threshold`] – [`classify`][threshold::classify]: maps a reading and
//!   its inclusive band onto [`MetricStatus`][carewatch_types::MetricStatus].
//! - [`snapshot`] – [`SensorSnapshot`][snapshot::SensorSnapshot]: current
//!   value of every metric, merged from partial updates and evaluated into a
//!   [`VitalsReport`][carewatch_types::VitalsReport].
//! - [`dispatch`] – [`DispatchController`][dispatch::DispatchController]:
//!   edge-triggered `Idle → Dispatched` state machine fed by manual and
//!   automatic triggers and reconciled against the robot's own status.

pub mod dispatch;
pub mod snapshot;
pub mod threshold;

pub use dispatch::DispatchController;
pub use snapshot::SensorSnapshot;
pub use threshold::{classify, classify_in, classify_metric};
