//! [`DispatchController`] – state machine for the assistive robot.
//!
//! Two triggers converge on one transition:
//!
//! - the operator pressing the call button ([`DispatchController::manual_trigger`]),
//! - a reading leaving its band ([`DispatchController::auto_trigger_on_danger`]).
//!
//! `Idle → Dispatched` fires at most once per danger episode and is the only
//! transition that yields a [`DispatchCommand`].  The way back to `Idle` is
//! the robot's own status report ([`DispatchController::reconcile_external_status`])
//! or a session reset.  Readings returning to normal never re-idle the robot
//! while it may still be on its way.
//!
//! ```text
//!            manual / danger (emits CALL)
//!   ┌──────┐ ──────────────────────────────▶ ┌────────────┐
//!   │ Idle │                                 │ Dispatched │
//!   └──────┘ ◀────────────────────────────── └────────────┘
//!            robot reports IDLE / session reset
//! ```
//!
//! # Example
//!
//! ```
//! use carewatch_kernel::dispatch::DispatchController;
//! use carewatch_types::{DispatchCommand, DispatchState, RobotStatus};
//!
//! let mut ctl = DispatchController::new();
//! assert_eq!(ctl.auto_trigger_on_danger(true), Some(DispatchCommand::Call));
//! assert_eq!(ctl.auto_trigger_on_danger(true), None);
//!
//! ctl.reconcile_external_status(RobotStatus::Idle);
//! assert_eq!(ctl.state(), DispatchState::Idle);
//! ```

use carewatch_types::{DispatchCommand, DispatchState, RobotStatus};
use tracing::{debug, info};

/// Sole owner of the [`DispatchState`] of one session.
#[derive(Debug, Default)]
pub struct DispatchController {
    state: DispatchState,
}

impl DispatchController {
    /// Create a controller in [`DispatchState::Idle`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current dispatch state.
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Operator request to call the robot.
    ///
    /// Returns the command to send when the state moved `Idle → Dispatched`;
    /// `None` when the robot is already dispatched.
    pub fn manual_trigger(&mut self) -> Option<DispatchCommand> {
        match self.state {
            DispatchState::Idle => {
                self.state = DispatchState::Dispatched;
                info!("robot dispatched");
                Some(DispatchCommand::Call)
            }
            DispatchState::Dispatched => {
                debug!("dispatch requested while already dispatched; ignoring");
                None
            }
        }
    }

    /// Automatic trigger, called after every snapshot evaluation.
    ///
    /// `any_danger == false` never changes state.
    pub fn auto_trigger_on_danger(&mut self, any_danger: bool) -> Option<DispatchCommand> {
        if any_danger {
            self.manual_trigger()
        } else {
            None
        }
    }

    /// Apply a status report originating from the robot.
    ///
    /// Never yields a command.  Returns `true` if the state changed.
    pub fn reconcile_external_status(&mut self, status: RobotStatus) -> bool {
        let next = match status {
            RobotStatus::EnRouteToUser => DispatchState::Dispatched,
            RobotStatus::Idle => DispatchState::Idle,
        };
        self.transition_to(next)
    }

    /// Force [`DispatchState::Idle`] at the start of a session, before any
    /// robot status has been observed.  Returns `true` if the state changed.
    pub fn reset_for_new_session(&mut self) -> bool {
        self.transition_to(DispatchState::Idle)
    }

    fn transition_to(&mut self, next: DispatchState) -> bool {
        if self.state == next {
            return false;
        }
        info!(from = ?self.state, to = ?next, "dispatch state reconciled");
        self.state = next;
        true
    }
}
