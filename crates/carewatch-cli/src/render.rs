//! Terminal rendering of the dashboard.
//!
//! [`DashboardView`] folds bus events into what the operator currently sees;
//! the `render_*` methods turn it into coloured text.  Nothing here touches
//! the terminal directly, so it can be tested as plain strings.

use colored::Colorize;

use carewatch_types::{
    DispatchCause, DispatchState, Event, EventPayload, Metric, MetricReading, MetricStatus,
    SourceKind, VitalsReport,
};

pub const CALL_BUTTON: &str = "🚨 CALL ROBOT CAR 🚨";
pub const ON_THE_WAY: &str = "Robot Car is on the way...";

/// What a bus event asks the terminal to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redraw {
    /// Re-print the metric cards and the robot button.
    Dashboard,
    /// Re-print only the robot button.
    Button,
    /// Print a one-line message.
    Notice(String),
}

/// Operator-visible dashboard state.
#[derive(Debug, Default)]
pub struct DashboardView {
    session: Option<(String, SourceKind)>,
    report: Option<VitalsReport>,
    dispatch: DispatchState,
}

impl DashboardView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.is_some()
    }

    pub fn dispatch(&self) -> DispatchState {
        self.dispatch
    }

    /// Fold `event` into the view.
    pub fn apply(&mut self, event: &Event) -> Redraw {
        match &event.payload {
            // Dispatch state belongs to the session; only its own
            // `DispatchChanged` events move the button.
            EventPayload::SessionStarted { email, mode } => {
                self.session = Some((email.clone(), *mode));
                Redraw::Notice(format!("Signed in as {email} ({mode} mode)"))
            }
            EventPayload::SessionEnded => {
                *self = Self::default();
                Redraw::Notice("Signed out".to_string())
            }
            EventPayload::AuthFailed(message) => Redraw::Notice(format!("Login failed: {message}")),
            EventPayload::Vitals(report) => {
                self.report = Some(report.clone());
                Redraw::Dashboard
            }
            EventPayload::DispatchChanged { state, cause } => {
                self.dispatch = *state;
                match (state, cause) {
                    (DispatchState::Dispatched, DispatchCause::Danger) => {
                        Redraw::Notice("Vital sign out of range: robot car called".to_string())
                    }
                    _ => Redraw::Button,
                }
            }
            EventPayload::FeedFault(message) => Redraw::Notice(format!("Data source problem: {message}")),
        }
    }

    /// Header line with identity and mode.
    pub fn render_header(&self) -> String {
        match &self.session {
            Some((email, mode)) => format!(
                "{}  {}  {}",
                "Health & Assistive Robotics Dashboard".bold(),
                email.cyan(),
                format!("[{mode}]").dimmed()
            ),
            None => format!("{}", "Not signed in. Use /login or /signup.".dimmed()),
        }
    }

    /// One line per metric card followed by the robot button.
    pub fn render_dashboard(&self) -> String {
        let mut out = String::new();
        if let Some(report) = &self.report {
            for reading in &report.readings {
                out.push_str(&render_card(reading));
                out.push('\n');
            }
        }
        out.push_str(&self.render_button());
        out
    }

    pub fn render_button(&self) -> String {
        match self.dispatch {
            DispatchState::Idle => format!("  [ {} ]", CALL_BUTTON.red().bold()),
            DispatchState::Dispatched => format!("  [ {} ]", ON_THE_WAY.yellow()),
        }
    }
}

/// Display value: temperature with one decimal, everything else as received.
pub fn format_value(metric: Metric, value: f64) -> String {
    match metric {
        Metric::Temperature => format!("{value:.1}"),
        _ if value.fract() == 0.0 => format!("{value:.0}"),
        _ => format!("{value}"),
    }
}

pub fn status_text(status: MetricStatus) -> &'static str {
    match status {
        MetricStatus::Normal => "Normal",
        MetricStatus::Danger => "CRITICAL ALERT",
    }
}

fn render_card(reading: &MetricReading) -> String {
    let value = format!("{} {}", format_value(reading.metric, reading.value), reading.metric.unit());
    let status = match reading.status {
        MetricStatus::Normal => status_text(reading.status).green(),
        MetricStatus::Danger => status_text(reading.status).red().bold(),
    };
    format!("  {:<14} {:>10}   {}", reading.metric.label(), value, status)
}
