use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One tracked vital-sign or environment quantity.
///
/// The serde names are the keys used on the realtime data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "heartRate")]
    HeartRate,
    #[serde(rename = "temperature")]
    Temperature,
    #[serde(rename = "spO2")]
    BloodOxygen,
    #[serde(rename = "waterLevel")]
    WaterLevel,
}

impl Metric {
    /// Every metric, in display order.
    pub const ALL: [Metric; 4] = [
        Metric::HeartRate,
        Metric::Temperature,
        Metric::BloodOxygen,
        Metric::WaterLevel,
    ];

    /// The fixed acceptable band for this metric.
    pub const fn band(self) -> Band {
        match self {
            Metric::HeartRate => Band::new(60.0, 100.0),
            Metric::Temperature => Band::new(36.0, 37.8),
            Metric::BloodOxygen => Band::new(95.0, 100.0),
            Metric::WaterLevel => Band::new(10.0, 100.0),
        }
    }

    /// Key used for this metric on the data channel (`sensors/<key>`).
    pub const fn wire_name(self) -> &'static str {
        match self {
            Metric::HeartRate => "heartRate",
            Metric::Temperature => "temperature",
            Metric::BloodOxygen => "spO2",
            Metric::WaterLevel => "waterLevel",
        }
    }

    /// Inverse of [`wire_name`][Self::wire_name]. Unknown keys yield `None`.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.wire_name() == name)
    }

    /// Human-readable card title.
    pub const fn label(self) -> &'static str {
        match self {
            Metric::HeartRate => "Heart Rate",
            Metric::Temperature => "Body Temp",
            Metric::BloodOxygen => "Blood Oxygen",
            Metric::WaterLevel => "Water Level",
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            Metric::HeartRate => "BPM",
            Metric::Temperature => "°C",
            Metric::BloodOxygen | Metric::WaterLevel => "%",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reading a fresh session starts from before the first update arrives.
pub const INITIAL_READINGS: [(Metric, f64); 4] = [
    (Metric::HeartRate, 75.0),
    (Metric::Temperature, 36.6),
    (Metric::BloodOxygen, 98.0),
    (Metric::WaterLevel, 50.0),
];

/// Inclusive `[min, max]` acceptable range for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Classification of a single reading against its band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Normal,
    Danger,
}

/// A partial set of metric values delivered by a data source.
///
/// Metrics absent from the update are left unchanged by the consumer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorUpdate {
    values: BTreeMap<Metric, f64>,
}

impl SensorUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.insert(metric, value);
        self
    }

    /// Set `metric` to `value`, replacing any earlier value in this update.
    pub fn insert(&mut self, metric: Metric, value: f64) {
        self.values.insert(metric, value);
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Iterate `(metric, value)` pairs in metric order.
    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        self.values.iter().map(|(m, v)| (*m, *v))
    }
}

impl FromIterator<(Metric, f64)> for SensorUpdate {
    fn from_iter<I: IntoIterator<Item = (Metric, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// One evaluated metric: its current value and derived status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub metric: Metric,
    pub value: f64,
    pub status: MetricStatus,
}

/// Result of evaluating every metric of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsReport {
    /// One entry per metric in [`Metric::ALL`] order.
    pub readings: Vec<MetricReading>,
    /// `true` when at least one reading is [`MetricStatus::Danger`].
    pub any_danger: bool,
}

impl VitalsReport {
    pub fn status(&self, metric: Metric) -> Option<MetricStatus> {
        self.reading(metric).map(|r| r.status)
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        self.reading(metric).map(|r| r.value)
    }

    pub fn reading(&self, metric: Metric) -> Option<&MetricReading> {
        self.readings.iter().find(|r| r.metric == metric)
    }
}

/// Movement status reported by the robot itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RobotStatus {
    #[serde(rename = "MOVING_TO_USER")]
    EnRouteToUser,
    #[serde(rename = "IDLE")]
    Idle,
}

impl RobotStatus {
    pub const fn wire_name(self) -> &'static str {
        match self {
            RobotStatus::EnRouteToUser => "MOVING_TO_USER",
            RobotStatus::Idle => "IDLE",
        }
    }

    /// Parse a `car/status` value. Anything other than the two known tokens
    /// is `None`.
    pub fn from_wire_name(raw: &str) -> Option<Self> {
        match raw {
            "MOVING_TO_USER" => Some(RobotStatus::EnRouteToUser),
            "IDLE" => Some(RobotStatus::Idle),
            _ => None,
        }
    }
}

/// Dispatch state of the assistive robot as tracked by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DispatchState {
    /// The robot is not moving toward the monitored person.
    #[default]
    Idle,
    /// The robot has been called or is confirmed en route.
    Dispatched,
}

/// Outgoing command written to the robot's command location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispatchCommand {
    #[serde(rename = "CALL")]
    Call,
}

impl DispatchCommand {
    pub const fn wire_name(self) -> &'static str {
        match self {
            DispatchCommand::Call => "CALL",
        }
    }
}

/// Why the dispatch state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchCause {
    /// The operator pressed the call button.
    Manual,
    /// A reading left its band.
    Danger,
    /// The robot reported its own status.
    RobotReport,
    /// A new session started.
    SessionReset,
}

/// Which data-source variant a session runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Live,
    Simulated,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Live => f.write_str("live"),
            SourceKind::Simulated => f.write_str("simulated"),
        }
    }
}

/// Signed-in user, as returned by the authentication collaborator.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    /// Bearer token presented to the realtime data channel. Empty in
    /// simulated mode.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id_token: String,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field(
                "id_token",
                if self.id_token.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

/// Connection settings for the realtime backend.
#[derive(Clone, PartialEq, Eq)]
pub struct LiveBackend {
    pub api_key: String,
    /// e.g. `https://my-project.firebaseio.com`
    pub database_url: String,
    /// Base URL of the identity REST API.
    pub auth_url: String,
}

impl fmt::Debug for LiveBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveBackend")
            .field("api_key", &"<redacted>")
            .field("database_url", &self.database_url)
            .field("auth_url", &self.auth_url)
            .finish()
    }
}

/// Settings for the local synthetic generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedBackend {
    /// Interval between generated readings.
    pub period: Duration,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(2),
        }
    }
}

/// Data-source selection, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Live(LiveBackend),
    Simulated(SimulatedBackend),
}

impl Backend {
    pub fn kind(&self) -> SourceKind {
        match self {
            Backend::Live(_) => SourceKind::Live,
            Backend::Simulated(_) => SourceKind::Simulated,
        }
    }
}

/// Unified event wrapper for the dashboard event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "carewatch-runtime::session"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed from the engine to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Freshly evaluated readings.
    Vitals(VitalsReport),
    /// The dispatch state machine moved.
    DispatchChanged {
        state: DispatchState,
        cause: DispatchCause,
    },
    SessionStarted {
        email: String,
        mode: SourceKind,
    },
    SessionEnded,
    /// Sign-in or sign-up was rejected; carries the user-visible message.
    AuthFailed(String),
    /// A non-fatal problem with the data source (e.g. a failed write).
    FeedFault(String),
}

/// Global error type spanning authentication, transport and feed failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CareError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Data channel error: {0}")]
    Channel(String),

    #[error("Data source error: {0}")]
    Feed(String),

    #[error("Parsing error: {0}")]
    Parsing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session is closed")]
    SessionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_wire_names_match_channel_keys() {
        assert_eq!(Metric::HeartRate.wire_name(), "heartRate");
        assert_eq!(Metric::BloodOxygen.wire_name(), "spO2");
        assert_eq!(Metric::from_wire_name("waterLevel"), Some(Metric::WaterLevel));
        assert_eq!(Metric::from_wire_name("bloodPressure"), None);
    }

    #[test]
    fn metric_bands_are_fixed() {
        assert_eq!(Metric::HeartRate.band(), Band::new(60.0, 100.0));
        assert_eq!(Metric::Temperature.band(), Band::new(36.0, 37.8));
        assert_eq!(Metric::BloodOxygen.band(), Band::new(95.0, 100.0));
        assert_eq!(Metric::WaterLevel.band(), Band::new(10.0, 100.0));
    }

    #[test]
    fn sensor_update_serializes_with_wire_keys() {
        let update = SensorUpdate::new()
            .with(Metric::HeartRate, 120.0)
            .with(Metric::BloodOxygen, 97.0);
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({ "heartRate": 120.0, "spO2": 97.0 }));

        let back: SensorUpdate = serde_json::from_value(json).unwrap();
        assert_eq!(back, update);
    }

    #[test]
    fn robot_status_rejects_unknown_tokens() {
        assert_eq!(RobotStatus::from_wire_name("MOVING_TO_USER"), Some(RobotStatus::EnRouteToUser));
        assert_eq!(RobotStatus::from_wire_name("IDLE"), Some(RobotStatus::Idle));
        assert_eq!(RobotStatus::from_wire_name("CHARGING"), None);
        assert_eq!(RobotStatus::from_wire_name("idle"), None);
    }

    #[test]
    fn dispatch_command_serializes_as_call() {
        let json = serde_json::to_string(&DispatchCommand::Call).unwrap();
        assert_eq!(json, "\"CALL\"");
        assert_eq!(DispatchCommand::Call.wire_name(), "CALL");
    }

    #[test]
    fn identity_debug_redacts_token() {
        let identity = Identity {
            user_id: "u-1".to_string(),
            email: "demo@example.com".to_string(),
            id_token: "eyJhbGciOi-secret".to_string(),
        };
        let debug = format!("{identity:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn live_backend_debug_redacts_api_key() {
        let backend = LiveBackend {
            api_key: "AIza-secret".to_string(),
            database_url: "https://demo.firebaseio.com".to_string(),
            auth_url: "https://identitytoolkit.googleapis.com/v1".to_string(),
        };
        assert!(!format!("{backend:?}").contains("AIza-secret"));
        assert_eq!(Backend::Live(backend).kind(), SourceKind::Live);
    }

    #[test]
    fn vitals_report_lookup() {
        let report = VitalsReport {
            readings: vec![MetricReading {
                metric: Metric::WaterLevel,
                value: 5.0,
                status: MetricStatus::Danger,
            }],
            any_danger: true,
        };
        assert_eq!(report.status(Metric::WaterLevel), Some(MetricStatus::Danger));
        assert_eq!(report.value(Metric::HeartRate), None);
    }

    #[test]
    fn care_error_display() {
        let err = CareError::Auth("INVALID_PASSWORD".to_string());
        assert!(err.to_string().contains("INVALID_PASSWORD"));
        assert_eq!(CareError::SessionClosed.to_string(), "Session is closed");
    }
}
