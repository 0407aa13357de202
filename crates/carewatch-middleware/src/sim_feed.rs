//! [`SimulatedFeed`] – a local synthetic [`DataSource`].
//!
//! Emits the initial reading once, then every `period` random-walks heart
//! rate and body temperature:
//!
//! | Metric | Step | Clamp |
//! |---|---|---|
//! | heart rate | integer in `[-2, 2]` | `[30, 200]` |
//! | temperature | real in `[-0.2, 0.2]` | `[34.0, 42.0]` |
//!
//! After the step, with probability 5% and only while heart rate is below
//! its band maximum, heart rate spikes to 120.  Blood oxygen and water level
//! are never touched.  The simulated robot never reports status, and calls
//! are logged and dropped.

use async_trait::async_trait;
use carewatch_types::{
    CareError, DispatchCommand, INITIAL_READINGS, Metric, SensorUpdate, SimulatedBackend,
    SourceKind,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::source::{CommandWrite, DataSource, FeedEvent, FeedTask};

const HEART_RATE_STEP: i32 = 2;
const TEMPERATURE_STEP: f64 = 0.2;
const HEART_RATE_LIMITS: (f64, f64) = (30.0, 200.0);
const TEMPERATURE_LIMITS: (f64, f64) = (34.0, 42.0);
const SPIKE_PROBABILITY: f64 = 0.05;
const SPIKE_HEART_RATE: f64 = 120.0;

/// Random-walk state of the simulated vitals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VitalsWalk {
    pub heart_rate: f64,
    pub temperature: f64,
}

impl Default for VitalsWalk {
    fn default() -> Self {
        let initial = |metric: Metric| {
            INITIAL_READINGS
                .iter()
                .find(|(m, _)| *m == metric)
                .map(|(_, v)| *v)
                .unwrap_or_default()
        };
        Self {
            heart_rate: initial(Metric::HeartRate),
            temperature: initial(Metric::Temperature),
        }
    }
}

impl VitalsWalk {
    /// Advance one tick and return the partial update it produced.
    pub fn step<R: Rng>(&mut self, rng: &mut R) -> SensorUpdate {
        let hr_delta = rng.random_range(-HEART_RATE_STEP..=HEART_RATE_STEP);
        let temp_delta = rng.random_range(-TEMPERATURE_STEP..=TEMPERATURE_STEP);

        self.heart_rate =
            (self.heart_rate + f64::from(hr_delta)).clamp(HEART_RATE_LIMITS.0, HEART_RATE_LIMITS.1);
        self.temperature =
            (self.temperature + temp_delta).clamp(TEMPERATURE_LIMITS.0, TEMPERATURE_LIMITS.1);

        if self.heart_rate < Metric::HeartRate.band().max && rng.random_bool(SPIKE_PROBABILITY) {
            debug!("simulated heart-rate spike");
            self.heart_rate = SPIKE_HEART_RATE;
        }

        SensorUpdate::new()
            .with(Metric::HeartRate, self.heart_rate)
            .with(Metric::Temperature, self.temperature)
    }
}

/// Synthetic data source driven by a timer.
pub struct SimulatedFeed {
    settings: SimulatedBackend,
    seed: Option<u64>,
    task: FeedTask,
}

impl SimulatedFeed {
    pub fn new(settings: SimulatedBackend) -> Self {
        Self {
            settings,
            seed: None,
            task: FeedTask::new(),
        }
    }

    /// Use a fixed RNG seed so runs are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[async_trait]
impl DataSource for SimulatedFeed {
    fn kind(&self) -> SourceKind {
        SourceKind::Simulated
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<FeedEvent>, CareError> {
        if self.settings.period.is_zero() {
            return Err(CareError::Config("simulation period must be non-zero".to_string()));
        }
        let period = self.settings.period;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        info!(period_ms = period.as_millis() as u64, "simulated feed starting");

        self.task.spawn(move |tx| async move {
            let initial: SensorUpdate = INITIAL_READINGS.into_iter().collect();
            if tx.send(FeedEvent::Sensor(initial)).await.is_err() {
                return;
            }
            let mut walk = VitalsWalk::default();
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; the initial reading covers it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let update = walk.step(&mut rng);
                if tx.send(FeedEvent::Sensor(update)).await.is_err() {
                    break;
                }
            }
            debug!("simulated feed producer exited");
        })
    }

    fn stop(&mut self) {
        self.task.abort();
    }

    fn send_dispatch_command(&self, command: DispatchCommand) -> CommandWrite {
        info!(command = command.wire_name(), "simulated robot acknowledged command");
        Box::pin(std::future::ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn walk_stays_within_step_or_spikes() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut walk = VitalsWalk::default();
        for _ in 0..1_000 {
            let before = walk;
            let update = walk.step(&mut rng);
            assert_eq!(update.len(), 2);
            assert!(update.get(Metric::BloodOxygen).is_none());
            assert!(update.get(Metric::WaterLevel).is_none());

            let hr = update.get(Metric::HeartRate).unwrap();
            assert!(hr == SPIKE_HEART_RATE || (hr - before.heart_rate).abs() <= 2.0);
            assert_eq!(hr.fract(), 0.0);
            let temp = update.get(Metric::Temperature).unwrap();
            assert!((temp - before.temperature).abs() <= TEMPERATURE_STEP + 1e-9);
            assert!((HEART_RATE_LIMITS.0..=HEART_RATE_LIMITS.1).contains(&hr));
            assert!((TEMPERATURE_LIMITS.0..=TEMPERATURE_LIMITS.1).contains(&temp));
        }
    }

    #[test]
    fn no_spike_while_heart_rate_is_at_or_above_band_max() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let mut walk = VitalsWalk {
                heart_rate: 150.0,
                temperature: 36.6,
            };
            let update = walk.step(&mut rng);
            let hr = update.get(Metric::HeartRate).unwrap();
            assert!((148.0..=152.0).contains(&hr));
        }
    }

    #[test]
    fn walk_is_clamped() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut walk = VitalsWalk {
            heart_rate: 200.0,
            temperature: 42.0,
        };
        for _ in 0..200 {
            walk.step(&mut rng);
            assert!(walk.heart_rate <= 200.0);
            assert!(walk.temperature <= 42.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_initial_reading_then_one_update_per_period() {
        let mut feed = SimulatedFeed::new(SimulatedBackend {
            period: Duration::from_secs(2),
        })
        .with_seed(42);
        let mut rx = feed.start().await.unwrap();

        let Some(FeedEvent::Sensor(initial)) = rx.recv().await else {
            panic!("expected initial sensor update");
        };
        assert_eq!(initial.len(), 4);
        assert_eq!(initial.get(Metric::WaterLevel), Some(50.0));
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let Ok(FeedEvent::Sensor(update)) = rx.try_recv() else {
            panic!("expected a tick after one period");
        };
        assert_eq!(update.len(), 2);

        feed.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_safe_before_start_and_repeatable() {
        let mut feed = SimulatedFeed::new(SimulatedBackend {
            period: Duration::from_secs(1),
        })
        .with_seed(5);
        feed.stop();
        feed.stop();

        let mut rx = feed.start().await.unwrap();
        assert!(matches!(rx.recv().await, Some(FeedEvent::Sensor(_))));

        feed.stop();
        feed.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn zero_period_is_rejected() {
        let mut feed = SimulatedFeed::new(SimulatedBackend {
            period: Duration::ZERO,
        });
        assert!(matches!(feed.start().await, Err(CareError::Config(_))));
    }

    #[tokio::test]
    async fn calls_are_accepted_and_dropped() {
        let feed = SimulatedFeed::new(SimulatedBackend::default());
        assert_eq!(feed.kind(), SourceKind::Simulated);
        assert!(feed.send_dispatch_command(DispatchCommand::Call).await.is_ok());
    }
}
