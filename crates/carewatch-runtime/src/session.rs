//! [`DashboardSession`] – the engine for one signed-in monitoring session.
//!
//! A session owns exactly one [`SensorSnapshot`], one [`DispatchController`]
//! and one [`DataSource`].  Once launched, a single tokio task drains two
//! queues and is the only code that ever mutates that state:
//!
//! ```text
//!   DataSource ──FeedEvent──┐
//!                           ├──► session task ──► EventBus (Vitals, Dispatch)
//!   SessionHandle ─Command──┘          │
//!                                      └──► DataSource::send_dispatch_command
//! ```
//!
//! Per event:
//!
//! * `Sensor` → `apply_update` → `evaluate` → publish vitals →
//!   `auto_trigger_on_danger` → (maybe) send `CALL`
//! * `RobotStatus` → `reconcile_external_status`
//! * `AccessRevoked` → report, stop the source and end the session
//! * `CallRobot` → `manual_trigger` → (maybe) send `CALL`
//!
//! Sending `CALL` never suspends the session task: the write runs on its own
//! task and the session keeps draining both queues meanwhile.  A failed
//! write is logged and reported as a feed fault; it is never retried.  The
//! robot confirms a dispatch only through its own status.  Stopping the
//! session aborts writes still in flight.

use carewatch_kernel::{DispatchController, SensorSnapshot};
use carewatch_middleware::{DataSource, EventBus, FeedEvent, Topic};
use carewatch_types::{
    CareError, DispatchCause, DispatchCommand, DispatchState, Event, EventPayload, SourceKind,
};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

const EVENT_SOURCE: &str = "carewatch-runtime::session";
const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Requests accepted by a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// The operator pressed the call button.
    CallRobot,
    /// Stop the data source and end the session task.
    Shutdown,
}

/// Cloneable handle for sending [`SessionCommand`]s to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Manual dispatch.  A no-op when the robot is already dispatched.
    pub async fn call_robot(&self) -> Result<(), CareError> {
        self.send(SessionCommand::CallRobot).await
    }

    /// Ask the session to stop.
    pub async fn shutdown(&self) -> Result<(), CareError> {
        self.send(SessionCommand::Shutdown).await
    }

    /// `true` once the session task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: SessionCommand) -> Result<(), CareError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| CareError::SessionClosed)
    }
}

/// Per-session engine state.
pub struct DashboardSession {
    snapshot: SensorSnapshot,
    dispatch: DispatchController,
    source: Box<dyn DataSource>,
    bus: EventBus,
    writes: JoinSet<()>,
    revoked: bool,
}

impl DashboardSession {
    pub fn new(source: Box<dyn DataSource>, bus: EventBus) -> Self {
        Self {
            snapshot: SensorSnapshot::new(),
            dispatch: DispatchController::new(),
            source,
            bus,
            writes: JoinSet::new(),
            revoked: false,
        }
    }

    pub fn snapshot(&self) -> &SensorSnapshot {
        &self.snapshot
    }

    pub fn dispatch_state(&self) -> DispatchState {
        self.dispatch.state()
    }

    pub fn mode(&self) -> SourceKind {
        self.source.kind()
    }

    /// Reset dispatch state, publish the initial readings and start the
    /// data source.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<FeedEvent>, CareError> {
        if self.dispatch.reset_for_new_session() {
            self.publish_dispatch(DispatchCause::SessionReset);
        }
        self.publish(Topic::Vitals, EventPayload::Vitals(self.snapshot.evaluate()));
        let feed = self.source.start().await?;
        info!(mode = %self.source.kind(), "dashboard session started");
        Ok(feed)
    }

    /// `true` once the data source rejected the session's credential.
    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Stop the data source and abort pending command writes.  Idempotent.
    pub fn stop(&mut self) {
        self.source.stop();
        self.writes.abort_all();
    }

    /// Process one event from the data source to completion.
    pub fn handle_feed_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Sensor(update) => {
                self.snapshot.apply_update(&update);
                let report = self.snapshot.evaluate();
                let any_danger = report.any_danger;
                debug!(metrics = update.len(), any_danger, "sensor update applied");
                self.publish(Topic::Vitals, EventPayload::Vitals(report));

                if let Some(command) = self.dispatch.auto_trigger_on_danger(any_danger) {
                    self.publish_dispatch(DispatchCause::Danger);
                    self.send_command(command);
                }
            }
            FeedEvent::RobotStatus(status) => {
                if self.dispatch.reconcile_external_status(status) {
                    self.publish_dispatch(DispatchCause::RobotReport);
                }
            }
            FeedEvent::AccessRevoked(reason) => {
                warn!(%reason, "data source rejected the session credential");
                self.publish(
                    Topic::Dispatch,
                    EventPayload::FeedFault(format!("{reason}; sign in again")),
                );
                self.revoked = true;
                self.stop();
            }
        }
    }

    /// Manual dispatch from the operator.
    pub fn call_robot(&mut self) {
        if let Some(command) = self.dispatch.manual_trigger() {
            self.publish_dispatch(DispatchCause::Manual);
            self.send_command(command);
        }
    }

    /// Drain `feed` and `commands` until shutdown or a revoked credential,
    /// then stop the source.  A session ended by revocation publishes
    /// `SessionEnded` itself.
    ///
    /// Returns the session so callers can inspect its final state.
    pub async fn run(
        mut self,
        mut feed: mpsc::Receiver<FeedEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        let mut feed_open = true;
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(SessionCommand::CallRobot) => self.call_robot(),
                    Some(SessionCommand::Shutdown) | None => break,
                },
                event = feed.recv(), if feed_open => match event {
                    Some(event) => {
                        self.handle_feed_event(event);
                        if self.revoked {
                            break;
                        }
                    }
                    None => {
                        warn!("data source closed; session stays open for manual calls");
                        self.publish(
                            Topic::Dispatch,
                            EventPayload::FeedFault("data source disconnected".to_string()),
                        );
                        feed_open = false;
                    }
                },
            }
        }
        self.stop();
        feed.close();
        if self.revoked {
            self.publish(Topic::Session, EventPayload::SessionEnded);
        }
        info!("dashboard session stopped");
        self
    }

    /// Start the session and move it onto its own task.
    pub async fn launch(mut self) -> Result<RunningSession, CareError> {
        let feed = self.start().await?;
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let task = tokio::spawn(self.run(feed, rx));
        Ok(RunningSession {
            handle: SessionHandle { tx },
            task,
        })
    }

    fn send_command(&mut self, command: DispatchCommand) {
        while self.writes.try_join_next().is_some() {}
        let write = self.source.send_dispatch_command(command);
        let bus = self.bus.clone();
        self.writes.spawn(async move {
            if let Err(e) = write.await {
                warn!(error = %e, "dispatch command not delivered");
                bus.publish_to(
                    Topic::Dispatch,
                    Event::new(EVENT_SOURCE, EventPayload::FeedFault(e.to_string())),
                );
            }
        });
    }

    fn publish_dispatch(&self, cause: DispatchCause) {
        self.publish(
            Topic::Dispatch,
            EventPayload::DispatchChanged {
                state: self.dispatch.state(),
                cause,
            },
        );
    }

    fn publish(&self, topic: Topic, payload: EventPayload) {
        self.bus.publish_to(topic, Event::new(EVENT_SOURCE, payload));
    }
}

/// A launched session: its command handle plus the task running it.
pub struct RunningSession {
    handle: SessionHandle,
    task: JoinHandle<DashboardSession>,
}

impl RunningSession {
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// `true` once the session task has exited on its own or been stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished() || self.handle.is_closed()
    }

    /// Stop the session and wait for its task to finish.
    pub async fn shutdown(self) -> Result<DashboardSession, CareError> {
        // The task may already be gone; joining below reports why.
        let _ = self.handle.shutdown().await;
        self.task
            .await
            .map_err(|e| CareError::Feed(format!("session task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use carewatch_middleware::CommandWrite;
    use carewatch_types::{Metric, MetricStatus, RobotStatus, SensorUpdate};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Delivery {
        Accept,
        Fail,
        Hang,
    }

    /// Source whose feed is driven by the test and which records commands.
    struct ScriptedSource {
        feed: Option<mpsc::Receiver<FeedEvent>>,
        commands: Arc<Mutex<Vec<DispatchCommand>>>,
        delivery: Delivery,
        stopped: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl DataSource for ScriptedSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Live
        }

        async fn start(&mut self) -> Result<mpsc::Receiver<FeedEvent>, CareError> {
            self.feed
                .take()
                .ok_or_else(|| CareError::Feed("already started".to_string()))
        }

        fn stop(&mut self) {
            *self.stopped.lock().unwrap() = true;
        }

        fn send_dispatch_command(&self, command: DispatchCommand) -> CommandWrite {
            self.commands.lock().unwrap().push(command);
            match self.delivery {
                Delivery::Accept => Box::pin(std::future::ready(Ok(()))),
                Delivery::Fail => {
                    Box::pin(std::future::ready(Err(CareError::Channel("offline".to_string()))))
                }
                Delivery::Hang => Box::pin(std::future::pending()),
            }
        }
    }

    struct Fixture {
        feed_tx: mpsc::Sender<FeedEvent>,
        commands: Arc<Mutex<Vec<DispatchCommand>>>,
        stopped: Arc<Mutex<bool>>,
        session: DashboardSession,
        bus: EventBus,
    }

    fn fixture(delivery: Delivery) -> Fixture {
        let (feed_tx, feed_rx) = mpsc::channel(16);
        let commands = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(Mutex::new(false));
        let bus = EventBus::default();
        let source = ScriptedSource {
            feed: Some(feed_rx),
            commands: commands.clone(),
            delivery,
            stopped: stopped.clone(),
        };
        Fixture {
            feed_tx,
            commands,
            stopped,
            session: DashboardSession::new(Box::new(source), bus.clone()),
            bus,
        }
    }

    fn hr(value: f64) -> FeedEvent {
        FeedEvent::Sensor(SensorUpdate::new().with(Metric::HeartRate, value))
    }

    async fn within<F: Future>(what: &str, fut: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(2), fut)
            .await
            .unwrap_or_else(|_| panic!("{what} did not finish"))
    }

    #[tokio::test]
    async fn danger_dispatches_once_per_episode() {
        let mut f = fixture(Delivery::Accept);
        let _feed = f.session.start().await.unwrap();

        f.session.handle_feed_event(hr(120.0));
        f.session.handle_feed_event(hr(125.0));
        assert_eq!(f.session.dispatch_state(), DispatchState::Dispatched);
        assert_eq!(*f.commands.lock().unwrap(), vec![DispatchCommand::Call]);
    }

    #[tokio::test]
    async fn robot_status_alone_moves_state_without_commands() {
        let mut f = fixture(Delivery::Accept);
        f.session
            .handle_feed_event(FeedEvent::RobotStatus(RobotStatus::EnRouteToUser));
        assert_eq!(f.session.dispatch_state(), DispatchState::Dispatched);
        f.session.call_robot();
        assert!(f.commands.lock().unwrap().is_empty());

        f.session.handle_feed_event(FeedEvent::RobotStatus(RobotStatus::Idle));
        assert_eq!(f.session.dispatch_state(), DispatchState::Idle);
    }

    #[tokio::test]
    async fn publishes_vitals_and_dispatch_events() {
        let mut f = fixture(Delivery::Accept);
        let mut vitals = f.bus.subscribe_to(Topic::Vitals);
        let mut dispatch = f.bus.subscribe_to(Topic::Dispatch);

        let _feed = f.session.start().await.unwrap();
        let initial = vitals.recv().await.unwrap();
        assert!(matches!(initial.payload, EventPayload::Vitals(ref r) if !r.any_danger));

        f.session.handle_feed_event(hr(130.0));
        let Some(Event { payload: EventPayload::Vitals(report), .. }) = vitals.recv().await else {
            panic!("expected vitals");
        };
        assert_eq!(report.status(Metric::HeartRate), Some(MetricStatus::Danger));

        let event = dispatch.recv().await.unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::DispatchChanged {
                state: DispatchState::Dispatched,
                cause: DispatchCause::Danger
            }
        ));
        assert_eq!(event.source, EVENT_SOURCE);
    }

    #[tokio::test]
    async fn failed_command_is_reported_not_retried() {
        let mut f = fixture(Delivery::Fail);
        let mut dispatch = f.bus.subscribe_to(Topic::Dispatch);

        f.session.call_robot();
        assert_eq!(f.session.dispatch_state(), DispatchState::Dispatched);

        let changed = dispatch.recv().await.unwrap();
        assert!(matches!(changed.payload, EventPayload::DispatchChanged { .. }));
        let fault = dispatch.recv().await.unwrap();
        assert!(matches!(fault.payload, EventPayload::FeedFault(ref m) if m.contains("offline")));

        f.session.call_robot();
        assert_eq!(f.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn launched_session_processes_commands_and_shuts_down() {
        let f = fixture(Delivery::Accept);
        let running = f.session.launch().await.unwrap();
        let handle = running.handle();

        f.feed_tx.send(hr(80.0)).await.unwrap();
        handle.call_robot().await.unwrap();
        handle.call_robot().await.unwrap();

        let session = running.shutdown().await.unwrap();
        assert_eq!(session.dispatch_state(), DispatchState::Dispatched);
        assert_eq!(*f.commands.lock().unwrap(), vec![DispatchCommand::Call]);
        assert!(*f.stopped.lock().unwrap());
        assert!(handle.is_closed());
        assert!(matches!(handle.call_robot().await, Err(CareError::SessionClosed)));
    }

    #[tokio::test]
    async fn stalled_command_write_does_not_stall_the_session() {
        let f = fixture(Delivery::Hang);
        let mut vitals = f.bus.subscribe_to(Topic::Vitals);
        let running = f.session.launch().await.unwrap();
        within("initial vitals", vitals.recv()).await.unwrap();

        f.feed_tx.send(hr(120.0)).await.unwrap();
        within("danger vitals", vitals.recv()).await.unwrap();

        f.feed_tx
            .send(FeedEvent::Sensor(SensorUpdate::new().with(Metric::WaterLevel, 5.0)))
            .await
            .unwrap();
        let Event { payload: EventPayload::Vitals(report), .. } =
            within("vitals after the stalled write", vitals.recv()).await.unwrap()
        else {
            panic!("expected vitals");
        };
        assert_eq!(report.status(Metric::WaterLevel), Some(MetricStatus::Danger));

        let session = within("shutdown", running.shutdown()).await.unwrap();
        assert_eq!(session.dispatch_state(), DispatchState::Dispatched);
        assert_eq!(*f.commands.lock().unwrap(), vec![DispatchCommand::Call]);
    }

    #[tokio::test]
    async fn revoked_credential_ends_the_session() {
        let f = fixture(Delivery::Accept);
        let mut dispatch = f.bus.subscribe_to(Topic::Dispatch);
        let mut session_events = f.bus.subscribe_to(Topic::Session);
        let running = f.session.launch().await.unwrap();
        let handle = running.handle();

        f.feed_tx
            .send(FeedEvent::AccessRevoked("credential no longer valid".to_string()))
            .await
            .unwrap();
        let fault = within("fault", dispatch.recv()).await.unwrap();
        assert!(matches!(fault.payload, EventPayload::FeedFault(ref m) if m.contains("sign in again")));
        let ended = within("session end", session_events.recv()).await.unwrap();
        assert!(matches!(ended.payload, EventPayload::SessionEnded));

        let session = within("join", running.shutdown()).await.unwrap();
        assert!(session.is_revoked());
        assert!(*f.stopped.lock().unwrap());
        assert!(matches!(handle.call_robot().await, Err(CareError::SessionClosed)));
    }
}
