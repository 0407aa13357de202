//! The data-source abstraction.
//!
//! A [`DataSource`] produces [`FeedEvent`]s for one monitoring session and
//! accepts outgoing [`DispatchCommand`]s.  Events are delivered through the
//! single-consumer queue returned by [`DataSource::start`], so the session
//! task is the only place where snapshot and dispatch state are mutated.
//!
//! | Variant | Sensor updates | Robot status | Commands |
//! |---|---|---|---|
//! | [`LiveFeed`][crate::live_feed::LiveFeed] | from the data channel | from the data channel | written to the channel |
//! | [`SimulatedFeed`][crate::sim_feed::SimulatedFeed] | random walk on a timer | never | logged and dropped |

use async_trait::async_trait;
use carewatch_types::{CareError, DispatchCommand, RobotStatus, SensorUpdate, SourceKind};
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Capacity of the queue between a source's producer task and the session.
pub const FEED_QUEUE_CAPACITY: usize = 64;

/// Something a data source observed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Partial sensor readings.
    Sensor(SensorUpdate),
    /// The robot reported its own movement status.
    RobotStatus(RobotStatus),
    /// The store stopped accepting the session's credential.  Nothing
    /// follows this event.
    AccessRevoked(String),
}

/// A dispatch write that has been prepared but not yet performed.
pub type CommandWrite = BoxFuture<'static, Result<(), CareError>>;

/// A producer of sensor updates and robot status for one session.
///
/// # Contract
///
/// * `start` – may be called once.  Returns the receiving end of the event
///   queue; a second call yields [`CareError::Feed`].
/// * `stop` – stops producing.  Idempotent; the queue closes once the
///   producer has exited.  No event is produced after `stop` returns.
/// * `send_dispatch_command` – prepares the write and returns it without
///   touching the transport.  The returned future borrows nothing from the
///   source, so the caller can run it on its own task and never wait on
///   the network.  Its result only reports whether the transport accepted
///   the command.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> SourceKind;

    /// Begin producing events.
    async fn start(&mut self) -> Result<mpsc::Receiver<FeedEvent>, CareError>;

    /// Stop producing events.
    fn stop(&mut self);

    /// Ask the robot to act.
    fn send_dispatch_command(&self, command: DispatchCommand) -> CommandWrite;
}

/// Lifecycle of a source's background producer task.
///
/// Shared by every [`DataSource`] so start-once and abort-on-stop behave the
/// same everywhere.  Dropping the task handle aborts the producer.
#[derive(Debug, Default)]
pub struct FeedTask {
    handle: Option<JoinHandle<()>>,
    started: bool,
}

impl FeedTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the event queue and spawn `producer` with its sending half.
    pub fn spawn<F, Fut>(&mut self, producer: F) -> Result<mpsc::Receiver<FeedEvent>, CareError>
    where
        F: FnOnce(mpsc::Sender<FeedEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.started {
            return Err(CareError::Feed("data source already started".to_string()));
        }
        self.started = true;
        let (tx, rx) = mpsc::channel(FEED_QUEUE_CAPACITY);
        self.handle = Some(tokio::spawn(producer(tx)));
        Ok(rx)
    }

    /// Abort the producer.  Safe to call repeatedly.
    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// `true` once [`spawn`][Self::spawn] has succeeded.
    pub fn has_started(&self) -> bool {
        self.started
    }

    /// `true` while a producer is running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for FeedTask {
    fn drop(&mut self) {
        self.abort();
    }
}
