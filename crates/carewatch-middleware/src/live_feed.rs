//! [`LiveFeed`] – a [`DataSource`] bound to the realtime data channel.
//!
//! Watches `sensors` and `car/status`; dispatch commands are written to
//! `car/command`.
//!
//! The producer needs both watches.  If either one ends, the feed ends, so
//! the session learns about it instead of silently losing half its input.

use std::sync::Arc;

use async_trait::async_trait;
use carewatch_types::{
    CareError, DispatchCommand, Metric, RobotStatus, SensorUpdate, SourceKind,
};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{DataChannel, ROBOT_COMMAND_PATH, ROBOT_STATUS_PATH, SENSORS_PATH};
use crate::source::{CommandWrite, DataSource, FeedEvent, FeedTask};

/// Decode the value stored at `sensors`.
///
/// Only known metric keys holding finite numbers are kept; everything else
/// is ignored.  Returns `None` when nothing usable remains.
pub fn decode_sensor_update(value: &Value) -> Option<SensorUpdate> {
    let Value::Object(fields) = value else {
        debug!(?value, "sensor value is not an object");
        return None;
    };
    let update: SensorUpdate = fields
        .iter()
        .filter_map(|(key, raw)| {
            let metric = Metric::from_wire_name(key)?;
            let reading = raw.as_f64().filter(|v| v.is_finite())?;
            Some((metric, reading))
        })
        .collect();
    (!update.is_empty()).then_some(update)
}

/// Decode the value stored at `car/status`.  Unknown tokens yield `None`.
pub fn decode_robot_status(value: &Value) -> Option<RobotStatus> {
    let status = value.as_str().and_then(RobotStatus::from_wire_name);
    if status.is_none() {
        warn!(?value, "ignoring unrecognised robot status");
    }
    status
}

/// Live data source.
pub struct LiveFeed {
    channel: Arc<dyn DataChannel>,
    task: FeedTask,
}

impl LiveFeed {
    pub fn new(channel: Arc<dyn DataChannel>) -> Self {
        Self {
            channel,
            task: FeedTask::new(),
        }
    }
}

#[async_trait]
impl DataSource for LiveFeed {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<FeedEvent>, CareError> {
        if self.task.has_started() {
            return Err(CareError::Feed("data source already started".to_string()));
        }
        let mut sensors = self.channel.watch(SENSORS_PATH).await?;
        let mut status = self.channel.watch(ROBOT_STATUS_PATH).await?;

        info!("live feed subscribed");
        self.task.spawn(|tx| async move {
            loop {
                let (path, item) = tokio::select! {
                    item = sensors.next() => (SENSORS_PATH, item),
                    item = status.next() => (ROBOT_STATUS_PATH, item),
                };
                let event = match item {
                    Some(Ok(value)) if path == SENSORS_PATH => {
                        decode_sensor_update(&value).map(FeedEvent::Sensor)
                    }
                    Some(Ok(value)) => decode_robot_status(&value).map(FeedEvent::RobotStatus),
                    Some(Err(CareError::Auth(reason))) => {
                        warn!(path, %reason, "channel rejected the session credential");
                        let _ = tx.send(FeedEvent::AccessRevoked(reason)).await;
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(path, error = %e, "watch failed");
                        break;
                    }
                    None => {
                        warn!(path, "watch ended");
                        break;
                    }
                };
                if let Some(event) = event
                    && tx.send(event).await.is_err()
                {
                    break;
                }
            }
            debug!("live feed producer exited");
        })
    }

    fn stop(&mut self) {
        self.task.abort();
    }

    fn send_dispatch_command(&self, command: DispatchCommand) -> CommandWrite {
        let channel = self.channel.clone();
        Box::pin(async move {
            info!(command = command.wire_name(), "writing dispatch command");
            channel
                .set(ROBOT_COMMAND_PATH, Value::String(command.wire_name().to_string()))
                .await
        })
    }
}
