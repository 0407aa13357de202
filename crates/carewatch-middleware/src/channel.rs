//! The realtime data-channel contract.
//!
//! CareWatch never talks to a database directly.  A [`DataChannel`] exposes
//! two operations on slash-separated locations:
//!
//! * [`watch`][DataChannel::watch] – a stream that yields the current value
//!   at a location and then the full value again after every change;
//! * [`set`][DataChannel::set] – replace the value at a location.
//!
//! Two implementations exist:
//!
//! - [`MemoryChannel`] – an in-process JSON tree, used by tests and local
//!   demos.
//! - [`RtdbChannel`][crate::rtdb::RtdbChannel] – REST streaming client for a
//!   hosted realtime database.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use carewatch_types::CareError;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde_json::{Map, Value};
use tokio::sync::watch;

/// Location the sensor readings are published to.
pub const SENSORS_PATH: &str = "sensors";
/// Location the robot reports its movement status to.
pub const ROBOT_STATUS_PATH: &str = "car/status";
/// Location the dashboard writes dispatch commands to.
pub const ROBOT_COMMAND_PATH: &str = "car/command";

/// Stream of full values observed at a watched location.
///
/// An `Err` item is terminal: the channel can no longer deliver updates for
/// this location and the stream ends after it.
pub type ValueStream = BoxStream<'static, Result<Value, CareError>>;

/// Number of `set` calls [`MemoryChannel`] remembers.
pub const WRITE_LOG_CAPACITY: usize = 1_024;

/// Read/write access to the realtime data store.
///
/// # Contract
///
/// * `watch` – yields the current value (when it is not `null`) and then
///   every subsequent non-`null` value.  Transient transport trouble is the
///   channel's problem; the stream only ends, after an `Err` item, when the
///   channel can no longer deliver updates at all (e.g. the credential was
///   revoked).
/// * `set` – best effort; a returned `Ok` does not mean any reader has
///   observed the value.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Subscribe to the value stored at `path`.
    async fn watch(&self, path: &str) -> Result<ValueStream, CareError>;

    /// Replace the value stored at `path`.  Writing `null` deletes it.
    async fn set(&self, path: &str, value: Value) -> Result<(), CareError>;
}

/// Split a location into its non-empty segments.
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Clone the value found under `segments` in `root`, or `null`.
pub(crate) fn value_at(root: &Value, segments: &[&str]) -> Value {
    let mut node = root;
    for segment in segments {
        match node.get(*segment) {
            Some(child) => node = child,
            None => return Value::Null,
        }
    }
    node.clone()
}

/// Replace the value under `segments`, creating intermediate objects.
///
/// A `null` value removes the key, matching realtime-database semantics.
pub(crate) fn write_at(node: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry((*head).to_string()).or_insert(Value::Null);
        write_at(child, rest, value);
        if child.is_null() {
            map.remove(*head);
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryChannel
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Store {
    root: Value,
    watchers: HashMap<String, watch::Sender<Value>>,
    writes: VecDeque<(String, Value)>,
}

/// In-process [`DataChannel`] backed by a single JSON tree.
///
/// Writes to a child location (`sensors/heartRate`) are visible to watchers
/// of the parent (`sensors`) and vice versa.  The last
/// [`WRITE_LOG_CAPACITY`] `set` calls are also recorded so tests can assert
/// exactly which commands were written.
///
/// Rapid successive writes may be coalesced for a slow watcher; each watcher
/// always converges on the latest value.
#[derive(Clone, Default)]
pub struct MemoryChannel {
    store: Arc<Mutex<Store>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value at `path` (`null` when unset).
    pub fn get(&self, path: &str) -> Value {
        value_at(&self.lock().root, &segments(path))
    }

    /// Values written to `path` via [`DataChannel::set`], oldest first.
    ///
    /// Only the most recent [`WRITE_LOG_CAPACITY`] writes across all paths
    /// are kept.
    pub fn writes_to(&self, path: &str) -> Vec<Value> {
        let key = segments(path).join("/");
        self.lock()
            .writes
            .iter()
            .filter(|(p, _)| *p == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DataChannel for MemoryChannel {
    async fn watch(&self, path: &str) -> Result<ValueStream, CareError> {
        let key = segments(path).join("/");
        let rx = {
            let mut store = self.lock();
            let current = value_at(&store.root, &segments(&key));
            store
                .watchers
                .entry(key)
                .or_insert_with(|| watch::channel(current).0)
                .subscribe()
        };

        let values = stream::unfold((rx, true), |(mut rx, mut initial)| async move {
            loop {
                if !initial && rx.changed().await.is_err() {
                    return None;
                }
                initial = false;
                let value = rx.borrow_and_update().clone();
                if !value.is_null() {
                    return Some((Ok(value), (rx, false)));
                }
            }
        });
        Ok(values.boxed())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), CareError> {
        let segs = segments(path);
        let mut store = self.lock();
        write_at(&mut store.root, &segs, value.clone());
        if store.writes.len() == WRITE_LOG_CAPACITY {
            store.writes.pop_front();
        }
        store.writes.push_back((segs.join("/"), value));

        let Store { root, watchers, .. } = &mut *store;
        for (watched, tx) in watchers.iter() {
            let next = value_at(root, &segments(watched));
            tx.send_if_modified(|current| {
                if *current == next {
                    false
                } else {
                    *current = next;
                    true
                }
            });
        }
        Ok(())
    }
}
