//! `carewatch-middleware` – Feeds & Routing
//!
//! Moves data between the outside world and the dashboard engine without
//! interpreting it beyond decoding.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.
//! - [`channel`] – [`DataChannel`]: watch/set contract for the realtime data
//!   store, plus the in-process [`MemoryChannel`].
//! - [`rtdb`] – [`RtdbChannel`]: REST streaming client for the hosted
//!   realtime database.
//! - [`source`] – [`DataSource`] trait and the [`FeedEvent`] queue every
//!   session consumes.
//! - [`live_feed`] – [`LiveFeed`]: data source bound to a [`DataChannel`].
//! - [`sim_feed`] – [`SimulatedFeed`]: timer-driven synthetic vitals.

pub mod bus;
pub mod channel;
pub mod live_feed;
pub mod rtdb;
pub mod sim_feed;
pub mod source;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use channel::{DataChannel, MemoryChannel};
pub use live_feed::LiveFeed;
pub use rtdb::RtdbChannel;
pub use sim_feed::SimulatedFeed;
pub use source::{CommandWrite, DataSource, FeedEvent};
