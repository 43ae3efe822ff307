//! tweetmux: a gateway that multiplexes upstream Twitter streaming
//! connections across many websocket subscribers.
//!
//! One upstream connection is kept per stream kind (sampled or
//! keyword-filtered) and shared by every subscriber interested in that kind;
//! the filtered connection tracks the union of all subscribers' keywords and
//! events are re-matched per subscriber on the way out.

pub mod config;
pub mod controller;
pub mod event;
pub mod framing;
pub mod oauth;
pub mod transport;
pub mod ws;

mod fanout;
mod registry;

pub use config::Config;
pub use controller::{
    ConnState, StreamController, StreamKind, Subscription, SubscriptionHandle, Tuning,
};
pub use event::{EventFilter, StreamEvent};
pub use transport::{Transport, TwitterTransport};
