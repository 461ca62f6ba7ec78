//! Reconnecting transport client to the broker (spec §4.5): owns exactly
//! one logical connection, hiding reconnects, time sync, and post queueing
//! from the replay engine built on top of it.

mod backoff;
mod client;
mod error;
mod name;
mod post;

pub use client::Transport;
pub use error::TransportError;
pub use post::PostRecord;
