//! Deterministic input-synchronized replay engine (spec §3-4.6): replays
//! posts admitted from the broker, plus locally predicted posts made ahead
//! of their echo, through pure transition functions to reach identical world
//! state on every client.
//!
//! [`ReplayEngine`] is the synchronous, transport-agnostic core — feed it
//! posts directly and it's fully deterministic and side-effect free, which
//! is what makes it practical to test without a network. [`LiveEngine`]
//! wires one up to a [`postnet_transport::Transport`] and exposes the full
//! operation set a client actually drives (posting, server time, ping,
//! render-state polling).

mod engine;
mod error;
mod live;
mod post;
mod timeline;

pub use engine::{Diagnostics, ReplayEngine};
pub use error::EngineError;
pub use live::LiveEngine;
pub use post::Post;
