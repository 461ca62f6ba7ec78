//! Wire protocol between postnet clients and the broker (spec §4.2, §6).
//!
//! Messages are tagged unions encoded with `postnet-codec` against a fixed
//! schema, then framed one message per length-prefixed byte frame.

mod error;
mod framing;
mod messages;

pub use error::ProtoError;
pub use framing::{read_frame, write_frame, MAX_FRAME_BYTES};
pub use messages::{BrokerMessage, ClientMessage};
