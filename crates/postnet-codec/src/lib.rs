//! Schema-driven bit-level codec for postnet wire payloads (spec §4.1).
//!
//! A [`Schema`] describes a value shape with no self-description on the
//! wire: the caller supplies the same schema to `encode` and `decode`. Bit
//! order is LSB-first within a field; byte order is little-endian; there is
//! no padding between fields.

mod bits;
mod codec;
mod error;
mod schema;
mod value;

pub use codec::{bit_length, decode, encode};
pub use error::CodecError;
pub use schema::Schema;
pub use value::Value;
