mod error;
mod record;
mod room_log;
mod store;

pub use error::LogError;
pub use record::Record;
pub use room_log::RoomLog;
pub use store::RoomStore;
