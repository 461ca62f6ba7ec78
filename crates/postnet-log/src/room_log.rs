use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::LogError;
use crate::record::Record;
use crate::store::RoomStore;

/// Process-wide cache of open [`RoomStore`]s, one per room, rooted at a
/// single database directory (`db/<room>.dat` / `db/<room>.idx`, spec §6).
pub struct RoomLog {
    dir: PathBuf,
    stores: HashMap<String, RoomStore>,
}

impl RoomLog {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stores: HashMap::new(),
        }
    }

    /// Appends `record` to `room`, returning its assigned index.
    pub fn append(&mut self, room: &str, record: &Record) -> Result<u64, LogError> {
        self.store(room)?.append(record)
    }

    pub fn get(&mut self, room: &str, index: u64) -> Result<Option<Record>, LogError> {
        self.store(room)?.get(index)
    }

    pub fn count(&mut self, room: &str) -> Result<u64, LogError> {
        Ok(self.store(room)?.count())
    }

    fn store(&mut self, room: &str) -> Result<&mut RoomStore, LogError> {
        if !self.stores.contains_key(room) {
            let store = RoomStore::open(&self.dir, room)?;
            self.stores.insert(room.to_string(), store);
        }
        Ok(self.stores.get_mut(room).expect("just inserted"))
    }
}
