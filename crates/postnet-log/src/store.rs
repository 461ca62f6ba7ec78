use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::LogError;
use crate::record::Record;

/// An open room's `.dat` (records) and `.idx` (offset table) pair, with the
/// offset table cached in memory (spec §4.3: "Open stores are cached in
/// memory with their offset table and current size").
pub struct RoomStore {
    data_path: PathBuf,
    data_file: File,
    index_file: File,
    data_len: u64,
    offsets: Vec<u64>,
}

impl RoomStore {
    pub fn open(dir: &Path, room: &str) -> Result<Self, LogError> {
        std::fs::create_dir_all(dir)?;
        let data_path = dir.join(format!("{room}.dat"));
        let index_path = dir.join(format!("{room}.idx"));

        let mut data_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&data_path)?;
        let data_len = data_file.metadata()?.len();

        let offsets = if index_path.exists() {
            load_index(&index_path, room)?
        } else {
            rebuild_index(&mut data_file, &data_path, data_len)?
        };

        // Re-derive data_len in case rebuild_index truncated a partial tail.
        let data_len = data_file.metadata()?.len();

        if !index_path.exists() {
            write_index(&index_path, &offsets)?;
        }

        let index_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)?;

        Ok(Self {
            data_path,
            data_file,
            index_file,
            data_len,
            offsets,
        })
    }

    /// Appends `record`, returning its assigned index.
    pub fn append(&mut self, record: &Record) -> Result<u64, LogError> {
        let index = self.offsets.len() as u64;
        let offset = self.data_len;
        let bytes = record.to_bytes();

        self.data_file.write_all(&bytes)?;
        self.data_file.flush()?;
        self.data_len += bytes.len() as u64;

        self.index_file.write_all(&offset.to_le_bytes())?;
        self.index_file.flush()?;
        self.offsets.push(offset);

        Ok(index)
    }

    pub fn get(&mut self, index: u64) -> Result<Option<Record>, LogError> {
        let Some(&offset) = self.offsets.get(index as usize) else {
            return Ok(None);
        };
        let mut file = File::open(&self.data_path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        let record_len = u32::from_le_bytes(len_buf) as usize;
        let mut body = vec![0u8; record_len];
        file.read_exact(&mut body)?;
        Ok(Record::from_body(&body))
    }

    pub fn count(&self) -> u64 {
        self.offsets.len() as u64
    }
}

fn load_index(index_path: &Path, room: &str) -> Result<Vec<u64>, LogError> {
    let mut bytes = Vec::new();
    File::open(index_path)?.read_to_end(&mut bytes)?;
    if bytes.len() % 8 != 0 {
        return Err(LogError::CorruptIndex {
            room: room.to_string(),
            len: bytes.len() as u64,
        });
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

fn write_index(index_path: &Path, offsets: &[u64]) -> Result<(), LogError> {
    let mut out = Vec::with_capacity(offsets.len() * 8);
    for offset in offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    std::fs::write(index_path, out)?;
    Ok(())
}

/// Rebuilds the offset table by scanning `.dat` from the start, truncating
/// any trailing partial record (spec §4.3 recovery).
fn rebuild_index(data_file: &mut File, data_path: &Path, data_len: u64) -> Result<Vec<u64>, LogError> {
    let mut bytes = Vec::with_capacity(data_len as usize);
    data_file.seek(SeekFrom::Start(0))?;
    data_file.read_to_end(&mut bytes)?;

    let mut offsets = Vec::new();
    let mut pos = 0usize;
    let mut valid_end = 0usize;
    loop {
        if pos + 4 > bytes.len() {
            break;
        }
        let record_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        let record_end = pos + 4 + record_len;
        if record_end > bytes.len() {
            break;
        }
        offsets.push(pos as u64);
        pos = record_end;
        valid_end = pos;
    }

    if valid_end < bytes.len() {
        log::warn!(
            "truncating partial trailing record in {} ({} trailing bytes)",
            data_path.display(),
            bytes.len() - valid_end
        );
        data_file.set_len(valid_end as u64)?;
    }
    data_file.seek(SeekFrom::End(0))?;

    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RoomStore::open(dir.path(), "room-a").unwrap();

        let r0 = Record {
            server_time: 10,
            client_time: 9,
            name: "n0".to_string(),
            payload: vec![1, 2, 3],
        };
        let r1 = Record {
            server_time: 20,
            client_time: 18,
            name: "n1".to_string(),
            payload: vec![4, 5],
        };

        assert_eq!(store.append(&r0).unwrap(), 0);
        assert_eq!(store.append(&r1).unwrap(), 1);
        assert_eq!(store.count(), 2);
        assert_eq!(store.get(0).unwrap().unwrap(), r0);
        assert_eq!(store.get(1).unwrap().unwrap(), r1);
        assert!(store.get(2).unwrap().is_none());
    }

    #[test]
    fn rebuilds_index_from_data_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = RoomStore::open(dir.path(), "room-b").unwrap();
            store
                .append(&Record {
                    server_time: 1,
                    client_time: 1,
                    name: "a".to_string(),
                    payload: vec![9; 4],
                })
                .unwrap();
            store
                .append(&Record {
                    server_time: 2,
                    client_time: 2,
                    name: "b".to_string(),
                    payload: vec![8; 2],
                })
                .unwrap();
        }

        std::fs::remove_file(dir.path().join("room-b.idx")).unwrap();

        let mut reopened = RoomStore::open(dir.path(), "room-b").unwrap();
        assert_eq!(reopened.count(), 2);
        assert_eq!(reopened.get(1).unwrap().unwrap().name, "b");
    }

    #[test]
    fn truncates_partial_trailing_record_on_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("room-c.dat");
        {
            let mut store = RoomStore::open(dir.path(), "room-c").unwrap();
            store
                .append(&Record {
                    server_time: 1,
                    client_time: 1,
                    name: "a".to_string(),
                    payload: vec![1, 2, 3],
                })
                .unwrap();
        }
        std::fs::remove_file(dir.path().join("room-c.idx")).unwrap();

        // Append a partial, corrupt trailing record.
        let mut file = OpenOptions::new().append(true).open(&data_path).unwrap();
        file.write_all(&[0xFF, 0xFF, 0xFF, 0x7F, 1, 2, 3]).unwrap();
        drop(file);

        let reopened = RoomStore::open(dir.path(), "room-c").unwrap();
        assert_eq!(reopened.count(), 1);
    }
}
