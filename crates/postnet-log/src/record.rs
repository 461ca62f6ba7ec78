/// A single persisted room record (spec §4.3). `room` and `index` are not
/// stored — they're implied by which file the record lives in and its
/// position in the offset table. The payload is kept as raw bytes; decoding
/// it against a schema is the engine's concern, not the log's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub server_time: u64,
    pub client_time: u64,
    pub name: String,
    pub payload: Vec<u8>,
}

impl Record {
    /// Encodes the record layout from spec §4.3:
    /// `[u32 record_len][u64 server_time][u64 client_time][u32 name_len][name][u32 payload_len][payload]`.
    /// `record_len` covers every byte after itself.
    pub fn to_bytes(&self) -> Vec<u8> {
        let name_bytes = self.name.as_bytes();
        let body_len = 8 + 8 + 4 + name_bytes.len() + 4 + self.payload.len();
        let mut out = Vec::with_capacity(4 + body_len);
        out.extend_from_slice(&(body_len as u32).to_le_bytes());
        out.extend_from_slice(&self.server_time.to_le_bytes());
        out.extend_from_slice(&self.client_time.to_le_bytes());
        out.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(name_bytes);
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses the body that follows `record_len` (i.e. `body` excludes the
    /// leading `u32` length prefix). Returns `None` if `body` is shorter
    /// than the layout requires (a truncated trailing record).
    pub fn from_body(body: &[u8]) -> Option<Self> {
        if body.len() < 20 {
            return None;
        }
        let server_time = u64::from_le_bytes(body[0..8].try_into().ok()?);
        let client_time = u64::from_le_bytes(body[8..16].try_into().ok()?);
        let name_len = u32::from_le_bytes(body[16..20].try_into().ok()?) as usize;
        let name_start = 20;
        let name_end = name_start.checked_add(name_len)?;
        if body.len() < name_end + 4 {
            return None;
        }
        let name = String::from_utf8(body[name_start..name_end].to_vec()).ok()?;
        let payload_len =
            u32::from_le_bytes(body[name_end..name_end + 4].try_into().ok()?) as usize;
        let payload_start = name_end + 4;
        let payload_end = payload_start.checked_add(payload_len)?;
        if body.len() < payload_end {
            return None;
        }
        Some(Record {
            server_time,
            client_time,
            name,
            payload: body[payload_start..payload_end].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let record = Record {
            server_time: 1000,
            client_time: 950,
            name: "abc12345".to_string(),
            payload: vec![1, 2, 3, 4, 5],
        };
        let bytes = record.to_bytes();
        let record_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        assert_eq!(record_len, bytes.len() - 4);
        let decoded = Record::from_body(&bytes[4..]).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn truncated_body_is_rejected() {
        let record = Record {
            server_time: 1,
            client_time: 1,
            name: "n".to_string(),
            payload: vec![9, 9, 9],
        };
        let bytes = record.to_bytes();
        let truncated = &bytes[4..bytes.len() - 1];
        assert!(Record::from_body(truncated).is_none());
    }
}
