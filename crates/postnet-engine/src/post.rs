use postnet_codec::Value;
use postnet_transport::PostRecord;

/// One post in the replay timeline. Remote posts carry the index the broker
/// assigned; a locally predicted post has not been assigned one yet and
/// carries `-1` until its authoritative echo replaces it (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub room: String,
    pub index: i64,
    pub server_time: u64,
    pub client_time: u64,
    pub name: String,
    pub data: Value,
}

impl Post {
    pub fn local(room: impl Into<String>, name: impl Into<String>, client_time: u64, data: Value) -> Self {
        Self {
            room: room.into(),
            index: -1,
            server_time: client_time,
            client_time,
            name: name.into(),
            data,
        }
    }

    /// `official_time = client_time if client_time > server_time - tolerance
    /// else server_time - tolerance`.
    pub fn official_time(&self, tolerance_ms: u64) -> u64 {
        let floor = self.server_time.saturating_sub(tolerance_ms);
        if self.client_time > floor {
            self.client_time
        } else {
            floor
        }
    }

    /// `official_tick = floor(official_time * tick_rate / 1000)`.
    pub fn official_tick(&self, tolerance_ms: u64, tick_rate: u32) -> u64 {
        self.official_time(tolerance_ms) * tick_rate as u64 / 1000
    }
}

impl From<PostRecord> for Post {
    fn from(record: PostRecord) -> Self {
        Self {
            room: record.room,
            index: record.index as i64,
            server_time: record.server_time,
            client_time: record.client_time,
            name: record.name,
            data: record.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(server_time: u64, client_time: u64) -> Post {
        Post {
            room: "r".into(),
            index: 0,
            server_time,
            client_time,
            name: "n".into(),
            data: Value::UInt(0),
        }
    }

    #[test]
    fn official_time_prefers_client_time_when_within_tolerance_window() {
        let p = post(10_000, 9_950);
        assert_eq!(p.official_time(100), 9_950);
    }

    #[test]
    fn official_time_clamps_to_server_time_minus_tolerance() {
        let p = post(10_000, 1_000);
        assert_eq!(p.official_time(100), 9_900);
    }

    #[test]
    fn official_tick_floors_to_the_nearest_tick() {
        let p = post(10_033, 10_033);
        assert_eq!(p.official_tick(0, 30), 300); // 10033 * 30 / 1000 = 300.99
    }
}
