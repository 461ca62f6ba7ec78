use postnet_codec::Value;

/// A post delivered to a room handler, decoded against that room's schema
/// (spec §4.5: "decode the payload with the room's schema and hand a
/// record ... to the room handler").
#[derive(Debug, Clone, PartialEq)]
pub struct PostRecord {
    pub room: String,
    pub index: u64,
    pub server_time: u64,
    pub client_time: u64,
    pub name: String,
    pub data: Value,
}
