use postnet_codec::{decode, encode, Schema, Value};

use crate::error::ProtoError;

/// Client → broker messages (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    GetTime,
    Post {
        room: String,
        time: u64,
        name: String,
        payload: Vec<u8>,
    },
    Load {
        room: String,
        from: u64,
    },
    Watch {
        room: String,
    },
    Unwatch {
        room: String,
    },
    GetLatestPostIndex {
        room: String,
    },
}

/// Broker → client messages (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerMessage {
    InfoTime {
        time: u64,
    },
    InfoPost {
        room: String,
        index: u64,
        server_time: u64,
        client_time: u64,
        name: String,
        payload: Vec<u8>,
    },
    InfoLatestPostIndex {
        room: String,
        /// `-1` if the room is empty.
        latest_index: i64,
        server_time: u64,
    },
}

fn bytes_to_value(bytes: &[u8]) -> Value {
    Value::List(bytes.iter().map(|b| Value::UInt(u64::from(*b))).collect())
}

fn value_to_bytes(value: &Value) -> Result<Vec<u8>, ProtoError> {
    match value {
        Value::List(items) => items
            .iter()
            .map(|v| match v {
                Value::UInt(b) => Ok(*b as u8),
                _ => Err(ProtoError::UnknownTag("payload byte".into())),
            })
            .collect(),
        _ => Err(ProtoError::UnknownTag("payload".into())),
    }
}

/// Schema shared by every `postnet-proto` message payload: bytes travel as
/// a `List` of 8-bit units (spec §4.1 convention, same one `String` reuses).
fn payload_schema() -> Schema {
    Schema::list(Schema::UInt(8))
}

fn empty_struct() -> Schema {
    Schema::Struct(vec![])
}

fn client_message_schema() -> Schema {
    Schema::Union(vec![
        ("get_time".to_string(), empty_struct()),
        (
            "post".to_string(),
            Schema::Struct(vec![
                ("room".to_string(), Schema::Str),
                ("time".to_string(), Schema::UInt(64)),
                ("name".to_string(), Schema::Str),
                ("payload".to_string(), payload_schema()),
            ]),
        ),
        (
            "load".to_string(),
            Schema::Struct(vec![
                ("room".to_string(), Schema::Str),
                ("from".to_string(), Schema::UInt(64)),
            ]),
        ),
        (
            "watch".to_string(),
            Schema::Struct(vec![("room".to_string(), Schema::Str)]),
        ),
        (
            "unwatch".to_string(),
            Schema::Struct(vec![("room".to_string(), Schema::Str)]),
        ),
        (
            "get_latest_post_index".to_string(),
            Schema::Struct(vec![("room".to_string(), Schema::Str)]),
        ),
    ])
}

fn broker_message_schema() -> Schema {
    Schema::Union(vec![
        (
            "info_time".to_string(),
            Schema::Struct(vec![("time".to_string(), Schema::UInt(64))]),
        ),
        (
            "info_post".to_string(),
            Schema::Struct(vec![
                ("room".to_string(), Schema::Str),
                ("index".to_string(), Schema::UInt(64)),
                ("server_time".to_string(), Schema::UInt(64)),
                ("client_time".to_string(), Schema::UInt(64)),
                ("name".to_string(), Schema::Str),
                ("payload".to_string(), payload_schema()),
            ]),
        ),
        (
            "info_latest_post_index".to_string(),
            Schema::Struct(vec![
                ("room".to_string(), Schema::Str),
                ("latest_index".to_string(), Schema::Int(64)),
                ("server_time".to_string(), Schema::UInt(64)),
            ]),
        ),
    ])
}

fn str_field(v: &Value, name: &str) -> Result<String, ProtoError> {
    match v.struct_field(name) {
        Some(Value::Str(s)) => Ok(s.clone()),
        _ => Err(ProtoError::UnknownTag(name.to_string())),
    }
}

fn uint_field(v: &Value, name: &str) -> Result<u64, ProtoError> {
    match v.struct_field(name) {
        Some(Value::UInt(n)) => Ok(*n),
        _ => Err(ProtoError::UnknownTag(name.to_string())),
    }
}

fn int_field(v: &Value, name: &str) -> Result<i64, ProtoError> {
    match v.struct_field(name) {
        Some(Value::Int(n)) => Ok(*n),
        _ => Err(ProtoError::UnknownTag(name.to_string())),
    }
}

fn payload_field(v: &Value, name: &str) -> Result<Vec<u8>, ProtoError> {
    match v.struct_field(name) {
        Some(list) => value_to_bytes(list),
        None => Err(ProtoError::UnknownTag(name.to_string())),
    }
}

impl ClientMessage {
    fn to_value(&self) -> Value {
        let (tag, value) = match self {
            ClientMessage::GetTime => ("get_time", Value::Struct(vec![])),
            ClientMessage::Post {
                room,
                time,
                name,
                payload,
            } => (
                "post",
                Value::Struct(vec![
                    ("room".to_string(), Value::Str(room.clone())),
                    ("time".to_string(), Value::UInt(*time)),
                    ("name".to_string(), Value::Str(name.clone())),
                    ("payload".to_string(), bytes_to_value(payload)),
                ]),
            ),
            ClientMessage::Load { room, from } => (
                "load",
                Value::Struct(vec![
                    ("room".to_string(), Value::Str(room.clone())),
                    ("from".to_string(), Value::UInt(*from)),
                ]),
            ),
            ClientMessage::Watch { room } => (
                "watch",
                Value::Struct(vec![("room".to_string(), Value::Str(room.clone()))]),
            ),
            ClientMessage::Unwatch { room } => (
                "unwatch",
                Value::Struct(vec![("room".to_string(), Value::Str(room.clone()))]),
            ),
            ClientMessage::GetLatestPostIndex { room } => (
                "get_latest_post_index",
                Value::Struct(vec![("room".to_string(), Value::Str(room.clone()))]),
            ),
        };
        Value::Union {
            tag: tag.to_string(),
            value: Box::new(value),
        }
    }

    fn from_value(value: Value) -> Result<Self, ProtoError> {
        let Value::Union { tag, value: inner } = value else {
            return Err(ProtoError::UnknownTag("<non-union client message>".into()));
        };
        Ok(match tag.as_str() {
            "get_time" => ClientMessage::GetTime,
            "post" => ClientMessage::Post {
                room: str_field(&inner, "room")?,
                time: uint_field(&inner, "time")?,
                name: str_field(&inner, "name")?,
                payload: payload_field(&inner, "payload")?,
            },
            "load" => ClientMessage::Load {
                room: str_field(&inner, "room")?,
                from: uint_field(&inner, "from")?,
            },
            "watch" => ClientMessage::Watch {
                room: str_field(&inner, "room")?,
            },
            "unwatch" => ClientMessage::Unwatch {
                room: str_field(&inner, "room")?,
            },
            "get_latest_post_index" => ClientMessage::GetLatestPostIndex {
                room: str_field(&inner, "room")?,
            },
            other => return Err(ProtoError::UnknownTag(other.to_string())),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(encode(&client_message_schema(), &self.to_value())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        Self::from_value(decode(&client_message_schema(), bytes)?)
    }
}

impl BrokerMessage {
    fn to_value(&self) -> Value {
        let (tag, value) = match self {
            BrokerMessage::InfoTime { time } => (
                "info_time",
                Value::Struct(vec![("time".to_string(), Value::UInt(*time))]),
            ),
            BrokerMessage::InfoPost {
                room,
                index,
                server_time,
                client_time,
                name,
                payload,
            } => (
                "info_post",
                Value::Struct(vec![
                    ("room".to_string(), Value::Str(room.clone())),
                    ("index".to_string(), Value::UInt(*index)),
                    ("server_time".to_string(), Value::UInt(*server_time)),
                    ("client_time".to_string(), Value::UInt(*client_time)),
                    ("name".to_string(), Value::Str(name.clone())),
                    ("payload".to_string(), bytes_to_value(payload)),
                ]),
            ),
            BrokerMessage::InfoLatestPostIndex {
                room,
                latest_index,
                server_time,
            } => (
                "info_latest_post_index",
                Value::Struct(vec![
                    ("room".to_string(), Value::Str(room.clone())),
                    ("latest_index".to_string(), Value::Int(*latest_index)),
                    ("server_time".to_string(), Value::UInt(*server_time)),
                ]),
            ),
        };
        Value::Union {
            tag: tag.to_string(),
            value: Box::new(value),
        }
    }

    fn from_value(value: Value) -> Result<Self, ProtoError> {
        let Value::Union { tag, value: inner } = value else {
            return Err(ProtoError::UnknownTag("<non-union broker message>".into()));
        };
        Ok(match tag.as_str() {
            "info_time" => BrokerMessage::InfoTime {
                time: uint_field(&inner, "time")?,
            },
            "info_post" => BrokerMessage::InfoPost {
                room: str_field(&inner, "room")?,
                index: uint_field(&inner, "index")?,
                server_time: uint_field(&inner, "server_time")?,
                client_time: uint_field(&inner, "client_time")?,
                name: str_field(&inner, "name")?,
                payload: payload_field(&inner, "payload")?,
            },
            "info_latest_post_index" => BrokerMessage::InfoLatestPostIndex {
                room: str_field(&inner, "room")?,
                latest_index: int_field(&inner, "latest_index")?,
                server_time: uint_field(&inner, "server_time")?,
            },
            other => return Err(ProtoError::UnknownTag(other.to_string())),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(encode(&broker_message_schema(), &self.to_value())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        Self::from_value(decode(&broker_message_schema(), bytes)?)
    }
}
