//! Wire format for incoming talkgroup datagrams
//!
//! ```text
//! ┌──────────────┬──────────────────────┬──────────────────────────────┐
//! │ u32 LE len L │ L bytes JSON object  │ remaining: mono s16le PCM    │
//! └──────────────┴──────────────────────┴──────────────────────────────┘
//! ```
//!
//! Only `event`, `talkgroup`, `talkgroup_tag`, `short_name` and `src` are
//! read from the metadata. Everything else in the object is ignored.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProtocolError;

/// Size of the metadata length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Placeholder for advisory fields the sender omitted
pub const UNKNOWN_FIELD: &str = "N/A";

/// What a datagram asks the mixer to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A call began on this talkgroup
    Start,
    /// A chunk of audio (or a keep-alive if tiny)
    Audio,
    /// The call ended
    End,
    /// Anything else; ignored
    Unknown(String),
}

impl StreamEvent {
    /// Map the `event` field. Absent means audio.
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            None | Some("audio") => StreamEvent::Audio,
            Some("start") | Some("call_start") => StreamEvent::Start,
            Some("end") | Some("call_end") => StreamEvent::End,
            Some(other) => StreamEvent::Unknown(other.to_string()),
        }
    }
}

/// Advisory display metadata carried by every datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMetadata {
    pub tag: String,
    pub short_name: String,
    pub source: String,
}

impl Default for ChannelMetadata {
    fn default() -> Self {
        Self {
            tag: UNKNOWN_FIELD.to_string(),
            short_name: UNKNOWN_FIELD.to_string(),
            source: UNKNOWN_FIELD.to_string(),
        }
    }
}

/// A parsed datagram borrowing its audio payload from the receive buffer
#[derive(Debug, Clone, PartialEq)]
pub struct Packet<'a> {
    pub event: StreamEvent,
    pub channel_id: i64,
    pub metadata: ChannelMetadata,
    pub payload: &'a [u8],
}

#[derive(Deserialize)]
struct RawMetadata {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    talkgroup: Option<Value>,
    #[serde(default)]
    talkgroup_tag: Option<Value>,
    #[serde(default)]
    short_name: Option<Value>,
    #[serde(default)]
    src: Option<Value>,
}

/// Split and parse one datagram
pub fn parse_datagram(data: &[u8]) -> Result<Packet<'_>, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::TooShort(data.len()));
    }

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&data[..LENGTH_PREFIX_SIZE]);
    let declared = u32::from_le_bytes(prefix) as usize;

    let available = data.len() - LENGTH_PREFIX_SIZE;
    if declared > available {
        return Err(ProtocolError::LengthOverflow {
            declared,
            available,
        });
    }

    let metadata_end = LENGTH_PREFIX_SIZE + declared;
    let text = std::str::from_utf8(&data[LENGTH_PREFIX_SIZE..metadata_end])?;
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(ProtocolError::NotAnObject);
    }
    let raw: RawMetadata = serde_json::from_value(value)?;

    Ok(Packet {
        event: StreamEvent::from_name(raw.event.as_deref()),
        channel_id: channel_id(raw.talkgroup.as_ref())?,
        metadata: ChannelMetadata {
            tag: advisory(raw.talkgroup_tag.as_ref()),
            short_name: advisory(raw.short_name.as_ref()),
            source: advisory(raw.src.as_ref()),
        },
        payload: &data[metadata_end..],
    })
}

/// Build a datagram. Used by tests and load generators.
pub fn encode_datagram(metadata: &Value, payload: &[u8]) -> Vec<u8> {
    let json = metadata.to_string();
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + json.len() + payload.len());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(json.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Talkgroups arrive as numbers or numeric strings; missing means 0.
fn channel_id(value: Option<&Value>) -> Result<i64, ProtocolError> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .ok_or_else(|| ProtocolError::InvalidChannelId(n.to_string())),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ProtocolError::InvalidChannelId(s.clone())),
        Some(other) => Err(ProtocolError::InvalidChannelId(other.to_string())),
    }
}

fn advisory(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => UNKNOWN_FIELD.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
