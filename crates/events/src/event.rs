use core::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::offset::EventOffset;

/// Kind of a job event; doubles as the SSE `event:` name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Progress,
    Log,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Progress => "progress",
            EventKind::Log => "log",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(EventKind::Status),
            "progress" => Ok(EventKind::Progress),
            "log" => Ok(EventKind::Log),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

/// An appended, immutable entry of a job's event log.
///
/// `data` is the JSON text exactly as it was appended; streamers forward it
/// verbatim rather than re-encoding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub offset: EventOffset,
    pub kind: EventKind,
    pub data: String,
}

impl JobEvent {
    pub fn new(offset: EventOffset, kind: EventKind, data: impl Into<String>) -> Self {
        Self {
            offset,
            kind,
            data: data.into(),
        }
    }

    /// Decode the payload into a typed body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}
