//! Job events and the push-protocol frame model.
//!
//! - `offset`: ordered per-job event ids
//! - `event`: the immutable log entry
//! - `payload`: typed bodies for `status`, `progress` and `log` events
//! - `frame`: what a viewer receives over the stream

pub mod event;
pub mod frame;
pub mod offset;
pub mod payload;

pub use event::{EventKind, JobEvent};
pub use frame::StreamFrame;
pub use offset::{EventOffset, OffsetParseError};
pub use payload::{LogLevel, LogPayload, ProgressPayload, StatusPayload};
