//! In-memory CAN frame and log message types, and the wire formats used to
//! record and replay them.

mod error;
mod format;
mod frame;
pub mod gvret;
mod message;

pub use error::*;
pub use format::{CanFormat, Constructor, FormatCodec, FormatRegistry};
pub use frame::{BusName, Frame, FrameFormat, MAX_DLC, MAX_EXTENDED_ID, MAX_STANDARD_ID};
pub use message::{BusStatus, InfoKind, LogEntry, LogMessage, StatusKind, Timestamp};
