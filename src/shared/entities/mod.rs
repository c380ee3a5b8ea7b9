pub mod broadcast;
pub mod call;
pub mod identifiers;

pub use broadcast::{BroadcastSession, BroadcastStatus};
pub use call::{AmdResult, CallRecord, CallStatus, HangupCause};
pub use identifiers::{BroadcastId, CallId, CallIdError};
