//! Control API: the three tunterm ACL messages, their binary codec and
//! reply status codes.

mod request;
mod status;
pub mod wire;

pub use request::{handle_message, ControlReply, ControlRequest};
pub use status::ApiStatus;
pub use wire::{MessageHeader, MessageKind, WireError};
