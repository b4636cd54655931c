//! Wire protocol and value types for the Crucible validation pipeline.
//!
//! The `crucible-proto` crate defines everything that crosses the process
//! boundary between the supervisor and a validation worker: the
//! length-prefixed frame codec, the message tag table, the
//! [`ValidationRequest`] sent parent-to-child, the [`ValidationEvent`]s
//! streamed child-to-parent, and the [`ValidationOptions`] and
//! [`ValidationTarget`] values carried inside the request.
//!
//! The framing is a binary `{tag: u8, length: u32 BE, payload}` envelope.
//! Payloads are UTF-8 JSON documents so every textual field round-trips
//! exactly and no formatting is locale dependent. Decoding never trusts the
//! length field beyond [`frame::MAX_PAYLOAD_LEN`].

pub mod frame;
pub mod message;
pub mod options;
pub mod target;

pub use self::frame::{FrameTag, ProtocolError, read_frame, write_frame};
pub use self::message::{ValidationEvent, ValidationRequest};
pub use self::options::ValidationOptions;
pub use self::target::{PluginDescription, ValidationTarget};
