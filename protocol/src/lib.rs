//! Wire protocol shared by the stopcast broker and its viewers.
//!
//! # Overview
//!
//! A debugger-side broker pushes snapshots of debugger state to viewer
//! processes over a local stream socket. Exactly two messages exist:
//!
//! - [`WireMessage::Subscribe`]: sent by a viewer to declare which
//!   [`UpdateType`]s it renders. A later subscription replaces an earlier one.
//! - [`WireMessage::Update`]: sent by the broker, carrying one
//!   [`UpdatePayload`] (registers, disassembly, stack memory or backtrace).
//!
//! Messages are JSON bodies behind a 4-byte big-endian length prefix; see the
//! [`codec`] module.
//!
//! # Example
//!
//! ```
//! use stopcast_protocol::{decode_frame, encode_frame, UpdatePayload, WireMessage};
//!
//! let msg = WireMessage::Update(UpdatePayload::Disasm("mov rax, rbx\n".to_string()));
//! let frame = encode_frame(&msg).unwrap();
//! assert_eq!(decode_frame(&frame).unwrap(), msg);
//! ```

pub mod codec;
pub mod error;
pub mod message;
pub mod update;

pub use codec::{
    decode, decode_frame, encode, encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_LEN,
    FRAME_HEADER_LEN, READ_CHUNK_SIZE,
};
pub use error::{DecodeError, EncodeError};
pub use message::WireMessage;
pub use update::{
    RegisterSnapshot, RegisterValue, StackSnapshot, UnknownUpdateType, UpdatePayload, UpdateType,
    FLAGS_KEY, UNAVAILABLE, X86_64_REGISTERS,
};
