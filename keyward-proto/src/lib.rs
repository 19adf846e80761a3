//! Wire codec and message vocabulary for the keyward agent protocol.
//!
//! Everything in this crate is pure: bytes in, typed messages out, and back.
//! No I/O, no state.  The daemon's connection layer owns the sockets and
//! feeds complete frames through [`frame::decode_frame`] into
//! [`message::Request::decode`]; responses travel the reverse path.
//!
//! # Wire format
//!
//! A client frame is `u32 length | u8 type | body`.  Integers are fixed-width
//! big-endian, strings are length-prefixed byte blobs, and keys are
//! self-describing typed blobs (algorithm tag + algorithm-specific fields)
//! handled by `ssh-key`.  There is no implicit padding anywhere.
//!
//! Frames whose stated body length exceeds [`frame::MAX_FRAME_BODY`] are a
//! protocol violation, not merely oversized — the connection layer must drop
//! the peer rather than buffer the frame.

pub mod authdata;
pub mod constraint;
pub mod frame;
pub mod message;
pub mod wire;

/// Errors produced while decoding or encoding protocol messages.
///
/// Every variant is local to one message or one frame; none of them is ever
/// fatal to the process.  The dispatcher maps decode failures to a generic
/// failure response (or drops the connection for framing-level violations).
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// A field extended past the end of the buffer.
    #[error("truncated message")]
    Truncated,

    /// A frame declared a body length above the protocol maximum.
    #[error("frame body of {len} bytes exceeds maximum of {max}")]
    Oversize { len: usize, max: usize },

    /// A message left undecoded bytes after all its fields were read.
    #[error("trailing bytes after message body")]
    TrailingBytes,

    /// A string field was required to be valid UTF-8 and was not.
    #[error("invalid UTF-8 in {0} field")]
    BadUtf8(&'static str),

    /// A key or signature blob failed to decode.
    #[error("bad key material: {0}")]
    Key(#[from] ssh_key::Error),

    /// A length-prefixed blob failed structural decoding.
    #[error("bad encoded blob: {0}")]
    Encoding(#[from] ssh_encoding::Error),

    /// Anything else structurally wrong with a message.
    #[error("malformed {0}")]
    Malformed(&'static str),
}
