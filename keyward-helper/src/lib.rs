//! Subprocess delegation for cryptographic operations.
//!
//! The agent never loads token or authenticator middleware into its own
//! address space.  Instead it spawns a helper process and speaks a small
//! framed call/response protocol over the child's stdio:
//!
//! ```text
//! u32 length | u8 version | u32 operation | operation-specific fields
//! ```
//!
//! Exactly one request is outstanding at a time per channel.  The reserved
//! operation code 0 is an error response carrying a `u32` cause.  Two helper
//! kinds share the shape:
//!
//! - the **token helper** is long-lived and stateful per loaded module
//!   ([`token::TokenModule`]): load a middleware module, sign with a key the
//!   helper indexes internally, unload;
//! - the **authenticator helper** is single-shot
//!   ([`authenticator::AuthenticatorClient`]): spawned per operation, it
//!   answers one sign / enroll / load-resident-keys request and exits, and
//!   its exit status is checked as an independent success signal.

pub mod authenticator;
pub mod channel;
pub mod process;
#[cfg(test)]
mod testutil;
pub mod token;

pub use channel::{HelperChannel, HelperError, PROTOCOL_VERSION, cause, op};
pub use process::HelperProcess;
