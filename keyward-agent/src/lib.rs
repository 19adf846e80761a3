//! Agent state and request handling.
//!
//! The pieces fit together like this: [`store::IdentityStore`] holds the
//! loaded identities, [`binding::ConnectionState`] tracks per-connection
//! session bindings, [`permit`] decides whether a destination-constrained
//! identity may be listed or used, [`lock::AgentLock`] implements the
//! password lock, and [`dispatch::Dispatcher`] ties them into the
//! request/response state machine the daemon drives.

pub mod binding;
pub mod confirm;
pub mod dispatch;
pub mod identity;
pub mod lock;
pub mod permit;
pub mod store;

pub use binding::ConnectionState;
pub use confirm::Interaction;
pub use dispatch::{Agent, AgentPolicy, Dispatcher, FatalError};
