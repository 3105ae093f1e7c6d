//! # sipcall
//!
//! SIP dialog and proxy core for building SIP applications.
//!
//! The crate owns the client-side (UAC) dialog state machine of
//! RFC 3261 §12 and the proxy routing engine that rewrites and forwards
//! requests to one or more downstream targets. It consumes parsed
//! [`rsip`] messages and emits outbound messages through the
//! [`transport::Transport`] trait; it performs no I/O of its own.
//!
//! Each [`call::Call`] owns the dialogs of one Call-ID and processes
//! its events on a single task, so no locking is needed inside the
//! state machine.

pub mod call;
pub mod dialog;
pub mod proxy;
pub mod rsip_ext;
pub mod transaction;
pub mod transport;

mod error;

pub use call::{Call, CallEvent, CallOptions};
pub use error::{Error, Result};

#[cfg(test)]
pub(crate) mod tests_common;
