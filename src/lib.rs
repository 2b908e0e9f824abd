//! Missive: outgoing control messages for a secure messaging client.
//!
//! Every outgoing message is constructed inside an active
//! [`WriteTransaction`](store::WriteTransaction) for a thread that resolves
//! in it, persisted through a versioned record layout, and handed to the
//! transport only after commit.
//!
//! See `DESIGN.md` for the module map.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod store;
pub mod thread;

pub mod message;
pub mod notice;

pub mod activation;
pub mod dispatch;
