//! # Transport Layer
//!
//! Socket-level plumbing. TCP is the only stream transport; the listener
//! accepts sockets and hands them to the connection handshake.

pub(crate) mod tcp;
