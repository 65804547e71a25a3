//! Worker Wire Protocol
//!
//! Message types exchanged with workers and the frame codec that carries them.
//!
//! - **Control channel**: one TCP connection per worker, opened by the worker. Carries
//!   registration, the router's bound config, and kill signals.
//! - **Data channel**: one TCP listener per function route. Each worker opens one
//!   connection, introduces itself with `Hello`, then receives requests and sends replies.
//!
//! Every frame is a big-endian `u32` length followed by a bincode body.

pub mod codec;
pub mod messages;
