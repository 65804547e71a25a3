//! Function Router Library
//!
//! Routes HTTP calls to pools of dynamically registered workers. This crate holds
//! the whole router; the binary (`main.rs`) only parses arguments and starts it.
//!
//! ## Architecture Modules
//! - **`registry`**: function bindings and worker handles. Pure in-memory state.
//! - **`binder`**: the control-channel handshake that registers workers, and the
//!   per-function data-channel listeners that activate them.
//! - **`dispatch`**: least-busy worker selection with per-worker admission, the
//!   in-flight table, and the `TimeoutSupervisor` that fails and kills overdue calls.
//! - **`protocol`**: control/data message types and the length-prefixed bincode codec.
//! - **`http`**: the axum front end that turns requests into dispatches.
//! - **`router`**: the composition root wiring everything to listeners.
//! - **`worker`**: a client for writing workers against this router.

pub mod binder;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod worker;

#[cfg(test)]
mod test_support;
