//! Worker Binding Module
//!
//! Turns TCP connections from workers into routable `WorkerHandle`s.
//!
//! ## Submodules
//! - **`binder`**: the control-channel listener and the registration handshake.
//! - **`data_plane`**: one data-channel listener per function route; activates
//!   workers and feeds their replies to the dispatcher.

pub mod binder;
pub mod data_plane;

#[cfg(test)]
mod tests;
