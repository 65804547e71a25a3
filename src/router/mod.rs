//! Router Composition Root
//!
//! Builds the registry, dispatcher, supervisor and binder from a `RouterConfig`,
//! binds the control and HTTP listeners, and spawns the background loops.

pub mod service;

#[cfg(test)]
mod tests;
