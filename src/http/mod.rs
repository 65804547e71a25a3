//! HTTP Front End
//!
//! Thin axum layer over the dispatcher. Request bodies are passed to workers
//! untouched and worker replies are returned untouched; only failures are JSON.

pub mod handlers;
pub mod protocol;
