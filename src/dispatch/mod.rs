//! Dispatch Module
//!
//! Routes calls to workers and keeps the in-flight table consistent.
//!
//! ## Call Lifecycle
//! 1. **Admission**: the least-busy active worker below the function's
//!    `max_concurrency` is chosen (ties go to the lowest worker id) and one of its
//!    slots is claimed with compare-and-swap. No worker with a free slot means the
//!    call fails with `Saturated` right away; nothing is queued.
//! 2. **In flight**: the call is recorded with a deadline of `now + timeout_ms` and
//!    forwarded on the worker's data channel.
//! 3. **Resolution**: a reply, the `TimeoutSupervisor`, or the worker's retirement
//!    removes the entry. Whoever removes it resolves the caller and frees the slot,
//!    so every call resolves exactly once.
//!
//! ## Submodules
//! - **`dispatcher`**: selection, forwarding, reply matching and worker retirement.
//! - **`supervisor`**: the recurring deadline scan that times out calls and sends kill signals.
//! - **`types`**: the in-flight call record.

pub mod dispatcher;
pub mod supervisor;
pub mod types;
