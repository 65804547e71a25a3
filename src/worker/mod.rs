//! Worker Client
//!
//! The worker side of the protocol: register a function with a router, open the
//! data channel it assigns, and run every request through a handler closure.
//! Kill signals abort the matching execution.
//!
//! ```rust,ignore
//! let worker = FunctionWorker::new("resize", 500, 2, |payload| async move {
//!     Ok(payload)
//! });
//! let connected = worker.connect(control_addr).await?;
//! connected.join().await?;
//! ```

pub mod client;

pub use client::{CallHandlerFn, ConnectedWorker, FunctionWorker};
