//! Function Registry Module
//!
//! Holds function definitions and the workers bound to them.
//!
//! ## Model
//! - **`FunctionBinding`**: one per function name. Carries the effective config
//!   (last registration wins), the data-channel route and the bound workers indexed
//!   by worker id.
//! - **`WorkerHandle`**: one per connected worker. Owns the in-flight counter that
//!   admission control updates with compare-and-swap.
//!
//! A binding whose last worker leaves is kept as inactive so that a re-registering
//! worker gets the same route back.

pub mod registry;
pub mod types;
