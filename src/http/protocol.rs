//! HTTP endpoints and the DTOs they exchange.

use crate::registry::types::FunctionSummary;
use serde::{Deserialize, Serialize};

pub const ENDPOINT_INVOKE: &str = "/invoke/:function";
pub const ENDPOINT_FUNCTIONS: &str = "/functions";
pub const ENDPOINT_HEALTH: &str = "/health";

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FunctionsResponse {
    pub functions: Vec<FunctionSummary>,
    pub in_flight: usize,
}
