use crate::registry::types::{CorrelationId, RouteId, WorkerId};

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Messages on the control channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControlMessage {
    /// Worker -> router. First frame of every control connection; may be re-sent
    /// later to update the function's config.
    RegisterConfig {
        function_name: String,
        timeout_ms: i32,
        max_concurrency: i32,
        /// Instance identifier used in logs. Generated by the router when absent.
        worker_uuid: Option<String>,
    },

    /// Router -> worker. The effective config and where to open the data channel.
    BoundConfig {
        worker_id: WorkerId,
        function_name: String,
        timeout_ms: u32,
        max_concurrency: u32,
        route: RouteId,
        data_addr: SocketAddr,
    },

    /// Router -> worker. Abandon the execution with this correlation id.
    Kill { correlation_id: CorrelationId },

    /// Router -> worker. The last registration was refused.
    Rejected { reason: String },
}

/// Messages on a data channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataMessage {
    /// Worker -> router. First frame of every data connection.
    Hello { worker_id: WorkerId },

    /// Router -> worker.
    Request {
        correlation_id: CorrelationId,
        payload: Vec<u8>,
    },

    /// Worker -> router. `Err` carries the worker's failure message.
    Reply {
        correlation_id: CorrelationId,
        result: Result<Vec<u8>, String>,
    },
}
