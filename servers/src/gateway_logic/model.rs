use lib_gateway::ShutdownPhase;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub status: String,
    /// Fleet-wide total read after the broadcast.
    pub recipients: i64,
    /// Successful sends on this worker.
    pub delivered: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub active_connections: i64,
    pub local_connections: usize,
    pub shutdown_pending: bool,
    pub phase: ShutdownPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
