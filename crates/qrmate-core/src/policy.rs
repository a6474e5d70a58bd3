//! Retry policy for connection creation.
//!
//! A 5xx is ambiguous (the backend may have committed the write), so the request
//! is retried once. If the retry is also a 5xx the outcome is optionally assumed
//! successful. Both the scan orchestrator and the direct-connect gate run their
//! creation requests through this policy.

use serde_json::Value;

use crate::{
    ports::{CreateNetworkRequest, NetworkApi},
    Result,
};

#[derive(Clone, Debug, PartialEq)]
pub enum CreationResult {
    /// Backend confirmed. `data` is `None` when the response lacked it.
    Created { data: Option<Value> },
    /// Backend said the users are already connected.
    AlreadyConnected,
    /// Two 5xx in a row; assumed created.
    AssumedCreated { status: u16 },
}

impl CreationResult {
    pub fn user_message(&self) -> &'static str {
        match self {
            CreationResult::Created { .. } | CreationResult::AssumedCreated { .. } => {
                "Connection created"
            }
            CreationResult::AlreadyConnected => "You are already connected",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CreationPolicy {
    pub optimistic_on_repeated_5xx: bool,
}

impl Default for CreationPolicy {
    fn default() -> Self {
        Self {
            optimistic_on_repeated_5xx: true,
        }
    }
}

impl CreationPolicy {
    pub fn new(optimistic_on_repeated_5xx: bool) -> Self {
        Self {
            optimistic_on_repeated_5xx,
        }
    }

    /// Issue `req`, retrying once on 5xx.
    pub async fn execute(
        &self,
        api: &dyn NetworkApi,
        req: &CreateNetworkRequest,
    ) -> Result<CreationResult> {
        let first = match api.create_network(req).await {
            Ok(resp) => return Ok(created(resp.data, req)),
            Err(e) if e.is_already_connected() => return Ok(CreationResult::AlreadyConnected),
            Err(e) if e.is_server_error() => e,
            Err(e) => return Err(e),
        };

        tracing::warn!(
            scanned_user_id = req.scanned_user_id,
            error = %first,
            "create-a-network returned a server error; retrying once"
        );

        match api.create_network(req).await {
            Ok(resp) => Ok(created(resp.data, req)),
            Err(e) if e.is_already_connected() => Ok(CreationResult::AlreadyConnected),
            Err(e) if e.is_server_error() && self.optimistic_on_repeated_5xx => {
                let status = e.status().unwrap_or(500);
                tracing::warn!(
                    scanned_user_id = req.scanned_user_id,
                    status,
                    "create-a-network failed twice with a server error; assuming created"
                );
                Ok(CreationResult::AssumedCreated { status })
            }
            Err(e) => Err(e),
        }
    }
}

fn created(data: Option<Value>, req: &CreateNetworkRequest) -> CreationResult {
    if data.is_none() {
        tracing::warn!(
            scanned_user_id = req.scanned_user_id,
            "create-a-network response has no data field"
        );
    }
    CreationResult::Created { data }
}
