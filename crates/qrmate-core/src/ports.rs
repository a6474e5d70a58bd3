//! Hexagonal ports. Adapters (HTTP client, QR decoder, Telegram) implement these.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{EventId, Frame, UserId},
    Result,
};

/// Body of `POST /create-a-network/`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreateNetworkRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_event_id: Option<i64>,
    pub scanned_user_id: i64,
}

impl CreateNetworkRequest {
    pub fn new(event_id: Option<EventId>, scanned_user: UserId) -> Self {
        Self {
            base_event_id: event_id.map(|e| e.0),
            scanned_user_id: scanned_user.0,
        }
    }
}

/// Response of `POST /create-a-network/`. `data` missing is tolerated.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct CreateNetworkResponse {
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Remote "networking" API as seen by the scan flow.
#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn create_network(&self, req: &CreateNetworkRequest) -> Result<CreateNetworkResponse>;
}

/// String-keyed local persistence (tokens, cached user, scanned ids).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
    Info,
}

/// Notification and navigation surface of a scan UI.
#[async_trait]
pub trait ScanUi: Send + Sync {
    async fn toast(&self, kind: ToastKind, text: &str) -> Result<()>;
    async fn navigate(&self, target: &str) -> Result<()>;
}

/// Supplies raw frames (camera stream). `Ok(None)` means the stream ended.
///
/// Camera permission denial is reported as `Error::PermissionDenied`.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Finds and decodes a QR symbol in a frame. No symbol is `Ok(None)`.
pub trait FrameDecoder: Send + Sync {
    fn decode_frame(&self, frame: &Frame) -> Result<Option<String>>;
}
