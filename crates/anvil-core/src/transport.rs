//! Outbound transport contract.
//!
//! The engine only sends messages in one place: the rate-limit
//! middleware's soft-mode warning. Everything else about outbound
//! messaging belongs to the concrete platform adapter.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::SendError;
use crate::update::ChatRef;

/// Minimal outbound client consumed by the engine.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Sends a plain text message to the given chat.
    async fn send_text(
        &self,
        chat: ChatRef,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SendError>;
}
