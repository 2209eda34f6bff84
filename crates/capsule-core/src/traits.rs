//! Trait seams between the scheduler and the outside world.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::OutgoingMail;

/// A mail relay that can deliver one message per call.
///
/// Implementations own connection setup, authentication and encryption.
/// They never retry: a failed call returns a single [`TransportError`] and the
/// scheduler decides when to try again.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn send(&self, mail: OutgoingMail) -> Result<(), TransportError>;
}
