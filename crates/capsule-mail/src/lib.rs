//! # Capsule Mail
//!
//! Mail transport adapters behind the [`MailTransport`] contract.
//!
//! - [`SmtpTransport`]: lettre over an external relay (the production path)
//! - [`RecordingTransport`]: records messages in memory

pub mod recording;
pub mod smtp;

use capsule_core::config::MailConfig;
use capsule_core::traits::MailTransport;
use std::sync::Arc;

pub use recording::RecordingTransport;
pub use smtp::{SmtpTransport, missing_credentials};

/// Create the SMTP transport described by `config`.
///
/// Construction never fails: missing credentials surface on every send as
/// `TransportError::NotConfigured`, so capsules are marked failed instead of
/// the process refusing to start.
pub fn build_transport(config: &MailConfig) -> Arc<dyn MailTransport> {
    if let Some(missing) = smtp::missing_credentials(config) {
        tracing::warn!(
            "⚠️ {missing}, deliveries will fail until MAIL_USERNAME/MAIL_PASSWORD are set"
        );
    }
    tracing::info!(
        "📧 SMTP transport: {}:{} (ssl={}, starttls={})",
        config.host,
        config.port,
        config.use_ssl,
        config.use_tls
    );
    Arc::new(SmtpTransport::new(config.clone()))
}
