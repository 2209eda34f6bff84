//! In-memory transport that records every message instead of sending it.
//!
//! Used by tests.

use async_trait::async_trait;
use capsule_core::error::TransportError;
use capsule_core::traits::MailTransport;
use capsule_core::types::OutgoingMail;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutgoingMail>>,
    /// recipient -> error detail
    failures: Mutex<HashMap<String, String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send to `recipient` fail with `detail` until cleared.
    pub fn fail_for(&self, recipient: &str, detail: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(recipient.to_string(), detail.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    /// Messages accepted so far, in send order.
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, mail: OutgoingMail) -> Result<(), TransportError> {
        let failure = self
            .failures
            .lock()
            .map_err(|e| TransportError::Send(format!("Lock: {e}")))?
            .get(&mail.to)
            .cloned();
        if let Some(detail) = failure {
            return Err(TransportError::Send(detail));
        }

        tracing::info!("📝 Recorded mail to {} ({})", mail.to, mail.subject);
        self.sent
            .lock()
            .map_err(|e| TransportError::Send(format!("Lock: {e}")))?
            .push(mail);
        Ok(())
    }
}
