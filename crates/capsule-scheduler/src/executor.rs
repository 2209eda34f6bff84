//! Delivery executor: one due capsule in, one transport attempt and one
//! state write out.

use capsule_core::error::TransportError;
use capsule_core::traits::MailTransport;
use capsule_core::types::{Capsule, DeliveryState, MailAttachment, OutgoingMail};
use std::sync::Arc;

use crate::attachments::AttachmentStore;
use crate::store::CapsuleStore;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// Carries the text written to `last_error`.
    Failed(String),
}

pub struct DeliveryExecutor {
    store: Arc<CapsuleStore>,
    attachments: Arc<AttachmentStore>,
    transport: Arc<dyn MailTransport>,
    sender: String,
}

impl DeliveryExecutor {
    pub fn new(
        store: Arc<CapsuleStore>,
        attachments: Arc<AttachmentStore>,
        transport: Arc<dyn MailTransport>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            store,
            attachments,
            transport,
            sender: sender.into(),
        }
    }

    /// Attempt delivery and record the outcome. Never fails: transport and
    /// attachment errors become a `failed` state, a failed state write is
    /// logged.
    pub async fn execute(&self, capsule: &Capsule) -> DeliveryOutcome {
        tracing::info!(
            "Attempting capsule {} to {} (subject: {}, due {})",
            capsule.id,
            capsule.recipient,
            capsule.subject,
            capsule.due_at.to_rfc3339()
        );

        let outcome = match self.attempt(capsule).await {
            Ok(()) => {
                tracing::info!("✅ Capsule {} sent via {}", capsule.id, self.transport.name());
                DeliveryOutcome::Sent
            }
            Err(e) => {
                tracing::error!("❌ Capsule {} failed: {e}", capsule.id);
                DeliveryOutcome::Failed(e.to_string())
            }
        };

        let write = match &outcome {
            DeliveryOutcome::Sent => self.store.update_state(capsule.id, DeliveryState::Sent, None),
            DeliveryOutcome::Failed(detail) => {
                self.store
                    .update_state(capsule.id, DeliveryState::Failed, Some(detail.as_str()))
            }
        };
        match write {
            Ok(true) => {}
            Ok(false) => tracing::info!(
                "Capsule {} was removed or already sent before its outcome was recorded",
                capsule.id
            ),
            Err(e) => tracing::error!("Failed to record outcome for capsule {}: {e}", capsule.id),
        }

        outcome
    }

    async fn attempt(&self, capsule: &Capsule) -> Result<(), TransportError> {
        let attachment = match &capsule.attachment {
            Some(reference) => {
                let bytes = self.attachments.read(reference).await?;
                tracing::info!("Attached file: {}", reference.filename);
                Some(MailAttachment {
                    filename: reference.filename.clone(),
                    bytes,
                })
            }
            None => None,
        };

        let mail = OutgoingMail {
            from: self.sender.clone(),
            to: capsule.recipient.clone(),
            subject: capsule.subject.clone(),
            body: capsule.body.clone(),
            attachment,
        };
        self.transport.send(mail).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::types::{AttachmentRef, NewCapsule};
    use capsule_mail::RecordingTransport;
    use chrono::{Duration, Utc};
    use std::path::PathBuf;

    struct Fixture {
        store: Arc<CapsuleStore>,
        attachments: Arc<AttachmentStore>,
        transport: Arc<RecordingTransport>,
        executor: DeliveryExecutor,
        dir: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    fn fixture() -> Fixture {
        let dir = std::env::temp_dir().join(format!("capsule-exec-{}", uuid::Uuid::new_v4()));
        let store = Arc::new(CapsuleStore::open_in_memory().unwrap());
        let attachments = Arc::new(AttachmentStore::new(&dir).unwrap());
        let transport = Arc::new(RecordingTransport::new());
        let executor = DeliveryExecutor::new(
            store.clone(),
            attachments.clone(),
            transport.clone(),
            "capsule@example.com",
        );
        Fixture {
            store,
            attachments,
            transport,
            executor,
            dir,
        }
    }

    fn due(to: &str) -> NewCapsule {
        NewCapsule::new(to, "Hello", "From the past", Utc::now() - Duration::seconds(1))
    }

    #[tokio::test]
    async fn test_success_marks_sent() {
        let f = fixture();
        let id = f.store.create(&due("me@example.com")).unwrap();
        let capsule = f.store.get(id).unwrap();

        assert_eq!(f.executor.execute(&capsule).await, DeliveryOutcome::Sent);

        let capsule = f.store.get(id).unwrap();
        assert_eq!(capsule.state, DeliveryState::Sent);
        assert!(capsule.last_error.is_none());
        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "capsule@example.com");
        assert_eq!(sent[0].to, "me@example.com");
        assert!(sent[0].attachment.is_none());
    }

    #[tokio::test]
    async fn test_transport_error_is_persisted_verbatim() {
        let f = fixture();
        f.transport.fail_for("me@example.com", "535 authentication failed");
        let id = f.store.create(&due("me@example.com")).unwrap();
        let capsule = f.store.get(id).unwrap();

        let outcome = f.executor.execute(&capsule).await;
        assert_eq!(outcome, DeliveryOutcome::Failed("535 authentication failed".into()));

        let capsule = f.store.get(id).unwrap();
        assert_eq!(capsule.state, DeliveryState::Failed);
        assert_eq!(capsule.last_error.as_deref(), Some("535 authentication failed"));
    }

    #[tokio::test]
    async fn test_attachment_is_sent_with_display_name() {
        let f = fixture();
        let reference = f.attachments.save("letter.txt", b"dear me").unwrap();
        let id = f.store.create(&due("me@example.com").with_attachment(reference)).unwrap();

        f.executor.execute(&f.store.get(id).unwrap()).await;

        let sent = f.transport.sent();
        let attachment = sent[0].attachment.as_ref().unwrap();
        assert_eq!(attachment.filename, "letter.txt");
        assert_eq!(attachment.bytes, b"dear me");
    }

    #[tokio::test]
    async fn test_missing_attachment_fails_without_sending() {
        let f = fixture();
        let reference = AttachmentRef {
            path: f.dir.join("vanished.pdf"),
            filename: "vanished.pdf".into(),
        };
        let id = f.store.create(&due("me@example.com").with_attachment(reference)).unwrap();

        let outcome = f.executor.execute(&f.store.get(id).unwrap()).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed(_)));
        assert_eq!(f.transport.sent_count(), 0);

        let capsule = f.store.get(id).unwrap();
        assert_eq!(capsule.state, DeliveryState::Failed);
        assert!(capsule.last_error.unwrap().contains("attachment missing"));
    }

    #[tokio::test]
    async fn test_deleted_during_delivery_is_not_resurrected() {
        let f = fixture();
        let id = f.store.create(&due("me@example.com")).unwrap();
        let capsule = f.store.get(id).unwrap();
        f.store.delete(id).unwrap();

        assert_eq!(f.executor.execute(&capsule).await, DeliveryOutcome::Sent);
        assert!(f.store.list().unwrap().is_empty());
    }
}
