//! Intake, query, removal and attachment retrieval over the store.
//!
//! This is what request-serving layers (HTTP, CLI) talk to. It never sends
//! mail; that is the scheduler's job.

use capsule_core::error::{CapsuleError, Result};
use capsule_core::types::{Capsule, NewCapsule};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::attachments::AttachmentStore;
use crate::store::{CapsuleStore, StateCounts};

/// Uploaded attachment content.
#[derive(Debug, Clone)]
pub struct DraftAttachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// A validated request to schedule a delivery.
#[derive(Debug, Clone)]
pub struct CapsuleDraft {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub due_at: DateTime<Utc>,
    pub attachment: Option<DraftAttachment>,
}

#[derive(Clone)]
pub struct CapsuleService {
    store: Arc<CapsuleStore>,
    attachments: Arc<AttachmentStore>,
}

impl CapsuleService {
    pub fn new(store: Arc<CapsuleStore>, attachments: Arc<AttachmentStore>) -> Self {
        Self { store, attachments }
    }

    pub fn store(&self) -> &Arc<CapsuleStore> {
        &self.store
    }

    /// Store the attachment (if any), then the capsule. If the capsule cannot
    /// be stored the attachment bytes are released again.
    pub fn create(&self, draft: CapsuleDraft) -> Result<Capsule> {
        let record = NewCapsule::new(draft.recipient, draft.subject, draft.body, draft.due_at);
        record.validate()?;

        let record = match draft.attachment {
            Some(upload) => {
                if upload.filename.trim().is_empty() {
                    return Err(CapsuleError::Validation(
                        "attachment filename is required".into(),
                    ));
                }
                let reference = self.attachments.save(&upload.filename, &upload.bytes)?;
                record.with_attachment(reference)
            }
            None => record,
        };

        let id = match self.store.create(&record) {
            Ok(id) => id,
            Err(e) => {
                if let Some(reference) = &record.attachment {
                    self.attachments.release(reference);
                }
                return Err(e);
            }
        };
        self.store.get(id)
    }

    pub fn list(&self) -> Result<Vec<Capsule>> {
        self.store.list()
    }

    pub fn get(&self, id: i64) -> Result<Capsule> {
        self.store.get(id)
    }

    pub fn counts(&self) -> Result<StateCounts> {
        self.store.count_by_state()
    }

    /// Delete the record first, then release its attachment. A failed release
    /// is logged and does not fail the delete.
    pub fn delete(&self, id: i64) -> Result<Capsule> {
        let removed = self.store.delete(id)?;
        if let Some(reference) = &removed.attachment {
            self.attachments.release(reference);
        }
        Ok(removed)
    }

    /// Attachment display name and bytes for a capsule.
    pub async fn attachment(&self, id: i64) -> Result<(String, Vec<u8>)> {
        let capsule = self.store.get(id)?;
        let Some(reference) = capsule.attachment else {
            return Err(CapsuleError::NotFound(id));
        };
        if !reference.path.exists() {
            tracing::warn!(
                "Attachment file for capsule {id} not found on disk: {}",
                reference.path.display()
            );
            return Err(CapsuleError::NotFound(id));
        }
        if !self.attachments.contains(&reference) {
            tracing::error!(
                "Refusing to serve attachment outside upload folder: {}",
                reference.path.display()
            );
            return Err(CapsuleError::Forbidden(format!(
                "attachment of capsule {id} is outside the upload directory"
            )));
        }

        let bytes = self
            .attachments
            .read(&reference)
            .await
            .map_err(|_| CapsuleError::NotFound(id))?;
        Ok((reference.filename, bytes))
    }
}
