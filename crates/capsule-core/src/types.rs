//! Delivery record types: the core data model for scheduled mail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::CapsuleError;

/// Lifecycle state of a capsule.
///
/// `Pending -> Sent`, `Pending -> Failed`, `Failed -> Sent`, `Failed -> Failed`.
/// `Sent` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sent => "sent",
            DeliveryState::Failed => "failed",
        }
    }

    /// Whether the scheduler may (re)process a capsule in this state.
    pub fn is_due_eligible(&self) -> bool {
        !matches!(self, DeliveryState::Sent)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryState {
    type Err = CapsuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryState::Pending),
            "sent" => Ok(DeliveryState::Sent),
            "failed" => Ok(DeliveryState::Failed),
            other => Err(CapsuleError::Validation(format!(
                "unknown delivery state '{other}'"
            ))),
        }
    }
}

/// Reference to attachment bytes held by the attachment store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentRef {
    /// Where the bytes live.
    pub path: PathBuf,
    /// Original display filename, used in the outgoing mail.
    pub filename: String,
}

/// A scheduled delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Capsule {
    pub id: i64,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub due_at: DateTime<Utc>,
    pub attachment: Option<AttachmentRef>,
    pub state: DeliveryState,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Capsule {
    /// Due at `now` and still eligible for a delivery attempt.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state.is_due_eligible() && self.due_at <= now
    }
}

/// Fields supplied when persisting a new capsule.
#[derive(Debug, Clone)]
pub struct NewCapsule {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub due_at: DateTime<Utc>,
    pub attachment: Option<AttachmentRef>,
}

impl NewCapsule {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        due_at: DateTime<Utc>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            due_at,
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Reject missing or malformed fields before anything is persisted.
    pub fn validate(&self) -> Result<(), CapsuleError> {
        let recipient = self.recipient.trim();
        if recipient.is_empty() {
            return Err(CapsuleError::Validation("recipient is required".into()));
        }
        if !recipient.contains('@') {
            return Err(CapsuleError::Validation(format!(
                "recipient '{recipient}' is not an email address"
            )));
        }
        if self.subject.trim().is_empty() {
            return Err(CapsuleError::Validation("subject is required".into()));
        }
        if self.body.trim().is_empty() {
            return Err(CapsuleError::Validation("body is required".into()));
        }
        if let Some(attachment) = &self.attachment {
            if attachment.filename.trim().is_empty() {
                return Err(CapsuleError::Validation(
                    "attachment filename is required".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Attachment content carried by an outgoing mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// One message handed to a mail transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<MailAttachment>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft() -> NewCapsule {
        NewCapsule::new("friend@example.com", "Hello", "From the past", Utc::now())
    }

    #[test]
    fn test_state_round_trip_strings() {
        assert_eq!("failed".parse::<DeliveryState>().unwrap(), DeliveryState::Failed);
        assert_eq!(DeliveryState::Sent.to_string(), "sent");
        assert!("bogus".parse::<DeliveryState>().is_err());
    }

    #[test]
    fn test_validate_accepts_complete_draft() {
        assert!(draft().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        let mut d = draft();
        d.subject = "   ".into();
        assert!(matches!(d.validate(), Err(CapsuleError::Validation(_))));

        let mut d = draft();
        d.recipient = "not-an-address".into();
        assert!(matches!(d.validate(), Err(CapsuleError::Validation(_))));

        let d = draft().with_attachment(AttachmentRef {
            path: PathBuf::from("/tmp/x"),
            filename: String::new(),
        });
        assert!(matches!(d.validate(), Err(CapsuleError::Validation(_))));
    }

    #[test]
    fn test_sent_is_never_due() {
        let now = Utc::now();
        let mut capsule = Capsule {
            id: 1,
            recipient: "a@b.c".into(),
            subject: "s".into(),
            body: "b".into(),
            due_at: now - Duration::seconds(5),
            attachment: None,
            state: DeliveryState::Pending,
            last_error: None,
            created_at: now,
        };
        assert!(capsule.is_due(now));
        capsule.state = DeliveryState::Sent;
        assert!(!capsule.is_due(now));
        capsule.state = DeliveryState::Failed;
        assert!(!capsule.is_due(now - Duration::seconds(10)));
    }
}
