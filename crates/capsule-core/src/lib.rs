//! # Capsule Core
//!
//! Configuration, error types, the delivery record model and the
//! [`MailTransport`](traits::MailTransport) seam shared by every Capsule crate.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::CapsuleConfig;
pub use error::{CapsuleError, Result, TransportError};
pub use traits::MailTransport;
pub use types::{AttachmentRef, Capsule, DeliveryState, MailAttachment, NewCapsule, OutgoingMail};
