//! # Capsule Scheduler
//!
//! Persistence and delivery of scheduled mail.
//!
//! ## Architecture
//! ```text
//! DeliveryScheduler (tokio interval, one loop per process)
//!   └── tick(now)
//!         ├── CapsuleStore::find_due(now)      pending|failed, due_at <= now
//!         └── DeliveryExecutor::execute(capsule)
//!               ├── AttachmentStore::read       missing => failed
//!               ├── MailTransport::send
//!               └── CapsuleStore::update_state  sent | failed + last_error
//!
//! CapsuleService (HTTP / CLI side)
//!   └── create / list / get / delete / attachment
//! ```
//!
//! Failed capsules are retried on every tick until they are sent or deleted.

pub mod attachments;
pub mod engine;
pub mod executor;
pub mod service;
pub mod store;

pub use attachments::AttachmentStore;
pub use engine::{DeliveryScheduler, SchedulerHandle, TickReport};
pub use executor::{DeliveryExecutor, DeliveryOutcome};
pub use service::{CapsuleDraft, CapsuleService, DraftAttachment};
pub use store::{CapsuleStore, StateCounts};
