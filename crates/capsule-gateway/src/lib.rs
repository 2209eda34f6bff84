//! # Capsule Gateway
//!
//! HTTP API over the capsule service:
//!
//! | Method | Path | |
//! |---|---|---|
//! | `POST` | `/api/capsules` | multipart intake |
//! | `GET` | `/api/capsules` | list |
//! | `GET` | `/api/capsules/{id}` | one capsule |
//! | `DELETE` | `/api/capsules/{id}` | remove capsule and attachment |
//! | `GET` | `/api/capsules/{id}/attachment` | download attachment |
//! | `GET` | `/health` | liveness and state counts |
//!
//! The gateway never sends mail; the scheduler loop does.

pub mod error;
pub mod form;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, build_router, serve};
