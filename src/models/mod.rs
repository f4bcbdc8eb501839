//! Data models for the draft-asset approval and deployment pipeline.
//!
//! Stored objects map to the metadata table via `sqlx::FromRow`; everything
//! else is a derived or wire-level shape serialized as JSON via `serde`.

pub mod batch;
pub mod deploy;
pub mod draft;
pub mod object;
pub mod queue;
