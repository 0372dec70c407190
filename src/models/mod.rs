//! Core data models for the storage reclamation engine.
//!
//! These types describe projects, their tracked uploads, objects as the
//! store reports them, and the outcomes of cleanup runs. Tracker rows map to
//! database tables via `sqlx::FromRow`; everything serializes as JSON via
//! `serde` for the admin surface.

pub mod deletion;
pub mod job;
pub mod naming;
pub mod object;
pub mod project;
pub mod tracked_file;
