//! `jobstream-core`: job domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the job lifecycle, the progress projection and the error
//! taxonomy shared by every other crate.

pub mod error;
pub mod id;
pub mod job;
pub mod status;

pub use error::{CoreError, CoreResult};
pub use id::{JobId, TenantId};
pub use job::{JobRecord, JobSnapshot, JobToken, Metrics, NewJob, Progress, percent};
pub use status::JobStatus;
