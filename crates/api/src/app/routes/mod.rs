use axum::{
    routing::{get, post},
    Router,
};

pub mod events;
pub mod jobs;
pub mod system;

/// Routes scoped to one tenant (`/stores/:tenant_id/...`).
///
/// Creating a job (POST) and reading one (GET) share a path; the last
/// segment is a job type for the former and a job id for the latter.
pub fn router() -> Router {
    Router::new()
        .route(
            "/stores/:tenant_id/jobs/:job",
            post(jobs::create_job).get(jobs::get_job),
        )
        .route("/stores/:tenant_id/jobs/:job/cancel", post(jobs::cancel_job))
        .route("/stores/:tenant_id/jobs/:job/events", get(events::stream_events))
        .route("/stores/:tenant_id/jobs/:job/data/:key", get(jobs::download_data))
}

pub(crate) mod common {
    use jobstream_core::{CoreError, JobId, TenantId};

    pub fn parse_tenant(raw: &str) -> Result<TenantId, CoreError> {
        TenantId::parse(raw)
    }

    /// Malformed ids read as unknown jobs.
    pub fn parse_job_id(raw: &str) -> Result<JobId, CoreError> {
        raw.parse().map_err(|_| CoreError::NotFound)
    }
}
