use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use jobstream_core::{CoreError, JobStatus, NewJob, TenantId};
use jobstream_infra::{AccessScope, JobSubmission, ResourceKind};

use super::common::{parse_job_id, parse_tenant};
use crate::app::dto::{CancelResponse, CreateJobResponse, JobView};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::RequestContext;

fn parse_params(body: &Bytes) -> Result<JsonValue, CoreError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(JsonValue::Object(Default::default()));
    }
    serde_json::from_slice(body).map_err(|e| CoreError::validation(format!("job params are not valid JSON: {e}")))
}

async fn release_slot(services: &AppServices, tenant: &TenantId, resource: &ResourceKind) {
    if let Err(err) = services.limiter.release(tenant, resource).await {
        warn!(tenant_id = %tenant, resource = %resource, error = %err, "failed to release concurrency slot");
    }
}

/// POST /stores/:tenant_id/jobs/:job_type
///
/// Takes a concurrency slot for the tenant, records the job and queues it.
/// The slot is held until the job ends.
pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path((tenant, job_type)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    let tenant = parse_tenant(&tenant)?;
    services.gate.verify_tenant_key(&tenant, ctx.credentials())?;

    if !services.runner.accepts(&job_type) {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "unknown_job_type",
            format!("no handler for job type {job_type}"),
        ));
    }
    let params = parse_params(&body)?;

    let resource = ResourceKind::for_job_type(&job_type);
    let ceiling = services.ceilings.for_resource(&resource);
    services
        .limiter
        .acquire(&tenant, &resource, ceiling)
        .await
        .map_err(CoreError::from)?;

    let mut new = NewJob::new(tenant.clone(), job_type.clone(), params.clone());
    if let Some(session) = &ctx.credentials().session {
        new = new.with_session(session.clone());
    }
    let (job_id, token) = match services.state.create_job(new).await {
        Ok(created) => created,
        Err(err) => {
            release_slot(&services, &tenant, &resource).await;
            return Err(CoreError::from(err).into());
        }
    };

    let submission = JobSubmission {
        job_id,
        tenant_id: tenant.clone(),
        job_type: job_type.clone(),
        params,
        slot: None,
    }
    .with_slot(resource.clone());

    if let Err(err) = services.runner.submit(submission) {
        warn!(job_id = %job_id, error = %err, "job rejected by runner");
        // Leave no orphaned queued record behind.
        if let Err(cancel_err) = services.state.cancel_job(job_id).await {
            warn!(job_id = %job_id, error = %cancel_err, "failed to cancel rejected job");
        }
        release_slot(&services, &tenant, &resource).await;
        return Err(err.into());
    }

    info!(job_id = %job_id, tenant_id = %tenant, job_type = %job_type, "job queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(CreateJobResponse {
            job_id,
            job_token: token.expose().to_string(),
            status: JobStatus::Queued,
        }),
    ))
}

/// GET /stores/:tenant_id/jobs/:job_id
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path((tenant, job_id)): Path<(String, String)>,
) -> Result<Json<JobView>, ApiError> {
    let tenant = parse_tenant(&tenant)?;
    services.gate.verify_tenant_key(&tenant, ctx.credentials())?;
    let job_id = parse_job_id(&job_id)?;

    let record = services
        .gate
        .authorize(&tenant, job_id, ctx.credentials(), AccessScope::Manage)
        .await?;
    Ok(Json(record.into()))
}

/// POST /stores/:tenant_id/jobs/:job_id/cancel
///
/// Idempotent. The handler stops at its next cancellation check.
pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path((tenant, job_id)): Path<(String, String)>,
) -> Result<Json<CancelResponse>, ApiError> {
    let tenant = parse_tenant(&tenant)?;
    services.gate.verify_tenant_key(&tenant, ctx.credentials())?;
    let job_id = parse_job_id(&job_id)?;

    services
        .gate
        .authorize(&tenant, job_id, ctx.credentials(), AccessScope::Manage)
        .await?;

    if !services.state.cancel_job(job_id).await.map_err(CoreError::from)? {
        return Err(CoreError::NotFound.into());
    }
    let status = services
        .state
        .get_job_state(job_id)
        .await
        .map_err(CoreError::from)?
        .map(|rec| rec.status)
        .ok_or(CoreError::NotFound)?;

    info!(job_id = %job_id, tenant_id = %tenant, status = %status, "cancel requested");
    Ok(Json(CancelResponse { job_id, status }))
}

/// GET /stores/:tenant_id/jobs/:job_id/data/:key
///
/// Result blobs stored by the handler; needs the job token.
pub async fn download_data(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path((tenant, job_id, key)): Path<(String, String, String)>,
) -> Result<Json<JsonValue>, ApiError> {
    let tenant = parse_tenant(&tenant)?;
    let job_id = parse_job_id(&job_id)?;

    services
        .gate
        .authorize(&tenant, job_id, ctx.credentials(), AccessScope::Stream)
        .await?;

    services
        .state
        .get_job_data(job_id, &key)
        .await
        .map_err(CoreError::from)?
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "data_not_found", format!("no data under {key}")))
}
