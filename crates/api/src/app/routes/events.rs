use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{header, HeaderValue},
    response::{
        sse::{Event as SseEvent, Sse},
        IntoResponse, Response,
    },
};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{debug, info};

use jobstream_core::CoreError;
use jobstream_events::{EventOffset, StreamFrame};
use jobstream_infra::{AccessScope, StreamSession};

use super::common::{parse_job_id, parse_tenant};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::RequestContext;

fn to_sse(frame: StreamFrame) -> SseEvent {
    if frame.is_heartbeat() {
        return SseEvent::default().comment(frame.data());
    }
    let mut event = SseEvent::default().data(frame.data());
    if let Some(name) = frame.name() {
        event = event.event(name);
    }
    if let Some(id) = frame.id() {
        event = event.id(id);
    }
    event
}

fn resume_offset(ctx: &RequestContext) -> Result<Option<EventOffset>, CoreError> {
    ctx.last_event_id()
        .map(|raw| {
            raw.parse::<EventOffset>()
                .map_err(|e| CoreError::validation(e.to_string()))
        })
        .transpose()
}

/// GET /stores/:tenant_id/jobs/:job_id/events
///
/// Server-sent events for one job. Requires the job token (`X-Job-Token` or
/// `?token=`). Resumes after `Last-Event-ID` (or `?last_event_id=`) when
/// given, otherwise delivers only events appended after connecting.
pub async fn stream_events(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path((tenant, job_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let tenant = parse_tenant(&tenant)?;
    let job_id = parse_job_id(&job_id)?;

    services
        .gate
        .authorize(&tenant, job_id, ctx.credentials(), AccessScope::Stream)
        .await?;
    let resume = resume_offset(&ctx)?;

    info!(job_id = %job_id, tenant_id = %tenant, resume = ?resume, "viewer connected");
    let StreamSession { frames, outcome } = services.streamer.open(job_id, resume);
    tokio::spawn(async move {
        match outcome.await {
            Ok(outcome) => debug!(job_id = %job_id, ?outcome, "viewer stream ended"),
            Err(err) => debug!(job_id = %job_id, error = %err, "viewer stream task aborted"),
        }
    });

    let frames = ReceiverStream::new(frames).map(|frame| Ok::<_, Infallible>(to_sse(frame)));

    let mut res = Sse::new(frames).into_response();
    let headers = res.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstream_auth::Credentials;

    #[test]
    fn resume_offset_is_validated() {
        let ctx = RequestContext::new(Credentials::new(), Some("1700000000000-4".to_string()));
        assert_eq!(resume_offset(&ctx).unwrap(), Some(EventOffset::new(1_700_000_000_000, 4)));

        let bad = RequestContext::new(Credentials::new(), Some("yesterday".to_string()));
        assert!(matches!(resume_offset(&bad), Err(CoreError::Validation(_))));

        assert_eq!(resume_offset(&RequestContext::default()).unwrap(), None);
    }
}
