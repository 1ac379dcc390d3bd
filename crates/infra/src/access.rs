//! Ordered, fail-closed access checks for job-scoped operations.

use std::sync::Arc;

use tracing::{debug, warn};

use jobstream_auth::{secure_eq, Credentials, KeyError, TenantKeys};
use jobstream_core::{CoreError, CoreResult, JobId, JobRecord, TenantId};

use crate::state::JobStateStore;

/// What the caller wants to do with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessScope {
    /// Read status or cancel; guarded by the tenant key at the HTTP layer.
    Manage,
    /// Stream events or download results; requires the job token.
    Stream,
}

#[derive(Clone)]
pub struct AccessGate {
    state: Arc<dyn JobStateStore>,
    tenant_keys: Arc<TenantKeys>,
}

impl core::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccessGate")
            .field("tenant_keys", &self.tenant_keys)
            .finish_non_exhaustive()
    }
}

impl AccessGate {
    pub fn new(state: Arc<dyn JobStateStore>, tenant_keys: Arc<TenantKeys>) -> Self {
        Self { state, tenant_keys }
    }

    /// Check the tenant-level shared key.
    ///
    /// Missing or wrong keys are `Forbidden`; a tenant with no configured key
    /// reads as `NotFound`.
    pub fn verify_tenant_key(&self, tenant: &TenantId, creds: &Credentials) -> CoreResult<()> {
        self.tenant_keys
            .verify(tenant, creds.tenant_key.as_deref())
            .map_err(|err| match err {
                KeyError::Missing => CoreError::forbidden("missing tenant key"),
                KeyError::Invalid => CoreError::forbidden("invalid tenant key"),
                KeyError::UnknownTenant(_) => CoreError::NotFound,
            })
    }

    /// Run the checks in order and return the record on success:
    ///
    /// 1. the job exists and belongs to `tenant`, else `NotFound`
    /// 2. a stored session qualifier must be matched: missing is
    ///    `Unauthorized`, mismatched is `Forbidden`
    /// 3. for [`AccessScope::Stream`], the job token must match, else `Forbidden`
    pub async fn authorize(
        &self,
        tenant: &TenantId,
        job_id: JobId,
        creds: &Credentials,
        scope: AccessScope,
    ) -> CoreResult<JobRecord> {
        let record = self
            .state
            .get_job_state(job_id)
            .await?
            .filter(|r| &r.tenant_id == tenant)
            .ok_or(CoreError::NotFound)?;

        if let Some(expected) = record.session_qualifier.as_deref() {
            let presented = creds
                .session
                .as_deref()
                .ok_or_else(|| CoreError::unauthorized("missing client session"))?;
            if !secure_eq(presented, expected) {
                debug!(job_id = %job_id, session = ?creds.session_hint(), "session mismatch");
                return Err(CoreError::forbidden("client session mismatch"));
            }
        }

        if scope == AccessScope::Stream {
            let token = creds
                .token
                .as_deref()
                .ok_or_else(|| CoreError::forbidden("missing job token"))?;
            if !secure_eq(token, record.job_token.expose()) {
                return Err(CoreError::forbidden("invalid job token"));
            }

            // The token is sufficient; a bad tenant key alongside it is only noted.
            if creds.tenant_key.is_some() {
                if let Err(err) = self.verify_tenant_key(tenant, creds) {
                    warn!(job_id = %job_id, tenant_id = %tenant, error = %err, "tenant key presented with stream request did not verify");
                }
            }
        }

        Ok(record)
    }
}
