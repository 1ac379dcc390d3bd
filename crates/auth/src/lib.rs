//! `jobstream-auth`: secret handling for job access (pure, no HTTP, no storage).
//!
//! Three kinds of secret guard a job:
//! - the per-job token handed out at creation (`secret`)
//! - an optional session qualifier bound at creation (`credentials`)
//! - the tenant-level shared key (`tenant_keys`)
//!
//! Every comparison goes through [`secure_eq`].

pub mod credentials;
pub mod secret;
pub mod tenant_keys;

pub use credentials::Credentials;
pub use secret::{generate_token, secure_eq, TOKEN_BYTES};
pub use tenant_keys::{KeyError, TenantKeys, TenantKeysError};
