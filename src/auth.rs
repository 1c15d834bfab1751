//! HTTP Basic authentication against an injected credential store.

use axum::extract::Extension;
use axum::http::{HeaderMap, HeaderValue, Method, Request, header};
use axum::{body::Body as AxumBody, middleware, response::Response};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Basic};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AUTH_REALM;
use crate::error::DavError;

/// Read-only credential lookup.
pub trait CredentialStore: Send + Sync + 'static {
    fn verify(&self, username: &str, password: &str) -> bool;
}

pub type SharedCredentials = Arc<dyn CredentialStore>;

/// A single username/password pair fixed at startup.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    username: String,
    password: String,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl CredentialStore for StaticCredentials {
    fn verify(&self, username: &str, password: &str) -> bool {
        username == self.username && password == self.password
    }
}

/// Rejects requests without valid Basic credentials. OPTIONS passes through
/// so capability discovery works anonymously.
pub async fn auth_middleware(
    Extension(credentials): Extension<SharedCredentials>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, DavError> {
    if req.method() == Method::OPTIONS {
        return Ok(next.run(req).await);
    }

    match req.headers().typed_get::<Authorization<Basic>>() {
        Some(basic) if credentials.verify(basic.username(), basic.password()) => {
            return Ok(next.run(req).await);
        }
        Some(basic) => {
            warn!(username = basic.username(), "rejected credentials");
        }
        None => {
            debug!(method = %req.method(), "missing basic credentials");
        }
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static(AUTH_REALM),
    );
    Err(DavError::Unauthorized(headers))
}
