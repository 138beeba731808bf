//! Authentication middleware for the admin API.
//!
//! Implements bearer token authentication. CORS preflight requests and the
//! liveness route are always let through.

use crate::error::Error;

use actix_web::{
    Error as ActixError,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use futures::future::{LocalBoxFuture, Ready, ready};
use std::sync::Arc;

/// Routes reachable without a token
const PUBLIC_PATHS: [&str; 1] = ["/health"];

/// Authentication middleware factory
#[derive(Clone)]
pub struct Authentication {
    token: Option<Arc<str>>,
}

impl Authentication {
    /// Require `token` on every request; `None` disables authentication
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: token.map(Arc::from),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Transform = AuthenticationMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthenticationMiddleware {
            service,
            token: self.token.clone(),
        }))
    }
}

/// Authentication middleware implementation
pub struct AuthenticationMiddleware<S> {
    service: S,
    token: Option<Arc<str>>,
}

impl<S> AuthenticationMiddleware<S> {
    fn is_authorized(&self, req: &ServiceRequest) -> bool {
        let Some(expected) = &self.token else {
            return true;
        };
        if req.method() == "OPTIONS" || PUBLIC_PATHS.contains(&req.path()) {
            return true;
        }

        req.headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .is_some_and(|token| token == &**expected)
    }
}

impl<S, B> Service<ServiceRequest> for AuthenticationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if self.is_authorized(&req) {
            let fut = self.service.call(req);
            return Box::pin(async move {
                let res = fut.await?;
                Ok(res)
            });
        }

        tracing::warn!(path = %req.path(), "Authentication failed: invalid or missing bearer token");
        Box::pin(async move {
            Err(Error::Unauthorized("Invalid or missing bearer token".to_string()).into())
        })
    }
}
