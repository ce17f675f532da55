//! Outbound HTTP handling for orchestrations.

use std::convert::Infallible;

use axum::{Router, body::Body, http::Request, response::Response};
use tower::util::BoxCloneService;
use tower_http::trace::TraceLayer;

/// Service that answers HTTP calls made by orchestrator functions.
pub type HttpHandler = BoxCloneService<Request<Body>, Response, Infallible>;

/// Creates the handler used by [`OrchestrationContext::call_http`].
///
/// [`OrchestrationContext::call_http`]: crate::OrchestrationContext::call_http
pub trait HttpHandlerFactory: Send + Sync {
    fn create_http_handler(&self) -> HttpHandler;
}

/// Routes calls through an axum [`Router`].
///
/// The default router has no routes, so every call gets `404 Not Found`.
/// Tests supply their own router to fake remote endpoints.
#[derive(Clone)]
pub struct DefaultHttpHandlerFactory {
    router: Router,
}

impl Default for DefaultHttpHandlerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DefaultHttpHandlerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultHttpHandlerFactory").finish_non_exhaustive()
    }
}

impl DefaultHttpHandlerFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::with_router(Router::new())
    }

    #[must_use]
    pub fn with_router(router: Router) -> Self {
        Self {
            router: router.layer(TraceLayer::new_for_http()),
        }
    }
}

impl HttpHandlerFactory for DefaultHttpHandlerFactory {
    fn create_http_handler(&self) -> HttpHandler {
        BoxCloneService::new(self.router.clone())
    }
}
