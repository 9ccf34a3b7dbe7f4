//! Shared state for the router service.

use crate::router::RequestRouter;

/// State shared by the HTTP handlers.
pub struct AppState {
    pub router: RequestRouter,
}

impl AppState {
    pub fn new(router: RequestRouter) -> Self {
        Self { router }
    }
}
