/// API routes and handlers
pub mod auth;
pub mod middleware;

use crate::context::AppContext;
use axum::Router;
use std::sync::Arc;

/// Build API routes
pub fn routes() -> Router<Arc<AppContext>> {
    Router::new().merge(auth::routes())
}
