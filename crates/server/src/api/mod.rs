//! Minimal axum binding over the Orchestration API (§10): enough routes
//! to create projects/issues, drive every orchestration operation, read
//! logs, and subscribe to the event bus over SSE. Auth, multi-tenant
//! scoping and static asset serving are out of scope here, same as the
//! teacher's `api::router` composes its own handler modules.

use axum::routing::{get, patch, post};
use axum::Router;

use ie_domain::Error;

use crate::state::AppState;

mod engines;
mod events;
mod health;
mod issues;
mod projects;

pub use health::ApiError;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/v1/projects", post(projects::create_project).get(projects::list_projects))
        .route("/v1/projects/:alias", get(projects::get_project))
        .route("/v1/projects/:project/issues", post(issues::create_issue))
        .route("/v1/issues/:id", patch(issues::patch_issue))
        .route("/v1/issues/:id/logs", get(issues::list_logs))
        .route("/v1/issues/:id/events", get(events::issue_events))
        .route("/v1/issues/:id/follow-up", post(issues::follow_up))
        .route("/v1/issues/:id/cancel", post(issues::cancel))
        .route("/v1/issues/:id/restart", post(issues::restart))
        .route("/v1/engines", get(engines::list_engines))
        .with_state(state)
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::NotFound(_) => axum::http::StatusCode::NOT_FOUND,
            Error::InvalidState(_) => axum::http::StatusCode::CONFLICT,
            Error::LockAcquireTimeout(_) | Error::LockExecutionTimeout(_) => axum::http::StatusCode::GATEWAY_TIMEOUT,
            Error::LockQueueFull(_) => axum::http::StatusCode::TOO_MANY_REQUESTS,
            Error::Config(_) => axum::http::StatusCode::BAD_REQUEST,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError { status, message: e.to_string() }
    }
}
