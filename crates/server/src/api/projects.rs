//! `POST/GET /v1/projects`, `GET /v1/projects/:alias` — project CRUD
//! sufficient to have somewhere to hang issues off of.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use ie_domain::Project;

use crate::api::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub alias: String,
    pub name: String,
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<Json<Project>, ApiError> {
    let project = state.store.create_project(&req.alias, &req.name)?;
    Ok(Json(project))
}

pub async fn list_projects(State(state): State<AppState>) -> Result<Json<Vec<Project>>, ApiError> {
    Ok(Json(state.store.list_projects()?))
}

pub async fn get_project(State(state): State<AppState>, Path(alias): Path<String>) -> Result<Json<Project>, ApiError> {
    let project = state
        .store
        .get_project_by_alias(&alias)?
        .ok_or_else(|| ie_domain::Error::NotFound(format!("project {alias}")))?;
    Ok(Json(project))
}
