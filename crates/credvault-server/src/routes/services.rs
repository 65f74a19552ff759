//! Service routes: `/v1/services/*`
//!
//! Service CRUD is reserved to superusers. Grants are managed by admins of
//! the receiving group, and a service key may be rotated by an admin of
//! any group that currently holds a grant on it.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use credvault_core::ids::{GroupId, ServiceGroupId, ServiceId};
use credvault_core::metadata::Metadata;
use credvault_core::model::{Grant, NewGrant, NewService, Service, ServiceUpdate};
use credvault_core::rotation::ServiceKeyRotation;

use super::double_option;
use crate::error::AppError;
use crate::middleware::AuthContext;
use crate::state::AppState;

/// Build the `/v1/services` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_service).get(list_services))
        .route(
            "/{id}",
            get(get_service).patch(update_service).delete(delete_service),
        )
        .route("/{id}/grants", get(list_grants).post(grant_access))
        .route("/{id}/grants/{group}", delete(revoke_access))
        .route("/{id}/rotate-key", post(rotate_key))
}

// ── Request / Response types ─────────────────────────────────────────

/// Request body for `POST /v1/services`.
#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub service_group_id: ServiceGroupId,
    #[serde(default)]
    pub parent_id: Option<ServiceGroupId>,
    pub url: String,
    /// Secret ciphertext under the service key.
    pub secret: String,
    /// A flat JSON object of scalar values.
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Request body for `PATCH /v1/services/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<ServiceGroupId>>,
    #[serde(default)]
    pub url: Option<String>,
    /// New ciphertext under the current service key.
    #[serde(default)]
    pub secret: Option<String>,
    /// Replaces the whole mapping.
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListServicesQuery {
    pub service_group_id: Option<ServiceGroupId>,
}

/// Request body for `POST /v1/services/{id}/grants`.
#[derive(Debug, Deserialize)]
pub struct GrantAccessRequest {
    pub group_id: GroupId,
    /// The service key wrapped for the group's public key.
    pub wrapped_service_key: String,
}

#[derive(Debug, Serialize)]
pub struct ServiceListResponse {
    pub services: Vec<Service>,
}

#[derive(Debug, Serialize)]
pub struct GrantListResponse {
    pub service_id: ServiceId,
    pub grants: Vec<Grant>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn create_service(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<Service>), AppError> {
    auth.require_superuser()?;

    let metadata = Metadata::from_json(body.metadata)?;
    let service = state
        .vault
        .assets
        .create_service(NewService {
            service_group_id: body.service_group_id,
            parent_id: body.parent_id,
            url: body.url,
            secret: body.secret,
            metadata,
            notes: body.notes,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(service)))
}

async fn list_services(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListServicesQuery>,
) -> Result<Json<ServiceListResponse>, AppError> {
    auth.require_superuser()?;
    let services = state.vault.assets.services(query.service_group_id).await?;
    Ok(Json(ServiceListResponse { services }))
}

async fn get_service(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ServiceId>,
) -> Result<Json<Service>, AppError> {
    auth.require_superuser()?;
    Ok(Json(state.vault.assets.service(id).await?))
}

async fn update_service(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ServiceId>,
    Json(body): Json<UpdateServiceRequest>,
) -> Result<Json<Service>, AppError> {
    auth.require_superuser()?;

    let metadata = body.metadata.map(Metadata::from_json).transpose()?;
    let service = state
        .vault
        .assets
        .update_service(
            id,
            ServiceUpdate {
                parent_id: body.parent_id,
                url: body.url,
                secret: body.secret,
                metadata,
                notes: body.notes,
            },
        )
        .await?;

    Ok(Json(service))
}

async fn delete_service(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ServiceId>,
) -> Result<StatusCode, AppError> {
    auth.require_superuser()?;
    state.vault.assets.delete_service(auth.actor(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_grants(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ServiceId>,
) -> Result<Json<GrantListResponse>, AppError> {
    auth.require_service_admin(&state, id).await?;
    let grants = state.vault.grants.grants_for_service(id).await?;
    Ok(Json(GrantListResponse {
        service_id: id,
        grants,
    }))
}

/// Give a group access to the service. The caller must administer the
/// receiving group.
async fn grant_access(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ServiceId>,
    Json(body): Json<GrantAccessRequest>,
) -> Result<(StatusCode, Json<Grant>), AppError> {
    auth.require_group_admin(&state, body.group_id).await?;

    let grant = state
        .vault
        .grants
        .grant(
            auth.actor(),
            NewGrant {
                group_id: body.group_id,
                service_id: id,
                wrapped_service_key: body.wrapped_service_key,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(grant)))
}

async fn revoke_access(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((id, group)): Path<(ServiceId, GroupId)>,
) -> Result<StatusCode, AppError> {
    auth.require_group_admin(&state, group).await?;
    state.vault.grants.revoke(auth.actor(), group, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Install a new service key: the re-encrypted secret and a re-wrapped
/// key for every group holding a grant.
async fn rotate_key(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ServiceId>,
    Json(body): Json<ServiceKeyRotation>,
) -> Result<Json<Service>, AppError> {
    auth.require_service_admin(&state, id).await?;
    let service = state
        .vault
        .grants
        .rotate_service_key(auth.actor(), id, body)
        .await?;
    Ok(Json(service))
}
