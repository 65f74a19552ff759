//! Service group routes: `/v1/service-groups/*`

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use credvault_core::ids::{CustomerId, ServiceGroupId};
use credvault_core::model::{NewServiceGroup, ServiceGroup, ServiceGroupUpdate};

use super::double_option;
use crate::error::AppError;
use crate::middleware::AuthContext;
use crate::state::AppState;

/// Build the `/v1/service-groups` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_service_group).get(list_service_groups))
        .route(
            "/{id}",
            get(get_service_group)
                .patch(update_service_group)
                .delete(delete_service_group),
        )
}

// ── Request / Response types ─────────────────────────────────────────

/// Request body for `POST /v1/service-groups`.
#[derive(Debug, Deserialize)]
pub struct CreateServiceGroupRequest {
    pub customer_id: CustomerId,
    #[serde(default)]
    pub parent_id: Option<ServiceGroupId>,
    pub name: String,
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Request body for `PATCH /v1/service-groups/{id}`.
///
/// `"parent_id": null` detaches the group; omitting the field keeps the
/// current parent. An empty string clears an optional text field.
#[derive(Debug, Deserialize)]
pub struct UpdateServiceGroupRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<ServiceGroupId>>,
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListServiceGroupsQuery {
    pub customer_id: Option<CustomerId>,
}

#[derive(Debug, Serialize)]
pub struct ServiceGroupListResponse {
    pub service_groups: Vec<ServiceGroup>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn create_service_group(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateServiceGroupRequest>,
) -> Result<(StatusCode, Json<ServiceGroup>), AppError> {
    auth.require_superuser()?;

    let group = state
        .vault
        .assets
        .create_service_group(NewServiceGroup {
            customer_id: body.customer_id,
            parent_id: body.parent_id,
            name: body.name,
            fqdn: body.fqdn,
            ip: body.ip,
            location: body.location,
            notes: body.notes,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(group)))
}

async fn list_service_groups(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListServiceGroupsQuery>,
) -> Result<Json<ServiceGroupListResponse>, AppError> {
    auth.require_superuser()?;
    let service_groups = state.vault.assets.service_groups(query.customer_id).await?;
    Ok(Json(ServiceGroupListResponse { service_groups }))
}

async fn get_service_group(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ServiceGroupId>,
) -> Result<Json<ServiceGroup>, AppError> {
    auth.require_superuser()?;
    Ok(Json(state.vault.assets.service_group(id).await?))
}

async fn update_service_group(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ServiceGroupId>,
    Json(body): Json<UpdateServiceGroupRequest>,
) -> Result<Json<ServiceGroup>, AppError> {
    auth.require_superuser()?;

    let group = state
        .vault
        .assets
        .update_service_group(
            id,
            ServiceGroupUpdate {
                name: body.name,
                parent_id: body.parent_id,
                fqdn: body.fqdn,
                ip: body.ip,
                location: body.location,
                notes: body.notes,
            },
        )
        .await?;

    Ok(Json(group))
}

/// Delete a service group and the services it owns. Child groups and
/// services that only referenced it as a parent are detached.
async fn delete_service_group(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ServiceGroupId>,
) -> Result<StatusCode, AppError> {
    auth.require_superuser()?;
    state
        .vault
        .assets
        .delete_service_group(auth.actor(), id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
