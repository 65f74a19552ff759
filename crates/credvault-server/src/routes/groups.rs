//! Group routes: `/v1/groups/*`
//!
//! Group CRUD is reserved to superusers. Membership changes, group key
//! rotation and grant listings are open to the group's admins.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use credvault_core::ids::{AccountId, GroupId};
use credvault_core::model::{
    AccountGroup, Grant, GroupMembership, GroupUpdate, Member, NewGroup, NewMembership,
};
use credvault_core::rotation::GroupKeyRotation;

use crate::error::AppError;
use crate::middleware::AuthContext;
use crate::state::AppState;

/// Build the `/v1/groups` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_group).get(list_groups))
        .route(
            "/{id}",
            get(get_group).patch(update_group).delete(delete_group),
        )
        .route("/{id}/members", get(list_members).post(add_member))
        .route(
            "/{id}/members/{account}",
            patch(update_member).delete(remove_member),
        )
        .route("/{id}/rotate-key", post(rotate_key))
        .route("/{id}/grants", get(list_grants))
}

// ── Request / Response types ─────────────────────────────────────────

/// Request body for `POST /v1/groups`.
#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub public_key: String,
    #[serde(default)]
    pub is_hidden: bool,
}

/// Request body for `PATCH /v1/groups/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_hidden: Option<bool>,
    /// Only accepted while nothing is wrapped for the group yet.
    #[serde(default)]
    pub public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListGroupsQuery {
    #[serde(default)]
    pub include_hidden: bool,
}

/// Request body for `POST /v1/groups/{id}/members`.
#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub account_id: AccountId,
    /// The group private key wrapped for the account's public key.
    pub wrapped_group_key: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Request body for `PATCH /v1/groups/{id}/members/{account}`.
#[derive(Debug, Deserialize)]
pub struct UpdateMemberRequest {
    pub is_admin: bool,
}

#[derive(Debug, Serialize)]
pub struct GroupListResponse {
    pub groups: Vec<AccountGroup>,
}

#[derive(Debug, Serialize)]
pub struct MemberListResponse {
    pub group_id: GroupId,
    pub members: Vec<Member>,
}

#[derive(Debug, Serialize)]
pub struct GrantListResponse {
    pub grants: Vec<Grant>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn create_group(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<AccountGroup>), AppError> {
    auth.require_superuser()?;

    let group = state
        .vault
        .groups
        .create(NewGroup {
            name: body.name,
            public_key: body.public_key,
            is_hidden: body.is_hidden,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(group)))
}

/// Visible groups for everyone; hidden ones only for superusers who ask.
async fn list_groups(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListGroupsQuery>,
) -> Result<Json<GroupListResponse>, AppError> {
    if query.include_hidden {
        auth.require_superuser()?;
    }
    let groups = state.vault.groups.list(query.include_hidden).await?;
    Ok(Json(GroupListResponse { groups }))
}

async fn get_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<GroupId>,
) -> Result<Json<AccountGroup>, AppError> {
    Ok(Json(state.vault.groups.lookup(id).await?))
}

async fn update_group(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<GroupId>,
    Json(body): Json<UpdateGroupRequest>,
) -> Result<Json<AccountGroup>, AppError> {
    auth.require_superuser()?;

    let group = state
        .vault
        .groups
        .update(
            id,
            GroupUpdate {
                name: body.name,
                is_hidden: body.is_hidden,
                public_key: body.public_key,
            },
        )
        .await?;
    Ok(Json(group))
}

async fn delete_group(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<GroupId>,
) -> Result<StatusCode, AppError> {
    auth.require_superuser()?;
    state.vault.groups.delete(auth.actor(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_members(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<GroupId>,
) -> Result<Json<MemberListResponse>, AppError> {
    auth.require_group_admin(&state, id).await?;
    let members = state.vault.memberships.members_of(id).await?;
    Ok(Json(MemberListResponse {
        group_id: id,
        members,
    }))
}

async fn add_member(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<GroupId>,
    Json(body): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<GroupMembership>), AppError> {
    auth.require_group_admin(&state, id).await?;

    let membership = state
        .vault
        .memberships
        .grant(
            auth.actor(),
            NewMembership {
                account_id: body.account_id,
                group_id: id,
                wrapped_group_key: body.wrapped_group_key,
                is_admin: body.is_admin,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(membership)))
}

async fn update_member(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((id, account)): Path<(GroupId, AccountId)>,
    Json(body): Json<UpdateMemberRequest>,
) -> Result<Json<GroupMembership>, AppError> {
    auth.require_group_admin(&state, id).await?;
    let membership = state
        .vault
        .memberships
        .set_admin(auth.actor(), account, id, body.is_admin)
        .await?;
    Ok(Json(membership))
}

async fn remove_member(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((id, account)): Path<(GroupId, AccountId)>,
) -> Result<StatusCode, AppError> {
    auth.require_group_admin(&state, id).await?;
    state
        .vault
        .memberships
        .revoke(auth.actor(), account, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Install a new group keypair: the new public key, a re-wrapped private
/// key for every member, and a re-wrapped service key for every grant.
async fn rotate_key(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<GroupId>,
    Json(body): Json<GroupKeyRotation>,
) -> Result<Json<AccountGroup>, AppError> {
    auth.require_group_admin(&state, id).await?;
    let group = state
        .vault
        .memberships
        .rotate_group_key(auth.actor(), id, body)
        .await?;
    Ok(Json(group))
}

async fn list_grants(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<GroupId>,
) -> Result<Json<GrantListResponse>, AppError> {
    auth.require_group_admin(&state, id).await?;
    let grants = state.vault.grants.services_for_group(id).await?;
    Ok(Json(GrantListResponse { grants }))
}
