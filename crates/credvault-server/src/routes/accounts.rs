//! Account routes: `/v1/accounts/*`
//!
//! Registration and profile management, explicit account key rotation,
//! and the account's view of the graph: its groups and every service it
//! can reach together with the wrapped keys leading there.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use credvault_core::ids::{AccountId, ServiceId};
use credvault_core::model::{Account, AccountFilter, AccountGroup, AccountUpdate, NewAccount};
use credvault_core::resolver::AccessEntry;
use credvault_core::rotation::AccountKeyRotation;

use crate::error::AppError;
use crate::middleware::AuthContext;
use crate::state::AppState;

/// Build the `/v1/accounts` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_account).get(list_accounts))
        .route(
            "/{id}",
            get(get_account).patch(update_account).delete(delete_account),
        )
        .route("/{id}/rotate-key", post(rotate_key))
        .route("/{id}/groups", get(account_groups))
        .route("/{id}/access", get(access))
        .route("/{id}/access/{service}", get(access_to_service))
}

// ── Request / Response types ─────────────────────────────────────────

/// Request body for `POST /v1/accounts`.
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub department: String,
    pub public_key: String,
}

/// Request body for `PATCH /v1/accounts/{id}`. An empty `email` clears it.
#[derive(Debug, Deserialize)]
pub struct UpdateAccountRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Query parameters for `GET /v1/accounts`.
#[derive(Debug, Deserialize)]
pub struct ListAccountsQuery {
    pub username: Option<String>,
    pub department: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AccountListResponse {
    pub accounts: Vec<Account>,
}

#[derive(Debug, Serialize)]
pub struct GroupListResponse {
    pub groups: Vec<AccountGroup>,
}

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub account_id: AccountId,
    pub entries: Vec<AccessEntry>,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Register an account. Open to the bootstrap caller of an empty vault.
async fn create_account(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    auth.require_superuser()?;

    let account = state
        .vault
        .accounts
        .register(NewAccount {
            username: body.username,
            email: body.email,
            department: body.department,
            public_key: body.public_key,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(account)))
}

async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListAccountsQuery>,
) -> Result<Json<AccountListResponse>, AppError> {
    auth.require_superuser()?;

    let filter = AccountFilter {
        username: query.username,
        department: query.department,
    };
    let accounts = state.vault.accounts.list(&filter).await?;

    Ok(Json(AccountListResponse { accounts }))
}

async fn get_account(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<AccountId>,
) -> Result<Json<Account>, AppError> {
    auth.require_self_or_superuser(id)?;
    Ok(Json(state.vault.accounts.lookup(id).await?))
}

/// Update profile fields. A public key change is refused once any group
/// key has been wrapped for the account; use `rotate-key` instead.
async fn update_account(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<AccountId>,
    Json(body): Json<UpdateAccountRequest>,
) -> Result<Json<Account>, AppError> {
    auth.require_self_or_superuser(id)?;

    let account = state
        .vault
        .accounts
        .update(
            id,
            AccountUpdate {
                email: body.email,
                department: body.department,
                public_key: body.public_key,
            },
        )
        .await?;

    Ok(Json(account))
}

async fn delete_account(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<AccountId>,
) -> Result<StatusCode, AppError> {
    auth.require_superuser()?;
    state.vault.accounts.delete(auth.actor(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Replace the account's public key together with every group key
/// wrapped for it.
async fn rotate_key(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<AccountId>,
    Json(body): Json<AccountKeyRotation>,
) -> Result<Json<Account>, AppError> {
    auth.require_self_or_superuser(id)?;
    let account = state
        .vault
        .accounts
        .rotate_key(auth.actor(), id, body)
        .await?;
    Ok(Json(account))
}

async fn account_groups(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<AccountId>,
) -> Result<Json<GroupListResponse>, AppError> {
    auth.require_self_or_superuser(id)?;
    let groups = state.vault.memberships.groups_for(id).await?;
    Ok(Json(GroupListResponse { groups }))
}

/// Every service the account can reach, one entry per granting group.
async fn access(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<AccountId>,
) -> Result<Json<AccessResponse>, AppError> {
    auth.require_self_or_superuser(id)?;
    let entries = state.vault.resolver.resolve(id).await?;
    Ok(Json(AccessResponse {
        account_id: id,
        entries,
    }))
}

async fn access_to_service(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((id, service)): Path<(AccountId, ServiceId)>,
) -> Result<Json<AccessResponse>, AppError> {
    auth.require_self_or_superuser(id)?;
    let entries = state.vault.resolver.resolve_service(id, service).await?;
    Ok(Json(AccessResponse {
        account_id: id,
        entries,
    }))
}
