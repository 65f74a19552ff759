//! Customer routes: `/v1/customers/*`

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use credvault_core::ids::CustomerId;
use credvault_core::model::{Customer, NewCustomer};

use crate::error::AppError;
use crate::middleware::AuthContext;
use crate::state::AppState;

/// Build the `/v1/customers` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_customer).get(list_customers))
        .route(
            "/{id}",
            get(get_customer)
                .patch(update_customer)
                .delete(delete_customer),
        )
}

// ── Request / Response types ─────────────────────────────────────────

/// Request body for `POST /v1/customers` and `PATCH /v1/customers/{id}`.
#[derive(Debug, Deserialize)]
pub struct CustomerRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CustomerListResponse {
    pub customers: Vec<Customer>,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Create a customer, recording the caller as its creator.
async fn create_customer(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CustomerRequest>,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    auth.require_superuser()?;

    let customer = state
        .vault
        .assets
        .create_customer(NewCustomer {
            name: body.name,
            created_by: auth.account,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(customer)))
}

async fn list_customers(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<CustomerListResponse>, AppError> {
    auth.require_superuser()?;
    let customers = state.vault.assets.customers().await?;
    Ok(Json(CustomerListResponse { customers }))
}

async fn get_customer(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<CustomerId>,
) -> Result<Json<Customer>, AppError> {
    auth.require_superuser()?;
    Ok(Json(state.vault.assets.customer(id).await?))
}

async fn update_customer(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<CustomerId>,
    Json(body): Json<CustomerRequest>,
) -> Result<Json<Customer>, AppError> {
    auth.require_superuser()?;
    Ok(Json(state.vault.assets.rename_customer(id, &body.name).await?))
}

/// Delete a customer with every service group it owns.
async fn delete_customer(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<CustomerId>,
) -> Result<StatusCode, AppError> {
    auth.require_superuser()?;
    state.vault.assets.delete_customer(auth.actor(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
