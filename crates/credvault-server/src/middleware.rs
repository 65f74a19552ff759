//! Caller identification and authorization for `CredVault`.
//!
//! A trusted fronting proxy authenticates users and forwards the account id
//! in the `X-Account-Id` header. The middleware checks that the account
//! exists and injects an [`AuthContext`] into the request extensions for
//! handlers to use in their authorization checks.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use credvault_core::audit::Actor;
use credvault_core::ids::{AccountId, GroupId, ServiceId};

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the caller's account id.
pub const ACCOUNT_HEADER: &str = "X-Account-Id";

/// Authentication context injected into request extensions.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    /// The calling account. `None` only while bootstrapping an empty vault.
    pub account: Option<AccountId>,
    /// Whether the caller may perform every operation.
    pub superuser: bool,
}

impl AuthContext {
    /// The audit actor for this caller.
    #[must_use]
    pub fn actor(&self) -> Actor {
        self.account.map_or(Actor::System, Actor::Account)
    }

    /// The calling account.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Unauthorized`] for the bootstrap caller.
    pub fn account(&self) -> Result<AccountId, AppError> {
        self.account
            .ok_or_else(|| AppError::Unauthorized(format!("missing {ACCOUNT_HEADER} header")))
    }

    /// # Errors
    ///
    /// Returns [`AppError::Forbidden`] unless the caller is a superuser.
    pub fn require_superuser(&self) -> Result<(), AppError> {
        if self.superuser {
            Ok(())
        } else {
            Err(AppError::Forbidden("superuser required".to_owned()))
        }
    }

    /// Allow the account itself or a superuser.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Forbidden`] for anyone else.
    pub fn require_self_or_superuser(&self, account: AccountId) -> Result<(), AppError> {
        if self.superuser || self.account == Some(account) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "only account {account} or a superuser may do this"
            )))
        }
    }

    /// Allow admins of `group` or a superuser.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Forbidden`] when the caller holds no admin
    /// membership in the group.
    pub async fn require_group_admin(
        &self,
        state: &AppState,
        group: GroupId,
    ) -> Result<(), AppError> {
        if self.superuser {
            return Ok(());
        }
        let account = self.account()?;
        if state.vault.memberships.is_admin(account, group).await? {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "admin membership in group {group} required"
            )))
        }
    }

    /// Allow admins of any group holding a grant on `service`, or a
    /// superuser.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Forbidden`] when no such admin membership exists.
    pub async fn require_service_admin(
        &self,
        state: &AppState,
        service: ServiceId,
    ) -> Result<(), AppError> {
        if self.superuser {
            return Ok(());
        }
        let account = self.account()?;
        for grant in state.vault.grants.grants_for_service(service).await? {
            if state.vault.memberships.is_admin(account, grant.group_id).await? {
                return Ok(());
            }
        }
        Err(AppError::Forbidden(format!(
            "admin membership in a group with access to service {service} required"
        )))
    }
}

/// Middleware that resolves the `X-Account-Id` header.
///
/// Skips identification for the health endpoint. While the vault holds no
/// accounts, `POST /v1/accounts` is let through without a header so the
/// first account can be registered.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    if req.uri().path() == "/v1/sys/health" {
        return next.run(req).await;
    }

    // Read everything needed from the request before awaiting: the body
    // is not `Sync`, so no reference to the request may cross an await.
    let header = req
        .headers()
        .get(ACCOUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_owned());
    let bootstrap = is_bootstrap_request(&req);

    match identify(&state, header.as_deref(), bootstrap).await {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

async fn identify(
    state: &AppState,
    header: Option<&str>,
    bootstrap: bool,
) -> Result<AuthContext, AppError> {
    let Some(header) = header else {
        if bootstrap && state.vault.accounts.is_empty().await? {
            tracing::info!("accepting bootstrap account registration");
            return Ok(AuthContext {
                account: None,
                superuser: true,
            });
        }
        return Err(AppError::Unauthorized(format!(
            "missing {ACCOUNT_HEADER} header"
        )));
    };

    let account: AccountId = header
        .parse()
        .map_err(|_| AppError::Unauthorized(format!("malformed {ACCOUNT_HEADER} header")))?;

    // A deleted account must not keep acting through a stale header.
    match state.vault.accounts.lookup(account).await {
        Ok(_) => Ok(AuthContext {
            account: Some(account),
            superuser: state.is_superuser(account),
        }),
        Err(credvault_core::VaultError::NotFound { .. }) => {
            tracing::warn!(account = %account, "request from unknown account");
            Err(AppError::Unauthorized("unknown account".to_owned()))
        }
        Err(err) => Err(err.into()),
    }
}

fn is_bootstrap_request(req: &Request) -> bool {
    req.method() == Method::POST && req.uri().path() == "/v1/accounts"
}
