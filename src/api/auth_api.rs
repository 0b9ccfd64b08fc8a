//! Authentication API Endpoints
//! Mission: Registration, login, verification and admin user management

use crate::api::{error::ApiError, AppState};
use crate::auth::models::{AuthRequest, Claims, Role, UserSummary};
use crate::store::models::ACTION_USER_CREATED;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};
use tracing::{info, warn};

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<AuthRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let credential = state
        .credentials
        .register(&payload.username, &payload.password)?;

    // The tenant's audit trail starts with its creation marker.
    if let Err(e) = state
        .data
        .record_history(&credential.username, ACTION_USER_CREATED)
    {
        warn!(username = %credential.username, error = %e, "Failed to record creation marker");
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "user": UserSummary::from_credential(&credential),
        })),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<AuthRequest>,
) -> Result<Json<Value>, ApiError> {
    let credential = state
        .credentials
        .authenticate(&payload.username, &payload.password)
        .map_err(|e| {
            warn!(username = %payload.username, "Failed login attempt");
            ApiError::from(e)
        })?;

    let token = state
        .jwt
        .mint(&credential.username, credential.role)
        .map_err(|_| ApiError::Internal)?;

    info!(username = %credential.username, role = credential.role.as_str(), "Login successful");

    Ok(Json(json!({
        "success": true,
        "token": token,
        "user": UserSummary::from_credential(&credential),
    })))
}

/// GET /api/auth/verify — echoes the authenticated identity back.
pub async fn verify(Extension(claims): Extension<Claims>) -> Json<Value> {
    Json(json!({
        "success": true,
        "user": {
            "username": claims.sub,
            "role": claims.role,
        },
    }))
}

/// GET /api/auth/users (admin)
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&claims)?;
    Ok(Json(json!({
        "success": true,
        "users": state.credentials.list(),
    })))
}

/// DELETE /api/auth/users/:username (admin). Removes the credential and
/// drops the tenant's data and sealed file.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(username): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&claims)?;

    state.credentials.delete(&username)?;

    if let Err(e) = state.data.drop_tenant(&username) {
        warn!(username = %username, error = %e, "Failed to drop tenant data");
    }
    state.analytics.invalidate(&username);

    info!(username = %username, admin = %claims.sub, "User deleted");

    Ok(Json(json!({ "success": true })))
}

fn require_admin(claims: &Claims) -> Result<(), ApiError> {
    if claims.role == Role::Admin {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_admin() {
        let admin = Claims {
            sub: "admin".to_string(),
            role: Role::Admin,
            iat: 0,
            exp: usize::MAX,
        };
        let user = Claims {
            sub: "alice".to_string(),
            role: Role::User,
            iat: 0,
            exp: usize::MAX,
        };

        assert!(require_admin(&admin).is_ok());
        assert_eq!(require_admin(&user).unwrap_err(), ApiError::Forbidden);
    }
}
