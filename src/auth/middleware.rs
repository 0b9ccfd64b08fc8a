//! Authentication Middleware
//! Mission: Guard API endpoints with bearer token validation

use crate::api::error::ApiError;
use crate::auth::jwt::JwtHandler;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Validates the bearer token and stashes the claims in request extensions.
///
/// The token is taken from the `Authorization: Bearer` header, or from a
/// `token` query parameter for WebSocket-style clients that cannot set
/// headers.
pub async fn auth_middleware(
    State(jwt_handler): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token_from_query = req.uri().query().and_then(|query| {
        query
            .split('&')
            .find(|pair| pair.starts_with("token="))
            .and_then(|pair| pair.split('=').nth(1))
            .map(|t| t.to_string())
    });

    let token_from_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.to_string());

    let token = token_from_header
        .or(token_from_query)
        .ok_or(ApiError::Unauthorized)?;

    let claims = jwt_handler
        .verify(&token)
        .map_err(|_| ApiError::Unauthorized)?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use crate::auth::models::{Claims, Role};
    use axum::{body::Body, http::Request as HttpRequest};

    #[test]
    fn test_claims_extension_round_trip() {
        let mut req = HttpRequest::new(Body::empty());
        assert!(req.extensions().get::<Claims>().is_none());

        let claims = Claims {
            sub: "alice".to_string(),
            role: Role::User,
            iat: 0,
            exp: 4102444800,
        };
        req.extensions_mut().insert(claims);

        let stored = req.extensions().get::<Claims>().unwrap();
        assert_eq!(stored.sub, "alice");
    }
}
