//! Authentication Middleware
//! Mission: Resolve the X-User-ID / X-Admin-ID headers into an identity

use crate::auth::{models::UserRole, user_store::UserStore};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use uuid::Uuid;

/// Authenticated identity attached to the request extensions.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: UserRole,
}

/// Middleware validating the `X-User-ID` header against the user store.
pub async fn user_middleware(
    State(users): State<Arc<UserStore>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let identity = resolve_header(&users, &req, "X-User-ID")?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Middleware validating the `X-Admin-ID` header and requiring admin role.
pub async fn admin_middleware(
    State(users): State<Arc<UserStore>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let identity = resolve_header(&users, &req, "X-Admin-ID")?;
    if identity.role != UserRole::Admin {
        return Err(AuthError::Forbidden);
    }
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

fn resolve_header(users: &UserStore, req: &Request, header: &str) -> Result<Identity, AuthError> {
    let raw = req
        .headers()
        .get(header)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;

    let user_id = Uuid::parse_str(raw).map_err(|_| AuthError::InvalidUserId)?;

    let user = users
        .get_user(&user_id)
        .map_err(|_| AuthError::Unavailable)?
        .ok_or(AuthError::UnknownUser)?;

    Ok(Identity {
        user_id: user.id,
        role: user.role,
    })
}

/// Extract the identity from a request (use after the middleware ran).
pub fn extract_identity(req: &Request) -> Option<&Identity> {
    req.extensions().get::<Identity>()
}

/// Auth error types
#[derive(Debug)]
pub enum AuthError {
    MissingHeader,
    InvalidUserId,
    UnknownUser,
    Forbidden,
    Unavailable,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingHeader => (StatusCode::UNAUTHORIZED, "Missing identity header"),
            AuthError::InvalidUserId => (StatusCode::UNAUTHORIZED, "Identity header is not a UUID"),
            AuthError::UnknownUser => (StatusCode::UNAUTHORIZED, "Unknown user"),
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "Admin access required"),
            AuthError::Unavailable => (StatusCode::INTERNAL_SERVER_ERROR, "User store unavailable"),
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::derive_user_id;
    use axum::{body::Body, http::Request as HttpRequest};
    use tempfile::NamedTempFile;

    fn test_store() -> (Arc<UserStore>, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let store = UserStore::new(temp.path().to_str().unwrap()).unwrap();
        (Arc::new(store), temp)
    }

    fn request_with_header(header: &str, value: &str) -> Request {
        HttpRequest::builder()
            .header(header, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_resolve_known_user() {
        let (store, _temp) = test_store();
        let victor = derive_user_id("Victor");

        let req = request_with_header("X-User-ID", &victor.to_string());
        let identity = resolve_header(&store, &req, "X-User-ID").unwrap();

        assert_eq!(identity.user_id, victor);
        assert_eq!(identity.role, UserRole::Admin);
    }

    #[test]
    fn test_missing_and_malformed_headers_rejected() {
        let (store, _temp) = test_store();

        let req = HttpRequest::builder().body(Body::empty()).unwrap();
        assert!(matches!(
            resolve_header(&store, &req, "X-User-ID"),
            Err(AuthError::MissingHeader)
        ));

        let req = request_with_header("X-User-ID", "not-a-uuid");
        assert!(matches!(
            resolve_header(&store, &req, "X-User-ID"),
            Err(AuthError::InvalidUserId)
        ));

        let req = request_with_header("X-User-ID", &Uuid::new_v4().to_string());
        assert!(matches!(
            resolve_header(&store, &req, "X-User-ID"),
            Err(AuthError::UnknownUser)
        ));
    }

    #[test]
    fn test_auth_error_responses() {
        assert_eq!(
            AuthError::MissingHeader.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Forbidden.into_response().status(),
            StatusCode::FORBIDDEN
        );
    }
}
