//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use super::jwt::{Claims, SUPER_ADMIN_ROLE};
use crate::{error::ApiError, state::AppState};

/// Caller identity taken from a validated bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
    pub business_ids: Vec<Uuid>,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
            business_ids: claims.business_ids,
        }
    }
}

impl AuthUser {
    pub fn is_superadmin(&self) -> bool {
        self.role == SUPER_ADMIN_ROLE
    }

    pub fn require_superadmin(&self) -> Result<(), ApiError> {
        if self.is_superadmin() {
            Ok(())
        } else {
            tracing::warn!(user_id = %self.user_id, role = %self.role, "Superadmin access denied");
            Err(ApiError::Forbidden)
        }
    }

    /// Superadmins see every business; others only their own
    pub fn require_business_access(&self, business_id: Uuid) -> Result<(), ApiError> {
        if self.is_superadmin() || self.business_ids.contains(&business_id) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = %self.user_id,
                business_id = %business_id,
                "Business access denied"
            );
            Err(ApiError::Forbidden)
        }
    }
}

fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Middleware that requires a valid bearer token
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let auth_result = match extract_bearer_token(&request) {
        Some(token) => state.jwt_manager.validate(token).map(AuthUser::from),
        None => Err(AuthError::MissingAuth),
    };

    match auth_result {
        Ok(auth_user) => {
            tracing::debug!(
                path = %path,
                user_id = %auth_user.user_id,
                role = %auth_user.role,
                "require_auth: authentication successful"
            );
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %path, error = ?err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AuthError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: &str, business_ids: Vec<Uuid>) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            role: role.to_string(),
            business_ids,
        }
    }

    #[test]
    fn test_superadmin_reaches_any_business() {
        let admin = user(SUPER_ADMIN_ROLE, Vec::new());
        assert!(admin.require_superadmin().is_ok());
        assert!(admin.require_business_access(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_member_limited_to_own_businesses() {
        let own = Uuid::new_v4();
        let member = user("BUSINESS_OWNER", vec![own]);
        assert!(member.require_business_access(own).is_ok());
        assert!(matches!(
            member.require_business_access(Uuid::new_v4()),
            Err(ApiError::Forbidden)
        ));
        assert!(matches!(member.require_superadmin(), Err(ApiError::Forbidden)));
    }
}
