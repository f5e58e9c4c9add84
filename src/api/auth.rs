use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use base64::Engine as _;
use std::sync::Arc;

use super::{ApiError, AppState};
use crate::entities::users;

/// The identity bound to the current request after successful
/// authentication. Lives in the request's extensions, so it is scoped to
/// exactly one request and read by downstream guards and handlers.
#[derive(Clone)]
pub struct CurrentUser(pub users::Model);

/// Authentication guard. Decodes the HTTP Basic credentials, verifies them
/// (API key or password) and binds the matched identity to the request.
/// Rejects with 401 otherwise; handlers behind this guard never run without
/// a bound identity.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some((username, secret)) = basic_credentials(&request) else {
        return Err(ApiError::Unauthorized);
    };

    match state
        .store
        .users()
        .verify_credentials(&username, &secret)
        .await?
    {
        Some(user) => {
            tracing::Span::current().record("user_id", user.id);
            request.extensions_mut().insert(CurrentUser(user));
            Ok(next.run(request).await)
        }
        None => Err(ApiError::Unauthorized),
    }
}

/// Admin guard. Layered inside [`authenticate`], and still fails closed when
/// no identity was bound, so it never substitutes for authentication.
/// Rejects with 401, not 403: privilege gaps look the same as missing
/// credentials from the outside.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let is_admin = request
        .extensions()
        .get::<CurrentUser>()
        .is_some_and(|current| current.0.is_admin);

    if is_admin {
        Ok(next.run(request).await)
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// Extract (username, secret) from an `Authorization: Basic` header.
fn basic_credentials(request: &Request) -> Option<(String, String)> {
    let header = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, secret) = decoded.split_once(':')?;
    Some((username.to_string(), secret.to_string()))
}
