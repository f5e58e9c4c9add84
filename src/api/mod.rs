use axum::{
    Json, Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Store;
use crate::validation::Submitted;

pub mod admin;
pub mod auth;
mod error;
pub mod profile;
mod types;
pub mod users;

pub use error::ApiError;
pub use types::*;

pub struct AppState {
    pub store: Store,
    pub config: Config,
}

/// Build the application router.
///
/// Guard composition: profile routes run behind `authenticate`; admin routes
/// layer `require_admin` inside `authenticate`, so authentication is always
/// checked first and the admin check only ever sees a bound identity.
pub fn router(state: Arc<AppState>) -> Router {
    let public = Router::new().route("/users", post(users::create_user));

    let profile = Router::new()
        .route(
            "/profile",
            get(profile::get_profile)
                .post(profile::update_profile)
                .delete(profile::remove_profile),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ));

    let admin = Router::new()
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/users/{id}",
            get(admin::get_user)
                .post(admin::update_user)
                .delete(admin::remove_user),
        )
        .route("/users/{id}/api_key", post(admin::regenerate_api_key))
        .route_layer(middleware::from_fn(auth::require_admin))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ));

    let cors_origins = &state.config.server.cors_allowed_origins;
    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", public.merge(profile))
        .nest("/admin", admin)
        .fallback(|| async { ApiError::NotFound })
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The submitted request body as a JSON object; anything else counts as an
/// empty submission and is left to validation to report.
pub(crate) fn post_data(body: Option<Json<Value>>) -> Submitted {
    body.and_then(|Json(value)| match value {
        Value::Object(map) => Some(map),
        _ => None,
    })
    .unwrap_or_default()
}
