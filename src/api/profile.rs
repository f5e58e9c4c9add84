use axum::{Extension, Json, extract::State};
use serde_json::Value;
use std::sync::Arc;

use super::auth::CurrentUser;
use super::{ApiError, AppState, ObjectBody, post_data};
use crate::entities::users;
use crate::resource::{Record as _, Resource};
use crate::validation::{Rule, RuleSet, Validator};

/// Rules for self-service profile mutation. Every change must confirm the
/// account's current password, checked against the pre-update state.
fn profile_rules() -> RuleSet<users::Model> {
    RuleSet::only(&["email", "username", "password", "current_password"])
        .rule("email", Rule::Email)
        .rule("password", Rule::MinLength(6))
        .rule("current_password", Rule::Required)
        .rule(
            "current_password",
            Rule::check(
                users::Model::check_password,
                "Current password is incorrect.",
            ),
        )
}

/// GET /api/profile
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<ObjectBody>, ApiError> {
    let resource = Resource::<users::Model>::new(state.store.conn.clone(), false);

    Ok(Json(ObjectBody {
        object: resource.serialize(&user),
    }))
}

/// POST /api/profile
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    body: Option<Json<Value>>,
) -> Result<Json<ObjectBody>, ApiError> {
    let data = post_data(body);
    let resource = Resource::<users::Model>::new(state.store.conn.clone(), false);

    let user = Validator::new(&user, profile_rules())
        .validate(&state.store.conn, &data)
        .await?
        .save(&state.store.conn, &state.config.security)
        .await?;

    Ok(Json(ObjectBody {
        object: resource.serialize(&user),
    }))
}

/// DELETE /api/profile
/// Deletes the authenticated account after confirming the current password;
/// only that one field is validated. Responds with the deleted account's
/// projection.
pub async fn remove_profile(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    body: Option<Json<Value>>,
) -> Result<Json<ObjectBody>, ApiError> {
    let data = post_data(body);
    let resource = Resource::<users::Model>::new(state.store.conn.clone(), false);

    Validator::new(&user, profile_rules())
        .validate_only(&state.store.conn, &data, &["current_password"])
        .await?;

    user.remove(&state.store.conn).await?;
    tracing::info!("Account deleted: {}", user.username);

    Ok(Json(ObjectBody {
        object: resource.serialize(&user),
    }))
}
