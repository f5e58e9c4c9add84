use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::Value;
use std::sync::Arc;

use super::{ApiError, AppState, ObjectBody, ObjectsBody, post_data};
use crate::entities::users;
use crate::resource::{Record as _, Resource};
use crate::validation::{Rule, RuleSet, Validator};

/// Rules for the administrative path: every account field except the stored
/// hash, so admins may also set `api_key` and `is_admin`. The password is a
/// virtual field that is hashed on apply.
pub(crate) fn admin_user_rules() -> RuleSet<users::Model> {
    RuleSet::exclude(&["password_hash"])
        .rule("email", Rule::Email)
        .rule("password", Rule::MinLength(6))
}

fn resource(state: &AppState) -> Resource<users::Model> {
    // Admin views project the private fields too.
    Resource::new(state.store.conn.clone(), true)
}

/// GET /admin/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ObjectsBody>, ApiError> {
    let resource = resource(&state);
    let accounts = resource.all().await?;

    Ok(Json(ObjectsBody {
        objects: resource.serialize_many(&accounts),
    }))
}

/// POST /admin/users
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    body: Option<Json<Value>>,
) -> Result<Json<ObjectBody>, ApiError> {
    let data = post_data(body);
    let resource = resource(&state);

    let draft = resource.create();
    let user = Validator::new(&draft, admin_user_rules())
        .validate(&state.store.conn, &data)
        .await?
        .save(&state.store.conn, &state.config.security)
        .await?;

    Ok(Json(ObjectBody {
        object: resource.serialize(&user),
    }))
}

/// GET /admin/users/{id}
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<ObjectBody>, ApiError> {
    let resource = resource(&state);
    let user = resource.get(id).await?;

    Ok(Json(ObjectBody {
        object: resource.serialize(&user),
    }))
}

/// POST /admin/users/{id}
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    body: Option<Json<Value>>,
) -> Result<Json<ObjectBody>, ApiError> {
    let data = post_data(body);
    let resource = resource(&state);

    let user = resource.get(id).await?;
    let user = Validator::new(&user, admin_user_rules())
        .validate(&state.store.conn, &data)
        .await?
        .save(&state.store.conn, &state.config.security)
        .await?;

    Ok(Json(ObjectBody {
        object: resource.serialize(&user),
    }))
}

/// DELETE /admin/users/{id}
pub async fn remove_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<ObjectBody>, ApiError> {
    let resource = resource(&state);

    let user = resource.get(id).await?;
    user.remove(&state.store.conn).await?;
    tracing::info!("Account deleted by admin: {}", user.username);

    Ok(Json(ObjectBody {
        object: resource.serialize(&user),
    }))
}

/// POST /admin/users/{id}/api_key
/// Replace the account's API key with a freshly generated one.
pub async fn regenerate_api_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<ObjectBody>, ApiError> {
    let resource = resource(&state);

    let mut user = resource.get(id).await?;
    user.regenerate_api_key();
    let user = user.persist(&state.store.conn).await?;
    tracing::info!("API key regenerated for: {}", user.username);

    Ok(Json(ObjectBody {
        object: resource.serialize(&user),
    }))
}
