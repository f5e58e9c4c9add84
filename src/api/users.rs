use axum::{Json, extract::State};
use serde_json::Value;
use std::sync::Arc;

use super::{ApiError, AppState, ObjectBody, post_data};
use crate::entities::users;
use crate::resource::Resource;
use crate::validation::{Rule, RuleSet, Validator};

/// Rules for open registration: the three public credentials only, all
/// required, with a well-formed email and a minimum password length.
fn registration_rules() -> RuleSet<users::Model> {
    RuleSet::only(&["email", "username", "password"])
        .rule("email", Rule::Email)
        .rule("password", Rule::Required)
        .rule("password", Rule::MinLength(6))
}

/// POST /api/users
/// Create an account. Open to unauthenticated callers; responds with the
/// public projection of the new account.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    body: Option<Json<Value>>,
) -> Result<Json<ObjectBody>, ApiError> {
    let data = post_data(body);
    let resource = Resource::<users::Model>::new(state.store.conn.clone(), false);

    let draft = resource.create();
    let user = Validator::new(&draft, registration_rules())
        .validate(&state.store.conn, &data)
        .await?
        .save(&state.store.conn, &state.config.security)
        .await?;

    Ok(Json(ObjectBody {
        object: resource.serialize(&user),
    }))
}
