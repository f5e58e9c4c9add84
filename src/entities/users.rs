use anyhow::Context;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordVerifier},
};
use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::NotSet, QueryOrder, Set, SqlErr};
use serde_json::Value;
use tokio::task;

use crate::config::SecurityConfig;
use crate::db::repositories::user::{generate_api_key, hash_password};
use crate::resource::Record;
use crate::validation::{self, Rule, RuleSet};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub username: String,

    #[sea_orm(unique)]
    pub email: String,

    /// Argon2id password hash; empty until a password has been set.
    pub password_hash: String,

    /// Random API key (64-char hex string)
    #[sea_orm(unique)]
    pub api_key: String,

    pub is_admin: bool,

    pub created_at: String,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Check if the given password is valid for this account.
    /// An empty password or an unset/unparseable stored hash never matches.
    #[must_use]
    pub fn check_password(&self, value: &str) -> bool {
        if value.is_empty() || self.password_hash.is_empty() {
            return false;
        }
        PasswordHash::new(&self.password_hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(value.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    /// Check if the given API key is valid for this account.
    #[must_use]
    pub fn check_api_key(&self, value: &str) -> bool {
        !value.is_empty() && value == self.api_key
    }

    /// Replace the API key with a freshly generated one.
    pub fn regenerate_api_key(&mut self) {
        self.api_key = generate_api_key();
    }
}

/// Map a storage-level unique constraint message back to the offending field.
fn duplicate_field(message: &str) -> Option<&'static str> {
    ["username", "email", "api_key"]
        .into_iter()
        .find(|field| message.contains(field))
}

#[async_trait]
impl Record for Model {
    const PUBLIC_FIELDS: &'static [&'static str] = &["username", "email", "api_key", "is_admin"];
    const PRIVATE_FIELDS: &'static [&'static str] = &["created_at", "updated_at"];

    fn draft() -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: 0,
            username: String::new(),
            email: String::new(),
            password_hash: String::new(),
            api_key: generate_api_key(),
            is_admin: false,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn primary_key(&self) -> Option<i32> {
        (self.id != 0).then_some(self.id)
    }

    fn field(&self, name: &str) -> Option<Value> {
        // password_hash is deliberately absent: it is never projected.
        match name {
            "username" => Some(Value::String(self.username.clone())),
            "email" => Some(Value::String(self.email.clone())),
            "api_key" => Some(Value::String(self.api_key.clone())),
            "is_admin" => Some(Value::Bool(self.is_admin)),
            "created_at" => Some(Value::String(self.created_at.clone())),
            "updated_at" => Some(Value::String(self.updated_at.clone())),
            _ => None,
        }
    }

    fn base_rules() -> RuleSet<Self> {
        RuleSet::new()
            .field(
                "username",
                vec![Rule::Required, Rule::MaxLength(30), Rule::Unique],
            )
            .field(
                "email",
                vec![Rule::Required, Rule::MaxLength(250), Rule::Unique],
            )
            .field("password_hash", vec![Rule::Required, Rule::MaxLength(250)])
            .field("api_key", vec![Rule::MaxLength(250), Rule::Unique])
            .field("is_admin", vec![])
    }

    async fn apply(
        &mut self,
        name: &str,
        value: &Value,
        security: &SecurityConfig,
    ) -> anyhow::Result<()> {
        match name {
            "username" => {
                if let Some(v) = value.as_str() {
                    self.username = v.to_string();
                }
            }
            "email" => {
                if let Some(v) = value.as_str() {
                    self.email = v.to_string();
                }
            }
            "api_key" => {
                if let Some(v) = value.as_str() {
                    self.api_key = v.to_string();
                }
            }
            "is_admin" => {
                if let Some(v) = value.as_bool() {
                    self.is_admin = v;
                }
            }
            "password" => {
                // An empty or absent password leaves the stored hash unchanged.
                let Some(password) = value.as_str().filter(|v| !v.is_empty()) else {
                    return Ok(());
                };
                let password = password.to_string();
                let security = security.clone();
                self.password_hash =
                    task::spawn_blocking(move || hash_password(&password, &security))
                        .await
                        .context("Password hashing task panicked")??;
            }
            // current_password and any unknown names are validate-only.
            _ => {}
        }
        Ok(())
    }

    async fn fetch_all(conn: &DatabaseConnection) -> Result<Vec<Self>, DbErr> {
        Entity::find().order_by_asc(Column::Id).all(conn).await
    }

    async fn fetch_one(conn: &DatabaseConnection, id: i32) -> Result<Option<Self>, DbErr> {
        Entity::find_by_id(id).one(conn).await
    }

    async fn value_taken(
        conn: &DatabaseConnection,
        field: &str,
        value: &str,
        exclude: Option<i32>,
    ) -> Result<bool, DbErr> {
        let column = match field {
            "username" => Column::Username,
            "email" => Column::Email,
            "api_key" => Column::ApiKey,
            _ => return Ok(false),
        };

        let mut query = Entity::find().filter(column.eq(value));
        if let Some(id) = exclude {
            query = query.filter(Column::Id.ne(id));
        }

        Ok(query.one(conn).await?.is_some())
    }

    async fn persist(&self, conn: &DatabaseConnection) -> Result<Self, validation::Error> {
        let now = chrono::Utc::now().to_rfc3339();

        let result = if self.primary_key().is_some() {
            let mut active: ActiveModel = self.clone().into();
            active.username = Set(self.username.clone());
            active.email = Set(self.email.clone());
            active.password_hash = Set(self.password_hash.clone());
            active.api_key = Set(self.api_key.clone());
            active.is_admin = Set(self.is_admin);
            active.updated_at = Set(now);
            active.update(conn).await
        } else {
            ActiveModel {
                id: NotSet,
                username: Set(self.username.clone()),
                email: Set(self.email.clone()),
                password_hash: Set(self.password_hash.clone()),
                api_key: Set(self.api_key.clone()),
                is_admin: Set(self.is_admin),
                created_at: Set(self.created_at.clone()),
                updated_at: Set(now),
            }
            .insert(conn)
            .await
        };

        result.map_err(|err| {
            // The schema's unique indexes are the backstop for concurrent
            // creates that raced past the validator's pre-check; surface them
            // in the same field-level shape.
            if let Some(SqlErr::UniqueConstraintViolation(message)) = err.sql_err()
                && let Some(field) = duplicate_field(&message)
            {
                return validation::Error::Invalid(validation::field_error(
                    field,
                    "Must be a unique value.",
                ));
            }
            validation::Error::Db(err)
        })
    }

    async fn remove(&self, conn: &DatabaseConnection) -> Result<(), DbErr> {
        Entity::delete_by_id(self.id).exec(conn).await.map(|_| ())
    }
}
