//! Generic REST resource over a storage-backed entity.
//!
//! A [`Record`] declares its projected field names as static lists and reads
//! values live off the instance; a [`Resource`] binds a record type to a
//! connection and a visibility level and provides the create/list/fetch and
//! serialization operations every endpoint funnels through.

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr};
use serde_json::{Map, Value};
use std::marker::PhantomData;

use crate::api::ApiError;
use crate::config::SecurityConfig;
use crate::validation::{self, RuleSet};

/// A persisted, projectable entity.
#[async_trait]
pub trait Record: Clone + Send + Sync + Sized + 'static {
    /// Fields included in every projection.
    const PUBLIC_FIELDS: &'static [&'static str];
    /// Fields additionally included in a private projection.
    const PRIVATE_FIELDS: &'static [&'static str];

    /// A transient, not-yet-persisted instance with defaults populated.
    fn draft() -> Self;

    /// The primary key, or `None` while the instance is unsaved.
    fn primary_key(&self) -> Option<i32>;

    /// Read a single named field value off the instance.
    fn field(&self, name: &str) -> Option<Value>;

    /// The full declared rule set for this entity, from which validators are
    /// derived by allow-list or deny-list restriction.
    fn base_rules() -> RuleSet<Self>;

    /// Apply one validated submitted value onto the instance.
    async fn apply(
        &mut self,
        name: &str,
        value: &Value,
        security: &SecurityConfig,
    ) -> anyhow::Result<()>;

    /// Every persisted instance, in the entity's declared order.
    async fn fetch_all(conn: &DatabaseConnection) -> Result<Vec<Self>, DbErr>;

    async fn fetch_one(conn: &DatabaseConnection, id: i32) -> Result<Option<Self>, DbErr>;

    /// Whether another persisted instance already uses `value` for `field`.
    async fn value_taken(
        conn: &DatabaseConnection,
        field: &str,
        value: &str,
        exclude: Option<i32>,
    ) -> Result<bool, DbErr>;

    /// Insert or update this instance, refreshing its update timestamp.
    async fn persist(&self, conn: &DatabaseConnection) -> Result<Self, validation::Error>;

    async fn remove(&self, conn: &DatabaseConnection) -> Result<(), DbErr>;
}

/// A record type exposed via the REST API, bound to a connection and to a
/// projection level (`private` adds the record's private fields).
pub struct Resource<M: Record> {
    conn: DatabaseConnection,
    private: bool,
    _model: PhantomData<M>,
}

impl<M: Record> Resource<M> {
    #[must_use]
    pub const fn new(conn: DatabaseConnection, private: bool) -> Self {
        Self {
            conn,
            private,
            _model: PhantomData,
        }
    }

    /// A transient instance; population and validation happen elsewhere.
    #[must_use]
    pub fn create(&self) -> M {
        M::draft()
    }

    pub async fn all(&self) -> Result<Vec<M>, DbErr> {
        M::fetch_all(&self.conn).await
    }

    /// Fetch one instance by primary key. This is the only operation in the
    /// contract that signals not-found instead of returning an empty value.
    pub async fn get(&self, id: i32) -> Result<M, ApiError> {
        M::fetch_one(&self.conn, id)
            .await?
            .ok_or(ApiError::NotFound)
    }

    /// Project `id` plus the public fields, and the private fields when this
    /// resource was built as a private view. Values are read live.
    #[must_use]
    pub fn serialize(&self, record: &M) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert(
            "id".to_string(),
            record.primary_key().map_or(Value::Null, Into::into),
        );

        for name in M::PUBLIC_FIELDS {
            if let Some(value) = record.field(name) {
                data.insert((*name).to_string(), value);
            }
        }

        if self.private {
            for name in M::PRIVATE_FIELDS {
                if let Some(value) = record.field(name) {
                    data.insert((*name).to_string(), value);
                }
            }
        }

        data
    }

    #[must_use]
    pub fn serialize_many(&self, records: &[M]) -> Vec<Map<String, Value>> {
        records.iter().map(|record| self.serialize(record)).collect()
    }
}
