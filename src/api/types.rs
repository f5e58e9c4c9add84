use serde::Serialize;
use serde_json::{Map, Value};

use crate::validation::ErrorMap;

/// Envelope for a single serialized entity.
#[derive(Debug, Serialize)]
pub struct ObjectBody {
    pub object: Map<String, Value>,
}

/// Envelope for a collection of serialized entities.
#[derive(Debug, Serialize)]
pub struct ObjectsBody {
    pub objects: Vec<Map<String, Value>>,
}

/// Envelope for field-level validation failures.
#[derive(Debug, Serialize)]
pub struct ErrorsBody {
    pub errors: ErrorMap,
}

/// Envelope for transport-level HTTP errors (401/404/500).
#[derive(Debug, Serialize)]
pub struct HttpErrorBody {
    pub code: u16,
    pub message: String,
}
