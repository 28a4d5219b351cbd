//! JSON payload codec.

use super::{Serializer, StoreResult};
use crate::model::CachedProduct;

/// Encodes cache entries as compact JSON objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    fn serialize(&self, record: &CachedProduct) -> StoreResult<String> {
        Ok(serde_json::to_string(record)?)
    }

    fn deserialize(&self, payload: &str) -> StoreResult<CachedProduct> {
        Ok(serde_json::from_str(payload)?)
    }
}
