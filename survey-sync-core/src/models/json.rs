use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::Entity;

/// An entity whose schema is not known at compile time.
///
/// Reads `id` and `updatedAt` straight from the JSON object, so any
/// collection can be cached and reconciled without a dedicated type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonEntity(pub Value);

impl JsonEntity {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> Value {
        self.0
    }

    /// Looks up a top-level string field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }
}

impl Entity for JsonEntity {
    fn id(&self) -> &str {
        self.field("id").unwrap_or_default()
    }

    fn updated_at(&self) -> Option<&str> {
        self.field("updatedAt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reads_id_and_updated_at() {
        let entity = JsonEntity::new(json!({
            "id": "survey-1",
            "updatedAt": "2024-01-01T00:00:00Z",
            "title": "Roof"
        }));
        assert_eq!(entity.id(), "survey-1");
        assert_eq!(entity.updated_at(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(entity.field("title"), Some("Roof"));
    }

    #[test]
    fn test_missing_fields() {
        let entity = JsonEntity::new(json!({ "updatedAt": 12 }));
        assert_eq!(entity.id(), "");
        assert_eq!(entity.updated_at(), None);
    }

    #[test]
    fn test_serializes_transparently() {
        let entity = JsonEntity::new(json!({ "id": "a" }));
        assert_eq!(serde_json::to_string(&entity).unwrap(), r#"{"id":"a"}"#);
    }
}
