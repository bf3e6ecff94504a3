//! Supporting types shared by the CRDs

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Opaque JSON configuration document
///
/// Templates carry one of these and pairings hold a point-in-time copy. The
/// operator never interprets the content; it only serializes it into
/// configuration bundles.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct EntityConfiguration(pub serde_json::Value);

impl Default for EntityConfiguration {
    fn default() -> Self {
        Self(serde_json::Value::Object(Default::default()))
    }
}

impl EntityConfiguration {
    /// Wrap an arbitrary JSON value
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Render the document the way it is stored in a bundle entry
    pub fn to_bundle_entry(&self) -> Result<String, crate::Error> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

impl From<serde_json::Value> for EntityConfiguration {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl JsonSchema for EntityConfiguration {
    fn schema_name() -> String {
        "EntityConfiguration".to_string()
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        let mut schema = SchemaObject {
            instance_type: Some(InstanceType::Object.into()),
            ..Default::default()
        };
        schema.extensions.insert(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            serde_json::Value::Bool(true),
        );
        Schema::Object(schema)
    }
}
