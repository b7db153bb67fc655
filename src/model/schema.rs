use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declarative schema the validator evaluates staged rows against. Fields
/// absent from the schema are rejected at header validation; descriptors may
/// name a validation rule and/or a uniqueness rule to apply.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImportSchema {
    #[serde(default)]
    pub properties: HashMap<String, PropertyDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// Name of the validation rule to invoke against this field's value.
    #[serde(rename = "validationCalculation", skip_serializing_if = "Option::is_none")]
    pub validation_calculation: Option<String>,
    /// Name of the uniqueness rule to invoke against the entire row set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uniqueness: Option<String>,
}

impl ImportSchema {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let schema = serde_json::from_str(raw)?;
        Ok(schema)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &String> {
        self.properties.keys()
    }
}
