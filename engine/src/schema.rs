//! Entity payload schemas.
//!
//! Mutations coming from the UI are checked against the shape of their
//! entity before anything is written locally or queued for the server.

use crate::{clock, error::Result, EntityType, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kinds of value a field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Bool,
    /// ISO-8601 date string
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldType::String => "String",
            FieldType::Int => "Int",
            FieldType::Bool => "Bool",
            FieldType::Timestamp => "Timestamp",
            FieldType::Json => "Json",
        })
    }
}

/// One field of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldDef {
    pub const fn required(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: false,
        }
    }

    /// Check a field value. `null` counts as absent.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None | Some(Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.to_string()))
            }
            None | Some(Value::Null) => Ok(()),
            Some(v) if self.accepts(v) => Ok(()),
            Some(v) => Err(Error::TypeMismatch {
                field: self.name.to_string(),
                expected: self.field_type.to_string(),
                got: json_type_name(v).to_string(),
            }),
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.as_str().and_then(clock::parse_iso).is_some(),
            FieldType::Json => true,
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

const TRANSACTION_FIELDS: &[FieldDef] = &[
    FieldDef::required("amount", FieldType::Int),
    FieldDef::required("isIncome", FieldType::Bool),
    FieldDef::required("currency", FieldType::String),
    FieldDef::required("description", FieldType::String),
    FieldDef::optional("createdAt", FieldType::Timestamp),
    FieldDef::optional("tags", FieldType::Json),
    FieldDef::optional("session", FieldType::Json),
];

const TEMPLATE_FIELDS: &[FieldDef] = &[
    FieldDef::required("name", FieldType::String),
    FieldDef::required("amount", FieldType::Int),
    FieldDef::required("isIncome", FieldType::Bool),
    FieldDef::required("currency", FieldType::String),
    FieldDef::required("description", FieldType::String),
    FieldDef::optional("tags", FieldType::Json),
];

const SHOPPING_SESSION_FIELDS: &[FieldDef] = &[FieldDef::optional("name", FieldType::String)];

/// Field definitions of an entity type.
pub fn fields_of(entity: EntityType) -> &'static [FieldDef] {
    match entity {
        EntityType::Transaction => TRANSACTION_FIELDS,
        EntityType::Template => TEMPLATE_FIELDS,
        EntityType::ShoppingSession => SHOPPING_SESSION_FIELDS,
    }
}

/// Validate a payload for `entity`. Unknown fields are passed through.
pub fn validate_payload(entity: EntityType, payload: &Value) -> Result<()> {
    let obj = payload
        .as_object()
        .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))?;

    for field in fields_of(entity) {
        field.validate(obj.get(field.name))?;
    }
    Ok(())
}
