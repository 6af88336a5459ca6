//! Payload validation producing a field → reason map.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::ids::BattleId;

pub type FieldErrors = BTreeMap<String, String>;

/// Decode `payload` into `T` and run its declared constraints.
pub fn validate_payload<T>(payload: &serde_json::Value) -> Result<T, FieldErrors>
where
    T: DeserializeOwned + Validate,
{
    let value: T = T::deserialize(payload)
        .map_err(|e| FieldErrors::from([("payload".to_string(), format!("invalid payload: {e}"))]))?;
    value.validate().map_err(|e| field_errors(&e))?;
    Ok(value)
}

/// Parse a battle id field, reporting failures under `battle_id`.
pub fn parse_battle_id(raw: &str) -> Result<BattleId, FieldErrors> {
    raw.parse().map_err(|_| {
        FieldErrors::from([("battle_id".to_string(), "must be a valid UUID".to_string())])
    })
}

/// Flatten validator errors into one reason per field (first rule wins).
pub fn field_errors(errors: &ValidationErrors) -> FieldErrors {
    let mut out = FieldErrors::new();
    for (field, errs) in errors.field_errors() {
        if let Some(first) = errs.iter().next() {
            out.insert(field.to_string(), describe(first));
        }
    }
    out
}

fn describe(err: &ValidationError) -> String {
    if let Some(message) = &err.message {
        return message.to_string();
    }
    let param = |name: &str| err.params.get(name).map(|v| v.to_string());
    match err.code.as_ref() {
        "required" => "is required".to_string(),
        "length" => match (param("equal"), param("min"), param("max")) {
            (Some(eq), _, _) => format!("must have length {eq}"),
            (None, Some(min), _) => format!("must have length at least {min}"),
            (None, None, Some(max)) => format!("must have length at most {max}"),
            _ => "has an invalid length".to_string(),
        },
        "range" => match (param("min"), param("max")) {
            (Some(min), _) => format!("must be at least {min}"),
            (None, Some(max)) => format!("must be at most {max}"),
            _ => "is out of range".to_string(),
        },
        other => format!("failed validation on rule '{other}'"),
    }
}
