//! JSON Schema validation for rubric files.
//!
//! Rubrics are checked against `schema/rubric.schema.json` before they are
//! deserialized, so structural mistakes are reported with their location.

use std::sync::OnceLock;

const RUBRIC_SCHEMA: &str = include_str!("../../schema/rubric.schema.json");

/// The compiled validator. A broken embedded schema is remembered as its
/// error message.
fn validator() -> Result<&'static jsonschema::Validator, &'static str> {
    static VALIDATOR: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

    VALIDATOR
        .get_or_init(|| {
            let schema: serde_json::Value = serde_json::from_str(RUBRIC_SCHEMA)
                .map_err(|e| format!("embedded rubric schema is not JSON: {}", e))?;
            jsonschema::validator_for(&schema)
                .map_err(|e| format!("embedded rubric schema does not compile: {}", e))
        })
        .as_ref()
        .map_err(String::as_str)
}

/// Check a rubric document against the schema.
///
/// Every violation is reported as `"<message> at <instance path>"`.
pub fn validate_rubric_schema(document: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = validator().map_err(|e| vec![e.to_string()])?;

    let violations: Vec<String> = validator
        .iter_errors(document)
        .map(|violation| {
            let path = violation.instance_path.to_string();
            let at = if path.is_empty() { "document root" } else { path.as_str() };
            format!("{} at {}", violation, at)
        })
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}
