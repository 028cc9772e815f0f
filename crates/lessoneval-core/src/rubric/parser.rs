//! Rubric parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::schema::validate_rubric_schema;
use crate::types::DimensionId;

/// Tolerance for the sum of configured weights.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// Errors that can occur when loading rubrics.
#[derive(Error, Debug)]
pub enum RubricError {
    #[error("Failed to read rubric file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Rubric does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Rubric validation failed: {0}")]
    ValidationError(String),
}

/// One scored indicator within a dimension (scored 1-5 by the provider).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Indicator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// Static configuration for one rubric dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSpec {
    /// Canonical dimension identifier
    pub id: DimensionId,

    /// Human-readable label
    #[serde(default)]
    pub label: String,

    /// Display weight in `[0, 1]`
    pub weight: f64,

    /// Provider id the dimension is routed to (e.g. "claude")
    pub provider: String,

    /// Name of the prompt template used to build the request
    pub prompt_template: String,

    /// Number of indicators the provider is expected to score
    pub indicator_count: usize,

    #[serde(default)]
    pub indicators: Vec<Indicator>,
}

/// A weighted, multi-dimensional rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    pub name: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub dimensions: Vec<DimensionSpec>,

    /// Legacy dimension id -> canonical id, applied when reading old records
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl Rubric {
    /// Parse a rubric from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, RubricError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a rubric from JSON string.
    pub fn from_json(json: &str) -> Result<Self, RubricError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a rubric from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RubricError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a rubric from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RubricError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse a rubric file, choosing the format from the extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RubricError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_yaml_file(path),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, RubricError> {
        validate_rubric_schema(&value).map_err(RubricError::SchemaError)?;
        let rubric: Rubric = serde_json::from_value(value)?;
        rubric.validate()?;
        Ok(rubric)
    }

    /// Validate semantic constraints the schema cannot express.
    pub fn validate(&self) -> Result<(), RubricError> {
        if self.dimensions.is_empty() {
            return Err(RubricError::ValidationError(
                "rubric has no dimensions".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for dim in &self.dimensions {
            if !seen.insert(dim.id.as_str()) {
                return Err(RubricError::ValidationError(format!(
                    "Duplicate dimension ID: {}",
                    dim.id
                )));
            }
            if !dim.weight.is_finite() || !(0.0..=1.0).contains(&dim.weight) {
                return Err(RubricError::ValidationError(format!(
                    "Weight for {} must be within [0, 1], got {}",
                    dim.id, dim.weight
                )));
            }
            if dim.indicator_count == 0 {
                return Err(RubricError::ValidationError(format!(
                    "Dimension {} must expect at least one indicator",
                    dim.id
                )));
            }
            if !dim.indicators.is_empty() && dim.indicators.len() != dim.indicator_count {
                return Err(RubricError::ValidationError(format!(
                    "Dimension {} lists {} indicators but expects {}",
                    dim.id,
                    dim.indicators.len(),
                    dim.indicator_count
                )));
            }
        }

        let total = self.total_weight();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(RubricError::ValidationError(format!(
                "Dimension weights must sum to 1.0, got {:.4}",
                total
            )));
        }

        for (legacy, canonical) in &self.aliases {
            if seen.contains(legacy.as_str()) {
                return Err(RubricError::ValidationError(format!(
                    "Alias {} shadows a canonical dimension",
                    legacy
                )));
            }
            if !seen.contains(canonical.as_str()) {
                return Err(RubricError::ValidationError(format!(
                    "Alias {} points to unknown dimension {}",
                    legacy, canonical
                )));
            }
        }

        Ok(())
    }

    /// Sum of all configured weights.
    pub fn total_weight(&self) -> f64 {
        self.dimensions.iter().map(|d| d.weight).sum()
    }

    /// Look up a dimension, resolving legacy aliases.
    pub fn dimension(&self, id: &str) -> Option<&DimensionSpec> {
        let id = self.canonical_id(id);
        self.dimensions.iter().find(|d| d.id.as_str() == id)
    }

    /// Resolve a possibly-legacy dimension id to its canonical name.
    pub fn canonical_id<'a>(&'a self, id: &'a str) -> &'a str {
        self.aliases.get(id).map(String::as_str).unwrap_or(id)
    }

    /// Configured weight per dimension.
    pub fn weights(&self) -> BTreeMap<DimensionId, f64> {
        self.dimensions
            .iter()
            .map(|d| (d.id.clone(), d.weight))
            .collect()
    }

    /// Provider ids referenced by any dimension.
    pub fn providers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.dimensions.iter().map(|d| d.provider.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// The built-in four-dimension rubric (version 3.0).
    pub fn builtin() -> Self {
        fn spec(
            id: &str,
            label: &str,
            weight: f64,
            provider: &str,
            template: &str,
            indicators: &[&str],
        ) -> DimensionSpec {
            DimensionSpec {
                id: DimensionId::new(id),
                label: label.to_string(),
                weight,
                provider: provider.to_string(),
                prompt_template: template.to_string(),
                indicator_count: indicators.len(),
                indicators: indicators.iter().map(|n| Indicator::new(*n)).collect(),
            }
        }

        Self {
            name: "Place-based and culturally responsive lesson rubric".to_string(),
            version: "3.0".to_string(),
            description: Some(
                "Four integrated dimensions: place-based learning, cultural responsiveness \
                 with Māori perspectives, critical pedagogy and lesson design quality"
                    .to_string(),
            ),
            dimensions: vec![
                spec(
                    "place_based_learning",
                    "Place-Based Learning",
                    0.25,
                    "deepseek",
                    "place_based",
                    &[
                        "Local context integration",
                        "Community engagement",
                        "Authentic problem-solving",
                        "Indigenous knowledge integration",
                    ],
                ),
                spec(
                    "cultural_responsiveness_integrated",
                    "Cultural Responsiveness & Māori Perspectives (Integrated)",
                    0.35,
                    "claude",
                    "cultural_integrated",
                    &[
                        "Cultural knowledge validation",
                        "Te Reo Māori integration",
                        "Mātauranga Māori depth",
                        "Tikanga and cultural protocols",
                        "Multicultural perspectives",
                    ],
                ),
                spec(
                    "critical_pedagogy",
                    "Critical Pedagogy & Student Engagement",
                    0.25,
                    "gpt",
                    "critical_pedagogy",
                    &[
                        "Power structure analysis",
                        "Student agency and voice",
                        "Social justice orientation",
                        "Dialogic teaching",
                    ],
                ),
                spec(
                    "lesson_design_quality",
                    "Lesson Design Quality",
                    0.15,
                    "gpt",
                    "lesson_design",
                    &[
                        "Clear learning objectives",
                        "Instructional coherence and flow",
                        "Assessment alignment",
                        "Differentiation strategies",
                    ],
                ),
            ],
            aliases: BTreeMap::from([(
                "cultural_responsiveness".to_string(),
                "cultural_responsiveness_integrated".to_string(),
            )]),
        }
    }
}

impl Default for Rubric {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_RUBRIC: &str = r#"
name: "Two dimension rubric"
version: "1.0"
dimensions:
  - id: "place_based_learning"
    label: "Place-Based Learning"
    weight: 0.4
    provider: "deepseek"
    prompt_template: "place_based"
    indicator_count: 2
    indicators:
      - name: "Local context"
      - name: "Community engagement"
        description: "Whānau and community are involved"
  - id: "critical_pedagogy"
    weight: 0.6
    provider: "gpt"
    prompt_template: "critical_pedagogy"
    indicator_count: 4
aliases:
  critical: "critical_pedagogy"
"#;

    #[test]
    fn test_parse_valid_rubric() {
        let rubric = Rubric::from_yaml(VALID_RUBRIC).unwrap();
        assert_eq!(rubric.name, "Two dimension rubric");
        assert_eq!(rubric.dimensions.len(), 2);
        assert_eq!(rubric.dimensions[0].indicators[1].name, "Community engagement");
        assert_eq!(rubric.providers(), vec!["deepseek", "gpt"]);
        assert_eq!(rubric.dimension("critical").unwrap().weight, 0.6);
    }

    #[test]
    fn test_json_round_trip() {
        let rubric = Rubric::from_yaml(VALID_RUBRIC).unwrap();
        let json = serde_json::to_string(&rubric).unwrap();
        let parsed = Rubric::from_json(&json).unwrap();
        assert_eq!(parsed, rubric);
    }

    #[test]
    fn test_builtin_rubric_is_valid() {
        let rubric = Rubric::builtin();
        assert!(rubric.validate().is_ok());
        assert!((rubric.total_weight() - 1.0).abs() < 1e-9);
        assert_eq!(rubric.dimensions.len(), 4);
        assert_eq!(
            rubric.canonical_id("cultural_responsiveness"),
            "cultural_responsiveness_integrated"
        );
        assert_eq!(
            rubric.dimension("cultural_responsiveness").unwrap().weight,
            0.35
        );
    }

    #[test]
    fn test_builtin_passes_schema() {
        let value = serde_json::to_value(Rubric::builtin()).unwrap();
        assert!(validate_rubric_schema(&value).is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let yaml = VALID_RUBRIC.replace("weight: 0.6", "weight: 0.5");
        let result = Rubric::from_yaml(&yaml);
        assert!(matches!(result, Err(RubricError::ValidationError(msg)) if msg.contains("sum")));
    }

    #[test]
    fn test_duplicate_dimension_ids() {
        let yaml = VALID_RUBRIC.replace("id: \"critical_pedagogy\"", "id: \"place_based_learning\"");
        let result = Rubric::from_yaml(&yaml);
        assert!(matches!(result, Err(RubricError::ValidationError(msg)) if msg.contains("Duplicate")));
    }

    #[test]
    fn test_indicator_count_mismatch() {
        let yaml = VALID_RUBRIC.replace("indicator_count: 2", "indicator_count: 3");
        assert!(matches!(
            Rubric::from_yaml(&yaml),
            Err(RubricError::ValidationError(_))
        ));
    }

    #[test]
    fn test_alias_must_target_known_dimension() {
        let yaml = VALID_RUBRIC.replace("critical: \"critical_pedagogy\"", "critical: \"nope\"");
        assert!(matches!(
            Rubric::from_yaml(&yaml),
            Err(RubricError::ValidationError(_))
        ));
    }

    #[test]
    fn test_schema_violation_reported() {
        let yaml = r#"
name: "Bad"
version: "one"
dimensions: []
"#;
        match Rubric::from_yaml(yaml) {
            Err(RubricError::SchemaError(errors)) => assert!(!errors.is_empty()),
            other => panic!("expected schema error, got {:?}", other),
        }
    }
}
