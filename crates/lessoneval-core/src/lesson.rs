//! Lesson plan format diagnostics.
//!
//! Detects lesson text that will evaluate poorly for structural reasons
//! (outline numbering, pasted JSON, very short plans) before it is sent to
//! any provider. Diagnostics are advisory and never block an evaluation.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref NUMBERED_SECTION: Regex = Regex::new(r"(?m)^\s*\d+\.\d+\b").unwrap();
    static ref LIST_LITERAL: Regex = Regex::new(r#"\[\s*['"][^'"\]]+['"]\s*,"#).unwrap();
    static ref JSON_KEY: Regex = Regex::new(r#""[A-Za-z_]+"\s*:"#).unwrap();
}

/// Plans shorter than this are flagged as an issue.
pub const MIN_LESSON_CHARS: usize = 1000;

/// Plans shorter than this get a warning.
pub const RECOMMENDED_LESSON_CHARS: usize = 1500;

const TE_REO_TERMS: &[&str] = &[
    "te reo",
    "māori",
    "maori",
    "kia ora",
    "whānau",
    "mana",
    "kaitiakitanga",
    "whanaungatanga",
    "whakapapa",
];

const PLACE_TERMS: &[&str] = &[
    "Auckland",
    "Wellington",
    "Canterbury",
    "Ōrākei",
    "Te Papa",
    "Museum",
    "Marae",
    "Waitangi",
];

const CRITICAL_QUESTIONS: &[&str] = &[
    "whose stories",
    "whose voices",
    "different perspectives",
    "why might different",
    "how has",
];

/// Result of inspecting a lesson plan's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonDiagnostics {
    /// Structural problems likely to hurt evaluation quality
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub char_count: usize,
    pub word_count: usize,
    pub has_te_reo: bool,
    pub has_specific_places: bool,
    pub has_critical_questions: bool,
}

impl LessonDiagnostics {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Inspect lesson text for format problems.
pub fn inspect(text: &str) -> LessonDiagnostics {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();
    let lower = text.to_lowercase();
    let char_count = text.chars().count();

    if NUMBERED_SECTION.is_match(text) {
        issues.push("Contains numbered outline sections (1.1, 1.2, ...)".to_string());
    }
    if LIST_LITERAL.is_match(text) {
        issues.push("Contains list literal syntax".to_string());
    }
    if text.trim_start().starts_with('{') && JSON_KEY.is_match(text) {
        issues.push("Appears to be JSON instead of narrative text".to_string());
    }

    if char_count < MIN_LESSON_CHARS {
        issues.push(format!("Too short (less than {} chars)", MIN_LESSON_CHARS));
    } else if char_count < RECOMMENDED_LESSON_CHARS {
        warnings.push(format!(
            "Relatively short (less than {} chars)",
            RECOMMENDED_LESSON_CHARS
        ));
    }

    let has_te_reo = TE_REO_TERMS.iter().any(|t| lower.contains(t));
    if !has_te_reo {
        warnings.push("No te reo Māori terms detected".to_string());
    }

    let has_specific_places = PLACE_TERMS.iter().any(|p| text.contains(p));
    if !has_specific_places {
        warnings.push("No specific local places named".to_string());
    }

    let has_critical_questions = CRITICAL_QUESTIONS.iter().any(|q| lower.contains(q));

    LessonDiagnostics {
        issues,
        warnings,
        char_count,
        word_count: text.split_whitespace().count(),
        has_te_reo,
        has_specific_places,
        has_critical_questions,
    }
}
