//! Prompt templates for dimension evaluators and the debate pass.
//!
//! Every dimension call is two messages:
//! 1. The shared system prompt, fixing the JSON response shape
//! 2. The dimension template rendered against the lesson
//!
//! Templates are plain text with `{placeholder}` markers. Unknown markers
//! are left as-is.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

use lessoneval_core::{CrossReview, DimensionResult, DimensionSpec, EvaluationRequest};

use crate::providers::ChatMessage;

/// Errors loading or rendering prompt templates.
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Unknown prompt template: '{0}'")]
    UnknownTemplate(String),

    #[error("Failed to read prompt templates: {0}")]
    IoError(#[from] std::io::Error),
}

/// System prompt shared by every dimension evaluator.
pub const BASE_SYSTEM_PROMPT: &str = r#"
You are an experienced teacher educator in Aotearoa New Zealand evaluating a
lesson plan against one dimension of a rubric.

## Evaluation Constraints
1. Evaluate ONLY the dimension and indicators you are given
2. Ground every strength and gap in something the lesson actually says
3. Score each indicator from 1 to 5, then give an overall score from 0 to 100
4. Recommendations must be concrete actions a teacher could take next lesson

## Output Format (JSON only, no markdown, no extra text)
{
  "score": 0-100,
  "strengths": ["what the lesson does well"],
  "areas_for_improvement": ["what is weak or missing"],
  "gaps": ["indicators the lesson does not address"],
  "recommendations": ["specific, actionable changes"],
  "indicator_scores": {"indicator name": 1-5},
  "summary": "two or three sentences"
}
"#;

pub const PLACE_BASED_TEMPLATE: &str = r#"
## Dimension: Place-Based Learning

Evaluate how the lesson "{title}" ({grade_level}, {subject_area}) grounds
learning in local places, communities and environments.

Indicators ({indicator_count}):
{indicators}

Consider whether specific local places are named, whether the community is a
partner rather than a topic, and whether students solve authentic local
problems.

Lesson plan:
{lesson_plan_text}
"#;

pub const CULTURAL_INTEGRATED_TEMPLATE: &str = r#"
## Dimension: Cultural Responsiveness & Māori Perspectives (Integrated)

Evaluate how the lesson "{title}" ({grade_level}, {subject_area}) validates
students' cultural knowledge and integrates Māori perspectives with depth
rather than as decoration.

Indicators ({indicator_count}):
{indicators}

Look for te reo Māori used in context, mātauranga Māori treated as knowledge,
tikanga observed in activities, and room for other cultural perspectives in
the class.

Lesson plan:
{lesson_plan_text}
"#;

pub const CRITICAL_PEDAGOGY_TEMPLATE: &str = r#"
## Dimension: Critical Pedagogy & Student Engagement

Evaluate how the lesson "{title}" ({grade_level}, {subject_area}) invites
students to question power, voice and whose stories are told.

Indicators ({indicator_count}):
{indicators}

Look for open questions such as "whose voices are missing?", genuine student
choice, dialogue rather than recitation, and links to justice in the
students' own community.

Lesson plan:
{lesson_plan_text}
"#;

pub const LESSON_DESIGN_TEMPLATE: &str = r#"
## Dimension: Lesson Design Quality

Evaluate the instructional design of the lesson "{title}" ({grade_level},
{subject_area}).

Indicators ({indicator_count}):
{indicators}

Check that objectives are clear and assessable, activities build on each
other, assessment matches the objectives, and the plan differentiates for
different learners.

Lesson plan:
{lesson_plan_text}
"#;

/// Named prompt templates.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    templates: BTreeMap<String, String>,
}

impl PromptLibrary {
    /// An empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in dimension templates.
    pub fn builtin() -> Self {
        let mut library = Self::new();
        library.insert("place_based", PLACE_BASED_TEMPLATE);
        library.insert("cultural_integrated", CULTURAL_INTEGRATED_TEMPLATE);
        library.insert("critical_pedagogy", CRITICAL_PEDAGOGY_TEMPLATE);
        library.insert("lesson_design", LESSON_DESIGN_TEMPLATE);
        library
    }

    pub fn insert(&mut self, name: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(name.into(), template.into());
    }

    /// Add or replace templates from `<name>.txt` files in `dir`.
    ///
    /// Returns the number of templates loaded.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize, PromptError> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let template = std::fs::read_to_string(&path)?;
            tracing::debug!(template = name, path = %path.display(), "Loaded prompt template");
            self.insert(name, template);
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    /// Render a dimension's template against a request.
    pub fn render(
        &self,
        template: &str,
        request: &EvaluationRequest,
        spec: &DimensionSpec,
    ) -> Result<String, PromptError> {
        let text = self
            .get(template)
            .ok_or_else(|| PromptError::UnknownTemplate(template.to_string()))?;

        let mut rendered = text
            .replace("{title}", &request.title)
            .replace("{grade_level}", or_unspecified(&request.grade_level))
            .replace("{subject_area}", or_unspecified(&request.subject_area))
            .replace("{dimension}", spec.id.as_str())
            .replace("{indicator_count}", &spec.indicator_count.to_string())
            .replace("{indicators}", &indicator_list(spec));

        // Lesson text goes last so its contents are never re-substituted
        if rendered.contains("{lesson_plan_text}") {
            rendered = rendered.replace("{lesson_plan_text}", &request.content);
        } else {
            rendered.push_str("\n\nLesson plan:\n");
            rendered.push_str(&request.content);
        }

        Ok(format!("Dimension: {}\n{}", spec.id, rendered))
    }

    /// The full message list for one dimension call.
    pub fn dimension_messages(
        &self,
        request: &EvaluationRequest,
        spec: &DimensionSpec,
    ) -> Result<Vec<ChatMessage>, PromptError> {
        Ok(vec![
            ChatMessage::system(BASE_SYSTEM_PROMPT.trim()),
            ChatMessage::user(self.render(&spec.prompt_template, request, spec)?),
        ])
    }
}

fn or_unspecified(value: &str) -> &str {
    if value.trim().is_empty() {
        "unspecified"
    } else {
        value
    }
}

fn indicator_list(spec: &DimensionSpec) -> String {
    if spec.indicators.is_empty() {
        return format!("{} indicators, each scored 1-5", spec.indicator_count);
    }
    let mut out = String::new();
    for (i, indicator) in spec.indicators.iter().enumerate() {
        let _ = write!(out, "{}. {}", i + 1, indicator.name);
        if let Some(description) = indicator.description.as_deref().filter(|d| !d.is_empty()) {
            let _ = write!(out, ": {}", description);
        }
        out.push_str(" (score 1-5)\n");
    }
    out
}

fn evaluation_summary(results: &[DimensionResult]) -> String {
    let mut out = String::new();
    for result in results.iter().filter(|r| r.is_success()) {
        let _ = writeln!(
            out,
            "### {} (evaluated by {}): {}/100",
            result.dimension,
            result.provider,
            result.score.unwrap_or_default()
        );
        for (section, items) in &result.breakdown {
            let _ = writeln!(out, "{}: {}", section, items.join("; "));
        }
        if !result.recommendations.is_empty() {
            let _ = writeln!(out, "recommendations: {}", result.recommendations.join("; "));
        }
        out.push('\n');
    }
    out
}

/// Round one: ask a dimension's evaluator to review every initial result.
pub fn cross_review_messages(
    request: &EvaluationRequest,
    reviewer: &DimensionResult,
    results: &[DimensionResult],
) -> Vec<ChatMessage> {
    let prompt = format!(
        r#"You evaluated the lesson plan "{title}" for the dimension {dimension} and gave it {score}/100.

Here are ALL initial evaluations:
{summary}
Review the other evaluations. Consider:
1. Do you agree or disagree with their scores? Why?
2. Did another evaluator catch something you missed in your own dimension?
3. Would you adjust your own score after seeing their perspectives?

Respond with JSON only:
{{
  "agreements": ["what you agree with"],
  "disagreements": ["what you disagree with and why"],
  "new_insights": ["things others caught that you missed"],
  "original_score": {score},
  "adjusted_score": <revised score 0-100, or the same score>,
  "score_change_reason": "why you changed or kept your score"
}}"#,
        title = request.title,
        dimension = reviewer.dimension,
        score = reviewer.score.unwrap_or_default(),
        summary = evaluation_summary(results),
    );
    vec![ChatMessage::user(prompt)]
}

/// Round two: ask the moderator for a consensus.
pub fn moderator_messages(
    request: &EvaluationRequest,
    results: &[DimensionResult],
    reviews: &[CrossReview],
    specs: &[DimensionSpec],
) -> Vec<ChatMessage> {
    let mut debate = evaluation_summary(results);
    debate.push_str("## Cross-reviews\n");
    for review in reviews {
        if let Some(error) = &review.error {
            let _ = writeln!(debate, "### {}: review failed ({})", review.dimension, error);
            continue;
        }
        let _ = writeln!(
            debate,
            "### {} adjusted score: {}",
            review.dimension,
            review
                .adjusted_score
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unchanged".to_string())
        );
        for (label, items) in [
            ("agreements", &review.agreements),
            ("disagreements", &review.disagreements),
            ("new insights", &review.new_insights),
        ] {
            if !items.is_empty() {
                let _ = writeln!(debate, "{}: {}", label, items.join("; "));
            }
        }
    }

    let mut weights = String::new();
    let mut score_keys = String::new();
    for spec in specs {
        if results.iter().any(|r| r.is_success() && r.dimension == spec.id) {
            let _ = writeln!(weights, "- {}: {:.0}%", spec.id, spec.weight * 100.0);
            let _ = writeln!(score_keys, "    \"{}\": <integer 0-100>,", spec.id);
        }
    }

    let prompt = format!(
        r#"You are moderating a multi-evaluator debate about the lesson plan "{title}".

{debate}
Based on the initial evaluations and the cross-reviews, decide final consensus
scores for each dimension, the points of agreement, and the priority
recommendations. The overall score is a weighted average of:
{weights}
Respond with JSON only:
{{
  "consensus_scores": {{
{score_keys}    "overall": <integer 0-100 weighted average>
  }},
  "agreements": ["points all evaluators agreed on"],
  "priority_recommendations": ["most important improvements first"],
  "confidence_level": "HIGH or MEDIUM or LOW",
  "confidence_reason": "why this confidence level"
}}"#,
        title = request.title,
    );
    vec![ChatMessage::user(prompt)]
}
