//! Human-readable rendering of records, statistics and diagnostics.

use std::fmt::Write;

use lessoneval_core::{EvaluationRecord, EvaluationStatus, LessonDiagnostics, Rubric};
use lessoneval_runtime::{EvaluationOrchestrator, ProviderRegistry, StoreStatistics};

/// Full summary of one evaluation.
pub fn record_summary(record: &EvaluationRecord) -> String {
    let mut out = String::new();
    let state = if record.is_degraded() {
        format!("{} (degraded)", record.status)
    } else {
        record.status.to_string()
    };
    let _ = writeln!(out, "Evaluation {}  {}", record.id, state);
    let _ = writeln!(out, "Title:   {}", record.request.title);
    if !record.request.grade_level.is_empty() || !record.request.subject_area.is_empty() {
        let _ = writeln!(
            out,
            "Level:   {} {}",
            record.request.grade_level, record.request.subject_area
        );
    }
    let _ = writeln!(out, "Mode:    {}", record.mode);

    match (&record.composite, &record.error) {
        (Some(composite), _) => {
            let _ = writeln!(out, "Overall: {}/100", composite.overall);
        }
        (None, Some(error)) => {
            let _ = writeln!(out, "Error:   {}", error);
        }
        (None, None) => {}
    }

    if !record.results.is_empty() {
        let _ = writeln!(out, "\nDimensions:");
        for result in &record.results {
            let weight = record
                .composite
                .as_ref()
                .and_then(|c| c.active_weights.get(result.dimension.as_str()))
                .map(|w| format!("{:>4.0}%", w * 100.0))
                .unwrap_or_else(|| "    -".to_string());
            match result.score {
                Some(score) if result.is_success() => {
                    let _ = writeln!(
                        out,
                        "  {:<36} {:>5.1} {}  {} ({} attempt{}, {:.1}s)",
                        result.dimension,
                        score,
                        weight,
                        result.provider,
                        result.attempts,
                        if result.attempts == 1 { "" } else { "s" },
                        result.elapsed().as_secs_f64()
                    );
                }
                _ => {
                    let _ = writeln!(
                        out,
                        "  {:<36} {:>5} {}  {} {}",
                        result.dimension,
                        "-",
                        weight,
                        result.provider,
                        result.status
                    );
                }
            }
        }
    }

    if !record.unavailable.is_empty() {
        let _ = writeln!(out, "\nUnavailable:");
        for missing in &record.unavailable {
            let _ = writeln!(
                out,
                "  {:<36} {}{}",
                missing.dimension,
                missing.reason,
                missing
                    .detail
                    .as_deref()
                    .map(|d| format!(": {}", d))
                    .unwrap_or_default()
            );
        }
    }

    if !record.recommendations.is_empty() {
        let _ = writeln!(out, "\nRecommendations:");
        for (i, rec) in record.recommendations.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", i + 1, rec);
        }
    }

    if let Some(consensus) = &record.consensus {
        let _ = writeln!(out, "\nConsensus{}:", if consensus.fallback { " (fallback)" } else { "" });
        if let Some(overall) = consensus.overall {
            let _ = writeln!(out, "  Overall:    {}/100", overall);
        }
        let _ = writeln!(
            out,
            "  Confidence: {} {}",
            consensus.confidence, consensus.confidence_reason
        );
        for rec in &consensus.priority_recommendations {
            let _ = writeln!(out, "  - {}", rec);
        }
    }

    let usage = record.total_usage();
    if usage.total() > 0 {
        let _ = writeln!(
            out,
            "\nTokens:  {} prompt, {} completion",
            usage.prompt_tokens, usage.completion_tokens
        );
    }
    out
}

/// One line per record, for history listings.
pub fn record_line(record: &EvaluationRecord) -> String {
    let overall = record
        .overall_score()
        .map(|s| format!("{:>3}", s))
        .unwrap_or_else(|| "  -".to_string());
    let marker = match record.status {
        EvaluationStatus::Completed if record.is_degraded() => "~",
        EvaluationStatus::Completed => " ",
        EvaluationStatus::Failed => "!",
        EvaluationStatus::Pending => "…",
    };
    format!(
        "{} {}  {}  {}{}  {}",
        record.id,
        record.created_at.format("%Y-%m-%d %H:%M"),
        overall,
        marker,
        record.status,
        record.request.title
    )
}

pub fn statistics(stats: &StoreStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total:     {}", stats.total);
    let _ = writeln!(out, "Completed: {}", stats.completed);
    let _ = writeln!(out, "Failed:    {}", stats.failed);
    let _ = writeln!(out, "Pending:   {}", stats.pending);
    match stats.average_overall {
        Some(avg) => {
            let _ = writeln!(out, "Average:   {:.1}", avg);
        }
        None => {
            let _ = writeln!(out, "Average:   -");
        }
    }
    out
}

pub fn rubric(rubric: &Rubric) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} v{}", rubric.name, rubric.version);
    for spec in &rubric.dimensions {
        let _ = writeln!(
            out,
            "  {:<36} {:>4.0}%  {:<10} {} ({} indicators)",
            spec.id,
            spec.weight * 100.0,
            spec.provider,
            spec.prompt_template,
            spec.indicator_count
        );
    }
    for (legacy, canonical) in &rubric.aliases {
        let _ = writeln!(out, "  alias {} -> {}", legacy, canonical);
    }
    out
}

/// Configured provider ids with their binding state, then the known kinds.
pub fn providers(orchestrator: &EvaluationOrchestrator, registry: &ProviderRegistry) -> String {
    let mut out = String::new();
    for (id, settings) in &orchestrator.config().providers {
        let state = match orchestrator.unbound_reason(id) {
            Some(reason) => format!("unavailable ({})", reason),
            None => "ready".to_string(),
        };
        let _ = writeln!(
            out,
            "{:<10} {:<10} {:<28} {}",
            id, settings.kind, settings.model, state
        );
    }
    let _ = writeln!(out, "\nKinds:");
    for (kind, description) in registry.catalog() {
        let _ = writeln!(out, "  {:<10} {}", kind, description);
    }
    out
}

pub fn diagnostics(diagnostics: &LessonDiagnostics) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} characters, {} words",
        diagnostics.char_count, diagnostics.word_count
    );
    for issue in &diagnostics.issues {
        let _ = writeln!(out, "  ✗ {}", issue);
    }
    for warning in &diagnostics.warnings {
        let _ = writeln!(out, "  ! {}", warning);
    }
    let flag = |on: bool| if on { "yes" } else { "no" };
    let _ = writeln!(out, "Te reo Māori:        {}", flag(diagnostics.has_te_reo));
    let _ = writeln!(out, "Named local places:  {}", flag(diagnostics.has_specific_places));
    let _ = writeln!(out, "Critical questions:  {}", flag(diagnostics.has_critical_questions));
    out
}
