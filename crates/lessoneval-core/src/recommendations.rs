//! Recommendation merging across dimensions.

/// Default cap on merged recommendations (three per dimension, four dimensions).
pub const DEFAULT_MAX_RECOMMENDATIONS: usize = 12;

/// Entries this short or shorter carry no actionable content.
const MIN_RECOMMENDATION_CHARS: usize = 15;

/// Merge recommendation lists, dropping near-duplicates.
///
/// Entries are compared case- and whitespace-insensitively; an entry that
/// contains, or is contained in, an already kept entry is a duplicate.
/// First-seen order is preserved and at most `max_total` entries are kept.
pub fn merge_recommendations<'a, I, L>(lists: I, max_total: usize) -> Vec<String>
where
    I: IntoIterator<Item = L>,
    L: IntoIterator<Item = &'a String>,
{
    let mut kept = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    for rec in lists.into_iter().flatten() {
        if kept.len() >= max_total {
            break;
        }
        let rec = rec.trim();
        if rec.chars().count() <= MIN_RECOMMENDATION_CHARS {
            continue;
        }
        let normalized = normalize(rec);
        if seen
            .iter()
            .any(|s| s.contains(&normalized) || normalized.contains(s.as_str()))
        {
            continue;
        }
        seen.push(normalized);
        kept.push(rec.to_string());
    }

    kept
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
