//! Similarity Scorer
//!
//! Computes a multi-factor duplicate score between two tasks. Pure and
//! total: no I/O, no failure modes, symmetric in its two task arguments.
//!
//! **Components (default weights):**
//! - Title similarity (40%): max of Levenshtein and Jaro-Winkler on normalized titles
//! - Description similarity (25%): Levenshtein for short text, term-frequency cosine otherwise
//! - Temporal proximity (15%): creation date (70%) and due date (30%) closeness
//! - Assignee match (10%): source-specific assignee, fuzzy compared
//! - Priority match (10%): exact priority agreement

use crate::services::text_similarity::{
    jaro_winkler_similarity, levenshtein_similarity, normalize_text, term_frequency_cosine,
};
use chrono::{DateTime, Utc};
use taskmerge_common::time::days_between;
use taskmerge_common::{Confidence, DuplicateDetectionConfig, DuplicateScore, Priority, Task};

/// Descriptions shorter than this (in characters) use edit distance
const SHORT_DESCRIPTION_CHARS: usize = 100;

/// Share of temporal proximity driven by creation date
const CREATED_PROXIMITY_WEIGHT: f64 = 0.7;

/// Share of temporal proximity driven by due date
const DUE_PROXIMITY_WEIGHT: f64 = 0.3;

/// Calculate the duplicate score between two tasks
///
/// Two values for the same external record (same source and external id)
/// are never duplicates of each other and score zero.
pub fn calculate_duplicate_score(
    task1: &Task,
    task2: &Task,
    config: &DuplicateDetectionConfig,
) -> DuplicateScore {
    if task1.is_same_record(task2) {
        return DuplicateScore::zero();
    }

    let title_similarity = title_similarity(&task1.title, &task2.title);
    let description_similarity =
        description_similarity(task1.description.as_deref(), task2.description.as_deref());
    let temporal_proximity = temporal_proximity(
        task1.created_at,
        task2.created_at,
        task1.due_date,
        task2.due_date,
        config.max_days_for_temporal_proximity,
    );
    let assignee_match = assignee_match(task1.assignee(), task2.assignee());
    let priority_match = priority_match(task1.priority, task2.priority);

    let overall_score = title_similarity * config.title_weight
        + description_similarity * config.description_weight
        + temporal_proximity * config.temporal_weight
        + assignee_match * config.assignee_weight
        + priority_match * config.priority_weight;

    DuplicateScore {
        title_similarity,
        description_similarity,
        temporal_proximity,
        assignee_match,
        priority_match,
        overall_score,
        confidence: classify_confidence(overall_score, config),
    }
}

/// Map an overall score to its confidence bucket
pub fn classify_confidence(overall_score: f64, config: &DuplicateDetectionConfig) -> Confidence {
    if overall_score >= config.auto_merge_threshold {
        Confidence::High
    } else if overall_score >= config.suggestion_threshold {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Title similarity
///
/// An empty title on either side scores 0. Titles equal after
/// normalization score 1.
pub fn title_similarity(title1: &str, title2: &str) -> f64 {
    if title1.is_empty() || title2.is_empty() {
        return 0.0;
    }

    let normalized1 = normalize_text(title1);
    let normalized2 = normalize_text(title2);
    if normalized1 == normalized2 {
        return 1.0;
    }

    levenshtein_similarity(&normalized1, &normalized2)
        .max(jaro_winkler_similarity(&normalized1, &normalized2))
}

/// Description similarity
///
/// Both missing is vacuously identical (1); exactly one missing is 0.
pub fn description_similarity(desc1: Option<&str>, desc2: Option<&str>) -> f64 {
    let desc1 = desc1.filter(|d| !d.is_empty());
    let desc2 = desc2.filter(|d| !d.is_empty());

    match (desc1, desc2) {
        (None, None) => 1.0,
        (Some(_), None) | (None, Some(_)) => 0.0,
        (Some(d1), Some(d2)) => {
            if d1.chars().count() < SHORT_DESCRIPTION_CHARS
                && d2.chars().count() < SHORT_DESCRIPTION_CHARS
            {
                levenshtein_similarity(&normalize_text(d1), &normalize_text(d2))
            } else {
                term_frequency_cosine(d1, d2)
            }
        }
    }
}

/// Temporal proximity
///
/// `0.7 * created_proximity + 0.3 * due_proximity`, each proximity falling
/// linearly from 1 at zero distance to 0 at `max_days`. Due proximity is 0
/// unless both tasks have a due date.
pub fn temporal_proximity(
    created1: DateTime<Utc>,
    created2: DateTime<Utc>,
    due1: Option<DateTime<Utc>>,
    due2: Option<DateTime<Utc>>,
    max_days: f64,
) -> f64 {
    let created_proximity = proximity(days_between(created1, created2), max_days);
    let due_proximity = match (due1, due2) {
        (Some(d1), Some(d2)) => proximity(days_between(d1, d2), max_days),
        _ => 0.0,
    };

    created_proximity * CREATED_PROXIMITY_WEIGHT + due_proximity * DUE_PROXIMITY_WEIGHT
}

fn proximity(distance_days: f64, max_days: f64) -> f64 {
    if max_days <= 0.0 {
        return if distance_days == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - distance_days / max_days).max(0.0)
}

/// Assignee match: 0 unless both sides know an assignee
pub fn assignee_match(assignee1: Option<&str>, assignee2: Option<&str>) -> f64 {
    let (Some(a1), Some(a2)) = (assignee1, assignee2) else {
        return 0.0;
    };

    let a1 = a1.to_lowercase();
    let a2 = a2.to_lowercase();
    if a1 == a2 {
        return 1.0;
    }
    levenshtein_similarity(&a1, &a2)
}

/// Priority match: both unset counts as agreement
pub fn priority_match(priority1: Option<Priority>, priority2: Option<Priority>) -> f64 {
    match (priority1, priority2) {
        (None, None) => 1.0,
        (Some(p1), Some(p2)) if p1 == p2 => 1.0,
        _ => 0.0,
    }
}
