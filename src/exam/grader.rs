//! Deterministic grading
//!
//! Pure function over an attempt's frozen item list and the submitted
//! answers. Malformed answer arrays never error; a missing or
//! out-of-range answer is simply wrong.

use serde::Serialize;

use crate::db::items::ItemRow;

/// Fixed passing threshold, percent
pub const PASSING_PERCENT: f64 = 80.0;

/// Grading outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeResult {
    pub score: f64,
    pub correct_count: i64,
    pub total_count: i64,
    pub passed: bool,
}

/// Grade `answers` against `items`. `answers[i]` is the selected choice
/// index for `items[i]`, or None when unanswered; extra trailing answers
/// are ignored.
pub fn grade(items: &[ItemRow], answers: &[Option<i64>]) -> GradeResult {
    let total_count = items.len() as i64;

    let correct_count = items
        .iter()
        .enumerate()
        .filter(|(i, item)| answers.get(*i).copied().flatten() == Some(item.correct_index))
        .count() as i64;

    let score = if total_count == 0 {
        0.0
    } else {
        100.0 * correct_count as f64 / total_count as f64
    };

    GradeResult {
        score,
        correct_count,
        total_count,
        passed: score >= PASSING_PERCENT,
    }
}
