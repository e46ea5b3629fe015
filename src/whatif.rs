use crate::calc::{self, MAX_SCORE, PASSING_THRESHOLD};
use crate::report::ReportRow;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfRow {
    pub student_id: String,
    pub name: String,
    pub first10: f64,
    pub second10: f64,
    pub new_second: f64,
    pub standing: f64,
    pub new_standing: f64,
    pub crossed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfResult {
    pub delta: f64,
    pub updated_rows: Vec<WhatIfRow>,
    pub crossed: Vec<WhatIfRow>,
    pub before_count: usize,
    pub after_count: usize,
}

/// Applies `delta` to every student's second-period score (clamped to
/// 0..10) and recomputes the standing composite. Any delta is accepted; NaN
/// counts as no change.
pub fn simulate(rows: &[ReportRow], delta: f64) -> WhatIfResult {
    let delta = if delta.is_nan() { 0.0 } else { delta };

    let updated_rows: Vec<WhatIfRow> = rows
        .iter()
        .map(|r| {
            let new_second = (r.scores.second10 + delta).clamp(0.0, MAX_SCORE);
            let new_standing = calc::midterm_composite(r.scores.first10, new_second);
            WhatIfRow {
                student_id: r.student_id.clone(),
                name: r.name.clone(),
                first10: r.scores.first10,
                second10: r.scores.second10,
                new_second,
                standing: r.standing,
                new_standing,
                crossed: r.standing < PASSING_THRESHOLD && new_standing >= PASSING_THRESHOLD,
            }
        })
        .collect();

    let before_count = updated_rows
        .iter()
        .filter(|r| r.standing >= PASSING_THRESHOLD)
        .count();
    let after_count = updated_rows
        .iter()
        .filter(|r| r.new_standing >= PASSING_THRESHOLD)
        .count();

    let mut crossed: Vec<WhatIfRow> = updated_rows.iter().filter(|r| r.crossed).cloned().collect();
    crossed.sort_by(|a, b| a.standing.partial_cmp(&b.standing).unwrap_or(Ordering::Equal));

    WhatIfResult {
        delta,
        updated_rows,
        crossed,
        before_count,
        after_count,
    }
}
