use crate::calc::RiskTier;
use crate::report::{ActivityDifficulty, CohortStats};

pub const DEFAULT_ACTIVITY_LIMIT: usize = 2;

const NO_CRITICAL_ACTIVITIES: &str = "No critical activities in the analyzed period.";
const RECOMMENDATIONS: &str = "Recommendations: prioritize recovery for students in the critical tier; review the material behind the critical activities; share individual targets (second period and final) with students close to the cutoff.";

fn whole_percent(count: usize, total: usize) -> i64 {
    if total == 0 {
        return 0;
    }
    ((count as f64) / (total as f64) * 100.0).round() as i64
}

fn activity_clause(a: &ActivityDifficulty) -> String {
    let mut out = format!(
        "{} ({}), average {:.1}",
        a.title,
        a.bucket.as_str(),
        a.average
    );
    if a.missing_rate > 0.0 {
        out.push_str(&format!(
            ", {}% ungraded",
            (a.missing_rate * 100.0).round() as i64
        ));
    }
    out
}

/// Fixed-template class summary. Pure: identical input renders identical
/// text. At most `limit` activities from `hardest` are named.
pub fn render_narrative(stats: &CohortStats, hardest: &[ActivityDifficulty], limit: usize) -> String {
    let total = stats.student_count;
    let mut parts: Vec<String> = Vec::with_capacity(4);

    parts.push(format!(
        "Overview: first-period average {:.1}, second-period average {:.1}, standing average {:.1} (median {:.1}).",
        stats.mean_first, stats.mean_second, stats.mean_standing, stats.median_standing
    ));

    let tiers = RiskTier::ALL
        .iter()
        .map(|t| {
            let count = stats.tier_count(*t);
            format!("{} {} ({}%)", t.as_str(), count, whole_percent(count, total))
        })
        .collect::<Vec<_>>()
        .join(", ");
    parts.push(format!("Risk distribution: {}.", tiers));

    let named: Vec<String> = hardest.iter().take(limit).map(activity_clause).collect();
    if named.is_empty() {
        parts.push(NO_CRITICAL_ACTIVITIES.to_string());
    } else {
        parts.push(format!("Most critical activities: {}.", named.join("; ")));
    }

    parts.push(RECOMMENDATIONS.to_string());
    parts.join(" ")
}
