use crate::calc::{
    self, Activity, Aggregate, AggregateOptions, Bucket, CalcError, GradeState, RiskTier, Student,
};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Score,
    Risk,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "score" => Some(SortKey::Score),
            "risk" => Some(SortKey::Risk),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOptions {
    pub cutoff: Option<NaiveDateTime>,
    pub treat_ungraded_as_excluded: bool,
    pub sort_key: SortKey,
    pub sort_direction: SortDirection,
}

impl ReportOptions {
    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            cutoff: self.cutoff,
            treat_ungraded_as_excluded: self.treat_ungraded_as_excluded,
        }
    }
}

/// `options.cutoff`: absent, null or blank means no cutoff.
pub fn parse_cutoff(raw: Option<&serde_json::Value>) -> Result<Option<NaiveDateTime>, CalcError> {
    let Some(v) = raw else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let Some(s) = v.as_str() else {
        return Err(CalcError::new(
            "bad_params",
            "options.cutoff must be a date string or null",
        ));
    };
    if s.trim().is_empty() {
        return Ok(None);
    }
    match calc::parse_date_time(s) {
        Some(dt) => Ok(Some(dt)),
        None => Err(CalcError::new(
            "bad_params",
            "options.cutoff must be YYYY-MM-DD or RFC 3339",
        )
        .with_details(serde_json::json!({ "cutoff": s }))),
    }
}

/// Parses `options` from a request. `treatUngradedAsExcluded` has no default
/// and must always be sent; sort fields fall back to the workspace defaults.
pub fn parse_report_options(
    raw: Option<&serde_json::Value>,
    default_sort_key: SortKey,
    default_sort_direction: SortDirection,
) -> Result<ReportOptions, CalcError> {
    let Some(raw) = raw else {
        return Err(CalcError::new(
            "bad_params",
            "missing options.treatUngradedAsExcluded",
        ));
    };
    let Some(obj) = raw.as_object() else {
        return Err(CalcError::new("bad_params", "options must be an object"));
    };

    let cutoff = parse_cutoff(obj.get("cutoff"))?;

    let Some(treat_ungraded_as_excluded) = obj
        .get("treatUngradedAsExcluded")
        .and_then(|v| v.as_bool())
    else {
        return Err(CalcError::new(
            "bad_params",
            "options.treatUngradedAsExcluded must be a boolean",
        ));
    };

    let sort_key = match obj.get("sortKey") {
        None => default_sort_key,
        Some(v) if v.is_null() => default_sort_key,
        Some(v) => match v.as_str().and_then(SortKey::parse) {
            Some(k) => k,
            None => {
                return Err(CalcError::new(
                    "bad_params",
                    "options.sortKey must be one of: score, risk",
                ))
            }
        },
    };

    let sort_direction = match obj.get("sortDirection") {
        None => default_sort_direction,
        Some(v) if v.is_null() => default_sort_direction,
        Some(v) => match v.as_str().and_then(SortDirection::parse) {
            Some(d) => d,
            None => {
                return Err(CalcError::new(
                    "bad_params",
                    "options.sortDirection must be one of: asc, desc",
                ))
            }
        },
    };

    Ok(ReportOptions {
        cutoff,
        treat_ungraded_as_excluded,
        sort_key,
        sort_direction,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub student_id: String,
    pub name: String,
    pub academic_no: Option<String>,
    pub scores: Aggregate,
    /// Midterm composite; drives risk, ordering, statistics and what-if.
    pub standing: f64,
    pub risk: RiskTier,
    pub needed_second: f64,
    pub needed_final: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierCount {
    pub tier: RiskTier,
    pub count: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBin {
    pub label: &'static str,
    pub min: f64,
    pub max: f64,
    pub count: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDifficulty {
    pub activity_id: String,
    pub title: String,
    pub bucket: Bucket,
    pub weight: f64,
    pub average: f64,
    pub missing_rate: f64,
    pub graded_count: usize,
    pub missing_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortStats {
    pub student_count: usize,
    pub mean_first: f64,
    pub mean_second: f64,
    pub mean_standing: f64,
    pub mean_term: f64,
    pub median_standing: f64,
    pub tier_counts: Vec<TierCount>,
    pub histogram: Vec<HistogramBin>,
    pub hardest_activities: Vec<ActivityDifficulty>,
}

impl CohortStats {
    pub fn tier_count(&self, tier: RiskTier) -> usize {
        self.tier_counts
            .iter()
            .find(|t| t.tier == tier)
            .map(|t| t.count)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassReport {
    pub options: ReportOptions,
    pub rows: Vec<ReportRow>,
    pub stats: CohortStats,
}

/// Upper bin is closed so a perfect 10 lands in it.
const HISTOGRAM_BINS: [(&str, f64, f64); 6] = [
    ("0-5", 0.0, 5.0),
    ("5-6", 5.0, 6.0),
    ("6-7", 6.0, 7.0),
    ("7-8", 7.0, 8.0),
    ("8-9", 8.0, 9.0),
    ("9-10", 9.0, 10.0),
];

/// Scores outside 0..10 fall into the nearest end bin so counts always add
/// up to the cohort size.
fn histogram_bin_index(score: f64) -> usize {
    if score.is_nan() {
        return 0;
    }
    HISTOGRAM_BINS
        .iter()
        .take(HISTOGRAM_BINS.len() - 1)
        .position(|(_, _, max)| score < *max)
        .unwrap_or(HISTOGRAM_BINS.len() - 1)
}

fn percent_of(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    calc::round_off_1_decimal(100.0 * (count as f64) / (total as f64))
}

pub fn build_row(activities: &[Activity], student: &Student, opts: &AggregateOptions) -> ReportRow {
    let scores = calc::aggregate(activities, &student.grades, opts);
    let standing = scores.midterm;
    ReportRow {
        student_id: student.id.clone(),
        name: student.name.clone(),
        academic_no: student.academic_no.clone(),
        scores,
        standing,
        risk: calc::classify(standing),
        needed_second: calc::needed_in_second_bucket(scores.first10),
        needed_final: calc::needed_in_final(scores.midterm),
    }
}

fn compare_rows(a: &ReportRow, b: &ReportRow, opts: &ReportOptions) -> Ordering {
    let by_score = a
        .standing
        .partial_cmp(&b.standing)
        .unwrap_or(Ordering::Equal);
    let by_score = match opts.sort_direction {
        SortDirection::Asc => by_score,
        SortDirection::Desc => by_score.reverse(),
    };
    match opts.sort_key {
        SortKey::Score => by_score,
        SortKey::Risk => a.risk.cmp(&b.risk).then(by_score),
    }
}

pub fn compute_activity_difficulty(
    activities: &[Activity],
    students: &[Student],
    opts: &AggregateOptions,
) -> Vec<ActivityDifficulty> {
    let cells: Vec<HashMap<&str, GradeState>> = students
        .iter()
        .map(|s| {
            s.grades
                .iter()
                .map(|g| (g.activity_id.as_str(), g.state))
                .collect()
        })
        .collect();

    let mut out: Vec<ActivityDifficulty> = Vec::new();
    for a in activities {
        if !calc::within_cutoff(a, opts.cutoff) {
            continue;
        }
        let mut values: Vec<f64> = Vec::with_capacity(students.len());
        let mut missing_count = 0_usize;
        for grades in &cells {
            match grades.get(a.id.as_str()).copied() {
                None | Some(GradeState::Ungraded) => {
                    missing_count += 1;
                    if !opts.treat_ungraded_as_excluded {
                        values.push(0.0);
                    }
                }
                Some(GradeState::Points(v)) => values.push(calc::normalize(v, a.weight)),
            }
        }
        let missing_rate = if students.is_empty() {
            0.0
        } else {
            (missing_count as f64) / (students.len() as f64)
        };
        out.push(ActivityDifficulty {
            activity_id: a.id.clone(),
            title: a.title.clone(),
            bucket: a.bucket,
            weight: a.weight,
            average: calc::mean(&values),
            missing_rate,
            graded_count: students.len() - missing_count,
            missing_count,
        });
    }
    out.sort_by(|x, y| x.average.partial_cmp(&y.average).unwrap_or(Ordering::Equal));
    out
}

pub fn compute_cohort_stats(
    rows: &[ReportRow],
    hardest_activities: Vec<ActivityDifficulty>,
) -> CohortStats {
    let total = rows.len();
    let firsts: Vec<f64> = rows.iter().map(|r| r.scores.first10).collect();
    let seconds: Vec<f64> = rows.iter().map(|r| r.scores.second10).collect();
    let standings: Vec<f64> = rows.iter().map(|r| r.standing).collect();
    let terms: Vec<f64> = rows.iter().map(|r| r.scores.term).collect();

    let tier_counts = RiskTier::ALL
        .iter()
        .map(|tier| {
            let count = rows.iter().filter(|r| r.risk == *tier).count();
            TierCount {
                tier: *tier,
                count,
                percent: percent_of(count, total),
            }
        })
        .collect();

    let mut bin_counts = [0_usize; HISTOGRAM_BINS.len()];
    for s in &standings {
        bin_counts[histogram_bin_index(*s)] += 1;
    }
    let histogram = HISTOGRAM_BINS
        .iter()
        .zip(bin_counts.iter())
        .map(|((label, min, max), count)| HistogramBin {
            label: *label,
            min: *min,
            max: *max,
            count: *count,
            percent: percent_of(*count, total),
        })
        .collect();

    CohortStats {
        student_count: total,
        mean_first: calc::mean(&firsts),
        mean_second: calc::mean(&seconds),
        mean_standing: calc::mean(&standings),
        mean_term: calc::mean(&terms),
        median_standing: calc::compute_median(&standings),
        tier_counts,
        histogram,
        hardest_activities,
    }
}

/// Rows and cohort statistics for one class. `students` must already be in
/// name order; that order breaks ties.
pub fn build_report(activities: &[Activity], students: &[Student], opts: &ReportOptions) -> ClassReport {
    let agg_opts = opts.aggregate_options();
    let mut rows: Vec<ReportRow> = students
        .iter()
        .map(|s| build_row(activities, s, &agg_opts))
        .collect();
    rows.sort_by(|a, b| compare_rows(a, b, opts));

    let hardest = compute_activity_difficulty(activities, students, &agg_opts);
    let stats = compute_cohort_stats(&rows, hardest);

    ClassReport {
        options: *opts,
        rows,
        stats,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapActivity {
    pub id: String,
    pub title: String,
    pub bucket: Bucket,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapRow {
    pub student_id: String,
    pub name: String,
    pub cells: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heatmap {
    pub activities: Vec<HeatmapActivity>,
    pub rows: Vec<HeatmapRow>,
}

/// Student x activity grid of `points/weight` clamped to 0..1. Ungraded or
/// missing cells are `None` unless `treat_ungraded_as_zero`.
pub fn build_heatmap(
    activities: &[Activity],
    students: &[Student],
    cutoff: Option<NaiveDateTime>,
    treat_ungraded_as_zero: bool,
) -> Heatmap {
    let shown: Vec<&Activity> = activities
        .iter()
        .filter(|a| calc::within_cutoff(a, cutoff))
        .collect();

    let rows = students
        .iter()
        .map(|s| {
            let by_activity: HashMap<&str, GradeState> = s
                .grades
                .iter()
                .map(|g| (g.activity_id.as_str(), g.state))
                .collect();
            let cells = shown
                .iter()
                .map(|a| match by_activity.get(a.id.as_str()).copied() {
                    Some(GradeState::Points(v)) => {
                        Some((calc::normalize(v, a.weight) / calc::MAX_SCORE).clamp(0.0, 1.0))
                    }
                    None | Some(GradeState::Ungraded) => {
                        if treat_ungraded_as_zero {
                            Some(0.0)
                        } else {
                            None
                        }
                    }
                })
                .collect();
            HeatmapRow {
                student_id: s.id.clone(),
                name: s.name.clone(),
                cells,
            }
        })
        .collect();

    Heatmap {
        activities: shown
            .iter()
            .map(|a| HeatmapActivity {
                id: a.id.clone(),
                title: a.title.clone(),
                bucket: a.bucket,
                weight: a.weight,
            })
            .collect(),
        rows,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityGradeLine {
    pub activity_id: String,
    pub title: String,
    pub bucket: Bucket,
    pub weight: f64,
    pub due_at: Option<NaiveDateTime>,
    pub points: Option<f64>,
    pub score: Option<f64>,
    pub ungraded: bool,
    pub after_cutoff: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDetail {
    pub row: ReportRow,
    pub activities: Vec<ActivityGradeLine>,
}

pub fn find_student<'a>(
    students: &'a [Student],
    student_id: Option<&str>,
    academic_no: Option<&str>,
) -> Option<&'a Student> {
    if let Some(id) = student_id {
        return students.iter().find(|s| s.id == id);
    }
    let no = academic_no?;
    students
        .iter()
        .find(|s| s.academic_no.as_deref().map(|v| v == no).unwrap_or(false))
}

pub fn student_detail(activities: &[Activity], student: &Student, opts: &AggregateOptions) -> StudentDetail {
    let row = build_row(activities, student, opts);
    let by_activity: HashMap<&str, GradeState> = student
        .grades
        .iter()
        .map(|g| (g.activity_id.as_str(), g.state))
        .collect();

    let lines = activities
        .iter()
        .map(|a| {
            let state = by_activity.get(a.id.as_str()).copied();
            let points = state.and_then(GradeState::points);
            ActivityGradeLine {
                activity_id: a.id.clone(),
                title: a.title.clone(),
                bucket: a.bucket,
                weight: a.weight,
                due_at: a.due_at,
                points,
                score: points.map(|v| calc::normalize(v, a.weight)),
                ungraded: points.is_none(),
                after_cutoff: !calc::within_cutoff(a, opts.cutoff),
            }
        })
        .collect();

    StudentDetail {
        row,
        activities: lines,
    }
}
