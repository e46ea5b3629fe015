use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

pub const PASSING_THRESHOLD: f64 = 6.0;
pub const WATCH_THRESHOLD: f64 = 5.0;
pub const MAX_SCORE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bucket {
    #[serde(rename = "first-period")]
    FirstPeriod,
    #[serde(rename = "second-period")]
    SecondPeriod,
    #[serde(rename = "final")]
    Final,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::FirstPeriod, Bucket::SecondPeriod, Bucket::Final];

    /// Accepts the current tags plus the `G1`/`G2`/`FINAL` tags older
    /// collaborators still write.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "first-period" | "G1" | "g1" => Some(Bucket::FirstPeriod),
            "second-period" | "G2" | "g2" => Some(Bucket::SecondPeriod),
            "final" | "FINAL" => Some(Bucket::Final),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::FirstPeriod => "first-period",
            Bucket::SecondPeriod => "second-period",
            Bucket::Final => "final",
        }
    }

    fn index(self) -> usize {
        match self {
            Bucket::FirstPeriod => 0,
            Bucket::SecondPeriod => 1,
            Bucket::Final => 2,
        }
    }
}

/// A grade cell. `Ungraded` is a record that exists without points and is
/// never the same thing as `Points(0.0)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradeState {
    Ungraded,
    Points(f64),
}

impl GradeState {
    pub fn from_points(points: Option<f64>) -> Self {
        points.map(GradeState::Points).unwrap_or(GradeState::Ungraded)
    }

    pub fn points(self) -> Option<f64> {
        match self {
            GradeState::Ungraded => None,
            GradeState::Points(v) => Some(v),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub title: String,
    pub bucket: Bucket,
    pub weight: f64,
    pub due_at: Option<NaiveDateTime>,
    pub sort_order: i64,
}

#[derive(Debug, Clone)]
pub struct Grade {
    pub activity_id: String,
    pub state: GradeState,
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub academic_no: Option<String>,
    pub grades: Vec<Grade>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregateOptions {
    pub cutoff: Option<NaiveDateTime>,
    pub treat_ungraded_as_excluded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketTotals {
    pub bucket: Bucket,
    pub points: f64,
    pub max_weight: f64,
    pub score: f64,
    pub graded_count: usize,
    pub ungraded_count: usize,
}

impl BucketTotals {
    fn empty(bucket: Bucket) -> Self {
        Self {
            bucket,
            points: 0.0,
            max_weight: 0.0,
            score: 0.0,
            graded_count: 0,
            ungraded_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub first10: f64,
    pub second10: f64,
    pub final10: f64,
    pub midterm: f64,
    pub term: f64,
    pub buckets: [BucketTotals; 3],
}

/// Activities without a due date always pass the cutoff.
pub fn within_cutoff(activity: &Activity, cutoff: Option<NaiveDateTime>) -> bool {
    match (cutoff, activity.due_at) {
        (Some(cutoff), Some(due)) => due <= cutoff,
        _ => true,
    }
}

/// Rescales summed points to the 0..10 scale against the weight actually
/// considered. Zero weight yields 0.
pub fn normalize(points: f64, max_weight: f64) -> f64 {
    if max_weight > 0.0 {
        (points * MAX_SCORE) / max_weight
    } else {
        0.0
    }
}

pub fn midterm_composite(first10: f64, second10: f64) -> f64 {
    (first10 + 2.0 * second10) / 3.0
}

pub fn term_composite(midterm: f64, final10: f64) -> f64 {
    (midterm + 2.0 * final10) / 3.0
}

/// Bucket scores and composites for one student.
///
/// Ungraded cells add nothing to the numerator while their activity weight
/// stays in `max_weight`, whatever `treat_ungraded_as_excluded` says; the flag
/// only changes the per-activity class statistics. Out-of-range points are
/// summed as they are.
pub fn aggregate(activities: &[Activity], grades: &[Grade], opts: &AggregateOptions) -> Aggregate {
    let mut buckets = Bucket::ALL.map(BucketTotals::empty);

    let mut included: HashMap<&str, &Activity> = HashMap::new();
    for a in activities {
        if !within_cutoff(a, opts.cutoff) {
            continue;
        }
        buckets[a.bucket.index()].max_weight += a.weight;
        included.insert(a.id.as_str(), a);
    }

    for g in grades {
        let Some(a) = included.get(g.activity_id.as_str()) else {
            continue;
        };
        let totals = &mut buckets[a.bucket.index()];
        match g.state {
            GradeState::Ungraded => totals.ungraded_count += 1,
            GradeState::Points(v) => {
                totals.points += v;
                totals.graded_count += 1;
            }
        }
    }

    for totals in buckets.iter_mut() {
        totals.score = normalize(totals.points, totals.max_weight);
    }

    let first10 = buckets[0].score;
    let second10 = buckets[1].score;
    let final10 = buckets[2].score;
    let midterm = midterm_composite(first10, second10);
    let term = term_composite(midterm, final10);

    Aggregate {
        first10,
        second10,
        final10,
        midterm,
        term,
        buckets,
    }
}

fn clamp_score(x: f64) -> f64 {
    if x.is_nan() {
        return MAX_SCORE;
    }
    x.clamp(0.0, MAX_SCORE)
}

/// Minimum second-period score for the midterm composite to reach the
/// threshold. 0 means already safe, 10 means out of reach.
pub fn needed_in_second_bucket(first10: f64) -> f64 {
    clamp_score((3.0 * PASSING_THRESHOLD - first10) / 2.0)
}

/// Minimum final score for the term composite to reach the threshold.
pub fn needed_in_final(midterm: f64) -> f64 {
    clamp_score((3.0 * PASSING_THRESHOLD - midterm) / 2.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Critical,
    Watch,
    Clear,
}

impl RiskTier {
    pub const ALL: [RiskTier; 3] = [RiskTier::Critical, RiskTier::Watch, RiskTier::Clear];

    pub fn as_str(self) -> &'static str {
        match self {
            RiskTier::Critical => "critical",
            RiskTier::Watch => "watch",
            RiskTier::Clear => "clear",
        }
    }
}

pub fn classify(score: f64) -> RiskTier {
    if score.is_nan() || score < WATCH_THRESHOLD {
        RiskTier::Critical
    } else if score < PASSING_THRESHOLD {
        RiskTier::Watch
    } else {
        RiskTier::Clear
    }
}

/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

pub fn compute_median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[(n / 2) - 1] + sorted[n / 2]) / 2.0
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / (values.len() as f64)
}

/// `YYYY-MM-DD` (midnight) or RFC 3339. Offsets are folded into UTC.
pub fn parse_date_time(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
