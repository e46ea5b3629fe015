use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::narrative;
use crate::report::{self, ReportOptions};
use crate::store::{self, ClassSnapshot};
use crate::whatif;
use rusqlite::Connection;
use serde_json::json;

use super::setup::{self, ReportPreferences};

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn optional_f64(req: &Request, key: &str) -> Result<Option<f64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            let mut details = serde_json::Map::new();
            details.insert(key.to_string(), v.clone());
            err(
                &req.id,
                "bad_params",
                format!("{} must be a number", key),
                Some(serde_json::Value::Object(details)),
            )
        }),
    }
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn calc_err(req: &Request, e: calc::CalcError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}

fn preferences(conn: &Connection, req: &Request) -> Result<ReportPreferences, serde_json::Value> {
    setup::report_preferences(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn parse_options(req: &Request, prefs: &ReportPreferences) -> Result<ReportOptions, serde_json::Value> {
    report::parse_report_options(
        req.params.get("options"),
        prefs.default_sort_key,
        prefs.default_sort_direction,
    )
    .map_err(|e| calc_err(req, e))
}

/// Common prologue of every class-scoped report: workspace, classId,
/// options, then one snapshot read.
fn open_class(
    state: &AppState,
    req: &Request,
) -> Result<(ClassSnapshot, ReportOptions, ReportPreferences), serde_json::Value> {
    let conn = db_conn(state, req)?;
    required_str(req, "classId")?;
    let prefs = preferences(conn, req)?;
    // Options are validated before the store is touched.
    let options = parse_options(req, &prefs)?;
    let snapshot = load_snapshot(state, req)?;
    Ok((snapshot, options, prefs))
}

fn load_snapshot(state: &AppState, req: &Request) -> Result<ClassSnapshot, serde_json::Value> {
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;
    store::load_class_snapshot(conn, &class_id).map_err(|e| calc_err(req, e))
}

fn build_class_report(
    snapshot: &ClassSnapshot,
    options: &ReportOptions,
    prefs: &ReportPreferences,
) -> (report::ClassReport, String) {
    let mut built = report::build_report(&snapshot.activities, &snapshot.students, options);
    built
        .stats
        .hardest_activities
        .truncate(prefs.hardest_activities_limit);
    let text = narrative::render_narrative(
        &built.stats,
        &built.stats.hardest_activities,
        prefs.narrative_activities_limit,
    );
    tracing::debug!(
        class_id = %snapshot.class.id,
        students = built.rows.len(),
        activities = snapshot.activities.len(),
        "class report built"
    );
    (built, text)
}

fn handle_reports_class_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (snapshot, options, prefs) = match open_class(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (built, text) = build_class_report(&snapshot, &options, &prefs);

    ok(
        &req.id,
        json!({
            "class": snapshot.class,
            "options": built.options,
            "rows": built.rows,
            "hardestActivities": built.stats.hardest_activities,
            "stats": built.stats,
            "narrative": text
        }),
    )
}

fn handle_reports_class_narrative(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (snapshot, options, prefs) = match open_class(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (_, text) = build_class_report(&snapshot, &options, &prefs);
    ok(&req.id, json!({ "narrative": text }))
}

fn handle_reports_class_what_if(state: &mut AppState, req: &Request) -> serde_json::Value {
    let delta = match optional_f64(req, "delta") {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing delta", None),
        Err(e) => return e,
    };
    let (snapshot, options, prefs) = match open_class(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (built, _) = build_class_report(&snapshot, &options, &prefs);
    let result = whatif::simulate(&built.rows, delta);
    tracing::debug!(
        class_id = %snapshot.class.id,
        delta,
        crossed = result.crossed.len(),
        "what-if simulated"
    );
    ok(&req.id, json!(result))
}

fn handle_reports_class_heatmap(state: &mut AppState, req: &Request) -> serde_json::Value {
    let treat_ungraded_as_zero = match req.params.get("treatUngradedAsZero") {
        None => false,
        Some(v) if v.is_null() => false,
        Some(v) => match v.as_bool() {
            Some(b) => b,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "treatUngradedAsZero must be a boolean",
                    None,
                )
            }
        },
    };
    // Only the cutoff applies here; the ungraded policy is carried by
    // treatUngradedAsZero instead.
    let cutoff = match req.params.get("options") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let Some(obj) = v.as_object() else {
                return err(&req.id, "bad_params", "options must be an object", None);
            };
            match report::parse_cutoff(obj.get("cutoff")) {
                Ok(c) => c,
                Err(e) => return calc_err(req, e),
            }
        }
    };
    let snapshot = match load_snapshot(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let heatmap = report::build_heatmap(
        &snapshot.activities,
        &snapshot.students,
        cutoff,
        treat_ungraded_as_zero,
    );
    ok(&req.id, json!(heatmap))
}

fn handle_reports_student_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = req.params.get("studentId").and_then(|v| v.as_str());
    let academic_no = req.params.get("academicNo").and_then(|v| v.as_str());
    if student_id.is_none() && academic_no.is_none() {
        return err(&req.id, "bad_params", "missing studentId or academicNo", None);
    }
    let (snapshot, options, _) = match open_class(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(student) = report::find_student(&snapshot.students, student_id, academic_no) else {
        return err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({
                "classId": snapshot.class.id,
                "studentId": student_id,
                "academicNo": academic_no
            })),
        );
    };
    let detail = report::student_detail(&snapshot.activities, student, &options.aggregate_options());

    ok(
        &req.id,
        json!({
            "student": {
                "id": student.id,
                "name": student.name,
                "academicNo": student.academic_no
            },
            "row": detail.row,
            "activities": detail.activities
        }),
    )
}

fn handle_calc_needed(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let first10 = match optional_f64(req, "first10") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let midterm = match optional_f64(req, "midterm") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if first10.is_none() && midterm.is_none() {
        return err(&req.id, "bad_params", "missing first10 or midterm", None);
    }

    let mut result = serde_json::Map::new();
    if let Some(first10) = first10 {
        result.insert(
            "neededSecond".into(),
            json!(calc::needed_in_second_bucket(first10)),
        );
    }
    if let Some(midterm) = midterm {
        result.insert("neededFinal".into(), json!(calc::needed_in_final(midterm)));
        result.insert("risk".into(), json!(calc::classify(midterm)));
    }
    ok(&req.id, serde_json::Value::Object(result))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.class.open" => Some(handle_reports_class_open(state, req)),
        "reports.class.narrative" => Some(handle_reports_class_narrative(state, req)),
        "reports.class.whatIf" => Some(handle_reports_class_what_if(state, req)),
        "reports.class.heatmap" => Some(handle_reports_class_heatmap(state, req)),
        "reports.student.open" => Some(handle_reports_student_open(state, req)),
        "calc.needed" => Some(handle_calc_needed(state, req)),
        _ => None,
    }
}
