use crate::calc::{self, Activity, Bucket, CalcError, Grade, GradeState, Student};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub id: String,
    pub name: String,
    pub term: Option<String>,
}

/// Everything one report needs, read in a single pass.
#[derive(Debug, Clone)]
pub struct ClassSnapshot {
    pub class: ClassInfo,
    pub activities: Vec<Activity>,
    pub students: Vec<Student>,
}

fn query_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

pub fn load_class(conn: &Connection, class_id: &str) -> Result<ClassInfo, CalcError> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT name, term FROM classes WHERE id = ?",
            [class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(query_err)?;
    let Some((name, term)) = row else {
        return Err(CalcError::new("not_found", "class not found")
            .with_details(serde_json::json!({ "classId": class_id })));
    };
    Ok(ClassInfo {
        id: class_id.to_string(),
        name,
        term,
    })
}

/// Activities ordered by bucket, then display order.
pub fn load_activities(conn: &Connection, class_id: &str) -> Result<Vec<Activity>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, bucket, weight, due_at, sort_order
             FROM activities
             WHERE class_id = ?
             ORDER BY sort_order, rowid",
        )
        .map_err(query_err)?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                r.get::<_, Option<String>>(4)?,
                r.get::<_, i64>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, title, bucket_raw, weight, due_raw, sort_order) in rows {
        let Some(bucket) = Bucket::parse(&bucket_raw) else {
            tracing::warn!(activity_id = %id, bucket = %bucket_raw, "skipping activity with unknown bucket");
            continue;
        };
        let due_at = match due_raw.as_deref() {
            None => None,
            Some(raw) => {
                let parsed = calc::parse_date_time(raw);
                if parsed.is_none() && !raw.trim().is_empty() {
                    tracing::warn!(activity_id = %id, due_at = %raw, "unparseable due date, treating activity as undated");
                }
                parsed
            }
        };
        out.push(Activity {
            id,
            title,
            bucket,
            weight,
            due_at,
            sort_order,
        });
    }
    out.sort_by_key(|a| (a.bucket, a.sort_order));
    Ok(out)
}

/// Active (not soft-deleted) students in name order, each with its grades.
pub fn load_students(conn: &Connection, class_id: &str) -> Result<Vec<Student>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, academic_no
             FROM students
             WHERE class_id = ? AND deleted_at IS NULL
             ORDER BY name, id",
        )
        .map_err(query_err)?;
    let mut students: Vec<Student> = stmt
        .query_map([class_id], |r| {
            Ok(Student {
                id: r.get(0)?,
                name: r.get(1)?,
                academic_no: r.get(2)?,
                grades: Vec::new(),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;

    if students.is_empty() {
        return Ok(students);
    }

    let mut grades_stmt = conn
        .prepare(
            "SELECT g.student_id, g.activity_id, g.points
             FROM grades g
             JOIN students s ON s.id = g.student_id
             WHERE s.class_id = ? AND s.deleted_at IS NULL
             ORDER BY g.rowid",
        )
        .map_err(query_err)?;
    let grade_rows = grades_stmt
        .query_map([class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<f64>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;

    let mut by_student: HashMap<String, Vec<Grade>> = HashMap::new();
    for (student_id, activity_id, points) in grade_rows {
        by_student.entry(student_id).or_default().push(Grade {
            activity_id,
            state: GradeState::from_points(points),
        });
    }
    for s in students.iter_mut() {
        if let Some(grades) = by_student.remove(&s.id) {
            s.grades = grades;
        }
    }
    Ok(students)
}

pub fn load_class_snapshot(conn: &Connection, class_id: &str) -> Result<ClassSnapshot, CalcError> {
    let class = load_class(conn, class_id)?;
    let activities = load_activities(conn, class_id)?;
    let students = load_students(conn, class_id)?;
    tracing::debug!(
        class_id = %class_id,
        activities = activities.len(),
        students = students.len(),
        "loaded class snapshot"
    );
    Ok(ClassSnapshot {
        class,
        activities,
        students,
    })
}
