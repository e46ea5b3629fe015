#![allow(dead_code)]

use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

pub fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

pub fn approx(actual: &serde_json::Value, expected: f64) {
    let got = actual.as_f64().unwrap_or(f64::NAN);
    assert!(
        (got - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}

/// Writes straight into the workspace database the sidecar opened. Class and
/// roster editing belong to other tools, so tests seed rows directly.
pub fn open_workspace_db(workspace: &Path) -> Connection {
    Connection::open(workspace.join("gradebook.sqlite3")).expect("open workspace db")
}

/// Class `c1` with four students and four activities:
///
/// | student | q1 (G1, w4) | e1 (G1, w6) | q2 (G2, w10) | fin (final, w10) |
/// |---------|-------------|-------------|--------------|------------------|
/// | Ana     | 4           | 6           | 9            | 8                |
/// | Bruno   | 2           | 4           | 5            | -                |
/// | Carla   | ungraded    | 3           | -            | -                |
/// | Davi    | 3           | 3           | 6            | -                |
///
/// Standings: Ana 28/3, Bruno 16/3, Carla 1, Davi 6. A soft-deleted student
/// (Zeca) and a second class exist only to prove they are filtered out.
pub fn seed_physics_class(workspace: &Path) {
    let conn = open_workspace_db(workspace);
    conn.execute(
        "INSERT INTO classes(id, name, term) VALUES('c1', 'Physics', '2025/1')",
        [],
    )
    .expect("insert class");
    conn.execute(
        "INSERT INTO classes(id, name, term) VALUES('c2', 'Chemistry', '2025/1')",
        [],
    )
    .expect("insert other class");

    for (id, class_id, title, bucket, weight, due, order) in [
        ("q1", "c1", "Quiz 1", "first-period", 4.0, "2025-03-10", 1),
        ("e1", "c1", "Exam 1", "first-period", 6.0, "2025-04-01", 2),
        ("q2", "c1", "Quiz 2", "second-period", 10.0, "2025-05-20", 1),
        ("fin", "c1", "Final exam", "final", 10.0, "2025-07-01", 1),
        ("x1", "c2", "Lab", "first-period", 10.0, "2025-03-01", 1),
    ] {
        conn.execute(
            "INSERT INTO activities(id, class_id, title, bucket, weight, due_at, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (id, class_id, title, bucket, weight, due, order),
        )
        .expect("insert activity");
    }

    for (id, class_id, name, academic_no, deleted_at) in [
        ("s-davi", "c1", "Davi", "2025-004", None::<&str>),
        ("s-ana", "c1", "Ana", "2025-001", None),
        ("s-carla", "c1", "Carla", "2025-003", None),
        ("s-bruno", "c1", "Bruno", "2025-002", None),
        ("s-zeca", "c1", "Zeca", "2025-099", Some("2025-02-01T00:00:00Z")),
        ("s-other", "c2", "Olga", "2025-100", None),
    ] {
        conn.execute(
            "INSERT INTO students(id, class_id, name, academic_no, deleted_at)
             VALUES(?, ?, ?, ?, ?)",
            (id, class_id, name, academic_no, deleted_at),
        )
        .expect("insert student");
    }

    for (student_id, activity_id, points) in [
        ("s-ana", "q1", Some(4.0)),
        ("s-ana", "e1", Some(6.0)),
        ("s-ana", "q2", Some(9.0)),
        ("s-ana", "fin", Some(8.0)),
        ("s-bruno", "q1", Some(2.0)),
        ("s-bruno", "e1", Some(4.0)),
        ("s-bruno", "q2", Some(5.0)),
        ("s-carla", "q1", None),
        ("s-carla", "e1", Some(3.0)),
        ("s-davi", "q1", Some(3.0)),
        ("s-davi", "e1", Some(3.0)),
        ("s-davi", "q2", Some(6.0)),
        ("s-zeca", "q1", Some(0.0)),
        ("s-other", "x1", Some(10.0)),
    ] {
        conn.execute(
            "INSERT INTO grades(id, student_id, activity_id, points)
             VALUES(?, ?, ?, ?)",
            (
                format!("{}-{}", student_id, activity_id),
                student_id,
                activity_id,
                points,
            ),
        )
        .expect("insert grade");
    }
}

/// Spawns the sidecar on a fresh seeded workspace.
pub fn open_seeded_workspace(
    prefix: &str,
) -> (PathBuf, Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_physics_class(&workspace);
    (workspace, child, stdin, reader)
}
