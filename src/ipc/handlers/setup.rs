use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::narrative;
use crate::report::{SortDirection, SortKey};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Reports,
    WhatIf,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "reports" => Some(Self::Reports),
            "whatIf" => Some(Self::WhatIf),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Reports => "setup.reports",
            Self::WhatIf => "setup.whatIf",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Reports => json!({
            "defaultSortKey": "score",
            "defaultSortDirection": "desc",
            "hardestActivitiesLimit": 3,
            "narrativeActivitiesLimit": narrative::DEFAULT_ACTIVITY_LIMIT
        }),
        SetupSection::WhatIf => json!({
            "deltaMin": -2.0,
            "deltaMax": 2.0,
            "deltaStep": 0.1
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Reports => match k.as_str() {
                "defaultSortKey" => {
                    let s = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if SortKey::parse(&s).is_none() {
                        return Err("defaultSortKey must be one of: score, risk".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "defaultSortDirection" => {
                    let s = parse_string_max(v, k, 8)?.to_ascii_lowercase();
                    if SortDirection::parse(&s).is_none() {
                        return Err("defaultSortDirection must be one of: asc, desc".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "hardestActivitiesLimit" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 50)?));
                }
                "narrativeActivitiesLimit" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 10)?));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
            SetupSection::WhatIf => match k.as_str() {
                "deltaMin" | "deltaMax" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, -10.0, 10.0)?));
                }
                "deltaStep" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.01, 5.0)?));
                }
                _ => return Err(format!("unknown whatIf field: {}", k)),
            },
        }
    }

    if let SetupSection::WhatIf = section {
        let min = obj.get("deltaMin").and_then(|v| v.as_f64()).unwrap_or(-2.0);
        let max = obj.get("deltaMax").and_then(|v| v.as_f64()).unwrap_or(2.0);
        if min > max {
            return Err("deltaMin must be <= deltaMax".into());
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block reports.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(key = section.key(), error = %msg, "ignoring saved setup values");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

/// Workspace report preferences with defaults applied.
#[derive(Debug, Clone, Copy)]
pub struct ReportPreferences {
    pub default_sort_key: SortKey,
    pub default_sort_direction: SortDirection,
    pub hardest_activities_limit: usize,
    pub narrative_activities_limit: usize,
}

pub fn report_preferences(conn: &rusqlite::Connection) -> anyhow::Result<ReportPreferences> {
    let section = load_section(conn, SetupSection::Reports)?;
    let limit = |key: &str, fallback: usize| {
        section
            .get(key)
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(fallback)
    };
    Ok(ReportPreferences {
        default_sort_key: section
            .get("defaultSortKey")
            .and_then(|v| v.as_str())
            .and_then(SortKey::parse)
            .unwrap_or(SortKey::Score),
        default_sort_direction: section
            .get("defaultSortDirection")
            .and_then(|v| v.as_str())
            .and_then(SortDirection::parse)
            .unwrap_or(SortDirection::Desc),
        hardest_activities_limit: limit("hardestActivitiesLimit", 3),
        narrative_activities_limit: limit(
            "narrativeActivitiesLimit",
            narrative::DEFAULT_ACTIVITY_LIMIT,
        ),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let reports = match load_section(conn, SetupSection::Reports) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let what_if = match load_section(conn, SetupSection::WhatIf) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "reports": reports,
            "whatIf": what_if
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(key = section.key(), "setup section updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
