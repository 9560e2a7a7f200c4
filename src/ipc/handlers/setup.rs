use crate::db;
use crate::grading::GradingPolicy;
use crate::ipc::helpers::{with_db, Actor, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::report::{Institution, ReportOptions};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
    Institution,
    Reports,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "institution" => Some(Self::Institution),
            "reports" => Some(Self::Reports),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Institution => "setup.institution",
            Self::Reports => "setup.reports",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!(GradingPolicy::default()),
        SetupSection::Institution => json!(Institution::default()),
        SetupSection::Reports => json!({
            "showGeneratedAt": true,
            "includeAttendance": true
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
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
    match section {
        SetupSection::Grading => {
            // Validate the merged policy as a whole before touching `current`.
            let mut candidate = current.clone();
            let obj = as_object_mut(&mut candidate)?;
            for (k, v) in patch {
                match k.as_str() {
                    "bands" | "passPercent" | "outcomeRule" | "emptyRecords" => {
                        obj.insert(k.clone(), v.clone());
                    }
                    _ => return Err(format!("unknown grading field: {}", k)),
                }
            }
            let policy: GradingPolicy =
                serde_json::from_value(candidate).map_err(|e| e.to_string())?;
            *current = json!(policy);
        }
        SetupSection::Institution => {
            let obj = as_object_mut(current)?;
            for (k, v) in patch {
                let max_len = match k.as_str() {
                    "name" => 200,
                    "address" | "letterheadNote" => 300,
                    "phone" => 40,
                    "email" | "principalName" => 120,
                    _ => return Err(format!("unknown institution field: {}", k)),
                };
                let s = parse_string_max(v, k, max_len)?;
                if k == "name" && s.is_empty() {
                    return Err("name must not be empty".into());
                }
                obj.insert(k.clone(), Value::String(s));
            }
        }
        SetupSection::Reports => {
            let obj = as_object_mut(current)?;
            for (k, v) in patch {
                match k.as_str() {
                    "showGeneratedAt" | "includeAttendance" => {
                        obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                    }
                    _ => return Err(format!("unknown reports field: {}", k)),
                }
            }
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.key(), error = %e, "ignoring invalid stored setup section");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

pub fn load_grading_policy(conn: &rusqlite::Connection) -> anyhow::Result<GradingPolicy> {
    Ok(serde_json::from_value(load_section(conn, SetupSection::Grading)?)?)
}

pub fn load_institution(conn: &rusqlite::Connection) -> anyhow::Result<Institution> {
    Ok(serde_json::from_value(load_section(conn, SetupSection::Institution)?)?)
}

pub fn load_report_options(conn: &rusqlite::Connection) -> anyhow::Result<ReportOptions> {
    let v = load_section(conn, SetupSection::Reports)?;
    let defaults = ReportOptions::default();
    Ok(ReportOptions {
        show_generated_at: v
            .get("showGeneratedAt")
            .and_then(|b| b.as_bool())
            .unwrap_or(defaults.show_generated_at),
        include_attendance: v
            .get("includeAttendance")
            .and_then(|b| b.as_bool())
            .unwrap_or(defaults.include_attendance),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, _| {
        let load = |section| {
            load_section(conn, section).map_err(|e| HandlerErr::db("db_query_failed", e))
        };
        Ok(json!({
            "grading": load(SetupSection::Grading)?,
            "institution": load(SetupSection::Institution)?,
            "reports": load(SetupSection::Reports)?
        }))
    })
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        Actor::from_params(params)?.require_admin()?;
        let Some(section_raw) = params.get("section").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::bad_params("missing section"));
        };
        let Some(section) = SetupSection::parse(section_raw) else {
            return Err(HandlerErr::bad_params("unknown section"));
        };
        let Some(patch_obj) = params.get("patch").and_then(|v| v.as_object()) else {
            return Err(HandlerErr::bad_params("patch must be an object"));
        };

        let mut current =
            load_section(conn, section).map_err(|e| HandlerErr::db("db_query_failed", e))?;
        merge_section_patch(section, &mut current, patch_obj).map_err(HandlerErr::bad_params)?;
        db::settings_set_json(conn, section.key(), &current)
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        tracing::info!(section = section.key(), "setup section updated");
        Ok(json!({ "ok": true, "section": section_raw, "value": current }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
