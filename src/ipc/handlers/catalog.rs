use crate::ipc::helpers::{optional_str, required_str, with_db, Actor, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::records;
use chrono::NaiveDate;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn parse_optional_date(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = optional_str(params, key)? else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map(|d| Some(d.format("%Y-%m-%d").to_string()))
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let sessions =
            records::list_sessions(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
        Ok(json!({ "sessions": sessions }))
    })
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        Actor::from_params(params)?.require_admin()?;
        let name = required_str(params, "name")?;
        let start_date = parse_optional_date(params, "startDate")?;
        let end_date = parse_optional_date(params, "endDate")?;
        if let (Some(s), Some(e)) = (&start_date, &end_date) {
            if e < s {
                return Err(HandlerErr::bad_params("endDate must not precede startDate"));
            }
        }

        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM sessions WHERE name = ?", [&name], |r| r.get(0))
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        if exists.is_some() {
            return Err(HandlerErr::new("duplicate", "session name already exists"));
        }
        let next_sort: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM sessions",
                [],
                |r| r.get(0),
            )
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;

        let session_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO sessions(id, name, start_date, end_date, sort_order) VALUES(?, ?, ?, ?, ?)",
            (&session_id, &name, &start_date, &end_date, next_sort),
        )
        .map_err(|e| {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "sessions" }))
        })?;
        tracing::info!(session_id = %session_id, name = %name, "session created");
        Ok(json!({ "sessionId": session_id, "name": name }))
    })
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let subjects =
            records::list_subjects(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
        Ok(json!({ "subjects": subjects }))
    })
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        Actor::from_params(params)?.require_admin()?;
        let code = required_str(params, "code")?.to_ascii_uppercase();
        let name = required_str(params, "name")?;
        let max_marks = match params.get("maxMarks") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v) => match v.as_f64() {
                Some(n) if n.is_finite() && n > 0.0 => Some(n),
                _ => return Err(HandlerErr::bad_params("maxMarks must be a positive number")),
            },
        };

        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM subjects WHERE code = ?", [&code], |r| r.get(0))
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        if exists.is_some() {
            return Err(HandlerErr::new("duplicate", "subject code already exists")
                .with_details(json!({ "code": code })));
        }

        let subject_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO subjects(id, code, name, max_marks) VALUES(?, ?, ?, ?)",
            (&subject_id, &code, &name, max_marks),
        )
        .map_err(|e| {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "subjects" }))
        })?;
        tracing::info!(subject_id = %subject_id, code = %code, "subject created");
        Ok(json!({ "subjectId": subject_id, "code": code, "name": name }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.create" => Some(handle_sessions_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        _ => None,
    }
}
