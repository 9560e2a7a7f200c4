use crate::grading::{self, AttendanceRecord, AttendanceStatus};
use crate::ipc::helpers::{required_str, with_db, Actor, HandlerErr, Role};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, RecordFilter};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn parse_date(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let raw = required_str(params, "date")?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))
}

fn parse_status(params: &serde_json::Value) -> Result<AttendanceStatus, HandlerErr> {
    let raw = required_str(params, "status")?;
    AttendanceStatus::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params("status must be one of: present, absent, late"))
}

fn require_row(conn: &Connection, table: &str, id: &str) -> Result<(), HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found = conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    match found {
        Some(_) => Ok(()),
        None => Err(HandlerErr::not_found(format!("{} row not found", table))
            .with_details(json!({ "id": id }))),
    }
}

fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    Actor::from_params(params)?.require_staff()?;
    let record = AttendanceRecord {
        student_id: required_str(params, "studentId")?,
        subject_id: required_str(params, "subjectId")?,
        session_id: required_str(params, "sessionId")?,
        date: parse_date(params)?,
        status: parse_status(params)?,
    };
    require_row(conn, "students", &record.student_id)?;
    require_row(conn, "subjects", &record.subject_id)?;
    require_row(conn, "sessions", &record.session_id)?;

    records::upsert_attendance(conn, &Uuid::new_v4().to_string(), &record).map_err(|e| {
        HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "attendance" }))
    })?;
    Ok(json!({ "ok": true, "date": record.date, "status": record.status }))
}

/// Stamps one status for many students on one date. Unknown students are
/// skipped and reported back.
fn attendance_bulk_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    Actor::from_params(params)?.require_staff()?;
    let subject_id = required_str(params, "subjectId")?;
    let session_id = required_str(params, "sessionId")?;
    let date = parse_date(params)?;
    let status = parse_status(params)?;
    let Some(student_ids_json) = params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing studentIds"));
    };
    let student_ids: Vec<String> = student_ids_json
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect();
    require_row(conn, "subjects", &subject_id)?;
    require_row(conn, "sessions", &session_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let mut updated = 0usize;
    let mut skipped: Vec<String> = Vec::new();
    for student_id in student_ids {
        if records::get_student(&tx, &student_id)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
            .is_none()
        {
            skipped.push(student_id);
            continue;
        }
        let record = AttendanceRecord {
            student_id,
            subject_id: subject_id.clone(),
            session_id: session_id.clone(),
            date: date.clone(),
            status,
        };
        records::upsert_attendance(&tx, &Uuid::new_v4().to_string(), &record).map_err(|e| {
            HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "attendance" }))
        })?;
        updated += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    if !skipped.is_empty() {
        tracing::warn!(skipped = skipped.len(), date = %date, "bulk attendance skipped unknown students");
    }
    tracing::info!(updated, date = %date, status = status.as_str(), "bulk attendance stamped");
    Ok(json!({ "updated": updated, "skipped": skipped }))
}

fn attendance_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = Actor::from_params(params)?;
    let mut filter = RecordFilter::from_params(params);
    match (&filter.student_id, actor.role) {
        (Some(id), _) => actor.require_view_student(id)?,
        (None, Role::Student) => filter.student_id = actor.student_id.clone(),
        (None, _) => {}
    }
    let rows = records::fetch_attendance(conn, &filter)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let count = |s: AttendanceStatus| rows.iter().filter(|r| r.status == s).count();
    Ok(json!({
        "total": rows.len(),
        "present": count(AttendanceStatus::Present),
        "absent": count(AttendanceStatus::Absent),
        "late": count(AttendanceStatus::Late),
        "percentage": grading::round2(grading::attendance_percentage(&rows)),
    }))
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, attendance_mark)
}

fn handle_attendance_bulk_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, attendance_bulk_mark)
}

fn handle_attendance_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, attendance_summary)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        "attendance.bulkMark" => Some(handle_attendance_bulk_mark(state, req)),
        "attendance.summary" => Some(handle_attendance_summary(state, req)),
        _ => None,
    }
}
