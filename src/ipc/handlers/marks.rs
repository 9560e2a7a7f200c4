use crate::grading::{self, GradingPolicy, MarkRecord};
use crate::ipc::helpers::{optional_str, required_f64, required_str, with_db, Actor, HandlerErr, Role};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, RecordFilter};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use super::setup;

const IMPORT_MAX_ROWS: usize = 5000;

fn load_policy(conn: &Connection) -> Result<GradingPolicy, HandlerErr> {
    setup::load_grading_policy(conn).map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Marks total from the request, falling back to the subject's configured maximum.
fn resolve_total(
    params: &serde_json::Value,
    subject_max: Option<f64>,
) -> Result<f64, HandlerErr> {
    match params.get("marksTotal") {
        Some(v) if !v.is_null() => v
            .as_f64()
            .ok_or_else(|| HandlerErr::bad_params("marksTotal must be a number")),
        _ => subject_max.ok_or_else(|| {
            HandlerErr::bad_params("missing marksTotal and the subject has no maxMarks")
        }),
    }
}

struct EntryScope {
    subject_id: String,
    session_id: String,
    exam_type: String,
    subject_max: Option<f64>,
}

fn entry_scope(conn: &Connection, params: &serde_json::Value) -> Result<EntryScope, HandlerErr> {
    let subject_id = required_str(params, "subjectId")?;
    let session_id = required_str(params, "sessionId")?;
    let exam_type = required_str(params, "examType")?;
    let subject = records::get_subject(conn, &subject_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("subject not found"))?;
    if records::get_session(conn, &session_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .is_none()
    {
        return Err(HandlerErr::not_found("session not found"));
    }
    Ok(EntryScope {
        subject_id,
        session_id,
        exam_type,
        subject_max: subject.max_marks,
    })
}

/// Validates, grades and stores a single mark. Existing records are never overwritten.
fn create_mark(
    conn: &Connection,
    policy: &GradingPolicy,
    record: MarkRecord,
    entered_by: &str,
) -> Result<(String, grading::GradeAssignment), HandlerErr> {
    grading::validate_mark(record.marks_obtained, record.marks_total)?;
    if records::mark_exists(conn, &record).map_err(|e| HandlerErr::db("db_query_failed", e))? {
        return Err(HandlerErr::new(
            "duplicate",
            "a mark already exists for this student, subject, session and exam type",
        ));
    }
    let assigned = grading::grade_for(policy, record.marks_obtained, record.marks_total);
    let record = MarkRecord {
        grade: assigned.grade.clone(),
        ..record
    };
    let mark_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    records::insert_mark(conn, &mark_id, &record, entered_by, &created_at).map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "marks" }))
    })?;
    Ok((mark_id, assigned))
}

fn handle_marks_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let actor = Actor::from_params(params)?;
        actor.require_staff()?;
        let scope = entry_scope(conn, params)?;
        let student_id = required_str(params, "studentId")?;
        if records::get_student(conn, &student_id)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
            .is_none()
        {
            return Err(HandlerErr::not_found("student not found"));
        }
        let marks_obtained = required_f64(params, "marksObtained")?;
        let marks_total = resolve_total(params, scope.subject_max)?;
        let policy = load_policy(conn)?;

        let record = MarkRecord {
            student_id,
            subject_id: scope.subject_id,
            session_id: scope.session_id,
            exam_type: scope.exam_type,
            marks_obtained,
            marks_total,
            grade: String::new(),
            remarks: optional_str(params, "remarks")?,
        };
        let (mark_id, assigned) = create_mark(conn, &policy, record, &actor.label())?;
        tracing::info!(mark_id = %mark_id, grade = %assigned.grade, entered_by = %actor.label(), "mark recorded");
        Ok(json!({
            "markId": mark_id,
            "percentage": grading::round2(assigned.percentage),
            "grade": assigned.grade,
            "gradePoint": assigned.grade_point,
            "outcome": grading::outcome_for(&policy, assigned.percentage),
        }))
    })
}

fn handle_marks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let actor = Actor::from_params(params)?;
        let mut filter = RecordFilter::from_params(params);
        if actor.role == Role::Student {
            // Students are pinned to their own rows whatever filter they send.
            filter.student_id = actor.student_id.clone();
        }
        let marks =
            records::fetch_marks(conn, &filter).map_err(|e| HandlerErr::db("db_query_failed", e))?;
        Ok(json!({ "marks": marks }))
    })
}

fn handle_marks_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let actor = Actor::from_params(params)?;
        actor.require_staff()?;
        let scope = entry_scope(conn, params)?;
        let default_total = match params.get("marksTotal") {
            Some(v) if !v.is_null() => Some(
                v.as_f64()
                    .ok_or_else(|| HandlerErr::bad_params("marksTotal must be a number"))?,
            ),
            _ => scope.subject_max,
        };
        let Some(text) = params.get("csv").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::bad_params("missing csv"));
        };
        let policy = load_policy(conn)?;

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(text.as_bytes());
        let headers = rdr
            .headers()
            .map_err(|e| HandlerErr::bad_params(format!("unreadable csv header: {}", e)))?
            .clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
        };
        let (Some(roll_col), Some(obtained_col)) = (column("rollNumber"), column("marksObtained"))
        else {
            return Err(HandlerErr::bad_params(
                "csv header must include rollNumber and marksObtained",
            ));
        };
        let total_col = column("marksTotal");
        let remarks_col = column("remarks");

        let rows: Vec<csv::StringRecord> = rdr
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| HandlerErr::bad_params(format!("malformed csv: {}", e)))?;
        if rows.len() > IMPORT_MAX_ROWS {
            return Err(HandlerErr::new(
                "too_many_rows",
                format!("csv exceeds max rows: {} > {}", rows.len(), IMPORT_MAX_ROWS),
            ));
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
        let mut inserted: usize = 0;
        let mut errors: Vec<serde_json::Value> = Vec::new();
        let entered_by = actor.label();

        for (i, row) in rows.iter().enumerate() {
            // Line 1 is the header.
            let line = i + 2;
            let roll = row.get(roll_col).unwrap_or("").to_string();
            let outcome = (|| -> Result<(), HandlerErr> {
                if roll.is_empty() {
                    return Err(HandlerErr::bad_params("missing rollNumber"));
                }
                let student = records::get_student_by_roll(&tx, &roll)
                    .map_err(|e| HandlerErr::db("db_query_failed", e))?
                    .ok_or_else(|| HandlerErr::not_found("unknown rollNumber"))?;
                let marks_obtained: f64 = row
                    .get(obtained_col)
                    .unwrap_or("")
                    .parse()
                    .map_err(|_| HandlerErr::bad_params("marksObtained must be a number"))?;
                let marks_total = match total_col.and_then(|c| row.get(c)).filter(|s| !s.is_empty()) {
                    Some(raw) => raw
                        .parse::<f64>()
                        .map_err(|_| HandlerErr::bad_params("marksTotal must be a number"))?,
                    None => default_total.ok_or_else(|| {
                        HandlerErr::bad_params("missing marksTotal and the subject has no maxMarks")
                    })?,
                };
                let remarks = remarks_col
                    .and_then(|c| row.get(c))
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string());
                let record = MarkRecord {
                    student_id: student.id,
                    subject_id: scope.subject_id.clone(),
                    session_id: scope.session_id.clone(),
                    exam_type: scope.exam_type.clone(),
                    marks_obtained,
                    marks_total,
                    grade: String::new(),
                    remarks,
                };
                create_mark(&tx, &policy, record, &entered_by)?;
                Ok(())
            })();
            match outcome {
                Ok(()) => inserted += 1,
                Err(e) => errors.push(json!({
                    "line": line,
                    "rollNumber": roll,
                    "code": e.code,
                    "message": e.message,
                })),
            }
        }
        tx.commit()
            .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

        if !errors.is_empty() {
            tracing::warn!(rejected = errors.len(), inserted, "csv mark import rejected rows");
        }
        tracing::info!(inserted, entered_by = %entered_by, "csv mark import finished");
        Ok(json!({
            "inserted": inserted,
            "rejected": errors.len(),
            "errors": errors,
        }))
    })
}

fn handle_grading_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let marks_obtained = required_f64(params, "marksObtained")?;
        let marks_total = required_f64(params, "marksTotal")?;
        grading::validate_mark(marks_obtained, marks_total)?;
        let policy = load_policy(conn)?;
        let assigned = grading::grade_for(&policy, marks_obtained, marks_total);
        Ok(json!({
            "percentage": grading::round2(assigned.percentage),
            "grade": assigned.grade,
            "gradePoint": assigned.grade_point,
            "outcome": grading::outcome_for(&policy, assigned.percentage),
        }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.create" => Some(handle_marks_create(state, req)),
        "marks.list" => Some(handle_marks_list(state, req)),
        "marks.importCsv" => Some(handle_marks_import_csv(state, req)),
        "grading.preview" => Some(handle_grading_preview(state, req)),
        _ => None,
    }
}
