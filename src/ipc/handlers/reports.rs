use crate::grading::{self, GradingError, GradingPolicy, ResultSummary};
use crate::ipc::helpers::{required_str, with_db, Actor, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, RecordFilter, Session, Student};
use crate::report::{self, Institution, ReportContext, ReportOptions, StudentInfo, SubjectInfo};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

use super::setup;

/// Everything the report documents need besides the result numbers.
pub(crate) struct ReportSetup {
    pub policy: GradingPolicy,
    pub institution: Institution,
    pub options: ReportOptions,
    pub subjects: HashMap<String, SubjectInfo>,
}

pub(crate) fn load_report_setup(conn: &Connection) -> Result<ReportSetup, HandlerErr> {
    let q = |e: anyhow::Error| HandlerErr::db("db_query_failed", e);
    let subjects = records::list_subjects(conn)
        .map_err(q)?
        .into_iter()
        .map(|s| {
            (
                s.id,
                SubjectInfo {
                    code: s.code,
                    name: s.name,
                },
            )
        })
        .collect();
    Ok(ReportSetup {
        policy: setup::load_grading_policy(conn).map_err(q)?,
        institution: setup::load_institution(conn).map_err(q)?,
        options: setup::load_report_options(conn).map_err(q)?,
        subjects,
    })
}

pub(crate) fn student_info(student: &Student) -> StudentInfo {
    StudentInfo {
        roll_number: student.roll_number.clone(),
        name: student.display_name(),
        guardian_name: student.guardian_name.clone(),
    }
}

pub(crate) fn require_session(conn: &Connection, session_id: &str) -> Result<Session, HandlerErr> {
    records::get_session(conn, session_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("session not found"))
}

fn require_student(conn: &Connection, student_id: &str) -> Result<Student, HandlerErr> {
    records::get_student(conn, student_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("student not found"))
}

pub(crate) fn student_summary(
    conn: &Connection,
    policy: &GradingPolicy,
    student_id: &str,
    session_id: &str,
) -> Result<ResultSummary, HandlerErr> {
    let filter = RecordFilter::student_session(student_id, session_id);
    let marks = records::fetch_mark_records(conn, &filter)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let attendance = records::fetch_attendance(conn, &filter)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(grading::summarize(policy, student_id, &marks, &attendance)?)
}

/// Summaries for every active student in a session, in roll-number order.
pub(crate) struct SessionResults {
    pub session: Session,
    pub entries: Vec<(Student, ResultSummary)>,
    /// Roll numbers left out because they have no marks and the policy rejects empty input.
    pub skipped: Vec<String>,
}

pub(crate) fn session_results(
    conn: &Connection,
    policy: &GradingPolicy,
    session_id: &str,
) -> Result<SessionResults, HandlerErr> {
    let session = require_session(conn, session_id)?;
    let filter = RecordFilter {
        session_id: Some(session_id.to_string()),
        ..Default::default()
    };
    let marks = records::fetch_mark_records(conn, &filter)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let attendance = records::fetch_attendance(conn, &filter)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students =
        records::list_students(conn, true).map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut entries = Vec::with_capacity(students.len());
    let mut skipped = Vec::new();
    for student in students {
        match grading::summarize(policy, &student.id, &marks, &attendance) {
            Ok(summary) => entries.push((student, summary)),
            Err(GradingError::NoData) => skipped.push(student.roll_number),
            Err(e) => return Err(e.into()),
        }
    }
    if !skipped.is_empty() {
        tracing::debug!(session_id = %session_id, skipped = skipped.len(), "students without marks left out of class results");
    }
    Ok(SessionResults {
        session,
        entries,
        skipped,
    })
}

/// `(StudentInfo, summary)` pairs in rank order, ready for the CSV writer.
pub(crate) fn ranked_csv_rows(results: &SessionResults) -> Vec<(StudentInfo, ResultSummary)> {
    let infos: HashMap<&str, StudentInfo> = results
        .entries
        .iter()
        .map(|(st, _)| (st.id.as_str(), student_info(st)))
        .collect();
    let ranked = grading::rank_class(results.entries.iter().map(|(_, s)| s.clone()).collect());
    ranked
        .rows
        .into_iter()
        .filter_map(|row| {
            infos
                .get(row.summary.student_id.as_str())
                .map(|info| (info.clone(), row.summary))
        })
        .collect()
}

pub(crate) fn class_results_html(
    setup: &ReportSetup,
    results: &SessionResults,
    generated_at: &str,
) -> String {
    let ranked = grading::rank_class(results.entries.iter().map(|(_, s)| s.clone()).collect());
    let infos: HashMap<String, StudentInfo> = results
        .entries
        .iter()
        .map(|(st, _)| (st.id.clone(), student_info(st)))
        .collect();
    report::class_result_html(
        &setup.institution,
        setup.options,
        &results.session.name,
        &ranked,
        &infos,
        generated_at,
    )
}

fn generated_at() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

struct StudentReport {
    setup: ReportSetup,
    session: Session,
    student: Student,
    summary: ResultSummary,
}

/// Shared front half of the per-student report calls: role check, lookups, summary.
fn load_student_report(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<StudentReport, HandlerErr> {
    let actor = Actor::from_params(params)?;
    let student_id = required_str(params, "studentId")?;
    let session_id = required_str(params, "sessionId")?;
    actor.require_view_student(&student_id)?;
    let student = require_student(conn, &student_id)?;
    let session = require_session(conn, &session_id)?;
    let setup = load_report_setup(conn)?;
    let summary = student_summary(conn, &setup.policy, &student_id, &session_id)?;
    tracing::info!(student_id = %student_id, session_id = %session_id, actor = %actor.label(), "student report generated");
    Ok(StudentReport {
        setup,
        session,
        student,
        summary,
    })
}

fn handle_result_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let r = load_student_report(conn, params)?;
        Ok(json!({
            "student": r.student,
            "session": r.session,
            "summary": r.summary,
            "preview": report::preview(&r.summary, &r.setup.subjects),
        }))
    })
}

fn handle_marksheet_html(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let r = load_student_report(conn, params)?;
        let info = student_info(&r.student);
        let generated_at = generated_at();
        let html = report::marksheet_html(&ReportContext {
            institution: &r.setup.institution,
            options: r.setup.options,
            session_name: &r.session.name,
            student: &info,
            summary: &r.summary,
            subjects: &r.setup.subjects,
            generated_at: &generated_at,
        });
        Ok(json!({
            "html": html,
            "fileName": report::marksheet_file_name(&info.roll_number, &r.session.name),
        }))
    })
}

fn handle_parent_letter_html(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let r = load_student_report(conn, params)?;
        let info = student_info(&r.student);
        let generated_at = generated_at();
        let html = report::parent_letter_html(&ReportContext {
            institution: &r.setup.institution,
            options: r.setup.options,
            session_name: &r.session.name,
            student: &info,
            summary: &r.summary,
            subjects: &r.setup.subjects,
            generated_at: &generated_at,
        });
        Ok(json!({ "html": html }))
    })
}

fn load_class(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(ReportSetup, SessionResults), HandlerErr> {
    Actor::from_params(params)?.require_staff()?;
    let session_id = required_str(params, "sessionId")?;
    let setup = load_report_setup(conn)?;
    let results = session_results(conn, &setup.policy, &session_id)?;
    Ok((setup, results))
}

fn handle_class_results(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let (_, results) = load_class(conn, params)?;
        let students: HashMap<&str, &Student> = results
            .entries
            .iter()
            .map(|(st, _)| (st.id.as_str(), st))
            .collect();
        let ranked = grading::rank_class(results.entries.iter().map(|(_, s)| s.clone()).collect());
        let rows: Vec<serde_json::Value> = ranked
            .rows
            .iter()
            .map(|row| {
                let student = students.get(row.summary.student_id.as_str());
                json!({
                    "rank": row.rank,
                    "studentId": row.summary.student_id,
                    "rollNumber": student.map(|s| s.roll_number.clone()),
                    "studentName": student.map(|s| s.display_name()),
                    "totalObtained": row.summary.total_obtained,
                    "totalMax": row.summary.total_max,
                    "percentage": grading::round2(row.summary.overall_percentage),
                    "gpa": row.summary.gpa,
                    "outcome": row.summary.outcome,
                })
            })
            .collect();
        Ok(json!({
            "session": results.session,
            "rows": rows,
            "statistics": ranked.statistics,
            "skipped": results.skipped,
        }))
    })
}

fn handle_class_results_html(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let (setup, results) = load_class(conn, params)?;
        Ok(json!({ "html": class_results_html(&setup, &results, &generated_at()) }))
    })
}

fn handle_result_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let (_, results) = load_class(conn, params)?;
        let csv = report::results_csv(&ranked_csv_rows(&results))
            .map_err(|e| HandlerErr::new("export_failed", format!("{e:#}")))?;
        Ok(json!({ "csv": csv, "rowCount": results.entries.len() }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.resultSummary" => Some(handle_result_summary(state, req)),
        "reports.marksheetHtml" => Some(handle_marksheet_html(state, req)),
        "reports.parentLetterHtml" => Some(handle_parent_letter_html(state, req)),
        "reports.classResults" => Some(handle_class_results(state, req)),
        "reports.classResultsHtml" => Some(handle_class_results_html(state, req)),
        "reports.resultCsv" => Some(handle_result_csv(state, req)),
        _ => None,
    }
}
