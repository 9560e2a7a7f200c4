use crate::grading::{AttendanceRecord, AttendanceStatus, MarkRecord};
use anyhow::anyhow;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;

/// Optional `{studentId, subjectId, sessionId}` narrowing for record fetches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub student_id: Option<String>,
    pub subject_id: Option<String>,
    pub session_id: Option<String>,
}

impl RecordFilter {
    pub fn from_params(params: &serde_json::Value) -> Self {
        let pick = |key: &str| {
            params
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Self {
            student_id: pick("studentId"),
            subject_id: pick("subjectId"),
            session_id: pick("sessionId"),
        }
    }

    pub fn student_session(student_id: &str, session_id: &str) -> Self {
        Self {
            student_id: Some(student_id.to_string()),
            subject_id: None,
            session_id: Some(session_id.to_string()),
        }
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<Value> = Vec::new();
        if let Some(v) = &self.student_id {
            clauses.push("student_id = ?");
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = &self.subject_id {
            clauses.push("subject_id = ?");
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = &self.session_id {
            clauses.push("session_id = ?");
            binds.push(Value::Text(v.clone()));
        }
        if clauses.is_empty() {
            (String::new(), binds)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), binds)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub roll_number: String,
    pub first_name: String,
    pub last_name: String,
    pub guardian_name: Option<String>,
    pub active: bool,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub code: String,
    pub name: String,
    pub max_marks: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMark {
    pub id: String,
    #[serde(flatten)]
    pub record: MarkRecord,
    pub entered_by: String,
    pub created_at: String,
}

const STUDENT_COLUMNS: &str = "id, roll_number, first_name, last_name, guardian_name, active";

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        roll_number: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        guardian_name: r.get(4)?,
        active: r.get::<_, i64>(5)? != 0,
    })
}

pub fn list_students(conn: &Connection, active_only: bool) -> anyhow::Result<Vec<Student>> {
    let sql = if active_only {
        format!(
            "SELECT {} FROM students WHERE active = 1 ORDER BY roll_number",
            STUDENT_COLUMNS
        )
    } else {
        format!("SELECT {} FROM students ORDER BY roll_number", STUDENT_COLUMNS)
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_student(conn: &Connection, id: &str) -> anyhow::Result<Option<Student>> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    Ok(conn.query_row(&sql, [id], student_from_row).optional()?)
}

pub fn get_student_by_roll(conn: &Connection, roll_number: &str) -> anyhow::Result<Option<Student>> {
    let sql = format!("SELECT {} FROM students WHERE roll_number = ?", STUDENT_COLUMNS);
    Ok(conn
        .query_row(&sql, [roll_number.trim()], student_from_row)
        .optional()?)
}

/// Returns false when no student has `id`.
pub fn set_student_active(conn: &Connection, id: &str, active: bool) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE students SET active = ? WHERE id = ?",
        (active, id),
    )?;
    Ok(changed > 0)
}

pub fn list_subjects(conn: &Connection) -> anyhow::Result<Vec<Subject>> {
    let mut stmt = conn.prepare("SELECT id, code, name, max_marks FROM subjects ORDER BY code")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Subject {
                id: r.get(0)?,
                code: r.get(1)?,
                name: r.get(2)?,
                max_marks: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_subject(conn: &Connection, id: &str) -> anyhow::Result<Option<Subject>> {
    Ok(conn
        .query_row(
            "SELECT id, code, name, max_marks FROM subjects WHERE id = ?",
            [id],
            |r| {
                Ok(Subject {
                    id: r.get(0)?,
                    code: r.get(1)?,
                    name: r.get(2)?,
                    max_marks: r.get(3)?,
                })
            },
        )
        .optional()?)
}

pub fn list_sessions(conn: &Connection) -> anyhow::Result<Vec<Session>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, start_date, end_date FROM sessions ORDER BY sort_order, name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Session {
                id: r.get(0)?,
                name: r.get(1)?,
                start_date: r.get(2)?,
                end_date: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_session(conn: &Connection, id: &str) -> anyhow::Result<Option<Session>> {
    Ok(conn
        .query_row(
            "SELECT id, name, start_date, end_date FROM sessions WHERE id = ?",
            [id],
            |r| {
                Ok(Session {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    start_date: r.get(2)?,
                    end_date: r.get(3)?,
                })
            },
        )
        .optional()?)
}

pub fn fetch_marks(conn: &Connection, filter: &RecordFilter) -> anyhow::Result<Vec<StoredMark>> {
    let (where_sql, binds) = filter.where_clause();
    let sql = format!(
        "SELECT id, student_id, subject_id, session_id, exam_type, marks_obtained, marks_total,
                grade, remarks, entered_by, created_at
         FROM marks
         {}
         ORDER BY student_id, subject_id, exam_type",
        where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(StoredMark {
                id: r.get(0)?,
                record: MarkRecord {
                    student_id: r.get(1)?,
                    subject_id: r.get(2)?,
                    session_id: r.get(3)?,
                    exam_type: r.get(4)?,
                    marks_obtained: r.get(5)?,
                    marks_total: r.get(6)?,
                    grade: r.get(7)?,
                    remarks: r.get(8)?,
                },
                entered_by: r.get(9)?,
                created_at: r.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_mark_records(conn: &Connection, filter: &RecordFilter) -> anyhow::Result<Vec<MarkRecord>> {
    Ok(fetch_marks(conn, filter)?
        .into_iter()
        .map(|m| m.record)
        .collect())
}

pub fn mark_exists(conn: &Connection, record: &MarkRecord) -> anyhow::Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM marks
             WHERE student_id = ? AND subject_id = ? AND session_id = ? AND exam_type = ?",
            (
                &record.student_id,
                &record.subject_id,
                &record.session_id,
                &record.exam_type,
            ),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

pub fn insert_mark(
    conn: &Connection,
    id: &str,
    record: &MarkRecord,
    entered_by: &str,
    created_at: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO marks(id, student_id, subject_id, session_id, exam_type, marks_obtained,
                           marks_total, grade, remarks, entered_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            id,
            &record.student_id,
            &record.subject_id,
            &record.session_id,
            &record.exam_type,
            record.marks_obtained,
            record.marks_total,
            &record.grade,
            &record.remarks,
            entered_by,
            created_at,
        ),
    )?;
    Ok(())
}

pub fn fetch_attendance(conn: &Connection, filter: &RecordFilter) -> anyhow::Result<Vec<AttendanceRecord>> {
    let (where_sql, binds) = filter.where_clause();
    let sql = format!(
        "SELECT student_id, subject_id, session_id, date, status
         FROM attendance
         {}
         ORDER BY date, student_id, subject_id",
        where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(student_id, subject_id, session_id, date, status)| {
            let status = AttendanceStatus::parse(&status)
                .ok_or_else(|| anyhow!("unknown attendance status in store: {}", status))?;
            Ok(AttendanceRecord {
                student_id,
                subject_id,
                session_id,
                date,
                status,
            })
        })
        .collect()
}

/// Writes the single record for (student, subject, session, date), replacing
/// the status of an existing one.
pub fn upsert_attendance(conn: &Connection, id: &str, record: &AttendanceRecord) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO attendance(id, student_id, subject_id, session_id, date, status)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, session_id, date) DO UPDATE SET
           status = excluded.status",
        (
            id,
            &record.student_id,
            &record.subject_id,
            &record.session_id,
            &record.date,
            record.status.as_str(),
        ),
    )?;
    Ok(())
}
