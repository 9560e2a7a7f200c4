#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
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
    let exe = env!("CARGO_BIN_EXE_resultsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultsd");
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
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Sends a request that must fail and returns its error code.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

pub fn admin() -> serde_json::Value {
    json!({ "role": "admin" })
}

pub fn staff() -> serde_json::Value {
    json!({ "role": "staff" })
}

pub fn student(student_id: &str) -> serde_json::Value {
    json!({ "role": "student", "studentId": student_id })
}

pub fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string field {} in {}", key, v))
        .to_string()
}

/// Ids created by `seed_college`.
pub struct Seed {
    pub session_id: String,
    pub math_id: String,
    pub physics_id: String,
    pub chemistry_id: String,
    pub jane_id: String,
    pub john_id: String,
}

/// Opens a fresh workspace with one session, three 100-mark subjects and two
/// students (R001 Jane Doe, R002 John Roe). No marks are entered.
pub fn seed_college(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
) -> Seed {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let session = request_ok(
        stdin,
        reader,
        "seed-session",
        "sessions.create",
        json!({ "actor": admin(), "name": "2024-25", "startDate": "2024-07-01", "endDate": "2025-04-30" }),
    );
    let mut subject = |id: &str, code: &str, name: &str| {
        let res = request_ok(
            stdin,
            reader,
            id,
            "subjects.create",
            json!({ "actor": admin(), "code": code, "name": name, "maxMarks": 100 }),
        );
        str_field(&res, "subjectId")
    };
    let math_id = subject("seed-sub-1", "MTH101", "Mathematics");
    let physics_id = subject("seed-sub-2", "PHY101", "Physics");
    let chemistry_id = subject("seed-sub-3", "CHM101", "Chemistry");
    let jane = request_ok(
        stdin,
        reader,
        "seed-st-1",
        "students.create",
        json!({ "actor": staff(), "rollNumber": "R001", "firstName": "Jane", "lastName": "Doe", "guardianName": "Mary Doe" }),
    );
    let john = request_ok(
        stdin,
        reader,
        "seed-st-2",
        "students.create",
        json!({ "actor": staff(), "rollNumber": "R002", "firstName": "John", "lastName": "Roe" }),
    );
    Seed {
        session_id: str_field(&session, "sessionId"),
        math_id,
        physics_id,
        chemistry_id,
        jane_id: str_field(&jane, "studentId"),
        john_id: str_field(&john, "studentId"),
    }
}

pub fn enter_mark(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    seed: &Seed,
    student_id: &str,
    subject_id: &str,
    marks_obtained: f64,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "marks.create",
        json!({
            "actor": staff(),
            "studentId": student_id,
            "subjectId": subject_id,
            "sessionId": seed.session_id,
            "examType": "final",
            "marksObtained": marks_obtained,
            "marksTotal": 100
        }),
    )
}
