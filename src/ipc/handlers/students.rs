use crate::ipc::helpers::{optional_str, required_str, with_db, Actor, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::records;
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        Actor::from_params(params)?.require_staff()?;
        let active_only = params
            .get("activeOnly")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let students = records::list_students(conn, active_only)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        Ok(json!({ "students": students }))
    })
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let actor = Actor::from_params(params)?;
        let student_id = required_str(params, "studentId")?;
        actor.require_view_student(&student_id)?;
        let student = records::get_student(conn, &student_id)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
            .ok_or_else(|| HandlerErr::not_found("student not found"))?;
        Ok(json!({ "student": student }))
    })
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        Actor::from_params(params)?.require_staff()?;
        let roll_number = required_str(params, "rollNumber")?;
        let first_name = required_str(params, "firstName")?;
        let last_name = optional_str(params, "lastName")?.unwrap_or_default();
        let guardian_name = optional_str(params, "guardianName")?;

        if records::get_student_by_roll(conn, &roll_number)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
            .is_some()
        {
            return Err(HandlerErr::new("duplicate", "roll number already exists")
                .with_details(json!({ "rollNumber": roll_number })));
        }

        let student_id = Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO students(id, roll_number, first_name, last_name, guardian_name, active, created_at)
             VALUES(?, ?, ?, ?, ?, 1, ?)",
            (
                &student_id,
                &roll_number,
                &first_name,
                &last_name,
                &guardian_name,
                &created_at,
            ),
        )
        .map_err(|e| {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "students" }))
        })?;
        tracing::info!(student_id = %student_id, roll_number = %roll_number, "student created");
        Ok(json!({ "studentId": student_id, "rollNumber": roll_number }))
    })
}

fn handle_students_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        Actor::from_params(params)?.require_staff()?;
        let student_id = required_str(params, "studentId")?;
        let active = params
            .get("active")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| HandlerErr::bad_params("missing active"))?;
        let found = records::set_student_active(conn, &student_id, active)
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        if !found {
            return Err(HandlerErr::not_found("student not found"));
        }
        tracing::info!(student_id = %student_id, active, "student active flag changed");
        Ok(json!({ "studentId": student_id, "active": active }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.setActive" => Some(handle_students_set_active(state, req)),
        _ => None,
    }
}
