use crate::grading::GradingError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::fmt::Display;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    pub fn db(code: &'static str, e: impl Display) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<GradingError> for HandlerErr {
    fn from(e: GradingError) -> Self {
        let code = match e {
            GradingError::NoData => "no_data",
            GradingError::InvalidPolicy(_) => "bad_policy",
            GradingError::InvalidMark(_) => "invalid_mark",
        };
        Self::new(code, e.to_string())
    }
}

pub fn respond(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

/// Runs `f` against the open workspace, or answers `no_workspace`.
pub fn with_db<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, f(conn, &req.params))
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::bad_params(format!(
                    "{} must be string or null",
                    key
                )));
            };
            let t = s.trim();
            if t.is_empty() {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
    }
}

pub fn required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing or non-numeric {}", key)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Staff,
    Student,
}

impl Role {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "staff" => Some(Self::Staff),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Staff => "staff",
            Self::Student => "student",
        }
    }
}

/// The caller on whose behalf a request runs. Always passed in `params.actor`;
/// the process keeps no login state of its own.
#[derive(Debug, Clone)]
pub struct Actor {
    pub role: Role,
    pub student_id: Option<String>,
}

impl Actor {
    pub fn from_params(params: &serde_json::Value) -> Result<Self, HandlerErr> {
        let Some(raw) = params.get("actor").filter(|v| !v.is_null()) else {
            return Err(HandlerErr::bad_params("missing actor"));
        };
        let role = raw
            .get("role")
            .and_then(|v| v.as_str())
            .and_then(Role::parse)
            .ok_or_else(|| {
                HandlerErr::bad_params("actor.role must be one of: admin, staff, student")
            })?;
        let student_id = optional_str(raw, "studentId")?;
        if role == Role::Student && student_id.is_none() {
            return Err(HandlerErr::bad_params(
                "actor.studentId is required for the student role",
            ));
        }
        Ok(Self { role, student_id })
    }

    pub fn label(&self) -> String {
        match (&self.role, &self.student_id) {
            (Role::Student, Some(id)) => format!("student:{}", id),
            (role, _) => role.as_str().to_string(),
        }
    }

    pub fn require_staff(&self) -> Result<(), HandlerErr> {
        match self.role {
            Role::Admin | Role::Staff => Ok(()),
            Role::Student => Err(HandlerErr::forbidden("staff or admin role required")
                .with_details(json!({ "role": self.role.as_str() }))),
        }
    }

    pub fn require_admin(&self) -> Result<(), HandlerErr> {
        match self.role {
            Role::Admin => Ok(()),
            _ => Err(HandlerErr::forbidden("admin role required")
                .with_details(json!({ "role": self.role.as_str() }))),
        }
    }

    /// Staff and admin see everyone; students only themselves.
    pub fn require_view_student(&self, student_id: &str) -> Result<(), HandlerErr> {
        match self.role {
            Role::Admin | Role::Staff => Ok(()),
            Role::Student if self.student_id.as_deref() == Some(student_id) => Ok(()),
            Role::Student => Err(HandlerErr::forbidden(
                "students may only view their own results",
            )),
        }
    }
}
