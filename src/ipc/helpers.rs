use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request, RequestCtx};
use crate::schedule::{ClassKey, Department, Minutes, Period, Section};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn require_ctx<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a RequestCtx, serde_json::Value> {
    state
        .ctx
        .as_ref()
        .ok_or_else(|| err(&req.id, "not_authenticated", "set an auth context first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn missing_filter(req: &Request, what: &str) -> serde_json::Value {
    err(&req.id, "missing_filter", format!("select a {}", what), None)
}

/// Reads the (semester, department, section) filter triple off the params.
/// Any absent or unrecognized component is a `missing_filter` error so the
/// caller can prompt for exactly the piece it left out.
pub fn class_key_filters(req: &Request) -> Result<ClassKey, serde_json::Value> {
    let semester = req
        .params
        .get("semester")
        .and_then(|v| v.as_u64())
        .filter(|s| (1..=12).contains(s))
        .ok_or_else(|| missing_filter(req, "semester"))? as u8;
    let department = req
        .params
        .get("department")
        .and_then(|v| v.as_str())
        .and_then(Department::parse)
        .ok_or_else(|| missing_filter(req, "department"))?;
    let section = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .and_then(Section::parse)
        .ok_or_else(|| missing_filter(req, "section"))?;
    Ok(ClassKey {
        semester,
        department,
        section,
    })
}

pub fn date_filter(req: &Request) -> Result<NaiveDate, serde_json::Value> {
    req.params
        .get("date")
        .and_then(|v| v.as_str())
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
        .ok_or_else(|| missing_filter(req, "date"))
}

/// Looks up the stored class row for a key. `Ok(None)` when no class with
/// that combination exists yet.
pub fn find_class(
    conn: &Connection,
    req: &Request,
    key: ClassKey,
) -> Result<Option<String>, serde_json::Value> {
    conn.query_row(
        "SELECT id FROM classes WHERE semester = ? AND department = ? AND section = ?",
        (key.semester as i64, key.department.as_str(), key.section.as_str()),
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

/// Parses one wire period `{subject, start_time, end_time}`. A missing or
/// blank subject passes through as empty so the validator reports it with
/// its row index; unparseable times are a `bad_params` error.
pub fn period_from_json(
    req: &Request,
    v: &serde_json::Value,
    index: usize,
) -> Result<Period, serde_json::Value> {
    let subject = v
        .get("subject")
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    let start = v
        .get("start_time")
        .and_then(|s| s.as_str())
        .and_then(Minutes::parse)
        .ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "start_time must be HH:MM",
                Some(json!({ "index": index })),
            )
        })?;
    let end = v
        .get("end_time")
        .and_then(|s| s.as_str())
        .and_then(Minutes::parse)
        .ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "end_time must be HH:MM",
                Some(json!({ "index": index })),
            )
        })?;
    Ok(Period {
        subject,
        start,
        end,
    })
}

pub fn period_json(p: &Period) -> serde_json::Value {
    json!({
        "subject": p.subject,
        "start_time": p.start.hhmm(),
        "end_time": p.end.hhmm(),
    })
}
