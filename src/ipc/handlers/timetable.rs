use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    class_key_filters, db_conn, find_class, require_ctx, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{parse_weekday, validate_periods, weekday_name, Minutes, Period, Violation};
use chrono::Weekday;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn day_filter(req: &Request) -> Result<Weekday, serde_json::Value> {
    req.params
        .get("dayOfWeek")
        .and_then(|v| v.as_str())
        .and_then(parse_weekday)
        .ok_or_else(|| err(&req.id, "missing_filter", "select a day", None))
}

fn violations_response(req: &Request, violations: &[Violation]) -> serde_json::Value {
    err(
        &req.id,
        "invalid_timetable",
        "timetable entries failed validation",
        Some(json!({
            "violations": violations.iter().map(|v| v.to_json()).collect::<Vec<_>>()
        })),
    )
}

struct DayEntry {
    entry_id: String,
    period: Period,
}

fn load_day(
    conn: &Connection,
    req: &Request,
    class_id: &str,
    day: Weekday,
) -> Result<Vec<DayEntry>, serde_json::Value> {
    let mut stmt = conn
        .prepare(
            "SELECT id, subject, start_time, end_time
             FROM timetable_entries
             WHERE class_id = ? AND day_of_week = ?
             ORDER BY start_time",
        )
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let rows = stmt
        .query_map((class_id, weekday_name(day)), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    let mut entries = Vec::with_capacity(rows.len());
    for (entry_id, subject, start, end) in rows {
        let (Some(start), Some(end)) = (Minutes::parse(&start), Minutes::parse(&end)) else {
            return Err(err(
                &req.id,
                "db_query_failed",
                format!("stored entry {} has malformed times", entry_id),
                None,
            ));
        };
        entries.push(DayEntry {
            entry_id,
            period: Period {
                subject,
                start,
                end,
            },
        });
    }
    Ok(entries)
}

fn handle_set_entry(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_ctx(state, req) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let key = match class_key_filters(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let day = match day_filter(req) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let subject = req
        .params
        .get("subject")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    let start = match required_str(req, "startTime").map(|s| Minutes::parse(&s)) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "startTime must be HH:MM", None),
        Err(resp) => return resp,
    };
    let end = match required_str(req, "endTime").map(|s| Minutes::parse(&s)) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "endTime must be HH:MM", None),
        Err(resp) => return resp,
    };

    let class_id = match find_class(conn, req, key) {
        Ok(Some(id)) => id,
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(resp) => return resp,
    };

    // The candidate joins the day's existing entries; the whole day must
    // still pass the validator before anything is written.
    let existing = match load_day(conn, req, &class_id, day) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let mut periods: Vec<Period> = existing.iter().map(|e| e.period.clone()).collect();
    periods.push(Period {
        subject: subject.clone(),
        start,
        end,
    });
    if let Err(violations) = validate_periods(&periods) {
        return violations_response(req, &violations);
    }

    let entry_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO timetable_entries(id, class_id, day_of_week, subject, start_time, end_time)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &entry_id,
            &class_id,
            weekday_name(day),
            &subject,
            start.hhmm(),
            end.hhmm(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "timetable_entries" })),
        );
    }

    ok(&req.id, json!({ "entryId": entry_id }))
}

fn handle_update_entry(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_ctx(state, req) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let entry_id = match required_str(req, "entryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let row: Option<(String, String)> = match conn
        .query_row(
            "SELECT class_id, day_of_week FROM timetable_entries WHERE id = ?",
            [&entry_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((class_id, day_name)) = row else {
        return err(&req.id, "not_found", "timetable entry not found", None);
    };
    let Some(day) = parse_weekday(&day_name) else {
        return err(
            &req.id,
            "db_query_failed",
            format!("stored entry {} has malformed day", entry_id),
            None,
        );
    };

    let mut entries = match load_day(conn, req, &class_id, day) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(target) = entries.iter_mut().find(|e| e.entry_id == entry_id) else {
        return err(&req.id, "not_found", "timetable entry not found", None);
    };

    if let Some(subject) = req.params.get("subject").and_then(|v| v.as_str()) {
        target.period.subject = subject.trim().to_string();
    }
    if let Some(s) = req.params.get("startTime").and_then(|v| v.as_str()) {
        match Minutes::parse(s) {
            Some(v) => target.period.start = v,
            None => return err(&req.id, "bad_params", "startTime must be HH:MM", None),
        }
    }
    if let Some(s) = req.params.get("endTime").and_then(|v| v.as_str()) {
        match Minutes::parse(s) {
            Some(v) => target.period.end = v,
            None => return err(&req.id, "bad_params", "endTime must be HH:MM", None),
        }
    }
    let patched = target.period.clone();

    let periods: Vec<Period> = entries.iter().map(|e| e.period.clone()).collect();
    if let Err(violations) = validate_periods(&periods) {
        return violations_response(req, &violations);
    }

    if let Err(e) = conn.execute(
        "UPDATE timetable_entries SET subject = ?, start_time = ?, end_time = ? WHERE id = ?",
        (
            &patched.subject,
            patched.start.hhmm(),
            patched.end.hhmm(),
            &entry_id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "timetable_entries" })),
        );
    }

    ok(&req.id, json!({ "entryId": entry_id }))
}

fn handle_delete_entry(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_ctx(state, req) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let entry_id = match required_str(req, "entryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match conn.execute("DELETE FROM timetable_entries WHERE id = ?", [&entry_id]) {
        Ok(0) => err(&req.id, "not_found", "timetable entry not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_for_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let key = match class_key_filters(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let day = match day_filter(req) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    let class_id = match find_class(conn, req, key) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let entries = match class_id {
        Some(class_id) => match load_day(conn, req, &class_id, day) {
            Ok(v) => v,
            Err(resp) => return resp,
        },
        None => Vec::new(),
    };

    let entries_json: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            json!({
                "entryId": e.entry_id,
                "subject": e.period.subject,
                "start_time": e.period.start.hhmm(),
                "end_time": e.period.end.hhmm(),
            })
        })
        .collect();
    ok(
        &req.id,
        json!({ "dayOfWeek": weekday_name(day), "entries": entries_json }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.setEntry" => Some(handle_set_entry(state, req)),
        "timetable.updateEntry" => Some(handle_update_entry(state, req)),
        "timetable.deleteEntry" => Some(handle_delete_entry(state, req)),
        "timetable.forDay" => Some(handle_for_day(state, req)),
        _ => None,
    }
}
