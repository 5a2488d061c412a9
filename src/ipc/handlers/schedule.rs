use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    class_key_filters, date_filter, db_conn, find_class, period_from_json, period_json,
    require_ctx,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{
    check_override, resolve, weekday_name, Minutes, Period, ScheduleError,
};
use chrono::{Datelike, NaiveDate, Weekday};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub fn load_template(
    conn: &Connection,
    req: &Request,
    class_id: &str,
    day: Weekday,
) -> Result<Vec<Period>, serde_json::Value> {
    let mut stmt = conn
        .prepare(
            "SELECT subject, start_time, end_time
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
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    rows.into_iter()
        .map(|(subject, start, end)| {
            let (Some(start), Some(end)) = (Minutes::parse(&start), Minutes::parse(&end)) else {
                return Err(err(
                    &req.id,
                    "db_query_failed",
                    "stored timetable entry has malformed times",
                    None,
                ));
            };
            Ok(Period {
                subject,
                start,
                end,
            })
        })
        .collect()
}

pub fn load_override(
    conn: &Connection,
    req: &Request,
    class_id: &str,
    date: NaiveDate,
) -> Result<Option<(Vec<Period>, bool)>, serde_json::Value> {
    let date_str = date.format("%Y-%m-%d").to_string();
    let locked: Option<i64> = conn
        .query_row(
            "SELECT locked FROM date_overrides WHERE class_id = ? AND date = ?",
            (class_id, &date_str),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let Some(locked) = locked else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT subject, start_time, end_time
             FROM date_override_entries
             WHERE class_id = ? AND date = ?
             ORDER BY idx",
        )
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let rows = stmt
        .query_map((class_id, &date_str), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    let entries = rows
        .into_iter()
        .map(|(subject, start, end)| {
            let (Some(start), Some(end)) = (Minutes::parse(&start), Minutes::parse(&end)) else {
                return Err(err(
                    &req.id,
                    "db_query_failed",
                    "stored override entry has malformed times",
                    None,
                ));
            };
            Ok(Period {
                subject,
                start,
                end,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some((entries, locked != 0)))
}

fn handle_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = match date_filter(req) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let key = match class_key_filters(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };

    let day = date.weekday();
    let class_id = match find_class(conn, req, key) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // A class nobody has set up yet resolves to an empty default day.
    let (template, date_override) = match class_id {
        Some(class_id) => {
            let template = match load_template(conn, req, &class_id, day) {
                Ok(v) => v,
                Err(resp) => return resp,
            };
            let date_override = match load_override(conn, req, &class_id, date) {
                Ok(v) => v,
                Err(resp) => return resp,
            };
            (template, date_override)
        }
        None => (Vec::new(), None),
    };

    let resolved = resolve(day, template, date_override);
    ok(
        &req.id,
        json!({
            "timetable": resolved.entries().iter().map(period_json).collect::<Vec<_>>(),
            "is_locked": resolved.locked(),
            "source": resolved.source(),
            "day_of_week": weekday_name(resolved.day_of_week),
        }),
    )
}

fn handle_apply_override(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_ctx(state, req) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = match date_filter(req) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let key = match class_key_filters(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let Some(timetable) = req.params.get("timetable").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing timetable", None);
    };

    let class_id = match find_class(conn, req, key) {
        Ok(Some(id)) => id,
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(resp) => return resp,
    };

    let mut entries = Vec::with_capacity(timetable.len());
    for (i, v) in timetable.iter().enumerate() {
        match period_from_json(req, v, i) {
            Ok(p) => entries.push(p),
            Err(resp) => return resp,
        }
    }

    let date_str = date.format("%Y-%m-%d").to_string();
    let existing_locked: Option<i64> = match conn
        .query_row(
            "SELECT locked FROM date_overrides WHERE class_id = ? AND date = ?",
            (&class_id, &date_str),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match check_override(existing_locked.map(|l| l != 0), &entries) {
        Ok(()) => {}
        Err(ScheduleError::Locked) => {
            return err(
                &req.id,
                "locked_schedule",
                format!("schedule for {} is locked", date_str),
                None,
            )
        }
        Err(ScheduleError::Invalid(violations)) => {
            return err(
                &req.id,
                "invalid_timetable",
                "timetable entries failed validation",
                Some(json!({
                    "violations": violations.iter().map(|v| v.to_json()).collect::<Vec<_>>()
                })),
            )
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "INSERT INTO date_overrides(class_id, date, locked) VALUES(?, ?, 0)
         ON CONFLICT(class_id, date) DO UPDATE SET locked = 0",
        (&class_id, &date_str),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "date_overrides" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM date_override_entries WHERE class_id = ? AND date = ?",
        (&class_id, &date_str),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    for (idx, p) in entries.iter().enumerate() {
        if let Err(e) = tx.execute(
            "INSERT INTO date_override_entries(class_id, date, idx, subject, start_time, end_time)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &class_id,
                &date_str,
                idx as i64,
                &p.subject,
                p.start.hhmm(),
                p.end.hhmm(),
            ),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "date_override_entries" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "success": true, "date": date_str, "entryCount": entries.len() }),
    )
}

fn handle_lock_override(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_ctx(state, req) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = match date_filter(req) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let key = match class_key_filters(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };

    let class_id = match find_class(conn, req, key) {
        Ok(Some(id)) => id,
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(resp) => return resp,
    };

    let date_str = date.format("%Y-%m-%d").to_string();
    match conn.execute(
        "UPDATE date_overrides SET locked = 1 WHERE class_id = ? AND date = ?",
        (&class_id, &date_str),
    ) {
        Ok(0) => err(&req.id, "not_found", "no override for that date", None),
        Ok(_) => ok(&req.id, json!({ "success": true, "locked": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.resolve" => Some(handle_resolve(state, req)),
        "schedule.applyOverride" => Some(handle_apply_override(state, req)),
        "schedule.lockOverride" => Some(handle_lock_override(state, req)),
        _ => None,
    }
}
