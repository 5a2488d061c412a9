use crate::ipc::error::{err, ok};
use crate::ipc::handlers::schedule::{load_override, load_template};
use crate::ipc::helpers::{
    class_key_filters, date_filter, db_conn, find_class, require_ctx, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::matcher::{reconcile, AttendanceEvent, MarkedBy, Status};
use crate::schedule::{resolve, weekday_name, Minutes};
use chrono::Datelike;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_start_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ctx = match require_ctx(state, req) {
        Ok(c) => c.clone(),
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let key = match class_key_filters(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let date = match date_filter(req) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let session_time = match required_str(req, "sessionTime").map(|s| Minutes::parse(&s)) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "sessionTime must be HH:MM", None),
        Err(resp) => return resp,
    };
    let Some(records) = req.params.get("records").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing records", None);
    };

    let class_id = match find_class(conn, req, key) {
        Ok(Some(id)) => id,
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(resp) => return resp,
    };
    let taken_by = req
        .params
        .get("takenBy")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or(ctx.user_id);

    struct RecordInput {
        student_id: String,
        status: Status,
        marked_by: MarkedBy,
        confidence: Option<f64>,
        emotion: Option<String>,
        attentiveness: Option<f64>,
    }

    let mut inputs = Vec::with_capacity(records.len());
    for (i, v) in records.iter().enumerate() {
        let Some(student_id) = v.get("studentId").and_then(|s| s.as_str()) else {
            return err(
                &req.id,
                "bad_params",
                "record missing studentId",
                Some(json!({ "index": i })),
            );
        };
        let Some(status) = v.get("status").and_then(|s| s.as_str()).and_then(Status::parse)
        else {
            return err(
                &req.id,
                "bad_params",
                "record status must be present, absent or excused",
                Some(json!({ "index": i })),
            );
        };
        let marked_by = v
            .get("markedBy")
            .and_then(|s| s.as_str())
            .and_then(MarkedBy::parse)
            .unwrap_or(MarkedBy::System);
        inputs.push(RecordInput {
            student_id: student_id.to_string(),
            status,
            marked_by,
            confidence: v.get("confidence").and_then(|c| c.as_f64()),
            emotion: v.get("emotion").and_then(|e| e.as_str()).map(String::from),
            attentiveness: v.get("attentiveness").and_then(|a| a.as_f64()),
        });
    }

    for input in &inputs {
        let belongs = match conn
            .query_row(
                "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
                (&class_id, &input.student_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
        {
            Ok(v) => v.is_some(),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if !belongs {
            return err(
                &req.id,
                "not_found",
                format!("student {} not in class", input.student_id),
                None,
            );
        }
    }

    let session_id = Uuid::new_v4().to_string();
    let date_str = date.format("%Y-%m-%d").to_string();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "INSERT INTO attendance_sessions(id, class_id, subject, date, session_time, taken_by, submitted)
         VALUES(?, ?, ?, ?, ?, ?, 1)",
        (
            &session_id,
            &class_id,
            &subject,
            &date_str,
            session_time.hhmm(),
            &taken_by,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_sessions" })),
        );
    }
    for input in &inputs {
        if let Err(e) = tx.execute(
            "INSERT INTO attendance_records(session_id, student_id, status, marked_by,
                                            confidence, emotion, attentiveness, reason_type)
             VALUES(?, ?, ?, ?, ?, ?, ?, NULL)",
            (
                &session_id,
                &input.student_id,
                input.status.as_str(),
                input.marked_by.as_str(),
                input.confidence,
                &input.emotion,
                input.attentiveness,
            ),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "attendance_records" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "sessionId": session_id, "recordCount": inputs.len() }),
    )
}

fn handle_sessions_for_date(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let key = match class_key_filters(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let date = match date_filter(req) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let subject = req
        .params
        .get("subject")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let class_id = match find_class(conn, req, key) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(class_id) = class_id else {
        return ok(
            &req.id,
            json!({ "hasSession": false, "sessions": [], "totalSessions": 0 }),
        );
    };

    let date_str = date.format("%Y-%m-%d").to_string();
    let mut sql = String::from(
        "SELECT id, subject, date, session_time, taken_by, submitted
         FROM attendance_sessions
         WHERE class_id = ? AND date = ?",
    );
    if subject.is_some() {
        sql.push_str(" AND subject = ?");
    }
    sql.push_str(" ORDER BY session_time");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    fn map_row(
        r: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(String, String, String, String, Option<String>, i64)> {
        Ok((
            r.get(0)?,
            r.get(1)?,
            r.get(2)?,
            r.get(3)?,
            r.get(4)?,
            r.get(5)?,
        ))
    }
    let sessions = if let Some(subject) = &subject {
        stmt.query_map((&class_id, &date_str, subject), map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map((&class_id, &date_str), map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };
    let sessions = match sessions {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut sessions_json = Vec::with_capacity(sessions.len());
    for (id, subject, date, session_time, taken_by, submitted) in &sessions {
        let mut rec_stmt = match conn.prepare(
            "SELECT r.student_id, s.name, r.status, r.marked_by,
                    r.confidence, r.emotion, r.attentiveness, r.reason_type
             FROM attendance_records r
             JOIN students s ON s.id = r.student_id
             WHERE r.session_id = ?
             ORDER BY s.sort_order",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let records = rec_stmt
            .query_map([id], |r| {
                Ok(json!({
                    "studentId": r.get::<_, String>(0)?,
                    "studentName": r.get::<_, String>(1)?,
                    "status": r.get::<_, String>(2)?,
                    "markedBy": r.get::<_, String>(3)?,
                    "confidence": r.get::<_, Option<f64>>(4)?,
                    "emotion": r.get::<_, Option<String>>(5)?,
                    "attentiveness": r.get::<_, Option<f64>>(6)?,
                    "reasonType": r.get::<_, Option<String>>(7)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        let records = match records {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

        sessions_json.push(json!({
            "session": {
                "id": id,
                "subject": subject,
                "date": date,
                "sessionTime": session_time,
                "takenBy": taken_by,
                "submitted": *submitted != 0,
            },
            "attendanceRecords": records,
        }));
    }

    ok(
        &req.id,
        json!({
            "hasSession": !sessions_json.is_empty(),
            "sessions": sessions_json,
            "totalSessions": sessions_json.len(),
        }),
    )
}

/// Student-facing day view: resolves the class schedule for the date, turns
/// the day's sessions into that student's attendance events, and reconciles
/// them period by period.
fn handle_student_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let date = match date_filter(req) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    let class_id: Option<String> = match conn
        .query_row(
            "SELECT class_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(class_id) = class_id else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let day = date.weekday();
    let template = match load_template(conn, req, &class_id, day) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let date_override = match load_override(conn, req, &class_id, date) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let resolved = resolve(day, template, date_override);

    let date_str = date.format("%Y-%m-%d").to_string();
    let mut stmt = match conn.prepare(
        "SELECT s.id, s.subject, s.session_time, r.status
         FROM attendance_sessions s
         JOIN attendance_records r ON r.session_id = s.id AND r.student_id = ?
         WHERE s.class_id = ? AND s.date = ?
         ORDER BY s.session_time",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&student_id, &class_id, &date_str), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let events: Vec<AttendanceEvent> = rows
        .into_iter()
        .filter_map(|(session_id, subject, session_time, status)| {
            let timestamp = Minutes::parse(&session_time)?;
            let status = Status::parse(&status)?;
            Some(AttendanceEvent {
                subject,
                timestamp,
                status,
                session_id,
            })
        })
        .collect();

    let outcomes = reconcile(resolved.entries(), &events);
    let periods: Vec<serde_json::Value> = outcomes
        .iter()
        .map(|o| {
            json!({
                "subject": o.period.subject,
                "start_time": o.period.start.hhmm(),
                "end_time": o.period.end.hhmm(),
                "status": o.event.map(|e| e.status.as_str()),
                "session_id": o.event.map(|e| e.session_id.clone()),
            })
        })
        .collect();
    let events_json: Vec<serde_json::Value> = events
        .iter()
        .map(|e| {
            json!({
                "subject": e.subject,
                "session_time": e.timestamp.hhmm(),
                "status": e.status.as_str(),
                "session_id": e.session_id,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "day_of_week": weekday_name(resolved.day_of_week),
            "source": resolved.source(),
            "is_locked": resolved.locked(),
            "periods": periods,
            "events": events_json,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.startSession" => Some(handle_start_session(state, req)),
        "attendance.sessionsForDate" => Some(handle_sessions_for_date(state, req)),
        "attendance.studentDay" => Some(handle_student_day(state, req)),
        _ => None,
    }
}
