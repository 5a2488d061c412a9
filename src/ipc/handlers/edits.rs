use crate::editor::{EditError, EditReconciler, RecordDraft};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_ctx, required_str};
use crate::ipc::types::{AppState, Request};
use crate::matcher::Status;
use chrono::NaiveDate;
use rusqlite::OptionalExtension;
use serde_json::json;

fn edit_error_response(req: &Request, e: EditError) -> serde_json::Value {
    let code = match &e {
        EditError::ImmutableSession { .. } => "immutable_session",
        EditError::NoChanges => "no_changes",
        EditError::NotEditing => "not_editing",
        EditError::UnknownStudent(_) => "unknown_student",
    };
    err(&req.id, code, e.to_string(), None)
}

fn draft_json(r: &RecordDraft) -> serde_json::Value {
    json!({
        "studentId": r.student_id,
        "status": r.status.as_str(),
        "reasonType": r.reason_type,
    })
}

fn handle_edit_begin(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_ctx(state, req) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let session_date: Option<String> = match conn
        .query_row(
            "SELECT date FROM attendance_sessions WHERE id = ?",
            [&session_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(session_date) = session_date else {
        return err(&req.id, "not_found", "session not found", None);
    };
    let Ok(session_date) = NaiveDate::parse_from_str(&session_date, "%Y-%m-%d") else {
        return err(
            &req.id,
            "db_query_failed",
            "stored session has malformed date",
            None,
        );
    };

    let mut stmt = match conn.prepare(
        "SELECT student_id, status, reason_type
         FROM attendance_records
         WHERE session_id = ?
         ORDER BY student_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&session_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut records = Vec::with_capacity(rows.len());
    for (student_id, status, reason_type) in rows {
        let Some(status) = Status::parse(&status) else {
            return err(
                &req.id,
                "db_query_failed",
                format!("stored record for {} has malformed status", student_id),
                None,
            );
        };
        records.push(RecordDraft {
            student_id,
            status,
            reason_type,
        });
    }

    let today = chrono::Local::now().date_naive();
    let edit = match EditReconciler::begin(session_date, today, records) {
        Ok(e) => e,
        Err(e) => return edit_error_response(req, e),
    };
    let snapshot: Vec<serde_json::Value> = edit.records().map(draft_json).collect();
    state.edits.insert(session_id.clone(), edit);

    ok(
        &req.id,
        json!({ "sessionId": session_id, "editing": true, "records": snapshot }),
    )
}

fn handle_edit_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match required_str(req, "status") {
        Ok(v) => match Status::parse(&v) {
            Some(s) => s,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "status must be present, absent or excused",
                    None,
                )
            }
        },
        Err(resp) => return resp,
    };
    let reason_type = req
        .params
        .get("reasonType")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let Some(edit) = state.edits.get_mut(&session_id) else {
        return err(&req.id, "not_editing", "session is not in edit mode", None);
    };
    match edit.set_status(&student_id, status, reason_type) {
        Ok(()) => ok(&req.id, json!({ "updated": true })),
        Err(e) => edit_error_response(req, e),
    }
}

fn handle_edit_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(mut edit) = state.edits.remove(&session_id) else {
        return err(&req.id, "not_editing", "session is not in edit mode", None);
    };
    edit.cancel();
    ok(&req.id, json!({ "cancelled": true }))
}

fn handle_edit_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_ctx(state, req) {
        return resp;
    }
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(edit) = state.edits.get_mut(&session_id) else {
        return err(&req.id, "not_editing", "session is not in edit mode", None);
    };

    let diff = match edit.diff() {
        Ok(d) => d,
        Err(e) => return edit_error_response(req, e),
    };

    // A failed write leaves the edit open with the working copy intact so
    // the caller can retry; only a committed transaction advances the
    // state machine.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for r in &diff {
        if let Err(e) = tx.execute(
            "UPDATE attendance_records
             SET status = ?, reason_type = ?, marked_by = 'manual'
             WHERE session_id = ? AND student_id = ?",
            (r.status.as_str(), &r.reason_type, &session_id, &r.student_id),
        ) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "attendance_records" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    edit.commit();
    state.edits.remove(&session_id);
    tracing::debug!(session = %session_id, updated = diff.len(), "attendance edit saved");

    ok(
        &req.id,
        json!({ "success": true, "updated": diff.len() }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.editBegin" => Some(handle_edit_begin(state, req)),
        "attendance.editSetStatus" => Some(handle_edit_set_status(state, req)),
        "attendance.editCancel" => Some(handle_edit_cancel(state, req)),
        "attendance.editSave" => Some(handle_edit_save(state, req)),
        _ => None,
    }
}
