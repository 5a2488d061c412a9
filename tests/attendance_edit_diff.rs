use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .expect("error code")
        .to_string()
}

fn with_filters(extra: serde_json::Value) -> serde_json::Value {
    let mut params = json!({ "semester": 3, "department": "CS", "section": "A" });
    for (k, v) in extra.as_object().expect("object").iter() {
        params[k] = v.clone();
    }
    params
}

struct Fixture {
    student_ids: Vec<String>,
    session_id: String,
}

fn setup_session(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    date: &str,
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "a",
        "auth.setContext",
        json!({ "token": "t-123", "userId": "teacher-1" }),
    );
    let created = request_ok(stdin, reader, "c", "classes.ensure", with_filters(json!({})));
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let mut student_ids = Vec::new();
    for i in 1..=5 {
        let student = request_ok(
            stdin,
            reader,
            &format!("s{}", i),
            "students.create",
            json!({ "classId": class_id, "name": format!("Student {}", i) }),
        );
        student_ids.push(
            student
                .get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
        );
    }

    let records: Vec<serde_json::Value> = student_ids
        .iter()
        .map(|id| json!({ "studentId": id, "status": "present" }))
        .collect();
    let session = request_ok(
        stdin,
        reader,
        "cap",
        "attendance.startSession",
        with_filters(json!({
            "subject": "Data Structures",
            "date": date,
            "sessionTime": "09:50",
            "records": records
        })),
    );
    let session_id = session
        .get("sessionId")
        .and_then(|v| v.as_str())
        .expect("sessionId")
        .to_string();

    Fixture {
        student_ids,
        session_id,
    }
}

fn today() -> String {
    chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()
}

#[test]
fn saving_submits_only_the_changed_records() {
    let workspace = temp_dir("attendd-edit-diff");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_session(&mut stdin, &mut reader, &workspace, &today());
    let s3 = fx.student_ids[2].clone();

    let begun = request_ok(
        &mut stdin,
        &mut reader,
        "e1",
        "attendance.editBegin",
        json!({ "sessionId": fx.session_id }),
    );
    assert_eq!(
        begun
            .get("records")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(5)
    );

    // Touch the same student twice; the change set must not grow.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "e2",
        "attendance.editSetStatus",
        json!({ "sessionId": fx.session_id, "studentId": s3, "status": "absent" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "e3",
        "attendance.editSetStatus",
        json!({
            "sessionId": fx.session_id,
            "studentId": s3,
            "status": "excused",
            "reasonType": "medical"
        }),
    );

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "e4",
        "attendance.editSave",
        json!({ "sessionId": fx.session_id }),
    );
    assert_eq!(saved.get("updated").and_then(|v| v.as_u64()), Some(1));

    // Authoritative state: only S3 changed, and it is now a manual mark.
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "attendance.sessionsForDate",
        with_filters(json!({ "date": today() })),
    );
    let records = listing
        .get("sessions")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|s| s.get("attendanceRecords"))
        .and_then(|v| v.as_array())
        .expect("records")
        .clone();
    assert_eq!(records.len(), 5);
    for r in &records {
        let student_id = r.get("studentId").and_then(|v| v.as_str()).unwrap();
        if student_id == s3 {
            assert_eq!(r.get("status").and_then(|v| v.as_str()), Some("excused"));
            assert_eq!(r.get("markedBy").and_then(|v| v.as_str()), Some("manual"));
            assert_eq!(
                r.get("reasonType").and_then(|v| v.as_str()),
                Some("medical")
            );
        } else {
            assert_eq!(r.get("status").and_then(|v| v.as_str()), Some("present"));
            assert_eq!(r.get("markedBy").and_then(|v| v.as_str()), Some("system"));
        }
    }

    // The edit is closed after a successful save.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "e5",
        "attendance.editSetStatus",
        json!({ "sessionId": fx.session_id, "studentId": s3, "status": "present" }),
    );
    assert_eq!(code, "not_editing");
}

#[test]
fn empty_and_cancelled_edits_never_hit_the_store() {
    let workspace = temp_dir("attendd-edit-guards");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_session(&mut stdin, &mut reader, &workspace, &today());
    let s1 = fx.student_ids[0].clone();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "e1",
        "attendance.editBegin",
        json!({ "sessionId": fx.session_id }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "e2",
        "attendance.editSave",
        json!({ "sessionId": fx.session_id }),
    );
    assert_eq!(code, "no_changes");

    // Cancelling throws the working copy away.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "e3",
        "attendance.editSetStatus",
        json!({ "sessionId": fx.session_id, "studentId": s1, "status": "absent" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "e4",
        "attendance.editCancel",
        json!({ "sessionId": fx.session_id }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "e5",
        "attendance.editSave",
        json!({ "sessionId": fx.session_id }),
    );
    assert_eq!(code, "not_editing");

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "attendance.sessionsForDate",
        with_filters(json!({ "date": today() })),
    );
    let records = listing
        .get("sessions")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|s| s.get("attendanceRecords"))
        .and_then(|v| v.as_array())
        .expect("records")
        .clone();
    assert!(records
        .iter()
        .all(|r| r.get("status").and_then(|v| v.as_str()) == Some("present")));

    // Editing a student outside the session is refused while the edit stays open.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "e6",
        "attendance.editBegin",
        json!({ "sessionId": fx.session_id }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "e7",
        "attendance.editSetStatus",
        json!({ "sessionId": fx.session_id, "studentId": "nobody", "status": "absent" }),
    );
    assert_eq!(code, "unknown_student");
}

#[test]
fn sessions_from_prior_days_are_immutable() {
    let workspace = temp_dir("attendd-edit-immutable");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_session(&mut stdin, &mut reader, &workspace, "2020-01-10");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "e1",
        "attendance.editBegin",
        json!({ "sessionId": fx.session_id }),
    );
    assert_eq!(code, "immutable_session");
}
