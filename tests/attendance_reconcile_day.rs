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

fn request_ok(
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn with_filters(extra: serde_json::Value) -> serde_json::Value {
    let mut params = json!({ "semester": 3, "department": "CS", "section": "A" });
    for (k, v) in extra.as_object().expect("object").iter() {
        params[k] = v.clone();
    }
    params
}

// Two consecutive Mondays.
const MONDAY: &str = "2026-03-02";
const NEXT_MONDAY: &str = "2026-03-09";

#[test]
fn events_reconcile_against_the_resolved_schedule() {
    let workspace = temp_dir("attendd-reconcile-day");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a",
        "auth.setContext",
        json!({ "token": "t-123", "userId": "teacher-1" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "classes.ensure",
        with_filters(json!({})),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "cl",
        "classes.list",
        json!({}),
    );
    let class_id = created
        .get("classes")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("classId"))
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({ "classId": class_id, "name": "Asha Rao", "rollNo": "CS-301" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "timetable.setEntry",
        with_filters(json!({
            "dayOfWeek": "Monday",
            "subject": "Data Structures",
            "startTime": "09:00",
            "endTime": "09:55"
        })),
    );

    // A capture at 09:50 falls inside the tolerance window of 09:00-09:55.
    let session = request_ok(
        &mut stdin,
        &mut reader,
        "cap1",
        "attendance.startSession",
        with_filters(json!({
            "subject": "Data Structures",
            "date": MONDAY,
            "sessionTime": "09:50",
            "records": [
                {
                    "studentId": student_id,
                    "status": "present",
                    "confidence": 0.93,
                    "emotion": "neutral",
                    "attentiveness": 0.8
                }
            ]
        })),
    );
    let session_id = session
        .get("sessionId")
        .and_then(|v| v.as_str())
        .expect("sessionId")
        .to_string();

    let day = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "attendance.studentDay",
        json!({ "studentId": student_id, "date": MONDAY }),
    );
    assert_eq!(day.get("source").and_then(|v| v.as_str()), Some("default"));
    assert_eq!(
        day.get("day_of_week").and_then(|v| v.as_str()),
        Some("Monday")
    );
    let periods = day.get("periods").and_then(|v| v.as_array()).expect("periods");
    assert_eq!(periods.len(), 1);
    assert_eq!(
        periods[0].get("status").and_then(|v| v.as_str()),
        Some("present")
    );
    assert_eq!(
        periods[0].get("session_id").and_then(|v| v.as_str()),
        Some(session_id.as_str())
    );

    // A capture at 10:20 is past the +15 minute margin; the period stays
    // "not yet taken" even though the event exists.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "cap2",
        "attendance.startSession",
        with_filters(json!({
            "subject": "Data Structures",
            "date": NEXT_MONDAY,
            "sessionTime": "10:20",
            "records": [
                { "studentId": student_id, "status": "present" }
            ]
        })),
    );
    let day = request_ok(
        &mut stdin,
        &mut reader,
        "d2",
        "attendance.studentDay",
        json!({ "studentId": student_id, "date": NEXT_MONDAY }),
    );
    let periods = day.get("periods").and_then(|v| v.as_array()).expect("periods");
    assert_eq!(periods.len(), 1);
    assert!(periods[0].get("status").map(|v| v.is_null()).unwrap_or(false));
    let events = day.get("events").and_then(|v| v.as_array()).expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].get("session_time").and_then(|v| v.as_str()),
        Some("10:20")
    );

    // The teacher-facing listing sees the session either way.
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "attendance.sessionsForDate",
        with_filters(json!({ "date": MONDAY, "subject": "Data Structures" })),
    );
    assert_eq!(listing.get("hasSession").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(listing.get("totalSessions").and_then(|v| v.as_u64()), Some(1));
    let records = listing
        .get("sessions")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|s| s.get("attendanceRecords"))
        .and_then(|v| v.as_array())
        .expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].get("markedBy").and_then(|v| v.as_str()),
        Some("system")
    );

    // A date with no sessions reports an empty listing, not an error.
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "l2",
        "attendance.sessionsForDate",
        with_filters(json!({ "date": "2026-03-16" })),
    );
    assert_eq!(listing.get("hasSession").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(listing.get("totalSessions").and_then(|v| v.as_u64()), Some(0));
}
