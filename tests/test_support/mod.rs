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
    let exe = env!("CARGO_BIN_EXE_academyd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn academyd");
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

pub fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|v| v.get("code"))
        .and_then(|v| v.as_str())
}

/// Open a fresh workspace and return a connected sidecar.
pub fn sidecar_with_workspace(
    prefix: &str,
) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    (child, stdin, reader)
}

pub fn create_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        &format!("class-{}", name),
        "classes.create",
        json!({ "name": name }),
    );
    created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string()
}

pub fn create_subject(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
    name: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        &format!("subject-{}", name),
        "subjects.create",
        json!({ "classId": class_id, "name": name }),
    );
    created
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string()
}

pub fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
    username: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        &format!("user-{}", username),
        "users.create",
        json!({
            "name": name,
            "username": username,
            "email": format!("{}@academy.test", username),
            "password": "secret77"
        }),
    );
    created
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string()
}

/// Ordered (name, position) pairs for a class, straight from subjects.list.
pub fn subject_order(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
) -> Vec<(String, i64)> {
    let listed = request_ok(
        stdin,
        reader,
        "subjects-order",
        "subjects.list",
        json!({ "classId": class_id }),
    );
    listed
        .get("subjects")
        .and_then(|v| v.as_array())
        .expect("subjects array")
        .iter()
        .map(|s| {
            (
                s.get("name").and_then(|v| v.as_str()).expect("name").to_string(),
                s.get("position").and_then(|v| v.as_i64()).expect("position"),
            )
        })
        .collect()
}

/// Assert the dense-range invariant: positions are exactly 1..=N in list order.
pub fn assert_dense(order: &[(String, i64)]) {
    for (i, (name, position)) in order.iter().enumerate() {
        assert_eq!(
            *position,
            i as i64 + 1,
            "position gap or duplicate at {} in {:?}",
            name,
            order
        );
    }
}
