#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    pub workspace: TempDir,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_rollcalld");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn rollcalld");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
            workspace: TempDir::new().expect("temp workspace"),
        }
    }

    /// Spawns and selects a fresh temporary workspace.
    pub fn with_workspace() -> Self {
        let mut sidecar = Self::spawn();
        let path = sidecar.workspace.path().to_string_lossy().to_string();
        sidecar.request_ok("workspace.select", json!({ "path": path }));
        sidecar
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value.get("error").cloned().unwrap_or_default()
        );
        value.get("result").cloned().unwrap_or_default()
    }

    /// Expects a failure and returns its error code.
    pub fn request_err(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value["error"]["code"].as_str().unwrap_or("unknown").to_string()
    }

    pub fn create_class(&mut self, name: &str, capacity: Option<u32>, day_of_week: u32) -> String {
        let created = self.request_ok(
            "classes.create",
            json!({ "name": name, "room": "Studio 1", "capacity": capacity }),
        );
        let class_id = created["classId"].as_str().expect("classId").to_string();
        self.request_ok(
            "classes.addSession",
            json!({
                "classId": &class_id,
                "dayOfWeek": day_of_week,
                "startTime": "16:00",
                "endTime": "17:00",
            }),
        );
        class_id
    }

    pub fn create_student(&mut self, name: &str) -> String {
        let created = self.request_ok("students.create", json!({ "name": name }));
        created["studentId"].as_str().expect("studentId").to_string()
    }

    pub fn enroll(&mut self, student_id: &str, class_id: &str, start: &str) -> String {
        let res = self.request_ok(
            "students.enroll",
            json!({
                "studentId": &student_id,
                "classId": &class_id,
                "startDate": start,
                "cycleLength": 4,
            }),
        );
        res["enrollment"]["id"].as_str().expect("enrollment id").to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
