#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "bootstrap-pass";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}-{}",
        prefix,
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    pub token: Option<String>,
    pub workspace: PathBuf,
}

impl Sidecar {
    /// Spawns the daemon without a workspace.
    pub fn spawn(prefix: &str) -> Self {
        let exe = env!("CARGO_BIN_EXE_schoold");
        let mut child = Command::new(exe)
            .env_remove("SCHOOLD_WORKSPACE")
            .env("SCHOOLD_TOKEN_SECRET", "integration-test-secret")
            .env("SCHOOLD_ADMIN_USERNAME", ADMIN_USER)
            .env("SCHOOLD_ADMIN_PASSWORD", ADMIN_PASSWORD)
            .env("SCHOOLD_LOG", "off")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn schoold");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Sidecar {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
            token: None,
            workspace: temp_dir(prefix),
        }
    }

    /// Spawns, opens a fresh workspace and logs in as the bootstrap admin.
    pub fn start(prefix: &str) -> Self {
        let mut sc = Self::spawn(prefix);
        let path = sc.workspace.to_string_lossy().to_string();
        sc.call_ok("workspace.select", json!({ "path": path }));
        sc.login(ADMIN_USER, ADMIN_PASSWORD);
        sc
    }

    pub fn send_raw(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {line}");
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(token) = &self.token {
            payload["token"] = json!(format!("Bearer {token}"));
        }
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn call_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert_eq!(
            value.get("success").and_then(|v| v.as_bool()),
            Some(true),
            "{method} failed: {value}"
        );
        value
    }

    /// Expects a failure envelope with the given HTTP-equivalent status.
    pub fn call_err(
        &mut self,
        method: &str,
        params: serde_json::Value,
        status: u64,
    ) -> serde_json::Value {
        let value = self.call(method, params);
        assert_eq!(
            value.get("success").and_then(|v| v.as_bool()),
            Some(false),
            "{method} unexpectedly succeeded: {value}"
        );
        assert_eq!(
            value.get("status").and_then(|v| v.as_u64()),
            Some(status),
            "{method}: {value}"
        );
        value
    }

    pub fn login(&mut self, username: &str, password: &str) -> serde_json::Value {
        self.token = None;
        let resp = self.call_ok(
            "auth.login",
            json!({ "username": username, "password": password }),
        );
        self.token = Some(resp["token"].as_str().expect("token").to_string());
        resp
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.workspace);
    }
}

pub struct School {
    pub term_id: String,
    pub maths: String,
    pub science: String,
    pub english: String,
    /// 10A students by index number 001, 002, 003.
    pub class_a: Vec<String>,
    /// 10B student 101.
    pub class_b: Vec<String>,
}

/// Two classes, three subjects (English is common stream) and one active term.
pub fn seed_school(sc: &mut Sidecar) -> School {
    sc.call_ok("classes.create", json!({ "name": "10A", "grade": 10, "section": "A" }));
    sc.call_ok("classes.create", json!({ "name": "10B", "grade": 10, "section": "B" }));

    let mut subject = |code: &str, name: &str, stream: &str| {
        sc.call_ok(
            "subjects.create",
            json!({ "code": code, "name": name, "stream": stream }),
        )["subjectId"]
            .as_str()
            .expect("subjectId")
            .to_string()
    };
    let maths = subject("MAT", "Mathematics", "Science");
    let science = subject("SCI", "Science", "Science");
    let english = subject("ENG", "English", "Common");

    let mut student = |index_no: &str, name: &str, class: &str| {
        sc.call_ok(
            "students.create",
            json!({ "indexNo": index_no, "name": name, "className": class, "admissionYear": 2024 }),
        )["studentId"]
            .as_str()
            .expect("studentId")
            .to_string()
    };
    let class_a = vec![
        student("001", "Ama", "10A"),
        student("002", "Kojo", "10A"),
        student("003", "Esi", "10A"),
    ];
    let class_b = vec![student("101", "Yaw", "10B")];

    let term_id = sc.call_ok(
        "terms.create",
        json!({
            "termNumber": 1,
            "examMonth": 4,
            "examYear": 2026,
            "academicYear": "2026",
            "status": "active"
        }),
    )["termId"]
        .as_str()
        .expect("termId")
        .to_string();

    School {
        term_id,
        maths,
        science,
        english,
        class_a,
        class_b,
    }
}

/// Creates a user through the current admin session; password `teacher-pass`.
pub fn create_user(sc: &mut Sidecar, username: &str, role: &str, class: Option<&str>) -> String {
    sc.call_ok(
        "users.create",
        json!({
            "username": username,
            "fullName": username,
            "role": role,
            "assignedClass": class,
            "password": "teacher-pass",
        }),
    )["userId"]
        .as_str()
        .expect("userId")
        .to_string()
}
