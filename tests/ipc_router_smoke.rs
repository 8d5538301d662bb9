mod common;

use common::{Sidecar, ADMIN_PASSWORD, ADMIN_USER};
use serde_json::json;

#[test]
fn protocol_errors_and_workspace_gate() {
    let mut sc = Sidecar::spawn("schoold-router-gate");

    let health = sc.call_ok("health", json!({}));
    assert_eq!(health["workspaceOpen"], json!(false));

    let bad = sc.send_raw("{not json");
    assert_eq!(bad["success"], json!(false));
    assert_eq!(bad["code"], json!("bad_json"));
    assert!(bad["id"].is_null());

    let gated = sc.call_err(
        "auth.login",
        json!({ "username": ADMIN_USER, "password": ADMIN_PASSWORD }),
        400,
    );
    assert_eq!(gated["error"], json!("select a workspace first"));

    let unknown = sc.call_err("grades.explode", json!({}), 404);
    assert_eq!(unknown["code"], json!("not_implemented"));

    let path = sc.workspace.to_string_lossy().to_string();
    sc.call_ok("workspace.select", json!({ "path": path }));
    let health = sc.call_ok("health", json!({}));
    assert_eq!(health["workspaceOpen"], json!(true));
    assert!(sc.workspace.join("school.sqlite3").exists());
}

#[test]
fn guarded_methods_need_a_token() {
    let mut sc = Sidecar::spawn("schoold-router-token");
    let path = sc.workspace.to_string_lossy().to_string();
    sc.call_ok("workspace.select", json!({ "path": path }));

    let missing = sc.call_err("students.list", json!({}), 401);
    assert_eq!(missing["code"], json!("authentication"));

    sc.token = Some("not-a-real-token".to_string());
    sc.call_err("students.list", json!({}), 401);
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let mut sc = Sidecar::start("schoold-router-smoke");
    let school = common::seed_school(&mut sc);

    let methods = [
        ("auth.me", json!({})),
        ("users.list", json!({})),
        ("students.list", json!({ "className": "10A" })),
        ("students.get", json!({ "studentId": school.class_a[0] })),
        ("subjects.list", json!({})),
        ("classes.list", json!({})),
        ("classes.subjects.list", json!({ "className": "10A" })),
        ("terms.list", json!({})),
        ("terms.current", json!({})),
        ("marks.list", json!({ "termId": school.term_id })),
        ("reports.termReport", json!({ "termId": school.term_id })),
        ("reports.subjectAnalysis", json!({ "termId": school.term_id })),
        ("savedReports.list", json!({})),
        ("attendance.list", json!({})),
        ("termAttendance.list", json!({})),
        (
            "termAttendance.stats",
            json!({ "className": "10A", "termId": school.term_id, "academicYear": "2026" }),
        ),
        ("promotions.history", json!({})),
    ];
    for (method, params) in methods {
        sc.call_ok(method, params);
    }

    let current = sc.call_ok("terms.current", json!({}));
    assert_eq!(current["term"]["id"], json!(school.term_id));
}
