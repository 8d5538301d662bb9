mod common;

use common::{seed_school, Sidecar};
use serde_json::json;

fn active_terms(sc: &mut Sidecar) -> Vec<String> {
    sc.call_ok("terms.list", json!({ "status": "active" }))["terms"]
        .as_array()
        .expect("terms")
        .iter()
        .map(|t| t["id"].as_str().expect("id").to_string())
        .collect()
}

#[test]
fn set_current_leaves_exactly_one_active_term() {
    let mut sc = Sidecar::start("schoold-terms-current");
    let created = sc.call_ok(
        "terms.bulkCreate",
        json!({
            "terms": [
                { "termNumber": 1, "examMonth": 4, "examYear": 2026, "academicYear": "2026", "status": "active" },
                { "termNumber": 2, "examMonth": 8, "examYear": 2026, "academicYear": "2026" },
                { "termNumber": 3, "examMonth": 12, "examYear": 2026, "academicYear": "2026" },
            ]
        }),
    );
    let ids: Vec<String> = created["termIds"]
        .as_array()
        .expect("termIds")
        .iter()
        .map(|v| v.as_str().expect("id").to_string())
        .collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(active_terms(&mut sc), vec![ids[0].clone()]);

    for id in [&ids[2], &ids[1], &ids[1]] {
        let resp = sc.call_ok("terms.setCurrent", json!({ "termId": id }));
        assert_eq!(resp["term"]["status"], json!("active"));
        assert_eq!(active_terms(&mut sc), vec![id.clone()]);
    }

    sc.call_err("terms.setCurrent", json!({ "termId": "missing" }), 404);
    assert_eq!(active_terms(&mut sc), vec![ids[1].clone()]);

    let current = sc.call_ok("terms.current", json!({}));
    assert_eq!(current["term"]["id"], json!(ids[1]));
    assert_eq!(current["term"]["name"], json!("Term 2"));
}

#[test]
fn bulk_create_is_all_or_nothing() {
    let mut sc = Sidecar::start("schoold-terms-bulk");
    sc.call_ok(
        "terms.create",
        json!({ "termNumber": 2, "examMonth": 8, "examYear": 2026, "academicYear": "2026" }),
    );
    sc.call_err(
        "terms.bulkCreate",
        json!({
            "terms": [
                { "termNumber": 1, "examMonth": 4, "examYear": 2026, "academicYear": "2026" },
                { "termNumber": 2, "examMonth": 8, "examYear": 2026, "academicYear": "2026" },
            ]
        }),
        409,
    );
    let listed = sc.call_ok("terms.list", json!({ "academicYear": "2026" }));
    assert_eq!(listed["terms"].as_array().map(|t| t.len()), Some(1));

    let invalid = sc.call_err(
        "terms.bulkCreate",
        json!({ "terms": [{ "termNumber": 5, "examMonth": 4, "examYear": 2027, "academicYear": "2027" }] }),
        400,
    );
    assert!(invalid["error"].as_str().unwrap_or_default().starts_with("term 0"));
}

#[test]
fn terms_with_marks_cannot_be_deleted() {
    let mut sc = Sidecar::start("schoold-terms-delete");
    let school = seed_school(&mut sc);
    sc.call_ok(
        "marks.bulk",
        json!({
            "termId": school.term_id,
            "marks": [{ "studentId": school.class_a[0], "subjectId": school.maths, "marks": 50 }]
        }),
    );
    let resp = sc.call_err("terms.delete", json!({ "termId": school.term_id }), 409);
    assert_eq!(resp["code"], json!("conflict"));

    let spare = sc.call_ok(
        "terms.create",
        json!({ "termNumber": 2, "examMonth": 8, "examYear": 2026, "academicYear": "2026" }),
    )["termId"]
        .as_str()
        .expect("termId")
        .to_string();
    sc.call_ok("terms.delete", json!({ "termId": spare }));
    sc.call_err("terms.delete", json!({ "termId": spare }), 404);
}

#[test]
fn clone_and_update_terms() {
    let mut sc = Sidecar::start("schoold-terms-clone");
    let school = seed_school(&mut sc);

    let cloned = sc.call_ok(
        "terms.clone",
        json!({ "termId": school.term_id, "academicYear": "2027" }),
    )["termId"]
        .as_str()
        .expect("termId")
        .to_string();
    let listed = sc.call_ok("terms.list", json!({ "academicYear": "2027" }));
    let copy = &listed["terms"][0];
    assert_eq!(copy["id"], json!(cloned));
    assert_eq!(copy["termNumber"], json!(1));
    assert_eq!(copy["examYear"], json!(2027));
    assert_eq!(copy["status"], json!("inactive"));

    sc.call_err(
        "terms.clone",
        json!({ "termId": school.term_id, "academicYear": "-9223372036854775808" }),
        400,
    );

    let updated = sc.call_ok(
        "terms.update",
        json!({ "termId": cloned, "name": "First Term", "examMonth": 5, "status": "active" }),
    );
    assert_eq!(updated["term"]["name"], json!("First Term"));
    assert_eq!(updated["term"]["examMonth"], json!(5));
    assert_eq!(active_terms(&mut sc), vec![cloned.clone()]);

    sc.call_err("terms.update", json!({ "termId": cloned, "examMonth": 13 }), 400);
    sc.call_err("terms.update", json!({ "termId": cloned }), 400);
}
