mod common;

use common::{create_user, seed_school, Sidecar, ADMIN_PASSWORD, ADMIN_USER};
use serde_json::json;

fn stored_marks(sc: &mut Sidecar, term_id: &str) -> Vec<serde_json::Value> {
    sc.call_ok("marks.list", json!({ "termId": term_id }))["marks"]
        .as_array()
        .expect("marks")
        .clone()
}

#[test]
fn one_invalid_mark_rejects_the_whole_batch() {
    let mut sc = Sidecar::start("schoold-marks-invalid");
    let school = seed_school(&mut sc);

    let resp = sc.call_err(
        "marks.bulk",
        json!({
            "termId": school.term_id,
            "marks": [
                { "studentId": school.class_a[0], "subjectId": school.maths, "marks": 70 },
                { "studentId": school.class_a[1], "subjectId": school.maths, "marks": 150 },
            ]
        }),
        400,
    );
    assert_eq!(resp["code"], json!("validation"));
    assert!(stored_marks(&mut sc, &school.term_id).is_empty());

    sc.call_err(
        "marks.bulk",
        json!({ "termId": school.term_id, "marks": [] }),
        400,
    );
    sc.call_err(
        "marks.bulk",
        json!({
            "termId": "no-such-term",
            "marks": [{ "studentId": school.class_a[0], "subjectId": school.maths, "marks": 1 }]
        }),
        404,
    );
}

#[test]
fn teacher_cannot_write_another_class() {
    let mut sc = Sidecar::start("schoold-marks-scope");
    let school = seed_school(&mut sc);
    create_user(&mut sc, "mensah", "teacher", Some("10A"));
    sc.login("mensah", "teacher-pass");

    let resp = sc.call_err(
        "marks.bulk",
        json!({
            "termId": school.term_id,
            "marks": [
                { "studentId": school.class_a[0], "subjectId": school.maths, "marks": 70 },
                { "studentId": school.class_b[0], "subjectId": school.maths, "marks": 60 },
            ]
        }),
        403,
    );
    assert_eq!(resp["code"], json!("authorization"));

    let own = sc.call_ok(
        "marks.bulk",
        json!({
            "termId": school.term_id,
            "marks": [{ "studentId": school.class_a[0], "subjectId": school.maths, "marks": 70 }]
        }),
    );
    assert_eq!(own["inserted"], json!(1));

    sc.call_err(
        "marks.list",
        json!({ "termId": school.term_id, "className": "10B" }),
        403,
    );
    let visible = stored_marks(&mut sc, &school.term_id);
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0]["className"], json!("10A"));
}

#[test]
fn resubmission_is_idempotent_and_absent_round_trips() {
    let mut sc = Sidecar::start("schoold-marks-idempotent");
    let school = seed_school(&mut sc);
    let batch = json!({
        "termId": school.term_id,
        "marks": [
            { "studentId": school.class_a[0], "subjectId": school.maths, "marks": "ab" },
            { "studentId": school.class_a[1], "subjectId": school.maths, "marks": 73 },
            { "studentId": school.class_a[2], "subjectId": school.maths, "marks": "0" },
        ]
    });

    let first = sc.call_ok("marks.bulk", batch.clone());
    assert_eq!((first["inserted"].clone(), first["updated"].clone()), (json!(3), json!(0)));
    let before = stored_marks(&mut sc, &school.term_id);

    let second = sc.call_ok("marks.bulk", batch);
    assert_eq!((second["inserted"].clone(), second["updated"].clone()), (json!(0), json!(3)));
    let after = stored_marks(&mut sc, &school.term_id);
    assert_eq!(after.len(), 3);
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a["id"], b["id"]);
        assert_eq!(a["marks"], b["marks"]);
        assert_eq!(a["isAbsent"], b["isAbsent"]);
    }

    let by_index = |idx: &str| {
        after
            .iter()
            .find(|m| m["indexNo"] == json!(idx))
            .expect("mark row")
            .clone()
    };
    assert!(by_index("001")["marks"].is_null());
    assert_eq!(by_index("001")["isAbsent"], json!(true));
    assert_eq!(by_index("002")["marks"].as_f64(), Some(73.0));
    assert_eq!(by_index("002")["isAbsent"], json!(false));
    assert_eq!(by_index("003")["marks"].as_f64(), Some(0.0));
}

#[test]
fn single_mark_create_update_delete() {
    let mut sc = Sidecar::start("schoold-marks-single");
    let school = seed_school(&mut sc);

    let created = sc.call_ok(
        "marks.create",
        json!({
            "termId": school.term_id,
            "studentId": school.class_b[0],
            "subjectId": school.science,
            "marks": 64
        }),
    );
    assert_eq!(created["created"], json!(true));
    let mark_id = created["markId"].as_str().expect("markId").to_string();

    sc.call_err("marks.update", json!({ "markId": mark_id, "marks": 55.5 }), 400);
    let updated = sc.call_ok("marks.update", json!({ "markId": mark_id, "marks": "AB" }));
    assert_eq!(updated["isAbsent"], json!(true));

    create_user(&mut sc, "mensah", "teacher", Some("10A"));
    sc.login("mensah", "teacher-pass");
    sc.call_err("marks.delete", json!({ "markId": mark_id }), 403);

    sc.login(ADMIN_USER, ADMIN_PASSWORD);
    sc.call_ok("marks.delete", json!({ "markId": mark_id }));
    sc.call_err("marks.delete", json!({ "markId": mark_id }), 404);
    assert!(stored_marks(&mut sc, &school.term_id).is_empty());
}
