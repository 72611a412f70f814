mod common;

use common::Sidecar;
use serde_json::json;

#[test]
fn workspace_methods_require_a_workspace() {
    let mut sidecar = Sidecar::spawn();
    let health = sidecar.request_ok("health", json!({}));
    assert!(health["workspacePath"].is_null());

    assert_eq!(
        sidecar.request_err("sessions.list", json!({ "classId": "x", "from": "2026-10-01", "to": "2026-10-31" })),
        "no_workspace"
    );
    assert_eq!(
        sidecar.request_err("makeup.credits", json!({ "studentId": "x" })),
        "no_workspace"
    );
    let session = json!({ "classId": "x", "date": "2026-10-19" });
    assert_eq!(sidecar.request_err("staging.open", session.clone()), "no_workspace");
    assert_eq!(sidecar.request_err("sessions.finalize", session), "no_workspace");
    assert_eq!(sidecar.request_err("setup.get", json!({})), "no_workspace");
    assert_eq!(sidecar.request_err("workspace.select", json!({})), "bad_params");
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let mut sidecar = Sidecar::with_workspace();
    let class_id = sidecar.create_class("Piano", None, 1);
    let student_id = sidecar.create_student("Ada");
    sidecar.enroll(&student_id, &class_id, "2026-09-01");

    let session = json!({ "classId": &class_id, "date": "2026-10-19" });
    let calls = vec![
        ("setup.get", json!({})),
        ("classes.list", json!({})),
        ("students.profile", json!({ "studentId": &student_id, "asOf": "2026-10-19T09:00:00" })),
        ("sessions.list", json!({ "classId": &class_id, "from": "2026-10-01", "to": "2026-10-31" })),
        ("sessions.roster", session.clone()),
        ("attendance.sessionNumber", json!({ "studentId": &student_id, "date": "2026-10-19" })),
        ("makeup.credits", json!({ "studentId": &student_id, "asOf": "2026-10-19T09:00:00" })),
        ("makeup.list", json!({ "studentId": &student_id })),
        ("staging.open", session.clone()),
        ("staging.discard", session.clone()),
        ("sessions.finalize", json!({ "classId": &class_id, "date": "2026-10-19", "asOf": "2026-10-19T18:00:00" })),
        ("ranking.snapshot", json!({ "studentIds": [&student_id] })),
    ];
    for (method, params) in calls {
        sidecar.request_ok(method, params);
    }

    let unknown = sidecar.request("grades.open", json!({}));
    assert_eq!(unknown["error"]["code"], "not_implemented");
}

#[test]
fn setup_update_validates_and_persists_policy() {
    let mut sidecar = Sidecar::with_workspace();
    let defaults = sidecar.request_ok("setup.get", json!({}));
    assert_eq!(defaults["attendance"]["presentPoints"], 100);
    assert_eq!(defaults["attendance"]["rankHighlightMs"], 1200);

    assert_eq!(
        sidecar.request_err("setup.update", json!({ "patch": { "makeupLeadDays": -1 } })),
        "bad_params"
    );
    assert_eq!(
        sidecar.request_err("setup.update", json!({ "patch": { "bogus": 1 } })),
        "bad_params"
    );

    sidecar.request_ok("setup.update", json!({ "patch": { "presentPoints": 10 } }));
    let after = sidecar.request_ok("setup.get", json!({}));
    assert_eq!(after["attendance"]["presentPoints"], 10);
    assert_eq!(after["attendance"]["excusedPoints"], 50);
}

#[test]
fn class_setup_rejects_bad_templates() {
    let mut sidecar = Sidecar::with_workspace();
    let class_id = sidecar.create_class("Violin", Some(6), 2);

    let code = sidecar.request_err(
        "classes.addSession",
        json!({ "classId": &class_id, "dayOfWeek": 7, "startTime": "10:00", "endTime": "11:00" }),
    );
    assert_eq!(code, "bad_params");
    let code = sidecar.request_err(
        "classes.addSession",
        json!({ "classId": &class_id, "dayOfWeek": 3, "startTime": "11:00", "endTime": "10:00" }),
    );
    assert_eq!(code, "bad_params");
    let code = sidecar.request_err(
        "classes.addSession",
        json!({ "classId": "missing", "dayOfWeek": 3, "startTime": "10:00", "endTime": "11:00" }),
    );
    assert_eq!(code, "not_found");

    let listed = sidecar.request_ok("classes.list", json!({}));
    let classes = listed["classes"].as_array().expect("classes");
    assert_eq!(classes.len(), 1);
    assert_eq!(classes[0]["capacity"], 6);
    assert_eq!(classes[0]["sessions"].as_array().map(|s| s.len()), Some(1));

    let student_id = sidecar.create_student("Bo");
    let code = sidecar.request_err(
        "students.enroll",
        json!({
            "studentId": &student_id,
            "classId": &class_id,
            "startDate": "2026-10-01",
            "endDate": "2026-09-01",
        }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn occurrences_skip_cancelled_dates() {
    let mut sidecar = Sidecar::with_workspace();
    let class_id = sidecar.create_class("Piano", Some(1), 1);
    let window = json!({ "classId": &class_id, "from": "2026-10-01", "to": "2026-10-31" });

    let listed = sidecar.request_ok("sessions.list", window.clone());
    let dates: Vec<_> = listed["occurrences"]
        .as_array()
        .expect("occurrences")
        .iter()
        .map(|o| o["date"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(dates, vec!["2026-10-05", "2026-10-12", "2026-10-19", "2026-10-26"]);

    sidecar.request_ok(
        "sessions.cancel",
        json!({ "classId": &class_id, "date": "2026-10-12", "reason": "holiday" }),
    );
    assert_eq!(
        sidecar.request_err(
            "sessions.cancel",
            json!({ "classId": &class_id, "date": "2026-10-12" })
        ),
        "bad_params"
    );
    assert_eq!(
        sidecar.request_err(
            "sessions.cancel",
            json!({ "classId": &class_id, "date": "2026-10-13" })
        ),
        "bad_params"
    );

    let listed = sidecar.request_ok("sessions.list", window);
    let occurrences = listed["occurrences"].as_array().expect("occurrences");
    assert_eq!(occurrences.len(), 3);
    assert!(occurrences.iter().all(|o| o["date"] != "2026-10-12"));
    assert_eq!(occurrences[0]["seatsTaken"], 0);
    assert_eq!(occurrences[0]["isFull"], false);

    let too_wide = sidecar.request_err(
        "sessions.list",
        json!({ "classId": &class_id, "from": "2026-01-01", "to": "2027-12-31" }),
    );
    assert_eq!(too_wide, "bad_params");
}

#[test]
fn numeric_as_of_is_rejected() {
    let mut sidecar = Sidecar::with_workspace();
    let student_id = sidecar.create_student("Ada");
    assert_eq!(
        sidecar.request_err(
            "makeup.credits",
            json!({ "studentId": &student_id, "asOf": 1760860800 })
        ),
        "bad_params"
    );
}
