mod common;

use common::Sidecar;
use serde_json::json;

const MORNING: &str = "2026-10-19T09:00:00";

struct School {
    sidecar: Sidecar,
    student: String,
    monday: String,
    tuesday: String,
    thursday: String,
}

fn school_with_cancelled_lesson() -> School {
    let mut sidecar = Sidecar::with_workspace();
    let monday = sidecar.create_class("Piano Mon", None, 1);
    let tuesday = sidecar.create_class("Piano Tue", None, 2);
    let thursday = sidecar.create_class("Piano Thu", Some(4), 4);
    let student = sidecar.create_student("Ada");
    sidecar.enroll(&student, &monday, "2026-09-01");

    let outcome = sidecar.request_ok(
        "sessions.cancel",
        json!({ "classId": &monday, "date": "2026-10-12", "reason": "instructor ill" }),
    );
    assert_eq!(outcome["creditedStudents"], json!([&student]));

    School {
        sidecar,
        student,
        monday,
        tuesday,
        thursday,
    }
}

fn credits(sidecar: &mut Sidecar, student: &str, as_of: &str) -> i64 {
    sidecar.request_ok(
        "makeup.credits",
        json!({ "studentId": &student, "asOf": as_of }),
    )["remaining"]
        .as_i64()
        .expect("remaining")
}

#[test]
fn cancellation_credit_books_one_makeup_only() {
    let School {
        mut sidecar,
        student,
        thursday,
        ..
    } = school_with_cancelled_lesson();
    assert_eq!(credits(&mut sidecar, &student, MORNING), 1);

    let booking = json!({
        "studentId": &student,
        "newClassId": &thursday,
        "newSessionDate": "2026-10-22",
        "reason": "missed lesson",
        "asOf": MORNING,
    });
    let check = sidecar.request_ok("makeup.validate", booking.clone());
    assert_eq!(check["eligible"], true);
    assert_eq!(check["originalSessionDate"], "2026-10-12");
    // Validation alone writes nothing.
    assert_eq!(credits(&mut sidecar, &student, MORNING), 1);

    let booked = sidecar.request_ok("makeup.book", booking);
    assert_eq!(booked["request"]["status"], "approved");
    assert_eq!(booked["remainingCredits"], 0);

    let roster = sidecar.request_ok(
        "sessions.roster",
        json!({ "classId": &thursday, "date": "2026-10-22" }),
    );
    let guest = &roster["students"][0];
    assert_eq!(guest["studentId"], student.as_str());
    assert_eq!(guest["isMakeup"], true);

    let again = sidecar.request_err(
        "makeup.book",
        json!({
            "studentId": &student,
            "newClassId": &thursday,
            "newSessionDate": "2026-10-29",
            "asOf": MORNING,
        }),
    );
    assert_eq!(again, "no_credit");

    let listed = sidecar.request_ok("makeup.list", json!({ "studentId": &student }));
    assert_eq!(listed["requests"].as_array().map(|r| r.len()), Some(1));
}

#[test]
fn rejecting_or_cancelling_a_makeup_returns_the_credit() {
    let School {
        mut sidecar,
        student,
        thursday,
        ..
    } = school_with_cancelled_lesson();
    let booking = json!({
        "studentId": &student,
        "newClassId": &thursday,
        "newSessionDate": "2026-10-22",
        "asOf": MORNING,
    });

    let booked = sidecar.request_ok("makeup.book", booking.clone());
    let request_id = booked["request"]["id"].as_str().expect("id").to_string();
    let rejected = sidecar.request_ok("makeup.reject", json!({ "requestId": &request_id }));
    assert_eq!(rejected["request"]["status"], "rejected");
    assert_eq!(credits(&mut sidecar, &student, MORNING), 1);
    assert_eq!(
        sidecar.request_err("makeup.reject", json!({ "requestId": "nope" })),
        "not_found"
    );

    sidecar.request_ok("makeup.book", booking);
    assert_eq!(credits(&mut sidecar, &student, MORNING), 0);
    let cancelled = sidecar.request_ok(
        "sessions.cancel",
        json!({ "classId": &thursday, "date": "2026-10-22", "reason": "storm" }),
    );
    assert_eq!(cancelled["releasedMakeups"].as_array().map(|r| r.len()), Some(1));
    assert_eq!(credits(&mut sidecar, &student, MORNING), 1);
}

#[test]
fn timing_rules_reject_with_details() {
    let School {
        mut sidecar,
        student,
        tuesday,
        thursday,
        monday,
    } = school_with_cancelled_lesson();

    let response = sidecar.request(
        "makeup.validate",
        json!({
            "studentId": &student,
            "newClassId": &tuesday,
            "newSessionDate": "2026-10-20",
            "asOf": MORNING,
        }),
    );
    assert_eq!(response["error"]["code"], "adjacent_to_regular_session");
    assert_eq!(response["error"]["details"]["conflictDate"], "2026-10-19");

    let response = sidecar.request(
        "makeup.validate",
        json!({
            "studentId": &student,
            "newClassId": &thursday,
            "newSessionDate": "2026-10-22",
            "asOf": "2026-10-22T08:00:00",
        }),
    );
    assert_eq!(response["error"]["code"], "too_late");
    assert_eq!(response["error"]["details"]["leadDays"], 1);

    let code = sidecar.request_err(
        "makeup.validate",
        json!({
            "studentId": &student,
            "newClassId": &monday,
            "newSessionDate": "2026-10-26",
            "asOf": MORNING,
        }),
    );
    assert_eq!(code, "slot_unavailable");

    let code = sidecar.request_err(
        "makeup.validate",
        json!({
            "studentId": &student,
            "newClassId": &thursday,
            "newSessionDate": "2026-10-23",
            "asOf": MORNING,
        }),
    );
    assert_eq!(code, "slot_unavailable");
}

#[test]
fn full_session_is_unavailable() {
    let School {
        mut sidecar,
        student,
        ..
    } = school_with_cancelled_lesson();
    let friday = sidecar.create_class("Piano Fri", Some(1), 5);
    let regular = sidecar.create_student("Bo");
    sidecar.enroll(&regular, &friday, "2026-09-01");

    let code = sidecar.request_err(
        "makeup.book",
        json!({
            "studentId": &student,
            "newClassId": &friday,
            "newSessionDate": "2026-10-23",
            "asOf": MORNING,
        }),
    );
    assert_eq!(code, "slot_unavailable");
    assert_eq!(credits(&mut sidecar, &student, MORNING), 1);
}

#[test]
fn session_labels_follow_enrollment_window() {
    let School {
        mut sidecar,
        student,
        ..
    } = school_with_cancelled_lesson();
    let label = |sidecar: &mut Sidecar, date: &str| {
        sidecar.request_ok(
            "attendance.sessionNumber",
            json!({ "studentId": &student, "date": date }),
        )["label"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    };
    assert_eq!(label(&mut sidecar, "2026-08-31"), "Not yet");
    assert_eq!(label(&mut sidecar, "2026-10-19"), "1/4");
}
