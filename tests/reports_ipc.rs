mod test_support;

use serde_json::json;
use test_support::{
    enter_mark, request_err, request_ok, seed_college, spawn_sidecar, staff, student,
};

#[test]
fn three_subject_scenario_flows_through_every_report() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_college(&mut stdin, &mut reader, "resultsd-reports-scenario");
    enter_mark(&mut stdin, &mut reader, "1", &seed, &seed.jane_id, &seed.math_id, 85.0);
    enter_mark(&mut stdin, &mut reader, "2", &seed, &seed.jane_id, &seed.physics_id, 78.0);
    enter_mark(&mut stdin, &mut reader, "3", &seed, &seed.jane_id, &seed.chemistry_id, 92.0);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.resultSummary",
        json!({ "actor": student(&seed.jane_id), "studentId": seed.jane_id, "sessionId": seed.session_id }),
    );
    let summary = &res["summary"];
    assert_eq!(summary["totalObtained"], json!(255.0));
    assert_eq!(summary["totalMax"], json!(300.0));
    assert_eq!(summary["overallPercentage"], json!(85.0));
    assert_eq!(summary["gpa"], json!(3.67));
    assert_eq!(summary["outcome"], json!("Pass"));

    let mut grades: Vec<(String, String)> = res["preview"]["rows"]
        .as_array()
        .expect("preview rows")
        .iter()
        .map(|r| {
            (
                r["subjectCode"].as_str().expect("code").to_string(),
                r["grade"].as_str().expect("grade").to_string(),
            )
        })
        .collect();
    grades.sort();
    assert_eq!(
        grades,
        vec![
            ("CHM101".to_string(), "A+".to_string()),
            ("MTH101".to_string(), "A".to_string()),
            ("PHY101".to_string(), "B+".to_string()),
        ]
    );

    let csv = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.resultCsv",
        json!({ "actor": staff(), "sessionId": seed.session_id }),
    );
    let csv = csv["csv"].as_str().expect("csv");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines[0],
        "rollNumber,studentName,totalMarks,obtainedMarks,percentage,gpa,result"
    );
    assert_eq!(lines[1], "R001,Jane Doe,300,255,85%,3.67,Pass");
    // John has no marks: included with the silent zero result.
    assert_eq!(lines[2], "R002,John Roe,0,0,0%,0.00,Fail");

    let sheet = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "reports.marksheetHtml",
        json!({ "actor": staff(), "studentId": seed.jane_id, "sessionId": seed.session_id }),
    );
    assert_eq!(sheet["fileName"], json!("R001_2024-25_marksheet.html"));
    let html = sheet["html"].as_str().expect("html");
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("<h1>College</h1>"));
    assert!(html.contains("<td>MTH101</td><td>Mathematics</td><td>85</td><td>100</td><td>85%</td><td>A</td><td>3.70</td>"));
    assert!(html.contains("GPA 3.67"));
    assert!(html.contains("class=\"result-Pass\">Pass"));

    let letter = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reports.parentLetterHtml",
        json!({ "actor": staff(), "studentId": seed.jane_id, "sessionId": seed.session_id }),
    );
    let html = letter["html"].as_str().expect("html");
    assert!(html.contains("Dear Mary Doe,"));
    assert!(html.contains("obtained 255 out of 300 marks (85%) with a GPA of 3.67"));
}

#[test]
fn students_only_read_their_own_reports() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_college(&mut stdin, &mut reader, "resultsd-reports-roles");
    enter_mark(&mut stdin, &mut reader, "1", &seed, &seed.john_id, &seed.math_id, 55.0);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "reports.marksheetHtml",
        json!({ "actor": student(&seed.jane_id), "studentId": seed.john_id, "sessionId": seed.session_id }),
    );
    assert_eq!(code, "forbidden");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "reports.resultCsv",
        json!({ "actor": student(&seed.jane_id), "sessionId": seed.session_id }),
    );
    assert_eq!(code, "forbidden");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "reports.resultSummary",
        json!({ "studentId": seed.john_id, "sessionId": seed.session_id }),
    );
    assert_eq!(code, "bad_params");

    let own = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.resultSummary",
        json!({ "actor": student(&seed.john_id), "studentId": seed.john_id, "sessionId": seed.session_id }),
    );
    assert_eq!(own["summary"]["overallPercentage"], json!(55.0));
}

#[test]
fn institution_letterhead_is_echoed_escaped() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_college(&mut stdin, &mut reader, "resultsd-reports-letterhead");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.update",
        json!({
            "actor": test_support::admin(),
            "section": "institution",
            "patch": { "name": "St. Anne's <Arts> College", "principalName": "Dr. R. Iyer" }
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "actor": test_support::admin(), "section": "reports", "patch": { "showGeneratedAt": false } }),
    );
    enter_mark(&mut stdin, &mut reader, "3", &seed, &seed.jane_id, &seed.math_id, 70.0);

    let sheet = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.marksheetHtml",
        json!({ "actor": staff(), "studentId": seed.jane_id, "sessionId": seed.session_id }),
    );
    let html = sheet["html"].as_str().expect("html");
    assert!(html.contains("<h1>St. Anne&#39;s &lt;Arts&gt; College</h1>"));
    assert!(html.contains("Dr. R. Iyer (Principal)"));
    assert!(!html.contains("class=\"generated\""));
}
