mod test_support;

use serde_json::json;
use test_support::{
    request_err, request_ok, seed_college, spawn_sidecar, staff, str_field, student, temp_dir,
};

fn add_student(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    id: &str,
    roll: &str,
    first: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        id,
        "students.create",
        json!({ "actor": staff(), "rollNumber": roll, "firstName": first, "lastName": "Test" }),
    );
    str_field(&res, "studentId")
}

#[test]
fn class_list_uses_competition_ranking_and_statistics() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_college(&mut stdin, &mut reader, "resultsd-class-ranking");
    let ravi = add_student(&mut stdin, &mut reader, "s1", "R003", "Ravi");
    let zoe = add_student(&mut stdin, &mut reader, "s2", "R004", "Zoe");

    let csv = "rollNumber,marksObtained\nR001,85\nR002,60\nR003,60\nR004,20\n";
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "marks.importCsv",
        json!({
            "actor": staff(),
            "subjectId": seed.math_id,
            "sessionId": seed.session_id,
            "examType": "final",
            "marksTotal": 100,
            "csv": csv
        }),
    );
    assert_eq!(imported["inserted"], json!(4));

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "reports.classResults",
        json!({ "actor": staff(), "sessionId": seed.session_id }),
    );
    let rows = class["rows"].as_array().expect("rows");
    let ranks: Vec<(u64, String)> = rows
        .iter()
        .map(|r| {
            (
                r["rank"].as_u64().expect("rank"),
                r["rollNumber"].as_str().expect("roll").to_string(),
            )
        })
        .collect();
    assert_eq!(ranks[0], (1, "R001".to_string()));
    assert_eq!(ranks[1].0, 2);
    assert_eq!(ranks[2].0, 2);
    assert_eq!(ranks[3], (4, "R004".to_string()));
    assert_eq!(rows[3]["studentId"], json!(zoe));
    assert!(rows[1..3].iter().any(|r| r["studentId"] == json!(ravi)));

    let stats = &class["statistics"];
    assert_eq!(stats["studentCount"], json!(4));
    assert_eq!(stats["passCount"], json!(3));
    assert_eq!(stats["failCount"], json!(1));
    assert_eq!(stats["passRate"], json!(75.0));
    assert_eq!(stats["averagePercentage"], json!(56.25));
    assert_eq!(stats["highestPercentage"], json!(85.0));
    assert_eq!(stats["lowestPercentage"], json!(20.0));

    let html = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.classResultsHtml",
        json!({ "actor": staff(), "sessionId": seed.session_id }),
    );
    let html = html["html"].as_str().expect("html");
    assert!(html.contains("<h2>Result List: 2024-25</h2>"));
    assert!(html.contains("<tr><td>1</td><td>R001</td><td>Jane Doe</td>"));
    assert!(html.contains("<td class=\"result-Fail\">Fail</td>"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "reports.classResults",
        json!({ "actor": student(&seed.jane_id), "sessionId": seed.session_id }),
    );
    assert_eq!(code, "forbidden");
}

#[test]
fn session_bundle_exports_and_verifies() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_college(&mut stdin, &mut reader, "resultsd-class-bundle");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "marks.importCsv",
        json!({
            "actor": staff(),
            "subjectId": seed.math_id,
            "sessionId": seed.session_id,
            "examType": "final",
            "csv": "rollNumber,marksObtained\nR001,85\nR002,38\n"
        }),
    );

    let out = temp_dir("resultsd-class-bundle-out").join("2024-25-results.zip");
    let export = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "bundle.exportClassResults",
        json!({ "actor": staff(), "sessionId": seed.session_id, "outPath": out.to_string_lossy() }),
    );
    assert_eq!(export["entryCount"], json!(5));
    let names: Vec<&str> = export["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .map(|e| e["name"].as_str().expect("name"))
        .collect();
    assert_eq!(
        names,
        vec![
            "marksheets/R001_2024-25_marksheet.html",
            "marksheets/R002_2024-25_marksheet.html",
            "results.csv",
            "class-results.html",
        ]
    );

    let verify = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "bundle.verify",
        json!({ "path": out.to_string_lossy() }),
    );
    assert_eq!(verify["intact"], json!(true));
    assert_eq!(verify["checked"], json!(4));
    assert_eq!(verify["unexpected"], json!([]));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "bundle.exportClassResults",
        json!({ "actor": student(&seed.jane_id), "sessionId": seed.session_id, "outPath": out.to_string_lossy() }),
    );
    assert_eq!(code, "forbidden");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "bundle.verify",
        json!({ "path": out.with_extension("missing").to_string_lossy() }),
    );
    assert_eq!(code, "bundle_unreadable");
}

#[test]
fn bundle_keeps_marksheets_apart_when_roll_numbers_clean_alike() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_college(&mut stdin, &mut reader, "resultsd-class-bundle-rolls");
    let _ = add_student(&mut stdin, &mut reader, "s1", "CS/01", "Asha");
    let _ = add_student(&mut stdin, &mut reader, "s2", "CS 01", "Bilal");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "marks.importCsv",
        json!({
            "actor": staff(),
            "subjectId": seed.math_id,
            "sessionId": seed.session_id,
            "examType": "final",
            "csv": "rollNumber,marksObtained\nCS/01,72\nCS 01,64\nR001,85\nR002,38\n"
        }),
    );

    let out = temp_dir("resultsd-class-bundle-rolls-out").join("results.zip");
    let export = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "bundle.exportClassResults",
        json!({ "actor": staff(), "sessionId": seed.session_id, "outPath": out.to_string_lossy() }),
    );
    let names: Vec<&str> = export["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .map(|e| e["name"].as_str().expect("name"))
        .collect();
    assert_eq!(
        &names[..2],
        &[
            "marksheets/CS_01_2024-25_marksheet.html",
            "marksheets/CS_01_2024-25_marksheet-2.html",
        ]
    );
    assert_eq!(export["entryCount"], json!(7));

    let verify = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "bundle.verify",
        json!({ "path": out.to_string_lossy() }),
    );
    assert_eq!(verify["intact"], json!(true));
    assert_eq!(verify["checked"], json!(6));
}

#[test]
fn deactivated_students_leave_the_class_list() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_college(&mut stdin, &mut reader, "resultsd-class-inactive");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.setActive",
        json!({ "actor": staff(), "studentId": seed.john_id, "active": false }),
    );
    assert_eq!(res["active"], json!(false));

    let active = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.list",
        json!({ "actor": staff(), "activeOnly": true }),
    );
    let active = active["students"].as_array().expect("students");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["rollNumber"], json!("R001"));

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.classResults",
        json!({ "actor": staff(), "sessionId": seed.session_id }),
    );
    let rows = class["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["rollNumber"], json!("R001"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.setActive",
        json!({ "actor": staff(), "studentId": seed.john_id, "active": true }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.classResults",
        json!({ "actor": staff(), "sessionId": seed.session_id }),
    );
    assert_eq!(class["rows"].as_array().expect("rows").len(), 2);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "6",
            "students.setActive",
            json!({ "actor": student(&seed.jane_id), "studentId": seed.john_id, "active": false }),
        ),
        "forbidden"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "7",
            "students.setActive",
            json!({ "actor": staff(), "studentId": "missing", "active": false }),
        ),
        "not_found"
    );
}
