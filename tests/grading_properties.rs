#[path = "../src/grading.rs"]
mod grading;

use grading::{
    attendance_percentage, grade_for, outcome_for, summarize, AttendanceRecord, AttendanceStatus,
    GradingPolicy, MarkRecord, Outcome,
};

fn mark(subject: &str, exam_type: &str, obtained: f64, total: f64) -> MarkRecord {
    MarkRecord {
        student_id: "st1".into(),
        subject_id: subject.into(),
        session_id: "se1".into(),
        exam_type: exam_type.into(),
        marks_obtained: obtained,
        marks_total: total,
        grade: String::new(),
        remarks: None,
    }
}

fn day(date: &str, status: AttendanceStatus) -> AttendanceRecord {
    AttendanceRecord {
        student_id: "st1".into(),
        subject_id: "math".into(),
        session_id: "se1".into(),
        date: date.into(),
        status,
    }
}

#[test]
fn every_valid_mark_lands_in_exactly_the_band_its_percentage_selects() {
    let policy = GradingPolicy::default();
    let bands = policy.bands();
    for total in [1u32, 7, 40, 100, 150] {
        for obtained in 0..=total {
            let g = grade_for(&policy, obtained as f64, total as f64);
            let pct = 100.0 * obtained as f64 / total as f64;
            let idx = bands
                .iter()
                .position(|b| b.grade == g.grade)
                .expect("grade comes from the table");
            assert!(
                bands[idx].min_percent <= pct,
                "{}/{} graded {} above its percentage",
                obtained,
                total,
                g.grade
            );
            if idx > 0 {
                assert!(
                    pct < bands[idx - 1].min_percent,
                    "{}/{} should have reached {}",
                    obtained,
                    total,
                    bands[idx - 1].grade
                );
            }
            assert_eq!(g.grade_point, bands[idx].grade_point);
        }
    }
}

#[test]
fn reference_grades() {
    let p = GradingPolicy::default();
    let check = |obtained: f64, grade: &str, point: f64| {
        let g = grade_for(&p, obtained, 100.0);
        assert_eq!((g.grade.as_str(), g.grade_point), (grade, point), "{}", obtained);
    };
    check(100.0, "A+", 4.0);
    check(0.0, "F", 0.0);
    check(29.0, "F", 0.0);
    check(39.0, "D", 2.0);
    check(40.0, "C", 2.3);
}

#[test]
fn pass_threshold_is_inclusive() {
    let p = GradingPolicy::default();
    assert_eq!(outcome_for(&p, 39.999), Outcome::Fail);
    assert_eq!(outcome_for(&p, 40.0), Outcome::Pass);
}

#[test]
fn empty_input_summarizes_to_zero_and_fail() {
    let s = summarize(&GradingPolicy::default(), "st1", &[], &[]).expect("summary");
    assert!(s.per_subject.is_empty());
    assert_eq!(s.total_obtained, 0.0);
    assert_eq!(s.total_max, 0.0);
    assert_eq!(s.overall_percentage, 0.0);
    assert_eq!(s.gpa, 0.0);
    assert_eq!(s.attendance_percentage, 0.0);
    assert_eq!(s.outcome, Outcome::Fail);
}

#[test]
fn summary_does_not_depend_on_record_order() {
    let p = GradingPolicy::default();
    let marks = vec![
        mark("math", "mid", 40.0, 50.0),
        mark("phy", "final", 33.0, 100.0),
        mark("math", "final", 45.0, 50.0),
        mark("chem", "final", 91.5, 100.0),
    ];
    let attendance = vec![
        day("2024-09-03", AttendanceStatus::Absent),
        day("2024-09-02", AttendanceStatus::Present),
        day("2024-09-04", AttendanceStatus::Late),
    ];
    let base = summarize(&p, "st1", &marks, &attendance).expect("base");

    let mut reversed = marks.clone();
    reversed.reverse();
    let mut rotated = marks.clone();
    rotated.rotate_left(2);
    let mut shuffled_days = attendance.clone();
    shuffled_days.swap(0, 2);

    assert_eq!(summarize(&p, "st1", &reversed, &attendance).expect("rev"), base);
    assert_eq!(summarize(&p, "st1", &rotated, &shuffled_days).expect("rot"), base);
}

#[test]
fn eight_present_two_absent_is_eighty_percent() {
    let mut days: Vec<AttendanceRecord> = (1..=8)
        .map(|d| day(&format!("2024-09-{:02}", d), AttendanceStatus::Present))
        .collect();
    days.push(day("2024-09-09", AttendanceStatus::Absent));
    days.push(day("2024-09-10", AttendanceStatus::Absent));
    assert_eq!(attendance_percentage(&days), 80.0);
    assert_eq!(attendance_percentage(&[]), 0.0);
}

#[test]
fn three_subject_scenario() {
    let marks = vec![
        mark("math", "final", 85.0, 100.0),
        mark("phy", "final", 78.0, 100.0),
        mark("chem", "final", 92.0, 100.0),
    ];
    let s = summarize(&GradingPolicy::default(), "st1", &marks, &[]).expect("summary");
    assert_eq!(s.total_obtained, 255.0);
    assert_eq!(s.total_max, 300.0);
    assert_eq!(s.overall_percentage, 85.0);
    let grades: Vec<(&str, &str)> = s
        .per_subject
        .iter()
        .map(|r| (r.subject_id.as_str(), r.grade.as_str()))
        .collect();
    assert_eq!(grades, vec![("chem", "A+"), ("math", "A"), ("phy", "B+")]);
    assert_eq!(s.gpa, 3.67);
    assert_eq!(s.outcome, Outcome::Pass);
}

#[test]
fn custom_policy_loaded_from_json_changes_cutoffs() {
    let policy: GradingPolicy = serde_json::from_value(serde_json::json!({
        "bands": [
            { "minPercent": 0, "grade": "U", "gradePoint": 0 },
            { "minPercent": 75, "grade": "Distinction", "gradePoint": 4 },
            { "minPercent": 50, "grade": "Pass", "gradePoint": 2 }
        ],
        "passPercent": 50,
        "outcomeRule": "aggregate",
        "emptyRecords": "zeroFail"
    }))
    .expect("policy");
    assert_eq!(policy.bands()[0].grade, "Distinction");
    assert_eq!(grade_for(&policy, 49.0, 100.0).grade, "U");
    assert_eq!(outcome_for(&policy, 49.0), Outcome::Fail);
    assert_eq!(grade_for(&policy, 80.0, 100.0).grade, "Distinction");
}
