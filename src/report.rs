use crate::grading::{round2, ClassResults, Outcome, ResultSummary};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;

pub const CSV_HEADER: [&str; 7] = [
    "rollNumber",
    "studentName",
    "totalMarks",
    "obtainedMarks",
    "percentage",
    "gpa",
    "result",
];

/// Letterhead constants. Rendered verbatim (HTML-escaped) on every document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Institution {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub principal_name: String,
    pub letterhead_note: String,
}

impl Default for Institution {
    fn default() -> Self {
        Self {
            name: "College".to_string(),
            address: String::new(),
            phone: String::new(),
            email: String::new(),
            principal_name: String::new(),
            letterhead_note: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    pub show_generated_at: bool,
    pub include_attendance: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            show_generated_at: true,
            include_attendance: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StudentInfo {
    pub roll_number: String,
    pub name: String,
    pub guardian_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubjectInfo {
    pub code: String,
    pub name: String,
}

pub struct ReportContext<'a> {
    pub institution: &'a Institution,
    pub options: ReportOptions,
    pub session_name: &'a str,
    pub student: &'a StudentInfo,
    pub summary: &'a ResultSummary,
    pub subjects: &'a HashMap<String, SubjectInfo>,
    pub generated_at: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRow {
    pub subject_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub marks_obtained: f64,
    pub marks_total: f64,
    pub percentage: f64,
    pub grade: String,
    pub grade_point: f64,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewTotals {
    pub total_obtained: f64,
    pub total_max: f64,
    pub overall_percentage: f64,
    pub gpa: f64,
    pub attendance_percentage: f64,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub rows: Vec<PreviewRow>,
    pub totals: PreviewTotals,
}

/// Numbers without trailing zeros: `300`, `85`, `84.5`, `66.67`.
pub fn format_number(x: f64) -> String {
    let s = format!("{:.2}", round2(x) + 0.0);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

pub fn format_gpa(gpa: f64) -> String {
    format!("{:.2}", round2(gpa) + 0.0)
}

pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn subject_label<'a>(subjects: &'a HashMap<String, SubjectInfo>, id: &'a str) -> (&'a str, &'a str) {
    subjects
        .get(id)
        .map(|s| (s.code.as_str(), s.name.as_str()))
        .unwrap_or((id, id))
}

pub fn preview(summary: &ResultSummary, subjects: &HashMap<String, SubjectInfo>) -> Preview {
    let rows = summary
        .per_subject
        .iter()
        .map(|s| {
            let (code, name) = subject_label(subjects, &s.subject_id);
            PreviewRow {
                subject_id: s.subject_id.clone(),
                subject_code: code.to_string(),
                subject_name: name.to_string(),
                marks_obtained: s.marks_obtained,
                marks_total: s.marks_total,
                percentage: round2(s.percentage),
                grade: s.grade.clone(),
                grade_point: s.grade_point,
                outcome: s.outcome,
            }
        })
        .collect();
    Preview {
        rows,
        totals: PreviewTotals {
            total_obtained: summary.total_obtained,
            total_max: summary.total_max,
            overall_percentage: round2(summary.overall_percentage),
            gpa: summary.gpa,
            attendance_percentage: round2(summary.attendance_percentage),
            outcome: summary.outcome,
        },
    }
}

/// `R001_2024-25_marksheet.html` with anything outside `[A-Za-z0-9._-]` replaced.
pub fn marksheet_file_name(roll_number: &str, session_name: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };
    format!("{}_{}_marksheet.html", clean(roll_number), clean(session_name))
}

const DOCUMENT_STYLE: &str = "body{font-family:Georgia,serif;margin:32px;color:#222}\
.letterhead{text-align:center;border-bottom:2px solid #333;padding-bottom:8px;margin-bottom:16px}\
.letterhead h1{margin:0;font-size:24px}.letterhead p{margin:2px 0;font-size:12px}\
table{border-collapse:collapse;width:100%;margin:12px 0}\
th,td{border:1px solid #555;padding:6px 8px;text-align:left}\
th{background:#eee}.result-Pass{color:#1a6b1a;font-weight:bold}\
.result-Fail{color:#a11;font-weight:bold}.signatures{display:flex;justify-content:space-between;margin-top:56px}\
.signatures div{border-top:1px solid #333;padding-top:4px;width:30%;text-align:center}\
.generated{font-size:11px;color:#777;margin-top:24px}";

fn open_document(out: &mut String, title: &str, institution: &Institution) {
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>{}</style>\n</head>\n<body>\n",
        html_escape(title),
        DOCUMENT_STYLE
    );
    out.push_str("<div class=\"letterhead\">\n");
    let _ = writeln!(out, "<h1>{}</h1>", html_escape(&institution.name));
    for line in [
        &institution.address,
        &institution.phone,
        &institution.email,
        &institution.letterhead_note,
    ] {
        if !line.is_empty() {
            let _ = writeln!(out, "<p>{}</p>", html_escape(line));
        }
    }
    out.push_str("</div>\n");
}

fn close_document(out: &mut String, options: ReportOptions, generated_at: &str) {
    if options.show_generated_at {
        let _ = writeln!(
            out,
            "<p class=\"generated\">Generated {}</p>",
            html_escape(generated_at)
        );
    }
    out.push_str("</body>\n</html>\n");
}

fn push_subject_table(out: &mut String, summary: &ResultSummary, subjects: &HashMap<String, SubjectInfo>) {
    out.push_str(
        "<table class=\"marks\">\n<thead><tr><th>Code</th><th>Subject</th><th>Marks Obtained</th>\
<th>Max Marks</th><th>Percentage</th><th>Grade</th><th>Grade Point</th></tr></thead>\n<tbody>\n",
    );
    for s in &summary.per_subject {
        let (code, name) = subject_label(subjects, &s.subject_id);
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}%</td><td>{}</td><td>{}</td></tr>",
            html_escape(code),
            html_escape(name),
            format_number(s.marks_obtained),
            format_number(s.marks_total),
            format_number(s.percentage),
            html_escape(&s.grade),
            format_gpa(s.grade_point),
        );
    }
    let _ = writeln!(
        out,
        "</tbody>\n<tfoot><tr><th colspan=\"2\">Total</th><th>{}</th><th>{}</th><th>{}%</th><th colspan=\"2\">GPA {}</th></tr></tfoot>\n</table>",
        format_number(summary.total_obtained),
        format_number(summary.total_max),
        format_number(summary.overall_percentage),
        format_gpa(summary.gpa),
    );
}

pub fn marksheet_html(ctx: &ReportContext<'_>) -> String {
    let mut out = String::new();
    let title = format!("Marksheet - {} - {}", ctx.student.name, ctx.session_name);
    open_document(&mut out, &title, ctx.institution);

    out.push_str("<h2>Statement of Marks</h2>\n<table class=\"student\">\n");
    let _ = writeln!(
        out,
        "<tr><th>Student</th><td>{}</td><th>Roll Number</th><td>{}</td></tr>",
        html_escape(&ctx.student.name),
        html_escape(&ctx.student.roll_number)
    );
    let _ = writeln!(
        out,
        "<tr><th>Session</th><td>{}</td><th>Guardian</th><td>{}</td></tr>",
        html_escape(ctx.session_name),
        html_escape(ctx.student.guardian_name.as_deref().unwrap_or("N/A"))
    );
    out.push_str("</table>\n");

    push_subject_table(&mut out, ctx.summary, ctx.subjects);

    out.push_str("<table class=\"summary\">\n");
    let _ = writeln!(
        out,
        "<tr><th>Total</th><td>{} / {}</td></tr>\n<tr><th>Percentage</th><td>{}%</td></tr>\n<tr><th>GPA</th><td>{}</td></tr>",
        format_number(ctx.summary.total_obtained),
        format_number(ctx.summary.total_max),
        format_number(ctx.summary.overall_percentage),
        format_gpa(ctx.summary.gpa),
    );
    if ctx.options.include_attendance {
        let _ = writeln!(
            out,
            "<tr><th>Attendance</th><td>{}%</td></tr>",
            format_number(ctx.summary.attendance_percentage)
        );
    }
    let _ = writeln!(
        out,
        "<tr><th>Result</th><td class=\"result-{0}\">{0}</td></tr>\n</table>",
        ctx.summary.outcome.as_str()
    );

    out.push_str("<div class=\"signatures\">\n<div>Class Teacher</div>\n<div>Controller of Examinations</div>\n");
    let principal = if ctx.institution.principal_name.is_empty() {
        "Principal".to_string()
    } else {
        format!("{} (Principal)", ctx.institution.principal_name)
    };
    let _ = writeln!(out, "<div>{}</div>\n</div>", html_escape(&principal));

    close_document(&mut out, ctx.options, ctx.generated_at);
    out
}

pub fn parent_letter_html(ctx: &ReportContext<'_>) -> String {
    let mut out = String::new();
    let title = format!("Progress Letter - {} - {}", ctx.student.name, ctx.session_name);
    open_document(&mut out, &title, ctx.institution);

    let guardian = ctx
        .student
        .guardian_name
        .as_deref()
        .filter(|g| !g.trim().is_empty())
        .unwrap_or("Parent/Guardian");
    let _ = writeln!(out, "<p>Dear {},</p>", html_escape(guardian));
    let _ = writeln!(
        out,
        "<p>We are writing to share the academic results of <strong>{}</strong> (Roll No. {}) for the {} session.</p>",
        html_escape(&ctx.student.name),
        html_escape(&ctx.student.roll_number),
        html_escape(ctx.session_name)
    );

    push_subject_table(&mut out, ctx.summary, ctx.subjects);

    let _ = write!(
        out,
        "<p>{} obtained {} out of {} marks ({}%) with a GPA of {}",
        html_escape(&ctx.student.name),
        format_number(ctx.summary.total_obtained),
        format_number(ctx.summary.total_max),
        format_number(ctx.summary.overall_percentage),
        format_gpa(ctx.summary.gpa),
    );
    if ctx.options.include_attendance {
        let _ = write!(
            out,
            " and an attendance of {}%",
            format_number(ctx.summary.attendance_percentage)
        );
    }
    let _ = writeln!(
        out,
        ". The overall result is <span class=\"result-{0}\">{0}</span>.</p>",
        ctx.summary.outcome.as_str()
    );
    match ctx.summary.outcome {
        Outcome::Pass => out.push_str(
            "<p>We appreciate your continued support and encourage you to keep motivating your ward.</p>\n",
        ),
        Outcome::Fail => out.push_str(
            "<p>We request you to meet the class teacher to discuss a plan for improvement.</p>\n",
        ),
    }

    out.push_str("<p>Yours sincerely,</p>\n");
    let signer = if ctx.institution.principal_name.is_empty() {
        "Principal".to_string()
    } else {
        ctx.institution.principal_name.clone()
    };
    let _ = writeln!(
        out,
        "<p>{}<br>{}</p>",
        html_escape(&signer),
        html_escape(&ctx.institution.name)
    );

    close_document(&mut out, ctx.options, ctx.generated_at);
    out
}

pub fn class_result_html(
    institution: &Institution,
    options: ReportOptions,
    session_name: &str,
    results: &ClassResults,
    students: &HashMap<String, StudentInfo>,
    generated_at: &str,
) -> String {
    let mut out = String::new();
    let title = format!("Class Results - {}", session_name);
    open_document(&mut out, &title, institution);

    let _ = writeln!(out, "<h2>Result List: {}</h2>", html_escape(session_name));
    out.push_str(
        "<table class=\"results\">\n<thead><tr><th>Rank</th><th>Roll Number</th><th>Student</th>\
<th>Obtained</th><th>Total</th><th>Percentage</th><th>GPA</th><th>Result</th></tr></thead>\n<tbody>\n",
    );
    for row in &results.rows {
        let s = &row.summary;
        let (roll, name) = students
            .get(&s.student_id)
            .map(|st| (st.roll_number.as_str(), st.name.as_str()))
            .unwrap_or((s.student_id.as_str(), ""));
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}%</td><td>{}</td><td class=\"result-{}\">{}</td></tr>",
            row.rank,
            html_escape(roll),
            html_escape(name),
            format_number(s.total_obtained),
            format_number(s.total_max),
            format_number(s.overall_percentage),
            format_gpa(s.gpa),
            s.outcome.as_str(),
            s.outcome.as_str(),
        );
    }
    out.push_str("</tbody>\n</table>\n");

    let st = &results.statistics;
    let _ = writeln!(
        out,
        "<table class=\"statistics\">\n<tr><th>Students</th><td>{}</td><th>Passed</th><td>{}</td><th>Failed</th><td>{}</td></tr>\n<tr><th>Pass Rate</th><td>{}%</td><th>Class Average</th><td>{}%</td><th>Highest / Lowest</th><td>{}% / {}%</td></tr>\n</table>",
        st.student_count,
        st.pass_count,
        st.fail_count,
        format_number(st.pass_rate),
        format_number(st.average_percentage),
        format_number(st.highest_percentage),
        format_number(st.lowest_percentage),
    );

    close_document(&mut out, options, generated_at);
    out
}

pub fn csv_fields(student: &StudentInfo, summary: &ResultSummary) -> [String; 7] {
    [
        student.roll_number.clone(),
        student.name.clone(),
        format_number(summary.total_max),
        format_number(summary.total_obtained),
        format!("{}%", format_number(summary.overall_percentage)),
        format_gpa(summary.gpa),
        summary.outcome.as_str().to_string(),
    ]
}

/// Header line plus one row per student, in the order given.
pub fn results_csv(rows: &[(StudentInfo, ResultSummary)]) -> anyhow::Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    wtr.write_record(CSV_HEADER)
        .context("failed to write csv header")?;
    for (student, summary) in rows {
        wtr.write_record(csv_fields(student, summary))
            .with_context(|| format!("failed to write csv row for {}", student.roll_number))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush csv: {}", e))?;
    String::from_utf8(bytes).context("csv output is not utf-8")
}
