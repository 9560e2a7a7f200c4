use crate::bundle::{self, BundleEntry};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_str, with_db, Actor, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, ReportContext};
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;

use super::reports::{
    class_results_html, load_report_setup, ranked_csv_rows, session_results, student_info,
};

/// Roll numbers that clean to the same file name get `-2`, `-3`, ... before the extension.
fn unique_entry_name(used: &mut HashSet<String>, file_name: &str) -> String {
    let (stem, ext) = file_name.rsplit_once('.').unwrap_or((file_name, ""));
    let mut candidate = format!("marksheets/{}", file_name);
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = if ext.is_empty() {
            format!("marksheets/{}-{}", stem, n)
        } else {
            format!("marksheets/{}-{}.{}", stem, n, ext)
        };
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}

fn handle_bundle_export_class_results(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let actor = Actor::from_params(params)?;
        actor.require_staff()?;
        let session_id = required_str(params, "sessionId")?;
        let out_path = required_str(params, "outPath")?;

        let setup = load_report_setup(conn)?;
        let results = session_results(conn, &setup.policy, &session_id)?;
        let generated_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

        let mut entries: Vec<BundleEntry> = Vec::with_capacity(results.entries.len() + 2);
        let mut used_names = HashSet::new();
        for (student, summary) in &results.entries {
            let info = student_info(student);
            let html = report::marksheet_html(&ReportContext {
                institution: &setup.institution,
                options: setup.options,
                session_name: &results.session.name,
                student: &info,
                summary,
                subjects: &setup.subjects,
                generated_at: &generated_at,
            });
            let name = unique_entry_name(
                &mut used_names,
                &report::marksheet_file_name(&info.roll_number, &results.session.name),
            );
            entries.push(BundleEntry::new(name, html));
        }
        let csv = report::results_csv(&ranked_csv_rows(&results))
            .map_err(|e| HandlerErr::new("export_failed", format!("{e:#}")))?;
        entries.push(BundleEntry::new("results.csv", csv));
        entries.push(BundleEntry::new(
            "class-results.html",
            class_results_html(&setup, &results, &generated_at),
        ));

        let meta = json!({
            "sessionId": results.session.id,
            "sessionName": results.session.name,
            "institution": setup.institution.name,
            "exportedBy": actor.label(),
            "studentCount": results.entries.len(),
        });
        let summary = bundle::write_bundle(&PathBuf::from(&out_path), &entries, &generated_at, meta)
            .map_err(|e| {
                HandlerErr::new("export_failed", format!("{e:#}"))
                    .with_details(json!({ "path": out_path }))
            })?;
        tracing::info!(
            path = %out_path,
            entries = summary.entry_count,
            exported_by = %actor.label(),
            "class results bundle written"
        );
        Ok(json!({
            "path": out_path,
            "bundleFormat": summary.bundle_format,
            "entryCount": summary.entry_count,
            "entries": summary.entries,
            "skipped": results.skipped,
        }))
    })
}

fn handle_bundle_verify(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("path").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing path", None),
    };
    match bundle::verify_bundle(&PathBuf::from(&in_path)) {
        Ok(report) => {
            if !report.is_intact() {
                tracing::warn!(
                    path = %in_path,
                    mismatched = report.mismatched.len(),
                    missing = report.missing.len(),
                    unexpected = report.unexpected.len(),
                    "bundle failed verification"
                );
            }
            ok(
                &req.id,
                json!({
                    "path": in_path,
                    "intact": report.is_intact(),
                    "bundleFormat": report.bundle_format,
                    "checked": report.checked,
                    "mismatched": report.mismatched,
                    "missing": report.missing,
                    "unexpected": report.unexpected,
                }),
            )
        }
        Err(e) => err(
            &req.id,
            "bundle_unreadable",
            format!("{e:#}"),
            Some(json!({ "path": in_path })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "bundle.exportClassResults" => Some(handle_bundle_export_class_results(state, req)),
        "bundle.verify" => Some(handle_bundle_verify(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colliding_marksheet_names_get_numbered() {
        let mut used = HashSet::new();
        let first = unique_entry_name(&mut used, "CS_01_2024-25_marksheet.html");
        let second = unique_entry_name(&mut used, "CS_01_2024-25_marksheet.html");
        let third = unique_entry_name(&mut used, "CS_01_2024-25_marksheet.html");
        assert_eq!(first, "marksheets/CS_01_2024-25_marksheet.html");
        assert_eq!(second, "marksheets/CS_01_2024-25_marksheet-2.html");
        assert_eq!(third, "marksheets/CS_01_2024-25_marksheet-3.html");
    }
}
