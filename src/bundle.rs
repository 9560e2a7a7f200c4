use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
pub const BUNDLE_FORMAT_V1: &str = "resultsd-class-results-v1";

#[derive(Debug, Clone)]
pub struct BundleEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl BundleEntry {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub name: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    pub bundle_format: String,
    pub checked: usize,
    pub mismatched: Vec<String>,
    pub missing: Vec<String>,
    /// Archive entries the manifest does not list.
    pub unexpected: Vec<String>,
}

impl VerifyReport {
    pub fn is_intact(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty() && self.unexpected.is_empty()
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Writes `entries` plus a `manifest.json` carrying the SHA-256 of each entry.
/// `meta` is embedded in the manifest untouched.
pub fn write_bundle(
    out_path: &Path,
    entries: &[BundleEntry],
    generated_at: &str,
    meta: serde_json::Value,
) -> anyhow::Result<ExportSummary> {
    if let Some(dup) = entries
        .iter()
        .enumerate()
        .find(|(i, e)| entries[..*i].iter().any(|p| p.name == e.name))
        .map(|(_, e)| e.name.clone())
    {
        return Err(anyhow!("duplicate bundle entry: {}", dup));
    }
    if entries.iter().any(|e| e.name == MANIFEST_ENTRY) {
        return Err(anyhow!("{} is reserved", MANIFEST_ENTRY));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest_entries: Vec<ManifestEntry> = entries
        .iter()
        .map(|e| ManifestEntry {
            name: e.name.clone(),
            sha256: sha256_hex(&e.bytes),
            bytes: e.bytes.len() as u64,
        })
        .collect();
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "generatedAt": generated_at,
        "meta": meta,
        "entries": manifest_entries,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    for e in entries {
        zip.start_file(e.name.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", e.name))?;
        zip.write_all(&e.bytes)
            .with_context(|| format!("failed to write entry {}", e.name))?;
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: entries.len() + 1,
        entries: manifest_entries,
    })
}

/// Re-hashes every entry listed in the manifest and flags archive entries it does not list.
pub fn verify_bundle(in_path: &Path) -> anyhow::Result<VerifyReport> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let listed: Vec<ManifestEntry> = serde_json::from_value(
        manifest
            .get("entries")
            .cloned()
            .unwrap_or_else(|| json!([])),
    )
    .context("manifest entries are malformed")?;

    let mut report = VerifyReport {
        bundle_format: format.to_string(),
        ..VerifyReport::default()
    };
    let mut unexpected: Vec<String> = archive
        .file_names()
        .filter(|name| {
            *name != MANIFEST_ENTRY
                && !name.ends_with('/')
                && !listed.iter().any(|e| e.name == *name)
        })
        .map(str::to_string)
        .collect();
    unexpected.sort();
    report.unexpected = unexpected;
    for entry in listed {
        let mut bytes = Vec::new();
        match archive.by_name(&entry.name) {
            Ok(mut f) => {
                f.read_to_end(&mut bytes)
                    .with_context(|| format!("failed to read entry {}", entry.name))?;
            }
            Err(_) => {
                report.missing.push(entry.name.clone());
                continue;
            }
        }
        report.checked += 1;
        if sha256_hex(&bytes) != entry.sha256 {
            report.mismatched.push(entry.name);
        }
    }
    Ok(report)
}
