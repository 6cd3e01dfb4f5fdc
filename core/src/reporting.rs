use crate::diff::DiffOutput;
use crate::error::{RunSummary, Warning};
use crate::rebuild::{RebuildReport, VerifyReport};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportingError {
    #[error("io error for {}: {source}", path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Writes any report as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize>(value: &T, output_path: &Path) -> Result<(), ReportingError> {
    let io_error = |source, path: &Path| ReportingError::Io {
        source,
        path: path.to_path_buf(),
    };
    if let Some(parent) = output_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| io_error(source, parent))?;
    }
    let file = File::create(output_path).map_err(|source| io_error(source, output_path))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

fn describe(warning: &Warning) -> String {
    match warning {
        Warning::ScanFailed { location, message } => {
            format!("unreadable {}: {}", location, message)
        }
        Warning::AmbiguousMatch {
            location,
            candidates,
        } => format!("ambiguous {} ({})", location, candidates.join(", ")),
        Warning::Codec { location, message } => format!("undecodable {}: {}", location, message),
    }
}

pub fn print_summary(summary: &RunSummary) {
    if !summary.warnings.is_empty() {
        println!("Warnings ({}):", summary.warnings.len());
        for warning in &summary.warnings {
            println!("  {}", describe(warning));
        }
    }
    if !summary.failures.is_empty() {
        println!("Failures ({}):", summary.failures.len());
        for failure in &summary.failures {
            println!("  {}", failure);
        }
    }
}

pub fn print_verify(report: &VerifyReport) {
    println!("Verified against {}", report.manifest);
    println!(
        "  have {}/{} items ({} unverifiable)",
        report.matched_items, report.canonical_items, report.unverifiable_items
    );
    println!(
        "  scanned entries: {} matched, {} unmatched, {} ambiguous",
        report.entries.matched, report.entries.unmatched, report.entries.ambiguous
    );
    if !report.missing.is_empty() {
        println!("Missing:");
        for location in &report.missing {
            println!("  {}", location);
        }
    }
    print_summary(&report.summary);
}

pub fn print_rebuild(report: &RebuildReport) {
    println!(
        "Rebuilt {} entries as {}{}",
        report.placements.len(),
        report.format,
        if report.inverse { " (inverse)" } else { "" }
    );
    println!(
        "  {} written, {} already present, {} sources deleted",
        report.written,
        report.already_present,
        report.deleted.len()
    );
    println!(
        "  scanned entries: {} matched, {} unmatched, {} ambiguous",
        report.entries.matched, report.entries.unmatched, report.entries.ambiguous
    );
    print_summary(&report.summary);
}

pub fn print_diff(outputs: &[DiffOutput]) {
    for output in outputs {
        println!("{}: {} items", output.label, output.manifest.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn json_report_lands_in_nested_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports").join("summary.json");
        let mut summary = RunSummary::default();
        summary.succeed();
        summary.warn(Warning::Codec {
            location: String::from("bad.dat"),
            message: String::from("line 3"),
        });

        write_json(&summary, &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["processed"], 1);
        assert_eq!(value["warnings"][0]["kind"], "codec");
    }

    #[test]
    fn warnings_describe_their_location() {
        let warning = Warning::AmbiguousMatch {
            location: String::from("in/a.bin"),
            candidates: vec![String::from("G/a"), String::from("H/a")],
        };
        assert_eq!(describe(&warning), "ambiguous in/a.bin (G/a, H/a)");
    }
}
