use crate::error::Warning;
use crate::fingerprint::{
    fingerprint_path, is_empty_dir, relative_name, EntrySource, FingerprintOptions, ScannedEntry,
};
use crate::item::Item;
use crate::manifest::{Header, Machine, Manifest};
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadingMode {
    #[default]
    Parallel,
    Sequential,
}

/// Parameters that control how the scanning pipeline behaves.
#[derive(Clone, Debug, Default)]
pub struct ScanConfig {
    pub threading: ThreadingMode,
    pub fingerprint: FingerprintOptions,
    /// When true, empty directories are reported so they can become blank items.
    pub include_blanks: bool,
}

impl ScanConfig {
    pub fn new(threading: ThreadingMode) -> Self {
        Self {
            threading,
            ..Self::default()
        }
    }

    pub fn with_fingerprint(mut self, options: FingerprintOptions) -> Self {
        self.fingerprint = options;
        self
    }

    pub fn with_blanks(mut self, enabled: bool) -> Self {
        self.include_blanks = enabled;
        self
    }
}

/// Everything a scan produced, in a deterministic order.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ScanResult {
    pub entries: Vec<ScannedEntry>,
    pub warnings: Vec<Warning>,
    /// Empty directories relative to their scan root.
    pub empty_dirs: Vec<String>,
    /// Set when the scan stopped early because cancellation was requested.
    pub cancelled: bool,
}

impl ScanResult {
    pub fn extend(&mut self, other: ScanResult) {
        self.entries.extend(other.entries);
        self.warnings.extend(other.warnings);
        self.empty_dirs.extend(other.empty_dirs);
        self.cancelled |= other.cancelled;
    }

    fn sort(&mut self) {
        self.entries.sort_by(|left, right| {
            left.source
                .cmp(&right.source)
                .then_with(|| left.relative.cmp(&right.relative))
        });
        self.warnings
            .sort_by(|left, right| left.location().cmp(right.location()));
        self.empty_dirs.sort();
        self.empty_dirs.dedup();
    }
}

pub fn count_entries(root: &Path) -> u64 {
    WalkDir::new(root).into_iter().count() as u64
}

/// Walks `root`, fingerprinting every file and noting empty directories.
///
/// Entries complete in any order; the result is sorted before it is
/// returned. When `cancel` is raised no further entries are fingerprinted.
pub fn scan(
    root: &Path,
    config: &ScanConfig,
    progress_bar: &Arc<ProgressBar>,
    cancel: Option<&AtomicBool>,
) -> ScanResult {
    let found = match config.threading {
        ThreadingMode::Parallel => scan_parallel(root, config, progress_bar, cancel),
        ThreadingMode::Sequential => scan_sequential(root, config, progress_bar, cancel),
    };

    let mut result = ScanResult {
        cancelled: cancel.map(|flag| flag.load(Ordering::Relaxed)).unwrap_or(false),
        ..ScanResult::default()
    };
    for record in found {
        match record {
            Found::Entries(entries, warnings) => {
                result.entries.extend(entries);
                result.warnings.extend(warnings);
            }
            Found::EmptyDir(relative) => result.empty_dirs.push(relative),
            Found::Failed(warning) => result.warnings.push(warning),
        }
    }
    result.sort();
    info!(
        root = %root.display(),
        entries = result.entries.len(),
        warnings = result.warnings.len(),
        "scan finished"
    );
    result
}

/// Scans several roots and concatenates the results in root order.
pub fn scan_roots(
    roots: &[PathBuf],
    config: &ScanConfig,
    progress_bar: &Arc<ProgressBar>,
    cancel: Option<&AtomicBool>,
) -> ScanResult {
    let mut combined = ScanResult::default();
    for root in roots {
        combined.extend(scan(root, config, progress_bar, cancel));
    }
    combined
}

enum Found {
    Entries(Vec<ScannedEntry>, Vec<Warning>),
    EmptyDir(String),
    Failed(Warning),
}

fn scan_parallel(
    root: &Path,
    config: &ScanConfig,
    progress_bar: &Arc<ProgressBar>,
    cancel: Option<&AtomicBool>,
) -> Vec<Found> {
    WalkDir::new(root)
        .into_iter()
        .par_bridge()
        .filter_map(|entry| handle_entry(root, entry, config, progress_bar, cancel))
        .fold(Vec::new, |mut collection, record| {
            collection.push(record);
            collection
        })
        .reduce(Vec::new, |mut left, mut right| {
            left.append(&mut right);
            left
        })
}

fn scan_sequential(
    root: &Path,
    config: &ScanConfig,
    progress_bar: &Arc<ProgressBar>,
    cancel: Option<&AtomicBool>,
) -> Vec<Found> {
    let mut records = Vec::new();
    for entry in WalkDir::new(root) {
        if let Some(record) = handle_entry(root, entry, config, progress_bar, cancel) {
            records.push(record);
        }
    }
    records
}

fn handle_entry(
    root: &Path,
    entry: Result<walkdir::DirEntry, walkdir::Error>,
    config: &ScanConfig,
    progress_bar: &Arc<ProgressBar>,
    cancel: Option<&AtomicBool>,
) -> Option<Found> {
    if cancel.map(|flag| flag.load(Ordering::Relaxed)).unwrap_or(false) {
        return None;
    }
    progress_bar.inc(1);
    match entry {
        Ok(entry) => {
            let path = entry.path();
            progress_bar.set_message(format!("Scanning: {}", path.display()));
            if entry.file_type().is_file() {
                let (entries, warnings) = fingerprint_path(root, path, &config.fingerprint);
                return Some(Found::Entries(entries, warnings));
            }
            if config.include_blanks
                && entry.depth() > 0
                && entry.file_type().is_dir()
                && is_empty_dir(path)
            {
                return Some(Found::EmptyDir(relative_name(root, path)));
            }
            None
        }
        Err(error) => {
            progress_bar.set_message(format!("Error: {}", error));
            let location = error
                .path()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| root.display().to_string());
            Some(Found::Failed(Warning::scan_failed(location, &error.into())))
        }
    }
}

/// Descriptive metadata guessed from a name. Never used for identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Inference {
    pub manufacturer: Option<String>,
    pub system: Option<String>,
    pub source: Option<String>,
    pub date: Option<String>,
}

impl Inference {
    pub fn description(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.manufacturer, &self.system, &self.source, &self.date]
            .into_iter()
            .filter_map(|part| part.as_deref())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" - "))
    }
}

/// Pluggable name-based metadata inference for building manifests.
pub trait MetadataLookup: Send + Sync {
    fn infer(&self, name: &str) -> Option<Inference>;
}

/// A lookup that never knows anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLookup;

impl MetadataLookup for NoLookup {
    fn infer(&self, _name: &str) -> Option<Inference> {
        None
    }
}

fn strip_extension(relative: &str) -> &str {
    match relative.rfind('.') {
        Some(dot) if dot > relative.rfind('/').map(|slash| slash + 1).unwrap_or(0) => {
            &relative[..dot]
        }
        _ => relative,
    }
}

/// Machine and item name for a scanned entry.
///
/// Archive members belong to a machine named after the archive path without
/// its extension. Loose files belong to their top-level directory, or to
/// their own stem when they sit directly in the scan root.
pub fn entry_naming(entry: &ScannedEntry) -> (String, String) {
    match &entry.source {
        EntrySource::Member { name, .. } => {
            (strip_extension(&entry.relative).to_string(), name.clone())
        }
        EntrySource::File(_) => match entry.relative.split_once('/') {
            Some((machine, rest)) => (machine.to_string(), rest.to_string()),
            None => (strip_extension(&entry.relative).to_string(), entry.relative.clone()),
        },
    }
}

/// Builds a manifest from a scan: one item per hashed entry, one blank per
/// empty directory. Machine names pass through `remap` first.
pub fn manifest_from_scan(
    header: Header,
    scan: &ScanResult,
    remap: &BTreeMap<String, String>,
    lookup: &dyn MetadataLookup,
) -> Manifest {
    let rename = |machine: String| remap.get(&machine).cloned().unwrap_or(machine);
    let mut manifest = Manifest::new(header.stamped());

    for entry in &scan.entries {
        if !entry.checksums.has_any_hash() {
            debug!(entry = %entry.source.location(), "skipping unhashed entry");
            continue;
        }
        let (machine, name) = entry_naming(entry);
        manifest.insert(Item::rom(rename(machine), name, entry.checksums.clone()));
    }
    for directory in &scan.empty_dirs {
        manifest.insert(Item::blank(rename(directory.clone())));
    }

    for machine in manifest.machine_names() {
        if let Some(description) = lookup.infer(&machine).and_then(|found| found.description()) {
            manifest.describe_machine(Machine {
                name: machine,
                description,
                parent: None,
            });
        }
    }
    manifest
}
