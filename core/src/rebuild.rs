//! Verify, rebuild and inverse-filter physical collections against a manifest.
//!
//! Matching runs in parallel against a read-only [`CanonicalIndex`]; every
//! outcome is then reduced on one thread into placements sorted by machine
//! and item name, so artifacts never depend on scan order.

use crate::archive::{self, write_tar, write_torrentzip, ArchiveKind};
use crate::checksums::Checksums;
use crate::depot::{Depot, StoreOutcome, DEFAULT_DEPTH};
use crate::error::{OutputError, RunSummary, Warning};
use crate::fingerprint::{EntrySource, ScannedEntry};
use crate::index::{CanonicalIndex, MatchOutcome};
use crate::manifest::{Header, Manifest};
use crate::progress;
use crate::scanner::{entry_naming, ScanResult, ThreadingMode};
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Directory,
    /// One normalised zip per machine.
    TorrentZip,
    /// One tar per machine.
    Tar,
    /// Content-addressed gzip files keyed by SHA-1.
    Depot,
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Directory => write!(f, "dir"),
            Self::TorrentZip => write!(f, "zip"),
            Self::Tar => write!(f, "tar"),
            Self::Depot => write!(f, "depot"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "dir" | "directory" => Ok(Self::Directory),
            "zip" | "torrentzip" => Ok(Self::TorrentZip),
            "tar" => Ok(Self::Tar),
            "depot" => Ok(Self::Depot),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RebuildOptions {
    pub output: PathBuf,
    pub format: OutputFormat,
    /// Copy out exactly the entries that did not match.
    pub inverse: bool,
    /// Remove sources once everything taken from them was written.
    pub delete_source: bool,
    pub depot_depth: usize,
    pub depot_reverify: bool,
}

impl RebuildOptions {
    pub fn new(output: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            output: output.into(),
            format,
            inverse: false,
            delete_source: false,
            depot_depth: DEFAULT_DEPTH,
            depot_reverify: false,
        }
    }

    pub fn with_inverse(mut self, enabled: bool) -> Self {
        self.inverse = enabled;
        self
    }

    pub fn with_delete_source(mut self, enabled: bool) -> Self {
        self.delete_source = enabled;
        self
    }

    pub fn with_depot(mut self, depth: usize, reverify: bool) -> Self {
        self.depot_depth = depth;
        self.depot_reverify = reverify;
        self
    }
}

/// Looks every scanned entry up in `index`; outcomes keep the entry order.
pub fn match_entries(
    index: &CanonicalIndex,
    entries: &[ScannedEntry],
    threading: ThreadingMode,
) -> Vec<MatchOutcome> {
    match threading {
        ThreadingMode::Parallel => entries
            .par_iter()
            .map(|entry| index.lookup(&entry.checksums))
            .collect(),
        ThreadingMode::Sequential => entries
            .iter()
            .map(|entry| index.lookup(&entry.checksums))
            .collect(),
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct MatchCounts {
    pub matched: usize,
    pub unmatched: usize,
    pub ambiguous: usize,
}

/// Tallies outcomes and turns every ambiguous one into a warning.
fn classify(
    index: &CanonicalIndex,
    entries: &[ScannedEntry],
    outcomes: &[MatchOutcome],
    summary: &mut RunSummary,
) -> MatchCounts {
    let mut counts = MatchCounts::default();
    for (entry, outcome) in entries.iter().zip(outcomes) {
        match outcome {
            MatchOutcome::Matched(_) => counts.matched += 1,
            MatchOutcome::Unmatched => counts.unmatched += 1,
            MatchOutcome::Ambiguous(targets) => {
                counts.ambiguous += 1;
                let candidates: Vec<String> = targets
                    .iter()
                    .flat_map(|target| index.target(*target).items.iter())
                    .map(|item| item.location())
                    .collect();
                warn!(
                    entry = %entry.source.location(),
                    candidates = candidates.len(),
                    "ambiguous match, treating entry as unmatched"
                );
                summary.warn(Warning::AmbiguousMatch {
                    location: entry.source.location(),
                    candidates,
                });
            }
        }
        if entry.checksums.has_any_hash() {
            summary.succeed();
        }
    }
    counts
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub manifest: String,
    /// Items that can be matched by content.
    pub canonical_items: usize,
    pub matched_items: usize,
    /// Blank placeholders and hashless items, which no content can satisfy.
    pub unverifiable_items: usize,
    pub entries: MatchCounts,
    /// Locations of every canonical item never matched.
    pub missing: Vec<String>,
    #[serde(skip)]
    pub fixdat: Manifest,
    pub summary: RunSummary,
}

impl VerifyReport {
    pub fn is_complete(&self) -> bool {
        self.fixdat.is_empty()
    }
}

fn fixdat_header(header: &Header) -> Header {
    Header {
        name: format!("fixDAT_{}", header.name),
        description: format!("fixDAT_{}", header.description),
        date: String::new(),
        ..header.clone()
    }
    .stamped()
}

/// Matches a scan against `manifest` and collects whatever is still missing.
pub fn verify(manifest: &Manifest, scan: &ScanResult, threading: ThreadingMode) -> VerifyReport {
    let index = CanonicalIndex::build(manifest);
    let outcomes = match_entries(&index, &scan.entries, threading);

    let mut summary = RunSummary::default();
    for warning in &scan.warnings {
        summary.warn(warning.clone());
    }
    let entries = classify(&index, &scan.entries, &outcomes, &mut summary);

    let matched: BTreeSet<usize> = outcomes.iter().filter_map(MatchOutcome::target).collect();
    let mut fixdat = Manifest::new(fixdat_header(&manifest.header));
    let mut canonical_items = 0;
    let mut matched_items = 0;
    for (id, target) in index.targets().iter().enumerate() {
        canonical_items += target.items.len();
        if matched.contains(&id) {
            matched_items += target.items.len();
        } else {
            fixdat.extend(target.items.iter().cloned());
        }
    }
    fixdat.adopt_machines(manifest);

    let missing = fixdat
        .by_machine()
        .values()
        .flatten()
        .map(|item| item.location())
        .collect();
    info!(
        manifest = %manifest.header.name,
        matched = matched_items,
        missing = canonical_items - matched_items,
        "verification finished"
    );
    VerifyReport {
        manifest: manifest.header.name.clone(),
        canonical_items,
        matched_items,
        unverifiable_items: manifest.len() - canonical_items,
        entries,
        missing,
        fixdat,
        summary,
    }
}

/// One write the rebuild will perform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub machine: String,
    pub name: String,
    pub source: EntrySource,
    #[serde(skip)]
    pub checksums: Checksums,
}

/// `stem (n).ext` variants of `name` until one is free in `machine`.
fn unique_name(taken: &BTreeSet<(String, String)>, machine: &str, name: &str) -> String {
    if !taken.contains(&(machine.to_string(), name.to_string())) {
        return name.to_string();
    }
    let (directory, file) = match name.rsplit_once('/') {
        Some((directory, file)) => (format!("{}/", directory), file),
        None => (String::new(), name),
    };
    let (stem, extension) = match file.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, Some(extension)),
        _ => (file, None),
    };
    let mut index = 1;
    loop {
        let mut candidate = format!("{}{} ({})", directory, stem, index);
        if let Some(extension) = extension {
            candidate.push('.');
            candidate.push_str(extension);
        }
        if !taken.contains(&(machine.to_string(), candidate.clone())) {
            return candidate;
        }
        index += 1;
    }
}

/// Turns match outcomes into sorted placements.
///
/// Normally each matched entry is placed once for every canonical item its
/// target carries, and a `(machine, name)` slot is filled at most once.
/// Inverse mode places unmatched and ambiguous entries under their scanned
/// names instead, renaming on collision.
pub fn plan(
    index: &CanonicalIndex,
    entries: &[ScannedEntry],
    outcomes: &[MatchOutcome],
    inverse: bool,
) -> Vec<Placement> {
    let mut placements = Vec::new();
    for (entry, outcome) in entries.iter().zip(outcomes) {
        match (outcome, inverse) {
            (MatchOutcome::Matched(id), false) => {
                let target = index.target(*id);
                let mut checksums = entry.checksums.clone();
                checksums.absorb(&target.checksums);
                for item in &target.items {
                    placements.push(Placement {
                        machine: item.machine.clone(),
                        name: item.name.clone(),
                        source: entry.source.clone(),
                        checksums: checksums.clone(),
                    });
                }
            }
            (MatchOutcome::Unmatched | MatchOutcome::Ambiguous(_), true) => {
                let (machine, name) = entry_naming(entry);
                placements.push(Placement {
                    machine,
                    name,
                    source: entry.source.clone(),
                    checksums: entry.checksums.clone(),
                });
            }
            _ => {}
        }
    }

    placements.sort_by(|left, right| {
        (&left.machine, &left.name, &left.source).cmp(&(&right.machine, &right.name, &right.source))
    });

    let mut taken: BTreeSet<(String, String)> = BTreeSet::new();
    let mut planned = Vec::with_capacity(placements.len());
    for mut placement in placements {
        let slot = (placement.machine.clone(), placement.name.clone());
        if taken.contains(&slot) {
            if !inverse {
                continue;
            }
            placement.name = unique_name(&taken, &placement.machine, &placement.name);
        }
        taken.insert((placement.machine.clone(), placement.name.clone()));
        planned.push(placement);
    }
    planned
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub format: OutputFormat,
    pub inverse: bool,
    pub entries: MatchCounts,
    pub written: usize,
    pub already_present: usize,
    pub placements: Vec<Placement>,
    pub deleted: Vec<PathBuf>,
    pub summary: RunSummary,
}

/// Matches a scan against `manifest` and writes the planned placements.
///
/// A failed artifact is recorded and the run moves on; earlier outputs stay.
/// Sources are deleted only after every write taken from them succeeded.
pub fn rebuild(
    manifest: &Manifest,
    scan: &ScanResult,
    options: &RebuildOptions,
    threading: ThreadingMode,
    progress_bar: &ProgressBar,
) -> RebuildReport {
    let index = CanonicalIndex::build(manifest);
    let outcomes = match_entries(&index, &scan.entries, threading);

    let mut summary = RunSummary::default();
    for warning in &scan.warnings {
        summary.warn(warning.clone());
    }
    let entries = classify(&index, &scan.entries, &outcomes, &mut summary);
    let placements = plan(&index, &scan.entries, &outcomes, options.inverse);
    debug!(placements = placements.len(), format = %options.format, "rebuild planned");

    progress_bar.set_style(progress::default_style());
    progress_bar.set_length(placements.len() as u64);
    let mut writer = Writer {
        options,
        progress_bar,
        succeeded: vec![false; placements.len()],
        written: 0,
        already_present: 0,
        summary: &mut summary,
    };
    match options.format {
        OutputFormat::Directory => writer.write_directory(&placements),
        OutputFormat::TorrentZip => writer.write_containers(&placements, ArchiveKind::Zip),
        OutputFormat::Tar => writer.write_containers(&placements, ArchiveKind::Tar),
        OutputFormat::Depot => writer.write_depot(&placements),
    }
    let Writer {
        succeeded,
        written,
        already_present,
        ..
    } = writer;
    progress_bar.finish_with_message("Rebuild complete");

    let deleted = if options.delete_source {
        delete_sources(scan, &placements, &succeeded, &options.output, &mut summary)
    } else {
        Vec::new()
    };

    info!(
        written,
        already_present,
        failures = summary.failures.len(),
        "rebuild finished"
    );
    RebuildReport {
        format: options.format,
        inverse: options.inverse,
        entries,
        written,
        already_present,
        placements,
        deleted,
        summary,
    }
}

struct Writer<'a> {
    options: &'a RebuildOptions,
    progress_bar: &'a ProgressBar,
    succeeded: Vec<bool>,
    written: usize,
    already_present: usize,
    summary: &'a mut RunSummary,
}

/// Copies the bytes of `source` into `out` without buffering them whole.
fn stream(source: &EntrySource, out: &mut dyn Write) -> Result<(), OutputError> {
    source
        .with_reader(|reader| io::copy(reader, out).map(|_| ()))
        .map_err(|error| OutputError::Source {
            source: error,
            path: source.container().to_path_buf(),
        })
}

/// Only plain relative components may reach the output tree.
fn check_relative(value: &str) -> Result<(), OutputError> {
    let path = Path::new(value);
    let plain = !value.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        && path.components().any(|component| matches!(component, Component::Normal(_)));
    if plain {
        Ok(())
    } else {
        Err(OutputError::UnsafePath(value.to_string()))
    }
}

impl Writer<'_> {
    fn record_failure(&mut self, destination: &Path, failure: OutputError) {
        error!(destination = %destination.display(), "{}", failure);
        self.summary
            .fail(format!("{}: {}", destination.display(), failure));
    }

    fn write_directory(&mut self, placements: &[Placement]) {
        for (position, placement) in placements.iter().enumerate() {
            self.progress_bar.inc(1);
            let destination = self
                .options
                .output
                .join(&placement.machine)
                .join(&placement.name);
            self.progress_bar
                .set_message(format!("Writing: {}", destination.display()));
            let result = check_relative(&placement.machine)
                .and_then(|()| check_relative(&placement.name))
                .and_then(|()| {
                    let mut staged = archive::staging_file(&destination)?;
                    stream(&placement.source, &mut staged)?;
                    archive::publish(staged, &destination)
                });
            match result {
                Ok(()) => {
                    self.succeeded[position] = true;
                    self.written += 1;
                }
                Err(failure) => self.record_failure(&destination, failure),
            }
        }
    }

    /// Writes one container per machine. Members already present in an
    /// existing container are carried into the replacement unless a
    /// placement supplies the same name.
    fn write_containers(&mut self, placements: &[Placement], kind: ArchiveKind) {
        let mut machines: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (position, placement) in placements.iter().enumerate() {
            machines
                .entry(placement.machine.as_str())
                .or_default()
                .push(position);
        }

        for (machine, positions) in machines {
            let destination = self
                .options
                .output
                .join(format!("{}.{}", machine, kind.extension()));
            self.progress_bar
                .set_message(format!("Writing: {}", destination.display()));
            self.progress_bar.inc(positions.len() as u64);

            let unsafe_name = std::iter::once(machine)
                .chain(positions.iter().map(|position| placements[*position].name.as_str()))
                .find_map(|value| check_relative(value).err());
            if let Some(failure) = unsafe_name {
                self.record_failure(&destination, failure);
                continue;
            }

            let existing: Vec<String> = if destination.is_file() {
                match archive::list_entries(&destination, kind) {
                    Ok(entries) => entries.into_iter().map(|entry| entry.name).collect(),
                    Err(source) => {
                        let failure = OutputError::Existing {
                            source,
                            path: destination.clone(),
                        };
                        self.record_failure(&destination, failure);
                        continue;
                    }
                }
            } else {
                Vec::new()
            };

            let incoming: BTreeMap<&str, &EntrySource> = positions
                .iter()
                .map(|position| {
                    let placement = &placements[*position];
                    (placement.name.as_str(), &placement.source)
                })
                .collect();
            let carried: Vec<String> = existing
                .into_iter()
                .filter(|name| !incoming.contains_key(name.as_str()))
                .collect();
            if !carried.is_empty() {
                debug!(
                    destination = %destination.display(),
                    carried = carried.len(),
                    "keeping members of existing container"
                );
            }
            let names = incoming
                .keys()
                .map(|name| name.to_string())
                .chain(carried)
                .collect();

            let mut copy = |name: &str, out: &mut dyn Write| match incoming.get(name) {
                Some(source) => stream(source, out),
                None => archive::with_member(&destination, kind, name, |reader| {
                    io::copy(reader, out).map(|_| ())
                })
                .map_err(|source| OutputError::Existing {
                    source,
                    path: destination.clone(),
                }),
            };
            let result = match kind {
                ArchiveKind::Tar => write_tar(&destination, names, &mut copy),
                _ => write_torrentzip(&destination, names, &mut copy),
            };
            match result {
                Ok(()) => {
                    for position in positions {
                        self.succeeded[position] = true;
                        self.written += 1;
                    }
                }
                Err(failure) => self.record_failure(&destination, failure),
            }
        }
    }

    fn write_depot(&mut self, placements: &[Placement]) {
        let depot = Depot::new(&self.options.output)
            .with_depth(self.options.depot_depth)
            .with_reverify(self.options.depot_reverify);
        for (position, placement) in placements.iter().enumerate() {
            self.progress_bar.inc(1);
            self.progress_bar
                .set_message(format!("Storing: {}", placement.source.location()));
            match depot.store_entry(&placement.checksums, &placement.source) {
                Ok(StoreOutcome::Written) => {
                    self.succeeded[position] = true;
                    self.written += 1;
                }
                Ok(StoreOutcome::AlreadyPresent) => {
                    self.succeeded[position] = true;
                    self.already_present += 1;
                }
                Err(failure) => {
                    let destination = depot.root().to_path_buf();
                    self.record_failure(&destination, failure);
                }
            }
        }
    }
}

/// Deletes each source container whose every scanned entry was placed and
/// written. Containers inside the output tree are never touched.
fn delete_sources(
    scan: &ScanResult,
    placements: &[Placement],
    succeeded: &[bool],
    output: &Path,
    summary: &mut RunSummary,
) -> Vec<PathBuf> {
    let mut source_ok: BTreeMap<&EntrySource, bool> = BTreeMap::new();
    for (placement, ok) in placements.iter().zip(succeeded) {
        let slot = source_ok.entry(&placement.source).or_insert(true);
        *slot &= *ok;
    }

    let mut containers: BTreeMap<&Path, bool> = BTreeMap::new();
    for entry in &scan.entries {
        let done = source_ok.get(&entry.source).copied().unwrap_or(false);
        let slot = containers.entry(entry.source.container()).or_insert(true);
        *slot &= done;
    }

    let mut deleted = Vec::new();
    for (container, done) in containers {
        if !done || container.starts_with(output) {
            continue;
        }
        match fs::remove_file(container) {
            Ok(()) => {
                debug!(path = %container.display(), "deleted rebuilt source");
                deleted.push(container.to_path_buf());
            }
            Err(failure) => {
                warn!(path = %container.display(), "could not delete source: {}", failure);
                summary.warn(Warning::ScanFailed {
                    location: container.display().to_string(),
                    message: format!("could not delete source: {}", failure),
                });
            }
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::{hash_bytes, HashKind, HashSelection};
    use crate::item::Item;
    use crate::scanner::{scan, ScanConfig};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn rom(machine: &str, name: &str, data: &[u8]) -> Item {
        Item::rom(machine, name, hash_bytes(data, HashSelection::default()))
    }

    fn canonical() -> Manifest {
        Manifest::from_items(
            Header::named("Set"),
            vec![
                rom("Game1", "a.bin", b"alpha"),
                rom("Game1", "b.bin", b"beta"),
                rom("Game2", "c.bin", b"gamma"),
            ],
        )
    }

    fn scan_dir(root: &Path) -> ScanResult {
        let progress = Arc::new(ProgressBar::hidden());
        scan(root, &ScanConfig::new(ThreadingMode::Sequential), &progress, None)
    }

    fn loose_sources(root: &Path) {
        fs::create_dir_all(root.join("dump")).unwrap();
        fs::write(root.join("dump").join("one"), b"alpha").unwrap();
        fs::write(root.join("dump").join("two"), b"beta").unwrap();
        fs::write(root.join("dump").join("three"), b"gamma").unwrap();
        fs::write(root.join("stray.bin"), b"unknown").unwrap();
    }

    #[test]
    fn rebuild_then_verify_is_complete_for_every_format() {
        for format in [
            OutputFormat::Directory,
            OutputFormat::TorrentZip,
            OutputFormat::Tar,
            OutputFormat::Depot,
        ] {
            let source = tempdir().unwrap();
            let output = tempdir().unwrap();
            loose_sources(source.path());
            let manifest = canonical();

            let options = RebuildOptions::new(output.path(), format);
            let report = rebuild(
                &manifest,
                &scan_dir(source.path()),
                &options,
                ThreadingMode::Parallel,
                &ProgressBar::hidden(),
            );
            assert!(report.summary.failures.is_empty(), "{:?}", report.summary);
            assert_eq!(report.entries.matched, 3);
            assert_eq!(report.entries.unmatched, 1);

            let verified = verify(&manifest, &scan_dir(output.path()), ThreadingMode::Sequential);
            assert!(verified.is_complete(), "{} left {:?}", format, verified.missing);
            assert_eq!(verified.matched_items, 3);
            assert_eq!(verified.entries.unmatched, 0);
            assert_eq!(verified.entries.ambiguous, 0);
        }
    }

    #[test]
    fn verify_emits_fixdat_for_missing_items() {
        let source = tempdir().unwrap();
        fs::write(source.path().join("a"), b"alpha").unwrap();
        let report = verify(&canonical(), &scan_dir(source.path()), ThreadingMode::Sequential);

        assert_eq!(report.fixdat.header.name, "fixDAT_Set");
        assert_eq!(report.missing, vec!["Game1/b.bin", "Game2/c.bin"]);
        assert_eq!(report.matched_items, 1);
        assert_eq!(report.summary.exit_code(), 0);
    }

    #[test]
    fn directory_rebuild_places_by_machine_and_name() {
        let source = tempdir().unwrap();
        let output = tempdir().unwrap();
        loose_sources(source.path());
        let options = RebuildOptions::new(output.path(), OutputFormat::Directory);
        rebuild(
            &canonical(),
            &scan_dir(source.path()),
            &options,
            ThreadingMode::Sequential,
            &ProgressBar::hidden(),
        );
        assert_eq!(fs::read(output.path().join("Game1").join("a.bin")).unwrap(), b"alpha");
        assert_eq!(fs::read(output.path().join("Game2").join("c.bin")).unwrap(), b"gamma");
        assert!(!output.path().join("stray").exists());
    }

    #[test]
    fn inverse_mode_copies_only_unmatched_entries() {
        let source = tempdir().unwrap();
        let output = tempdir().unwrap();
        loose_sources(source.path());
        let options = RebuildOptions::new(output.path(), OutputFormat::Directory).with_inverse(true);
        let report = rebuild(
            &canonical(),
            &scan_dir(source.path()),
            &options,
            ThreadingMode::Sequential,
            &ProgressBar::hidden(),
        );
        assert_eq!(report.written, 1);
        assert_eq!(
            fs::read(output.path().join("stray").join("stray.bin")).unwrap(),
            b"unknown"
        );
        assert!(!output.path().join("Game1").exists());
    }

    #[test]
    fn delete_removes_only_fully_rebuilt_sources() {
        let source = tempdir().unwrap();
        let output = tempdir().unwrap();
        loose_sources(source.path());
        let options =
            RebuildOptions::new(output.path(), OutputFormat::TorrentZip).with_delete_source(true);
        let report = rebuild(
            &canonical(),
            &scan_dir(source.path()),
            &options,
            ThreadingMode::Sequential,
            &ProgressBar::hidden(),
        );
        assert_eq!(report.deleted.len(), 3);
        assert!(!source.path().join("dump").join("one").exists());
        assert!(source.path().join("stray.bin").exists());
        assert!(output.path().join("Game1.zip").exists());
    }

    #[test]
    fn partially_matched_archive_is_kept() {
        let source = tempdir().unwrap();
        let output = tempdir().unwrap();
        let archive = source.path().join("mixed.zip");
        write_torrentzip(
            &archive,
            vec![String::from("a.bin"), String::from("junk.bin")],
            |name, out| {
                let data: &[u8] = if name == "a.bin" { b"alpha" } else { b"junk" };
                out.write_all(data).map_err(archive::output_io(&archive))
            },
        )
        .unwrap();

        let options =
            RebuildOptions::new(output.path(), OutputFormat::Directory).with_delete_source(true);
        let report = rebuild(
            &canonical(),
            &scan_dir(source.path()),
            &options,
            ThreadingMode::Sequential,
            &ProgressBar::hidden(),
        );
        assert_eq!(report.written, 1);
        assert!(report.deleted.is_empty());
        assert!(archive.exists());
    }

    #[test]
    fn later_rebuild_keeps_members_of_existing_containers() {
        for format in [OutputFormat::TorrentZip, OutputFormat::Tar] {
            let output = tempdir().unwrap();
            let options = RebuildOptions::new(output.path(), format).with_delete_source(true);

            let first = tempdir().unwrap();
            fs::write(first.path().join("one"), b"alpha").unwrap();
            let report = rebuild(
                &canonical(),
                &scan_dir(first.path()),
                &options,
                ThreadingMode::Sequential,
                &ProgressBar::hidden(),
            );
            assert_eq!(report.deleted.len(), 1);

            let second = tempdir().unwrap();
            fs::write(second.path().join("two"), b"beta").unwrap();
            let report = rebuild(
                &canonical(),
                &scan_dir(second.path()),
                &options,
                ThreadingMode::Sequential,
                &ProgressBar::hidden(),
            );
            assert!(report.summary.failures.is_empty(), "{:?}", report.summary);

            let verified = verify(&canonical(), &scan_dir(output.path()), ThreadingMode::Sequential);
            assert_eq!(verified.missing, vec!["Game2/c.bin"], "{}", format);
            assert_eq!(verified.matched_items, 2);
        }
    }

    #[test]
    fn unreadable_existing_container_is_not_replaced() {
        let source = tempdir().unwrap();
        let output = tempdir().unwrap();
        loose_sources(source.path());
        let existing = output.path().join("Game1.zip");
        fs::write(&existing, b"not a zip").unwrap();

        let options = RebuildOptions::new(output.path(), OutputFormat::TorrentZip);
        let report = rebuild(
            &canonical(),
            &scan_dir(source.path()),
            &options,
            ThreadingMode::Sequential,
            &ProgressBar::hidden(),
        );
        assert_eq!(report.summary.failures.len(), 1);
        assert_eq!(fs::read(&existing).unwrap(), b"not a zip");
        assert!(output.path().join("Game2.zip").exists());
    }

    #[test]
    fn names_escaping_the_output_root_are_refused() {
        let outside = tempdir().unwrap();
        let escaped = outside.path().join("escaped.bin");
        let manifest = Manifest::from_items(
            Header::named("Set"),
            vec![
                rom("../up", "a.bin", b"alpha"),
                rom("Game", "../../b.bin", b"beta"),
                rom("Game", &escaped.display().to_string(), b"gamma"),
            ],
        );
        for format in [OutputFormat::Directory, OutputFormat::TorrentZip, OutputFormat::Tar] {
            let source = tempdir().unwrap();
            let parent = tempdir().unwrap();
            let output = parent.path().join("out");
            loose_sources(source.path());

            let options = RebuildOptions::new(&output, format);
            let report = rebuild(
                &manifest,
                &scan_dir(source.path()),
                &options,
                ThreadingMode::Sequential,
                &ProgressBar::hidden(),
            );
            assert_eq!(report.written, 0, "{}", format);
            assert!(!report.summary.failures.is_empty());
            assert!(!escaped.exists());
            let stray: Vec<_> = fs::read_dir(parent.path())
                .unwrap()
                .map(|entry| entry.unwrap().file_name())
                .filter(|name| name != "out")
                .collect();
            assert!(stray.is_empty(), "{:?}", stray);
        }
    }

    #[test]
    fn partial_and_full_records_of_one_rom_are_both_satisfied() {
        let full = hash_bytes(b"alpha", HashSelection::default());
        let partial = Checksums::with_size(5).with_hash(HashKind::Crc32, full.crc32.as_deref().unwrap());
        let manifest = Manifest::from_items(
            Header::named("Set"),
            vec![Item::rom("Game1", "a.bin", partial), Item::rom("Game2", "a.bin", full)],
        );
        let source = tempdir().unwrap();
        let output = tempdir().unwrap();
        fs::write(source.path().join("one"), b"alpha").unwrap();

        let options = RebuildOptions::new(output.path(), OutputFormat::Directory);
        let report = rebuild(
            &manifest,
            &scan_dir(source.path()),
            &options,
            ThreadingMode::Sequential,
            &ProgressBar::hidden(),
        );
        assert_eq!(report.entries.ambiguous, 0);
        assert_eq!(report.written, 2);

        let verified = verify(&manifest, &scan_dir(output.path()), ThreadingMode::Sequential);
        assert_eq!(verified.matched_items, 2);
        assert!(verified.missing.is_empty());
    }

    #[test]
    fn relative_names_are_checked_per_component() {
        assert!(check_relative("Game/sub/a.bin").is_ok());
        assert!(check_relative("./a.bin").is_ok());
        assert!(check_relative("").is_err());
        assert!(check_relative(".").is_err());
        assert!(check_relative("a/../../b").is_err());
        assert!(check_relative("/etc/passwd").is_err());
    }

    #[test]
    fn ambiguous_entries_are_warned_and_not_placed() {
        let md5 = |data: &[u8]| hash_bytes(data, HashSelection::empty().with(HashKind::Md5)).md5;
        let shared = Checksums::with_size(5).with_hash(HashKind::Crc32, "11111111");
        let mut first = shared.clone();
        first.md5 = md5(&b"one"[..]);
        let mut second = shared.clone();
        second.md5 = md5(&b"two"[..]);
        let manifest = Manifest::from_items(
            Header::named("Set"),
            vec![Item::rom("G", "first", first), Item::rom("G", "second", second)],
        );
        let scan = ScanResult {
            entries: vec![ScannedEntry {
                relative: String::from("x.bin"),
                source: EntrySource::File(PathBuf::from("x.bin")),
                checksums: shared,
            }],
            ..ScanResult::default()
        };
        let report = verify(&manifest, &scan, ThreadingMode::Sequential);
        assert_eq!(report.entries.ambiguous, 1);
        assert_eq!(report.summary.ambiguous_count(), 1);
        assert_eq!(report.matched_items, 0);
    }

    #[test]
    fn inverse_collisions_get_numbered_names() {
        let mut taken = BTreeSet::new();
        taken.insert((String::from("M"), String::from("dir/rom.bin")));
        assert_eq!(unique_name(&taken, "M", "dir/rom.bin"), "dir/rom (1).bin");
        assert_eq!(unique_name(&taken, "M", "other.bin"), "other.bin");
    }

    #[test]
    fn output_format_parses() {
        assert_eq!("zip".parse::<OutputFormat>(), Ok(OutputFormat::TorrentZip));
        assert_eq!("dir".parse::<OutputFormat>(), Ok(OutputFormat::Directory));
        assert!("cab".parse::<OutputFormat>().is_err());
    }
}
