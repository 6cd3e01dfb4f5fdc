//! Core engine for datsmith.
//!
//! This crate builds manifests (DATs) from directory scans, merges and diffs
//! them, and verifies or rebuilds file collections against them. Scanning
//! looks inside zip, gzip and tar containers; rebuilt output can be plain
//! directories, TorrentZip archives, tar archives or a SHA-1 keyed depot.
//! Every report type is serialisable for downstream consumers.

pub mod archive;
pub mod checksums;
pub mod codec;
pub mod config;
pub mod depot;
pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod item;
pub mod manifest;
pub mod merge;
pub mod progress;
pub mod rebuild;
pub mod reporting;
pub mod scanner;
pub mod split;
pub mod stats;

pub use archive::{ArchiveKind, ScanLevels, ScanPolicy};
pub use checksums::{Checksums, HashKind, HashSelection};
pub use codec::{read_manifest, write_manifest, ManifestFormat};
pub use config::{RunContext, Settings};
pub use depot::Depot;
pub use diff::{diff, DiffMode, DiffOutput};
pub use error::{
    CodecError, ConfigError, DatError, DatResult, OutputError, ReferentialError, RunSummary,
    ScanError, Warning,
};
pub use fingerprint::{EntrySource, FingerprintOptions, ScannedEntry};
pub use index::{CanonicalIndex, MatchOutcome};
pub use item::{DupeClass, Item, ItemKind, Origin};
pub use manifest::{Header, Machine, Manifest};
pub use merge::{dedup, merge_manifests, DedupScope};
pub use rebuild::{rebuild, verify, OutputFormat, RebuildOptions, RebuildReport, VerifyReport};
pub use reporting::{print_diff, print_rebuild, print_summary, print_verify, write_json};
pub use scanner::{
    count_entries, manifest_from_scan, scan, scan_roots, MetadataLookup, NoLookup, ScanConfig,
    ScanResult, ThreadingMode,
};
pub use split::{split, SplitCriterion};
pub use stats::Stats;
