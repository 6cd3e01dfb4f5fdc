//! Turns physical files and archive members into hash-set records.
//!
//! Failures are per entry: an unreadable file or a corrupt container turns
//! into a warning plus a record with no hashes, which never matches anything.

use crate::archive::{self, hash_members, list_entries, ArchiveKind, ScanLevels, ScanPolicy};
use crate::checksums::{hash_reader, Checksums, HashSelection};
use crate::error::{CodecError, ScanError, Warning};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Which hashes to compute and how deep to look into containers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintOptions {
    pub hashes: HashSelection,
    /// Take member hashes from container metadata instead of streaming them.
    pub quick: bool,
    pub levels: ScanLevels,
}

impl FingerprintOptions {
    pub fn with_hashes(mut self, hashes: HashSelection) -> Self {
        self.hashes = hashes;
        self
    }

    pub fn with_quick(mut self, quick: bool) -> Self {
        self.quick = quick;
        self
    }

    pub fn with_levels(mut self, levels: ScanLevels) -> Self {
        self.levels = levels;
        self
    }
}

/// Where a scanned record's bytes come from.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntrySource {
    File(PathBuf),
    Member {
        archive: PathBuf,
        kind: ArchiveKind,
        name: String,
    },
}

impl EntrySource {
    /// The file on disk holding this entry.
    pub fn container(&self) -> &Path {
        match self {
            Self::File(path) => path,
            Self::Member { archive, .. } => archive,
        }
    }

    pub fn location(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Member { archive, name, .. } => format!("{}#{}", archive.display(), name),
        }
    }

    pub fn with_reader<T>(
        &self,
        consume: impl FnOnce(&mut dyn Read) -> io::Result<T>,
    ) -> Result<T, ScanError> {
        match self {
            Self::File(path) => {
                let io_error = |source| ScanError::Io {
                    source,
                    path: path.clone(),
                };
                let file = File::open(path).map_err(io_error)?;
                consume(&mut BufReader::new(file)).map_err(io_error)
            }
            Self::Member {
                archive,
                kind,
                name,
            } => archive::with_member(archive, *kind, name, consume),
        }
    }
}

/// One fingerprinted record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScannedEntry {
    /// Path of the container relative to the scan root, `/`-separated.
    pub relative: String,
    pub source: EntrySource,
    pub checksums: Checksums,
}

impl ScannedEntry {
    pub fn is_member(&self) -> bool {
        matches!(self.source, EntrySource::Member { .. })
    }
}

/// Fingerprints a plain file, ignoring any container structure.
pub fn fingerprint_file(path: &Path, hashes: HashSelection) -> Result<Checksums, ScanError> {
    let io_error = |source| ScanError::Io {
        source,
        path: path.to_path_buf(),
    };
    let file = File::open(path).map_err(io_error)?;
    hash_reader(&mut BufReader::new(file), hashes).map_err(io_error)
}

/// `path` relative to `root` with `/` separators.
pub fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        parts.join("/")
    }
}

/// Everything found at one path: the file itself, its members, or both,
/// depending on the container kind's scan policy.
pub fn fingerprint_path(
    root: &Path,
    path: &Path,
    options: &FingerprintOptions,
) -> (Vec<ScannedEntry>, Vec<Warning>) {
    let relative = relative_name(root, path);
    let mut entries = Vec::new();
    let mut warnings = Vec::new();

    let (kind, mut policy) = match ArchiveKind::from_path(path) {
        Some(kind) => (Some(kind), options.levels.policy_for(kind)),
        None => (None, ScanPolicy::OpaqueFile),
    };

    if let Some(kind) = kind {
        if !kind.supports_read() && policy != ScanPolicy::OpaqueFile {
            let error = CodecError::UnsupportedArchive {
                kind,
                path: path.to_path_buf(),
            };
            warn!(path = %path.display(), "{}", error);
            warnings.push(Warning::Codec {
                location: path.display().to_string(),
                message: error.to_string(),
            });
            policy = ScanPolicy::OpaqueFile;
        }
    }

    if matches!(policy, ScanPolicy::Both | ScanPolicy::OpaqueFile) {
        let checksums = match fingerprint_file(path, options.hashes) {
            Ok(checksums) => checksums,
            Err(error) => {
                warn!(path = %path.display(), "{}", error);
                warnings.push(Warning::scan_failed(path.display().to_string(), &error));
                Checksums::default()
            }
        };
        entries.push(ScannedEntry {
            relative: relative.clone(),
            source: EntrySource::File(path.to_path_buf()),
            checksums,
        });
    }

    if let (Some(kind), ScanPolicy::Both | ScanPolicy::ContentsOnly) = (kind, policy) {
        match fingerprint_members(path, kind, options) {
            Ok(members) => {
                for (name, result) in members {
                    let source = EntrySource::Member {
                        archive: path.to_path_buf(),
                        kind,
                        name,
                    };
                    let checksums = result.unwrap_or_else(|error| {
                        warn!(entry = %source.location(), "{}", error);
                        warnings.push(Warning::scan_failed(source.location(), &error));
                        Checksums::default()
                    });
                    entries.push(ScannedEntry {
                        relative: relative.clone(),
                        source,
                        checksums,
                    });
                }
            }
            Err(error) => {
                warn!(path = %path.display(), "{}", error);
                warnings.push(Warning::scan_failed(path.display().to_string(), &error));
                if policy == ScanPolicy::ContentsOnly {
                    entries.push(ScannedEntry {
                        relative,
                        source: EntrySource::File(path.to_path_buf()),
                        checksums: Checksums::default(),
                    });
                }
            }
        }
    }

    (entries, warnings)
}

type MemberResult = (String, Result<Checksums, ScanError>);

fn fingerprint_members(
    path: &Path,
    kind: ArchiveKind,
    options: &FingerprintOptions,
) -> Result<Vec<MemberResult>, ScanError> {
    if options.quick {
        let listed = list_entries(path, kind)?;
        return Ok(listed
            .into_iter()
            .map(|entry| (entry.name, Ok(entry.listed)))
            .collect());
    }
    Ok(hash_members(path, kind, options.hashes)?
        .into_iter()
        .map(|(entry, result)| (entry.name, result))
        .collect())
}

/// True for a directory with no children at all.
pub fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut children| children.next().is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{output_io, write_torrentzip};
    use crate::checksums::hash_bytes;
    use std::io::Write;
    use tempfile::tempdir;

    fn zip_with(path: &Path, members: &[(&str, &[u8])]) {
        let names = members.iter().map(|(name, _)| name.to_string()).collect();
        write_torrentzip(path, names, |name, out| {
            let data = members
                .iter()
                .find(|(member, _)| *member == name)
                .map(|(_, data)| *data)
                .unwrap_or_default();
            out.write_all(data).map_err(output_io(path))
        })
        .unwrap();
    }

    #[test]
    fn plain_files_are_fully_hashed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Game").join("rom.bin");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"abc").unwrap();

        let options = FingerprintOptions::default();
        let (entries, warnings) = fingerprint_path(dir.path(), &path, &options);
        assert!(warnings.is_empty());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relative, "Game/rom.bin");
        assert_eq!(entries[0].checksums, hash_bytes(b"abc", HashSelection::default()));
    }

    #[test]
    fn scan_policies_control_recursion() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Game.zip");
        zip_with(&path, &[("a.bin", &b"alpha"[..]), ("b.bin", &b"beta"[..])]);

        let contents = FingerprintOptions::default();
        let (entries, _) = fingerprint_path(dir.path(), &path, &contents);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(ScannedEntry::is_member));

        let both = contents.with_levels(ScanLevels::uniform(ScanPolicy::Both));
        let (entries, _) = fingerprint_path(dir.path(), &path, &both);
        assert_eq!(entries.len(), 3);
        assert!(!entries[0].is_member());

        let opaque = contents.with_levels(ScanLevels::uniform(ScanPolicy::OpaqueFile));
        let (entries, _) = fingerprint_path(dir.path(), &path, &opaque);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, EntrySource::File(path.clone()));
    }

    #[test]
    fn quick_mode_reports_only_container_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Game.zip");
        zip_with(&path, &[("a.bin", &b"alpha"[..])]);

        let options = FingerprintOptions::default().with_quick(true);
        let (entries, _) = fingerprint_path(dir.path(), &path, &options);
        let full = hash_bytes(b"alpha", HashSelection::default());
        assert_eq!(entries[0].checksums, full.quick_view());
        assert!(entries[0].checksums.sha1.is_none());
    }

    #[test]
    fn corrupt_archive_becomes_a_hashless_warning() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.zip");
        fs::write(&path, b"definitely not a zip").unwrap();

        let options = FingerprintOptions::default();
        let (entries, warnings) = fingerprint_path(dir.path(), &path, &options);
        assert_eq!(warnings.len(), 1);
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].checksums.has_any_hash());
    }

    #[test]
    fn unsupported_containers_fall_back_to_opaque() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Game.7z");
        fs::write(&path, b"7z bytes").unwrap();

        let options = FingerprintOptions::default();
        let (entries, warnings) = fingerprint_path(dir.path(), &path, &options);
        assert!(matches!(warnings[0], Warning::Codec { .. }));
        assert_eq!(entries.len(), 1);
        assert!(entries[0].checksums.has_any_hash());
    }

    #[test]
    fn member_sources_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Game.zip");
        zip_with(&path, &[("a.bin", &b"alpha"[..])]);
        let source = EntrySource::Member {
            archive: path,
            kind: ArchiveKind::Zip,
            name: String::from("a.bin"),
        };
        let data = source
            .with_reader(|reader| {
                let mut data = Vec::new();
                reader.read_to_end(&mut data)?;
                Ok(data)
            })
            .unwrap();
        assert_eq!(data, b"alpha");
    }
}
