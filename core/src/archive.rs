//! Container kinds, scan policy and the zip/gzip/tar primitives the engine needs.
//!
//! Readers hand out members as plain `Read` streams; writers take a loader
//! callback per member name so callers decide where the bytes come from.

use crate::checksums::{hash_reader, Checksums, HashKind, HashSelection};
use crate::depot::TorrentGzipHeader;
use crate::error::{OutputError, ScanError};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZIP_FLAG_EXTRA: u8 = 0x04;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Zip,
    Gzip,
    Tar,
    #[serde(rename = "7z")]
    SevenZip,
    Rar,
}

impl ArchiveKind {
    pub const ALL: [ArchiveKind; 5] = [
        ArchiveKind::Zip,
        ArchiveKind::Gzip,
        ArchiveKind::Tar,
        ArchiveKind::SevenZip,
        ArchiveKind::Rar,
    ];

    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "zip" => Some(Self::Zip),
            "gz" => Some(Self::Gzip),
            "tar" => Some(Self::Tar),
            "7z" => Some(Self::SevenZip),
            "rar" => Some(Self::Rar),
            _ => None,
        }
    }

    /// Whether members of this kind can be listed and streamed.
    pub fn supports_read(self) -> bool {
        matches!(self, Self::Zip | Self::Gzip | Self::Tar)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Gzip => "gz",
            Self::Tar => "tar",
            Self::SevenZip => "7z",
            Self::Rar => "rar",
        }
    }
}

impl Display for ArchiveKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// How deep the scanner looks into one kind of container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanPolicy {
    /// Hash the container file itself and every member.
    Both,
    /// Hash the members only.
    #[default]
    ContentsOnly,
    /// Hash the container as one opaque file.
    OpaqueFile,
}

/// One [`ScanPolicy`] per container kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanLevels {
    pub zip: ScanPolicy,
    pub gzip: ScanPolicy,
    pub tar: ScanPolicy,
    #[serde(rename = "7z")]
    pub seven_zip: ScanPolicy,
    pub rar: ScanPolicy,
}

impl ScanLevels {
    pub fn uniform(policy: ScanPolicy) -> Self {
        Self {
            zip: policy,
            gzip: policy,
            tar: policy,
            seven_zip: policy,
            rar: policy,
        }
    }

    pub fn policy_for(&self, kind: ArchiveKind) -> ScanPolicy {
        match kind {
            ArchiveKind::Zip => self.zip,
            ArchiveKind::Gzip => self.gzip,
            ArchiveKind::Tar => self.tar,
            ArchiveKind::SevenZip => self.seven_zip,
            ArchiveKind::Rar => self.rar,
        }
    }

    pub fn with(mut self, kind: ArchiveKind, policy: ScanPolicy) -> Self {
        match kind {
            ArchiveKind::Zip => self.zip = policy,
            ArchiveKind::Gzip => self.gzip = policy,
            ArchiveKind::Tar => self.tar = policy,
            ArchiveKind::SevenZip => self.seven_zip = policy,
            ArchiveKind::Rar => self.rar = policy,
        }
        self
    }
}

/// A member as described by the container's own directory metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    /// Whatever the container records without decompressing: size, often CRC32.
    pub listed: Checksums,
}

/// Outcome of hashing one member; the member may fail while its siblings succeed.
pub type MemberHash = (ArchiveEntry, Result<Checksums, ScanError>);

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ScanError + '_ {
    move |source| ScanError::Io {
        source,
        path: path.to_path_buf(),
    }
}

fn corrupt(kind: ArchiveKind, path: &Path, reason: impl Display) -> ScanError {
    ScanError::Corrupt {
        kind,
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn open_zip(path: &Path) -> Result<zip::ZipArchive<BufReader<File>>, ScanError> {
    let file = File::open(path).map_err(io_error(path))?;
    zip::ZipArchive::new(BufReader::new(file))
        .map_err(|error| corrupt(ArchiveKind::Zip, path, error))
}

fn open_tar(path: &Path) -> Result<tar::Archive<BufReader<File>>, ScanError> {
    let file = File::open(path).map_err(io_error(path))?;
    Ok(tar::Archive::new(BufReader::new(file)))
}

fn tar_member_name(entry: &tar::Entry<'_, BufReader<File>>) -> io::Result<String> {
    Ok(entry.path()?.to_string_lossy().replace('\\', "/"))
}

/// The single member name of a gzip file: its file name without `.gz`.
pub fn gzip_member_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn unsupported(kind: ArchiveKind, path: &Path) -> ScanError {
    corrupt(kind, path, "container kind cannot be opened")
}

/// Lists members from directory metadata without decompressing anything.
pub fn list_entries(path: &Path, kind: ArchiveKind) -> Result<Vec<ArchiveEntry>, ScanError> {
    match kind {
        ArchiveKind::Zip => {
            let mut archive = open_zip(path)?;
            let mut entries = Vec::with_capacity(archive.len());
            for index in 0..archive.len() {
                let member = archive
                    .by_index_raw(index)
                    .map_err(|error| corrupt(kind, path, error))?;
                if member.is_dir() {
                    continue;
                }
                entries.push(ArchiveEntry {
                    name: member.name().to_string(),
                    listed: Checksums::with_size(member.size())
                        .with_hash(HashKind::Crc32, &format!("{:08x}", member.crc32())),
                });
            }
            Ok(entries)
        }
        ArchiveKind::Gzip => {
            let info = gzip_info(path)?;
            let name = gzip_member_name(path);
            let listed = match info.torrent {
                Some(header) => header.to_checksums(Some(name.as_str())),
                None => Checksums::with_size(u64::from(info.trailer_size))
                    .with_hash(HashKind::Crc32, &format!("{:08x}", info.trailer_crc32)),
            };
            Ok(vec![ArchiveEntry { name, listed }])
        }
        ArchiveKind::Tar => {
            let mut archive = open_tar(path)?;
            let mut entries = Vec::new();
            for entry in archive.entries().map_err(io_error(path))? {
                let entry = entry.map_err(|error| corrupt(kind, path, error))?;
                if !entry.header().entry_type().is_file() {
                    continue;
                }
                entries.push(ArchiveEntry {
                    name: tar_member_name(&entry).map_err(|error| corrupt(kind, path, error))?,
                    listed: Checksums::with_size(entry.size()),
                });
            }
            Ok(entries)
        }
        ArchiveKind::SevenZip | ArchiveKind::Rar => Err(unsupported(kind, path)),
    }
}

/// Streams every member through the selected digests.
///
/// The outer error means the container could not be opened at all. A member
/// that fails to decompress yields its own error and hashing moves on.
pub fn hash_members(
    path: &Path,
    kind: ArchiveKind,
    selection: HashSelection,
) -> Result<Vec<MemberHash>, ScanError> {
    match kind {
        ArchiveKind::Zip => {
            let mut archive = open_zip(path)?;
            let mut hashed = Vec::with_capacity(archive.len());
            for index in 0..archive.len() {
                let mut member = match archive.by_index(index) {
                    Ok(member) => member,
                    Err(error) => {
                        let entry = ArchiveEntry {
                            name: format!("#{}", index),
                            listed: Checksums::default(),
                        };
                        hashed.push((entry, Err(corrupt(kind, path, error))));
                        continue;
                    }
                };
                if member.is_dir() {
                    continue;
                }
                let entry = ArchiveEntry {
                    name: member.name().to_string(),
                    listed: Checksums::with_size(member.size())
                        .with_hash(HashKind::Crc32, &format!("{:08x}", member.crc32())),
                };
                let result = hash_reader(&mut member, selection)
                    .map_err(|error| corrupt(kind, path, format!("{}: {}", entry.name, error)));
                hashed.push((entry, result));
            }
            Ok(hashed)
        }
        ArchiveKind::Gzip => {
            let file = File::open(path).map_err(io_error(path))?;
            let mut decoder = GzDecoder::new(BufReader::new(file));
            let entry = ArchiveEntry {
                name: gzip_member_name(path),
                listed: Checksums::default(),
            };
            let result =
                hash_reader(&mut decoder, selection).map_err(|error| corrupt(kind, path, error));
            Ok(vec![(entry, result)])
        }
        ArchiveKind::Tar => {
            let mut archive = open_tar(path)?;
            let mut hashed = Vec::new();
            for entry in archive.entries().map_err(io_error(path))? {
                let mut entry = match entry {
                    Ok(entry) => entry,
                    Err(error) => {
                        let failed = ArchiveEntry {
                            name: format!("#{}", hashed.len()),
                            listed: Checksums::default(),
                        };
                        hashed.push((failed, Err(corrupt(kind, path, error))));
                        break;
                    }
                };
                if !entry.header().entry_type().is_file() {
                    continue;
                }
                let name = tar_member_name(&entry).map_err(|error| corrupt(kind, path, error))?;
                let listed = Checksums::with_size(entry.size());
                let result = hash_reader(&mut entry, selection)
                    .map_err(|error| corrupt(kind, path, format!("{}: {}", name, error)));
                hashed.push((ArchiveEntry { name, listed }, result));
            }
            Ok(hashed)
        }
        ArchiveKind::SevenZip | ArchiveKind::Rar => Err(unsupported(kind, path)),
    }
}

/// Opens member `name` of the container at `path` and hands it to `consume`.
pub fn with_member<T>(
    path: &Path,
    kind: ArchiveKind,
    name: &str,
    consume: impl FnOnce(&mut dyn Read) -> io::Result<T>,
) -> Result<T, ScanError> {
    match kind {
        ArchiveKind::Zip => {
            let mut archive = open_zip(path)?;
            let mut member = archive
                .by_name(name)
                .map_err(|error| corrupt(kind, path, format!("{}: {}", name, error)))?;
            consume(&mut member).map_err(|error| corrupt(kind, path, error))
        }
        ArchiveKind::Gzip => {
            let file = File::open(path).map_err(io_error(path))?;
            let mut decoder = GzDecoder::new(BufReader::new(file));
            consume(&mut decoder).map_err(|error| corrupt(kind, path, error))
        }
        ArchiveKind::Tar => {
            let mut archive = open_tar(path)?;
            for entry in archive.entries().map_err(io_error(path))? {
                let mut entry = entry.map_err(|error| corrupt(kind, path, error))?;
                if tar_member_name(&entry).map_err(io_error(path))? == name {
                    return consume(&mut entry).map_err(|error| corrupt(kind, path, error));
                }
            }
            Err(corrupt(kind, path, format!("member {} not found", name)))
        }
        ArchiveKind::SevenZip | ArchiveKind::Rar => Err(unsupported(kind, path)),
    }
}

/// Header extra field and trailer of a gzip file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GzipInfo {
    pub torrent: Option<TorrentGzipHeader>,
    pub trailer_crc32: u32,
    /// Uncompressed size modulo 2^32.
    pub trailer_size: u32,
}

/// Reads the gzip header and trailer without inflating the body.
pub fn gzip_info(path: &Path) -> Result<GzipInfo, ScanError> {
    let kind = ArchiveKind::Gzip;
    let mut file = File::open(path).map_err(io_error(path))?;
    let mut fixed = [0u8; 10];
    file.read_exact(&mut fixed)
        .map_err(|error| corrupt(kind, path, error))?;
    if fixed[..2] != GZIP_MAGIC {
        return Err(corrupt(kind, path, "bad magic"));
    }

    let mut torrent = None;
    if fixed[3] & GZIP_FLAG_EXTRA != 0 {
        let mut length = [0u8; 2];
        file.read_exact(&mut length)
            .map_err(|error| corrupt(kind, path, error))?;
        let mut extra = vec![0u8; usize::from(u16::from_le_bytes(length))];
        file.read_exact(&mut extra)
            .map_err(|error| corrupt(kind, path, error))?;
        torrent = TorrentGzipHeader::parse(&extra);
    }

    file.seek(SeekFrom::End(-8))
        .map_err(|error| corrupt(kind, path, error))?;
    let mut trailer = [0u8; 8];
    file.read_exact(&mut trailer)
        .map_err(|error| corrupt(kind, path, error))?;
    Ok(GzipInfo {
        torrent,
        trailer_crc32: u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]),
        trailer_size: u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]),
    })
}

pub(crate) fn output_io(path: &Path) -> impl FnOnce(io::Error) -> OutputError + '_ {
    move |source| OutputError::Io {
        source,
        path: path.to_path_buf(),
    }
}

pub(crate) fn staging_file(destination: &Path) -> Result<NamedTempFile, OutputError> {
    let parent = destination
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    staging_in(&parent)
}

/// A temporary file inside `directory`, so publishing it is a rename.
pub(crate) fn staging_in(directory: &Path) -> Result<NamedTempFile, OutputError> {
    std::fs::create_dir_all(directory).map_err(output_io(directory))?;
    NamedTempFile::new_in(directory).map_err(output_io(directory))
}

pub(crate) fn publish(staged: NamedTempFile, destination: &Path) -> Result<(), OutputError> {
    staged
        .persist(destination)
        .map(|_| ())
        .map_err(|error| OutputError::Io {
            source: error.error,
            path: destination.to_path_buf(),
        })
}

/// Case-insensitive order with a byte-order tiebreak, as torrent-style zips use.
pub fn torrentzip_order(names: &mut [String]) {
    names.sort_by(|left, right| {
        left.to_ascii_lowercase()
            .cmp(&right.to_ascii_lowercase())
            .then_with(|| left.cmp(right))
    });
}

/// Writes a reproducible zip: sorted members, deflate level 9, fixed timestamp.
/// Each member is streamed by `copy` straight into the compressor. The
/// archive is staged beside `destination` and renamed into place.
pub fn write_torrentzip(
    destination: &Path,
    mut names: Vec<String>,
    mut copy: impl FnMut(&str, &mut dyn Write) -> Result<(), OutputError>,
) -> Result<(), OutputError> {
    use zip::write::SimpleFileOptions;

    torrentzip_order(&mut names);
    names.dedup();

    let zip_error = |source| OutputError::Zip {
        source,
        path: destination.to_path_buf(),
    };
    let staged = staging_file(destination)?;
    let timestamp = zip::DateTime::from_date_and_time(1996, 12, 24, 23, 32, 0).unwrap_or_default();
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(9))
        .last_modified_time(timestamp);

    let mut writer = zip::ZipWriter::new(staged.as_file());
    for name in &names {
        writer
            .start_file(name.as_str(), options)
            .map_err(zip_error)?;
        copy(name, &mut writer)?;
    }
    writer.finish().map_err(zip_error)?;
    publish(staged, destination)
}

/// Writes a tar with sorted members and zeroed timestamps.
///
/// Tar headers need the size up front, so each member is spooled to an
/// anonymous temporary file first rather than held in memory.
pub fn write_tar(
    destination: &Path,
    mut names: Vec<String>,
    mut copy: impl FnMut(&str, &mut dyn Write) -> Result<(), OutputError>,
) -> Result<(), OutputError> {
    names.sort();
    names.dedup();

    let staged = staging_file(destination)?;
    let mut builder = tar::Builder::new(staged.as_file());
    for name in &names {
        let mut spool = tempfile::tempfile().map_err(output_io(destination))?;
        copy(name, &mut spool)?;
        let size = spool
            .seek(SeekFrom::End(0))
            .map_err(output_io(destination))?;
        spool
            .seek(SeekFrom::Start(0))
            .map_err(output_io(destination))?;

        let mut header = tar::Header::new_gnu();
        header.set_size(size);
        header.set_mode(0o644);
        header.set_mtime(0);
        builder
            .append_data(&mut header, name, &mut spool)
            .map_err(output_io(destination))?;
    }
    builder.into_inner().map_err(output_io(destination))?;
    publish(staged, destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::hash_bytes;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::tempdir;

    fn members() -> BTreeMap<String, Vec<u8>> {
        let mut members = BTreeMap::new();
        members.insert(String::from("b.bin"), b"second".to_vec());
        members.insert(String::from("A.bin"), b"first".to_vec());
        members
    }

    fn write_zip(path: &Path) {
        let members = members();
        write_torrentzip(path, members.keys().cloned().collect(), |name, out| {
            out.write_all(&members[name]).map_err(output_io(path))
        })
        .unwrap();
    }

    #[test]
    fn kinds_follow_extension() {
        assert_eq!(ArchiveKind::from_path(Path::new("set/Game.ZIP")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_path(Path::new("x.7z")), Some(ArchiveKind::SevenZip));
        assert_eq!(ArchiveKind::from_path(Path::new("rom.bin")), None);
        assert!(!ArchiveKind::Rar.supports_read());
    }

    #[test]
    fn scan_levels_default_to_contents() {
        let levels = ScanLevels::default().with(ArchiveKind::Tar, ScanPolicy::OpaqueFile);
        assert_eq!(levels.policy_for(ArchiveKind::Zip), ScanPolicy::ContentsOnly);
        assert_eq!(levels.policy_for(ArchiveKind::Tar), ScanPolicy::OpaqueFile);
    }

    #[test]
    fn torrentzip_lists_sorted_members_with_crc() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Game.zip");
        write_zip(&path);

        let entries = list_entries(&path, ArchiveKind::Zip).unwrap();
        let names: Vec<_> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["A.bin", "b.bin"]);
        let expected = hash_bytes(b"first", HashSelection::default());
        assert_eq!(entries[0].listed.crc32, expected.crc32);
        assert_eq!(entries[0].listed.size, Some(5));
    }

    #[test]
    fn torrentzip_output_is_reproducible() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("one.zip");
        let second = dir.path().join("two.zip");
        write_zip(&first);
        write_zip(&second);
        assert_eq!(fs::read(first).unwrap(), fs::read(second).unwrap());
    }

    #[test]
    fn hash_members_streams_zip_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Game.zip");
        write_zip(&path);

        let hashed = hash_members(&path, ArchiveKind::Zip, HashSelection::default()).unwrap();
        assert_eq!(hashed.len(), 2);
        let (entry, result) = &hashed[1];
        assert_eq!(entry.name, "b.bin");
        let expected = hash_bytes(b"second", HashSelection::default());
        assert_eq!(result.as_ref().unwrap(), &expected);
    }

    #[test]
    fn tar_round_trip_and_member_access() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Game.tar");
        let members = members();
        write_tar(&path, members.keys().cloned().collect(), |name, out| {
            out.write_all(&members[name]).map_err(output_io(&path))
        })
        .unwrap();

        let entries = list_entries(&path, ArchiveKind::Tar).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].listed.size, Some(5));
        assert!(entries[0].listed.crc32.is_none());

        let data = with_member(&path, ArchiveKind::Tar, "b.bin", |reader| {
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            Ok(data)
        })
        .unwrap();
        assert_eq!(data, b"second");
    }

    #[test]
    fn gzip_quick_listing_uses_trailer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rom.bin.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"payload").unwrap();
        fs::write(&path, encoder.finish().unwrap()).unwrap();

        let entries = list_entries(&path, ArchiveKind::Gzip).unwrap();
        assert_eq!(entries[0].name, "rom.bin");
        let expected = hash_bytes(b"payload", HashSelection::default());
        assert_eq!(entries[0].listed.crc32, expected.crc32);
        assert_eq!(entries[0].listed.size, Some(7));

        let hashed = hash_members(&path, ArchiveKind::Gzip, HashSelection::default()).unwrap();
        assert_eq!(hashed[0].1.as_ref().unwrap(), &expected);
    }

    #[test]
    fn corrupt_zip_is_a_scan_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.zip");
        fs::write(&path, b"not a zip").unwrap();
        assert!(matches!(
            list_entries(&path, ArchiveKind::Zip),
            Err(ScanError::Corrupt { kind: ArchiveKind::Zip, .. })
        ));
    }
}
