//! Content-addressed storage keyed by SHA-1.
//!
//! A file lives at `root/<h0>/<h1>/.../<sha1>.gz`, one directory per leading
//! hex digit. The gzip header's extra field carries MD5, CRC32 and size so
//! a depot can be indexed without inflating anything.

use crate::archive::{self, hash_members, output_io, ArchiveKind};
use crate::checksums::{from_hex, normalize_hex, Checksums, HashKind, HashSelection, HashingReader};
use crate::error::OutputError;
use crate::fingerprint::EntrySource;
use flate2::{Compression, GzBuilder};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const DEPOT_EXTENSION: &str = "gz";
pub const DEFAULT_DEPTH: usize = 4;

const TORRENT_HEADER_LEN: usize = 28;
/// Fixed gzip header (10 bytes) plus the two-byte extra length.
const TORRENT_HEADER_OFFSET: u64 = 12;

/// `root/d/a/3/9/<sha1>.gz` for depth 4. Pure function of the digest.
pub fn depot_path(root: &Path, sha1: &str, depth: usize) -> Result<PathBuf, OutputError> {
    let sha1 = normalize_hex(HashKind::Sha1, sha1)
        .ok_or_else(|| OutputError::InvalidSha1(sha1.to_string()))?;
    let mut path = root.to_path_buf();
    for shard in sha1.chars().take(depth) {
        path.push(shard.to_string());
    }
    path.push(format!("{}.{}", sha1, DEPOT_EXTENSION));
    Ok(path)
}

/// The 28-byte gzip extra field of a depot file:
/// 16 raw MD5 bytes, big-endian CRC32, little-endian size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TorrentGzipHeader {
    pub md5: [u8; 16],
    pub crc32: u32,
    pub size: u64,
}

impl TorrentGzipHeader {
    pub fn parse(extra: &[u8]) -> Option<Self> {
        if extra.len() != TORRENT_HEADER_LEN {
            return None;
        }
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&extra[..16]);
        let crc32 = u32::from_be_bytes(extra[16..20].try_into().ok()?);
        let size = u64::from_le_bytes(extra[20..28].try_into().ok()?);
        Some(Self { md5, crc32, size })
    }

    pub fn to_bytes(&self) -> [u8; TORRENT_HEADER_LEN] {
        let mut bytes = [0u8; TORRENT_HEADER_LEN];
        bytes[..16].copy_from_slice(&self.md5);
        bytes[16..20].copy_from_slice(&self.crc32.to_be_bytes());
        bytes[20..].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }

    pub fn from_checksums(checksums: &Checksums) -> Option<Self> {
        let md5: [u8; 16] = from_hex(checksums.md5.as_deref()?)?.try_into().ok()?;
        let crc32 = u32::from_str_radix(checksums.crc32.as_deref()?, 16).ok()?;
        Some(Self {
            md5,
            crc32,
            size: checksums.size?,
        })
    }

    /// The recorded hashes; `stem` supplies the SHA-1 when it is a valid digest.
    pub fn to_checksums(&self, stem: Option<&str>) -> Checksums {
        let mut checksums = Checksums::with_size(self.size)
            .with_hash(HashKind::Crc32, &format!("{:08x}", self.crc32))
            .with_hash(HashKind::Md5, &crate::checksums::to_hex(&self.md5));
        if let Some(stem) = stem {
            checksums = checksums.with_hash(HashKind::Sha1, stem);
        }
        checksums
    }
}

/// What happened to a store request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    Written,
    AlreadyPresent,
}

#[derive(Clone, Debug)]
pub struct Depot {
    root: PathBuf,
    depth: usize,
    reverify: bool,
}

impl Depot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            depth: DEFAULT_DEPTH,
            reverify: false,
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Re-hash occupied addresses instead of trusting them.
    pub fn with_reverify(mut self, enabled: bool) -> Self {
        self.reverify = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, sha1: &str) -> Result<PathBuf, OutputError> {
        depot_path(&self.root, sha1, self.depth)
    }

    pub fn contains(&self, sha1: &str) -> bool {
        self.path_for(sha1).map(|path| path.is_file()).unwrap_or(false)
    }

    /// Stores the bytes of `source`. When `known` carries a SHA-1 whose
    /// address is occupied, the source is never opened.
    pub fn store_entry(
        &self,
        known: &Checksums,
        source: &EntrySource,
    ) -> Result<StoreOutcome, OutputError> {
        if let Some(sha1) = known.sha1.as_deref() {
            let path = self.path_for(sha1)?;
            if path.is_file() && !self.reverify {
                debug!(path = %path.display(), "depot address already occupied");
                return Ok(StoreOutcome::AlreadyPresent);
            }
        }
        let staged = archive::staging_in(&self.root)?;
        let checksums = source
            .with_reader(|reader| compress(reader, staged.as_file()))
            .map_err(|error| OutputError::Source {
                source: error,
                path: source.container().to_path_buf(),
            })?;
        self.place(staged, &checksums)
    }

    pub fn store(&self, data: &[u8]) -> Result<StoreOutcome, OutputError> {
        let staged = archive::staging_in(&self.root)?;
        let checksums = compress(&mut &data[..], staged.as_file()).map_err(output_io(&self.root))?;
        self.place(staged, &checksums)
    }

    /// Moves a compressed staging file to the address its SHA-1 selects,
    /// filling in the torrent header first.
    fn place(&self, staged: NamedTempFile, checksums: &Checksums) -> Result<StoreOutcome, OutputError> {
        let sha1 = checksums
            .sha1
            .clone()
            .ok_or_else(|| OutputError::MissingSha1 {
                name: String::from("<stream>"),
            })?;
        let path = self.path_for(&sha1)?;

        if path.is_file() {
            if !self.reverify || self.holds(&path, &sha1) {
                return Ok(StoreOutcome::AlreadyPresent);
            }
            warn!(path = %path.display(), "depot file does not match its address, rewriting");
        }

        let header = TorrentGzipHeader::from_checksums(checksums)
            .ok_or_else(|| OutputError::MissingSha1 { name: sha1.clone() })?;
        let mut file = staged.as_file();
        file.seek(SeekFrom::Start(TORRENT_HEADER_OFFSET))
            .map_err(output_io(&path))?;
        file.write_all(&header.to_bytes())
            .map_err(output_io(&path))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(output_io(parent))?;
        }
        archive::publish(staged, &path)?;
        Ok(StoreOutcome::Written)
    }

    fn holds(&self, path: &Path, sha1: &str) -> bool {
        let selection = HashSelection::empty().with(HashKind::Sha1);
        match hash_members(path, ArchiveKind::Gzip, selection) {
            Ok(hashed) => hashed.into_iter().any(|(_, result)| {
                result
                    .map(|checksums| checksums.sha1.as_deref() == Some(sha1))
                    .unwrap_or(false)
            }),
            Err(_) => false,
        }
    }
}

/// Gzips `reader` into `file` while hashing it. The torrent extra field is
/// reserved as zeros and patched once the digests are known.
fn compress(reader: &mut dyn Read, file: &File) -> io::Result<Checksums> {
    let selection = HashSelection::empty()
        .with(HashKind::Crc32)
        .with(HashKind::Md5)
        .with(HashKind::Sha1);
    let mut tee = HashingReader::new(reader, selection);
    let mut encoder = GzBuilder::new()
        .extra(vec![0u8; TORRENT_HEADER_LEN])
        .write(file, Compression::best());
    io::copy(&mut tee, &mut encoder)?;
    encoder.finish()?;
    Ok(tee.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::list_entries;
    use crate::checksums::hash_bytes;
    use tempfile::tempdir;

    const EMPTY_SHA1: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn depot_path_is_sharded_by_leading_digits() {
        let path = depot_path(Path::new("root"), EMPTY_SHA1, 4).unwrap();
        assert_eq!(
            path,
            Path::new("root/d/a/3/9/da39a3ee5e6b4b0d3255bfef95601890afd80709.gz")
        );
        let upper = depot_path(Path::new("root"), &EMPTY_SHA1.to_uppercase(), 4).unwrap();
        assert_eq!(path, upper);
    }

    #[test]
    fn invalid_sha1_is_rejected() {
        assert!(matches!(
            depot_path(Path::new("root"), "abc", 4),
            Err(OutputError::InvalidSha1(_))
        ));
    }

    #[test]
    fn torrent_header_round_trips() {
        let header = TorrentGzipHeader {
            md5: [7u8; 16],
            crc32: 0x352441c2,
            size: 3,
        };
        assert_eq!(TorrentGzipHeader::parse(&header.to_bytes()), Some(header));
        assert_eq!(TorrentGzipHeader::parse(&[0u8; 4]), None);
    }

    #[test]
    fn storing_twice_is_a_no_op() {
        let dir = tempdir().unwrap();
        let depot = Depot::new(dir.path());

        assert_eq!(depot.store(b"").unwrap(), StoreOutcome::Written);
        let path = depot.path_for(EMPTY_SHA1).unwrap();
        let first = fs::read(&path).unwrap();
        assert_eq!(depot.store(b"").unwrap(), StoreOutcome::AlreadyPresent);
        assert_eq!(fs::read(&path).unwrap(), first);
        assert!(depot.contains(EMPTY_SHA1));
    }

    #[test]
    fn known_sha1_skips_loading() {
        let dir = tempdir().unwrap();
        let depot = Depot::new(dir.path());
        depot.store(b"").unwrap();
        let known = Checksums::default().with_hash(HashKind::Sha1, EMPTY_SHA1);
        let missing = EntrySource::File(dir.path().join("never-created.bin"));
        let outcome = depot.store_entry(&known, &missing).unwrap();
        assert_eq!(outcome, StoreOutcome::AlreadyPresent);
    }

    #[test]
    fn entries_are_streamed_from_their_source() {
        let dir = tempdir().unwrap();
        let depot = Depot::new(dir.path().join("depot"));
        let source = dir.path().join("payload.bin");
        let payload: Vec<u8> = (0..200_000u32).map(|value| (value % 251) as u8).collect();
        fs::write(&source, &payload).unwrap();

        let outcome = depot
            .store_entry(&Checksums::default(), &EntrySource::File(source))
            .unwrap();
        assert_eq!(outcome, StoreOutcome::Written);

        let expected = hash_bytes(
            &payload,
            HashSelection::empty()
                .with(HashKind::Crc32)
                .with(HashKind::Md5)
                .with(HashKind::Sha1),
        );
        let path = depot.path_for(expected.sha1.as_deref().unwrap()).unwrap();
        let hashed = hash_members(&path, ArchiveKind::Gzip, HashSelection::empty().with(HashKind::Sha1)).unwrap();
        assert_eq!(hashed[0].1.as_ref().unwrap().sha1, expected.sha1);
        let entries = list_entries(&path, ArchiveKind::Gzip).unwrap();
        assert_eq!(entries[0].listed, expected);
    }

    #[test]
    fn stored_file_lists_full_hashes_without_inflating() {
        let dir = tempdir().unwrap();
        let depot = Depot::new(dir.path()).with_depth(2);
        depot.store(b"abc").unwrap();
        let expected = hash_bytes(
            b"abc",
            HashSelection::empty()
                .with(HashKind::Crc32)
                .with(HashKind::Md5)
                .with(HashKind::Sha1),
        );
        let path = depot.path_for(expected.sha1.as_deref().unwrap()).unwrap();

        let entries = list_entries(&path, ArchiveKind::Gzip).unwrap();
        assert_eq!(entries[0].listed, expected);
    }

    #[test]
    fn reverify_rewrites_damaged_files() {
        let dir = tempdir().unwrap();
        let depot = Depot::new(dir.path()).with_reverify(true);
        let path = depot.path_for(EMPTY_SHA1).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"garbage").unwrap();
        assert_eq!(depot.store(b"").unwrap(), StoreOutcome::Written);
        assert_eq!(depot.store(b"").unwrap(), StoreOutcome::AlreadyPresent);
    }
}
