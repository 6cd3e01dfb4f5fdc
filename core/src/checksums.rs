//! Hash-sets: size plus optional digests, and the hasher that produces them.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt::{Display, Formatter, Write as _};
use std::io::{self, Read};

const READ_BUFFER: usize = 64 * 1024;

/// One digest algorithm a hash-set can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    Crc32,
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashKind {
    pub const ALL: [HashKind; 6] = [
        HashKind::Crc32,
        HashKind::Md5,
        HashKind::Sha1,
        HashKind::Sha256,
        HashKind::Sha384,
        HashKind::Sha512,
    ];

    /// Length of the lowercase hex rendering.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Crc32 => 8,
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Crc32 => "crc32",
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl Display for HashKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The set of digests to compute during fingerprinting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<HashKind>", into = "Vec<HashKind>")]
pub struct HashSelection {
    bits: u8,
}

impl HashSelection {
    pub fn empty() -> Self {
        Self { bits: 0 }
    }

    pub fn all() -> Self {
        HashKind::ALL.into_iter().collect()
    }

    pub fn with(mut self, kind: HashKind) -> Self {
        self.bits |= kind.bit();
        self
    }

    pub fn without(mut self, kind: HashKind) -> Self {
        self.bits &= !kind.bit();
        self
    }

    pub fn contains(self, kind: HashKind) -> bool {
        self.bits & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.bits == 0
    }

    pub fn kinds(self) -> impl Iterator<Item = HashKind> {
        HashKind::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }
}

/// CRC32, MD5 and SHA-1: what most manifests carry.
impl Default for HashSelection {
    fn default() -> Self {
        Self::empty()
            .with(HashKind::Crc32)
            .with(HashKind::Md5)
            .with(HashKind::Sha1)
    }
}

impl FromIterator<HashKind> for HashSelection {
    fn from_iter<T: IntoIterator<Item = HashKind>>(iter: T) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl From<Vec<HashKind>> for HashSelection {
    fn from(kinds: Vec<HashKind>) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<HashSelection> for Vec<HashKind> {
    fn from(selection: HashSelection) -> Self {
        selection.kinds().collect()
    }
}

/// An immutable fingerprint: optional size, optional digests and a nodump flag.
///
/// Digests are stored as lowercase hex. A record with no digests at all is
/// legal and is never considered identical to anything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksums {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc32: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha384: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nodump: bool,
}

impl Checksums {
    pub fn with_size(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    /// Sets `kind` after normalising `value`; invalid hex leaves the field absent.
    pub fn with_hash(mut self, kind: HashKind, value: &str) -> Self {
        self.set(kind, normalize_hex(kind, value));
        self
    }

    pub fn get(&self, kind: HashKind) -> Option<&str> {
        self.slot(kind).as_deref()
    }

    pub fn set(&mut self, kind: HashKind, value: Option<String>) {
        *self.slot_mut(kind) = value;
    }

    fn slot(&self, kind: HashKind) -> &Option<String> {
        match kind {
            HashKind::Crc32 => &self.crc32,
            HashKind::Md5 => &self.md5,
            HashKind::Sha1 => &self.sha1,
            HashKind::Sha256 => &self.sha256,
            HashKind::Sha384 => &self.sha384,
            HashKind::Sha512 => &self.sha512,
        }
    }

    fn slot_mut(&mut self, kind: HashKind) -> &mut Option<String> {
        match kind {
            HashKind::Crc32 => &mut self.crc32,
            HashKind::Md5 => &mut self.md5,
            HashKind::Sha1 => &mut self.sha1,
            HashKind::Sha256 => &mut self.sha256,
            HashKind::Sha384 => &mut self.sha384,
            HashKind::Sha512 => &mut self.sha512,
        }
    }

    /// Populated digests, weakest first.
    pub fn populated(&self) -> impl Iterator<Item = (HashKind, &str)> {
        HashKind::ALL
            .into_iter()
            .filter_map(move |kind| self.get(kind).map(|value| (kind, value)))
    }

    pub fn has_any_hash(&self) -> bool {
        self.populated().next().is_some()
    }

    /// The strongest populated digest.
    pub fn best_hash(&self) -> Option<(HashKind, &str)> {
        self.populated().last()
    }

    /// Sizes are compatible when equal or when either side is unknown.
    pub fn size_compatible(&self, other: &Checksums) -> bool {
        match (self.size, other.size) {
            (Some(left), Some(right)) => left == right,
            _ => true,
        }
    }

    /// True when some digest is populated on both sides with the same value.
    pub fn shares_hash_with(&self, other: &Checksums) -> bool {
        self.shares_hash_among(other, &HashKind::ALL)
    }

    pub fn shares_hash_among(&self, other: &Checksums, kinds: &[HashKind]) -> bool {
        kinds.iter().any(|kind| match (self.get(*kind), other.get(*kind)) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        })
    }

    /// True when some digest is populated on both sides with different values.
    pub fn conflicts_with(&self, other: &Checksums) -> bool {
        HashKind::ALL
            .into_iter()
            .any(|kind| match (self.get(kind), other.get(kind)) {
                (Some(left), Some(right)) => left != right,
                _ => false,
            })
    }

    /// Every field populated on both sides agrees and at least one digest is shared.
    pub fn is_consistent_with(&self, other: &Checksums) -> bool {
        self.size_compatible(other) && !self.conflicts_with(other) && self.shares_hash_with(other)
    }

    /// Copies every field populated on `other` but absent here.
    pub fn absorb(&mut self, other: &Checksums) {
        if self.size.is_none() {
            self.size = other.size;
        }
        for kind in HashKind::ALL {
            if self.get(kind).is_none() {
                if let Some(value) = other.get(kind) {
                    self.set(kind, Some(value.to_string()));
                }
            }
        }
    }

    /// Keeps only size and CRC32, as container directory metadata would report.
    pub fn quick_view(&self) -> Checksums {
        Checksums {
            size: self.size,
            crc32: self.crc32.clone(),
            ..Checksums::default()
        }
    }
}

/// Lowercases `value` and checks it is hex of the right length for `kind`.
pub fn normalize_hex(kind: HashKind, value: &str) -> Option<String> {
    let trimmed = value.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if trimmed.is_empty() || trimmed == "-" {
        return None;
    }
    let padded = if kind == HashKind::Crc32 && trimmed.len() < 8 {
        format!("{:0>8}", trimmed)
    } else {
        trimmed.to_string()
    };
    if padded.len() != kind.hex_len() || !padded.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(padded.to_ascii_lowercase())
}

pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Decodes lowercase or uppercase hex; `None` on odd length or bad digits.
pub fn from_hex(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(value.get(index..index + 2)?, 16).ok())
        .collect()
}

/// Streams bytes through every selected digest at once.
pub struct MultiHasher {
    size: u64,
    crc32: Option<crc32fast::Hasher>,
    md5: Option<Md5>,
    sha1: Option<Sha1>,
    sha256: Option<Sha256>,
    sha384: Option<Sha384>,
    sha512: Option<Sha512>,
}

impl MultiHasher {
    pub fn new(selection: HashSelection) -> Self {
        Self {
            size: 0,
            crc32: selection
                .contains(HashKind::Crc32)
                .then(crc32fast::Hasher::new),
            md5: selection.contains(HashKind::Md5).then(Md5::new),
            sha1: selection.contains(HashKind::Sha1).then(Sha1::new),
            sha256: selection.contains(HashKind::Sha256).then(Sha256::new),
            sha384: selection.contains(HashKind::Sha384).then(Sha384::new),
            sha512: selection.contains(HashKind::Sha512).then(Sha512::new),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.size += data.len() as u64;
        if let Some(hasher) = self.crc32.as_mut() {
            hasher.update(data);
        }
        if let Some(hasher) = self.md5.as_mut() {
            hasher.update(data);
        }
        if let Some(hasher) = self.sha1.as_mut() {
            hasher.update(data);
        }
        if let Some(hasher) = self.sha256.as_mut() {
            hasher.update(data);
        }
        if let Some(hasher) = self.sha384.as_mut() {
            hasher.update(data);
        }
        if let Some(hasher) = self.sha512.as_mut() {
            hasher.update(data);
        }
    }

    pub fn finish(self) -> Checksums {
        Checksums {
            size: Some(self.size),
            crc32: self
                .crc32
                .map(|hasher| format!("{:08x}", hasher.finalize())),
            md5: self.md5.map(|hasher| to_hex(&hasher.finalize())),
            sha1: self.sha1.map(|hasher| to_hex(&hasher.finalize())),
            sha256: self.sha256.map(|hasher| to_hex(&hasher.finalize())),
            sha384: self.sha384.map(|hasher| to_hex(&hasher.finalize())),
            sha512: self.sha512.map(|hasher| to_hex(&hasher.finalize())),
            nodump: false,
        }
    }
}

/// Passes bytes through unchanged while hashing them.
pub struct HashingReader<R> {
    inner: R,
    hasher: MultiHasher,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R, selection: HashSelection) -> Self {
        Self {
            inner,
            hasher: MultiHasher::new(selection),
        }
    }

    /// Digests of everything read so far.
    pub fn finish(self) -> Checksums {
        self.hasher.finish()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buffer)?;
        self.hasher.update(&buffer[..count]);
        Ok(count)
    }
}

/// Hashes everything `reader` yields.
pub fn hash_reader<R: Read + ?Sized>(
    reader: &mut R,
    selection: HashSelection,
) -> io::Result<Checksums> {
    let mut hasher = MultiHasher::new(selection);
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let count = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(count) => count,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        hasher.update(&buffer[..count]);
    }
    Ok(hasher.finish())
}

pub fn hash_bytes(data: &[u8], selection: HashSelection) -> Checksums {
    let mut hasher = MultiHasher::new(selection);
    hasher.update(data);
    hasher.finish()
}
