//! Manifest codecs. Round trips preserve item names, hash-sets and machine
//! grouping; cosmetic header fields may not survive every format.

pub mod hashlist;
pub mod json;
pub mod tabular;

use crate::checksums::HashKind;
use crate::error::CodecError;
use crate::manifest::{Header, Manifest};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestFormat {
    /// Full-fidelity native format.
    Json,
    /// One row per item.
    Csv,
    /// `name CRC32` per line.
    Sfv,
    /// `digest *name` per line.
    Md5,
    Sha1,
    Sha256,
}

impl ManifestFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Sfv => "sfv",
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        extension.parse().ok()
    }

    /// The digest carried by single-hash list formats.
    pub fn list_hash(self) -> Option<HashKind> {
        match self {
            Self::Sfv => Some(HashKind::Crc32),
            Self::Md5 => Some(HashKind::Md5),
            Self::Sha1 => Some(HashKind::Sha1),
            Self::Sha256 => Some(HashKind::Sha256),
            Self::Json | Self::Csv => None,
        }
    }
}

impl Display for ManifestFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ManifestFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "json" | "dat.json" => Ok(Self::Json),
            "csv" | "tsv" => Ok(Self::Csv),
            "sfv" => Ok(Self::Sfv),
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            other => Err(format!("unknown manifest format: {}", other)),
        }
    }
}

/// The hint wins, then the extension, then a peek at the content.
pub fn detect(
    path: &Path,
    bytes: &[u8],
    hint: Option<ManifestFormat>,
) -> Result<ManifestFormat, CodecError> {
    if let Some(format) = hint.or_else(|| ManifestFormat::from_path(path)) {
        return Ok(format);
    }
    match bytes.iter().find(|byte| !byte.is_ascii_whitespace()) {
        Some(b'{') => Ok(ManifestFormat::Json),
        _ => Err(CodecError::UnknownFormat(path.to_path_buf())),
    }
}

/// Header used when a format carries no header of its own.
pub(crate) fn header_for(path: &Path) -> Header {
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("manifest"));
    Header::named(name)
}

/// `path` is used for error messages and, where the format has no header,
/// for the manifest name.
pub fn parse(bytes: &[u8], format: ManifestFormat, path: &Path) -> Result<Manifest, CodecError> {
    match format {
        ManifestFormat::Json => json::parse(bytes, path),
        ManifestFormat::Csv => tabular::parse(bytes, path),
        ManifestFormat::Sfv | ManifestFormat::Md5 | ManifestFormat::Sha1 | ManifestFormat::Sha256 => {
            hashlist::parse(bytes, format, path)
        }
    }
}

pub fn serialize(manifest: &Manifest, format: ManifestFormat) -> Result<Vec<u8>, CodecError> {
    match format {
        ManifestFormat::Json => json::serialize(manifest),
        ManifestFormat::Csv => tabular::serialize(manifest),
        ManifestFormat::Sfv | ManifestFormat::Md5 | ManifestFormat::Sha1 | ManifestFormat::Sha256 => {
            Ok(hashlist::serialize(manifest, format))
        }
    }
}

pub fn read_manifest(path: &Path, hint: Option<ManifestFormat>) -> Result<Manifest, CodecError> {
    let bytes = fs::read(path).map_err(|source| CodecError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let format = detect(path, &bytes, hint)?;
    let manifest = parse(&bytes, format, path)?;
    debug!(path = %path.display(), %format, items = manifest.len(), "manifest read");
    Ok(manifest)
}

pub fn write_manifest(
    manifest: &Manifest,
    path: &Path,
    format: ManifestFormat,
) -> Result<(), CodecError> {
    let bytes = serialize(manifest, format)?;
    let io_error = |source| CodecError::Io {
        source,
        path: path.to_path_buf(),
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    fs::write(path, bytes).map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::Checksums;
    use crate::item::Item;
    use tempfile::tempdir;

    #[test]
    fn detection_prefers_hint_then_extension_then_content() {
        let path = Path::new("set.sfv");
        assert_eq!(detect(path, b"", None).unwrap(), ManifestFormat::Sfv);
        assert_eq!(
            detect(path, b"", Some(ManifestFormat::Md5)).unwrap(),
            ManifestFormat::Md5
        );
        assert_eq!(
            detect(Path::new("set.dat"), b"  {\"header\":{}}", None).unwrap(),
            ManifestFormat::Json
        );
        assert!(matches!(
            detect(Path::new("set.dat"), b"<xml/>", None),
            Err(CodecError::UnknownFormat(_))
        ));
    }

    #[test]
    fn written_manifest_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("set.json");
        let manifest = Manifest::from_items(
            Header::named("Set"),
            vec![Item::rom(
                "Game",
                "a.bin",
                Checksums::with_size(1).with_hash(HashKind::Crc32, "0000abcd"),
            )],
        );
        write_manifest(&manifest, &path, ManifestFormat::Json).unwrap();
        let read = read_manifest(&path, None).unwrap();
        assert_eq!(read.header.name, "Set");
        assert_eq!(read.items().next().unwrap().checksums.crc32.as_deref(), Some("0000abcd"));
    }
}
