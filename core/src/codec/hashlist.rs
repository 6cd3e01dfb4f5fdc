//! Single-digest listings: SFV (`path CRC32`) and md5sum-style
//! (`digest *path`) files. They carry no sizes, so items read from them
//! have unknown size.

use crate::checksums::{normalize_hex, Checksums};
use crate::codec::{header_for, ManifestFormat};
use crate::error::CodecError;
use crate::item::{Item, ItemKind};
use crate::manifest::Manifest;
use std::path::Path;

/// `Machine/name` splits at the first separator; a bare name uses its stem.
fn split_location(location: &str) -> (String, String) {
    let location = location.replace('\\', "/");
    match location.split_once('/') {
        Some((machine, name)) if !machine.is_empty() && !name.is_empty() => {
            (machine.to_string(), name.to_string())
        }
        _ => {
            let stem = Path::new(&location)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| location.clone());
            (stem, location)
        }
    }
}

pub fn parse(bytes: &[u8], format: ManifestFormat, path: &Path) -> Result<Manifest, CodecError> {
    let Some(kind) = format.list_hash() else {
        return Err(CodecError::UnknownFormat(path.to_path_buf()));
    };
    let malformed = |line: usize, reason: &str| CodecError::Malformed {
        path: path.to_path_buf(),
        line,
        reason: reason.to_string(),
    };

    let text = String::from_utf8_lossy(bytes);
    let mut manifest = Manifest::new(header_for(path));
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        let fields = if format == ManifestFormat::Sfv {
            line.rsplit_once(char::is_whitespace)
                .map(|(location, digest)| (digest, location.trim_end()))
        } else {
            line.split_once(char::is_whitespace).map(|(digest, location)| {
                let location = location.trim_start();
                (digest, location.strip_prefix('*').unwrap_or(location))
            })
        };
        let Some((digest, location)) = fields.filter(|(_, location)| !location.is_empty()) else {
            return Err(malformed(index + 1, "expected a digest and a path"));
        };
        let Some(digest) = normalize_hex(kind, digest) else {
            return Err(malformed(index + 1, &format!("invalid {} digest", kind)));
        };

        let (machine, name) = split_location(location);
        let mut checksums = Checksums::default();
        checksums.set(kind, Some(digest));
        manifest.insert(Item::rom(machine, name, checksums));
    }
    Ok(manifest)
}

/// Items without the listed digest are left out.
pub fn serialize(manifest: &Manifest, format: ManifestFormat) -> Vec<u8> {
    let Some(kind) = format.list_hash() else {
        return Vec::new();
    };
    let mut out = String::new();
    let comment = if format == ManifestFormat::Sfv { ';' } else { '#' };
    out.push_str(&format!("{} {}\n", comment, manifest.header.name));
    for item in manifest.by_machine().into_values().flatten() {
        if item.kind == ItemKind::Blank {
            continue;
        }
        let Some(digest) = item.checksums.get(kind) else {
            continue;
        };
        if format == ManifestFormat::Sfv {
            out.push_str(&format!("{} {}\n", item.location(), digest.to_ascii_uppercase()));
        } else {
            out.push_str(&format!("{} *{}\n", digest, item.location()));
        }
    }
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::HashKind;
    use crate::manifest::Header;

    #[test]
    fn sfv_lines_split_machine_and_name() {
        let text = b"; comment\nGame/a.bin 352441C2\nloose file.rom 0000ABCD\n\n";
        let manifest = parse(text, ManifestFormat::Sfv, Path::new("set.sfv")).unwrap();
        assert_eq!(manifest.header.name, "set");
        let grouped = manifest.by_machine();
        assert_eq!(grouped["Game"][0].name, "a.bin");
        assert_eq!(grouped["Game"][0].checksums.crc32.as_deref(), Some("352441c2"));
        assert_eq!(grouped["loose file"][0].name, "loose file.rom");
        assert_eq!(grouped["loose file"][0].checksums.size, None);
    }

    #[test]
    fn md5sum_lines_accept_binary_marker() {
        let text = b"900150983cd24fb0d6963f7d28e17f72 *Game/abc.bin\n\
d41d8cd98f00b204e9800998ecf8427e  Game/empty.bin\n";
        let manifest = parse(text, ManifestFormat::Md5, Path::new("set.md5")).unwrap();
        let names: Vec<_> = manifest.by_machine()["Game"]
            .iter()
            .map(|item| item.name.clone())
            .collect();
        assert_eq!(names, vec!["abc.bin", "empty.bin"]);
    }

    #[test]
    fn bad_digest_names_the_line() {
        let text = b"# header\nnothex *Game/a.bin\n";
        match parse(text, ManifestFormat::Sha1, Path::new("set.sha1")) {
            Err(CodecError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {:?}", other.map(|m| m.len())),
        }
    }

    #[test]
    fn serialized_listing_skips_items_without_the_digest() {
        let manifest = Manifest::from_items(
            Header::named("Set"),
            vec![
                Item::rom(
                    "Game",
                    "a.bin",
                    Checksums::with_size(3).with_hash(HashKind::Crc32, "352441c2"),
                ),
                Item::rom(
                    "Game",
                    "b.bin",
                    Checksums::with_size(3).with_hash(HashKind::Md5, "900150983cd24fb0d6963f7d28e17f72"),
                ),
                Item::blank("Empty"),
            ],
        );
        let text = String::from_utf8(serialize(&manifest, ManifestFormat::Sfv)).unwrap();
        assert_eq!(text, "; Set\nGame/a.bin 352441C2\n");

        let parsed = parse(text.as_bytes(), ManifestFormat::Sfv, Path::new("Set.sfv")).unwrap();
        assert_eq!(parsed.len(), 1);
    }
}
