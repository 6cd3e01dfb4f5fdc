//! Run settings.
//!
//! Settings are read from a TOML file (`datsmith.toml`) looked up in the
//! working directory and then in the user config directory. Every field has
//! a default, so an empty or partial file is valid. Command-line flags are
//! applied on top of whatever was loaded.

use crate::archive::ScanLevels;
use crate::checksums::HashSelection;
use crate::depot::DEFAULT_DEPTH;
use crate::error::ConfigError;
use crate::fingerprint::FingerprintOptions;
use crate::rebuild::OutputFormat;
use crate::scanner::{ScanConfig, ThreadingMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DEFAULT_CONFIG_FILE: &str = "datsmith.toml";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepotSettings {
    pub root: Option<PathBuf>,
    /// Number of directory levels under the root, one hex digit each.
    pub depth: usize,
    /// Rewrite depot files whose stored header does not match.
    pub reverify: bool,
}

impl Default for DepotSettings {
    fn default() -> Self {
        Self {
            root: None,
            depth: DEFAULT_DEPTH,
            reverify: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub levels: ScanLevels,
    pub hashes: HashSelection,
    pub quick: bool,
    pub threading: ThreadingMode,
    pub depot: DepotSettings,
    pub output_format: OutputFormat,
    /// Machine renames applied when building a manifest from a scan.
    pub remap: BTreeMap<String, String>,
    pub include_blanks: bool,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            source,
            path: path.to_path_buf(),
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            source,
            path: path.to_path_buf(),
        })
    }

    /// The first settings file found, or defaults when there is none.
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let candidates = std::iter::once(PathBuf::from(DEFAULT_CONFIG_FILE)).chain(default_path());
        for candidate in candidates {
            if candidate.is_file() {
                return Self::load(candidate);
            }
        }
        Ok(Self::default())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|error| {
            ConfigError::Invalid(format!("cannot serialise settings: {}", error))
        })?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                source,
                path: parent.to_path_buf(),
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            source,
            path: path.to_path_buf(),
        })
    }

    pub fn fingerprint(&self) -> FingerprintOptions {
        FingerprintOptions::default()
            .with_hashes(self.hashes)
            .with_quick(self.quick)
            .with_levels(self.levels)
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig::new(self.threading)
            .with_fingerprint(self.fingerprint())
            .with_blanks(self.include_blanks)
    }
}

pub fn default_path() -> Option<PathBuf> {
    let mut dir = dirs::config_dir()?;
    dir.push("datsmith");
    dir.push(DEFAULT_CONFIG_FILE);
    Some(dir)
}

/// Settings plus the cancellation flag shared with every worker of a run.
#[derive(Clone, Debug, Default)]
pub struct RunContext {
    pub settings: Settings,
    cancel: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveKind, ScanPolicy};
    use crate::checksums::HashKind;
    use tempfile::tempdir;

    #[test]
    fn empty_file_gives_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.depot.depth, DEFAULT_DEPTH);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let text = r#"
            hashes = ["crc32", "sha256"]
            quick = true
            threading = "sequential"
            output_format = "tar"

            [levels]
            zip = "both"

            [depot]
            depth = 2

            [remap]
            "old name" = "New Name"
        "#;
        let settings: Settings = toml::from_str(text).unwrap();
        assert!(settings.hashes.contains(HashKind::Sha256));
        assert!(!settings.hashes.contains(HashKind::Md5));
        assert!(settings.quick);
        assert_eq!(settings.threading, ThreadingMode::Sequential);
        assert_eq!(settings.output_format, OutputFormat::Tar);
        assert_eq!(settings.levels.policy_for(ArchiveKind::Zip), ScanPolicy::Both);
        assert_eq!(settings.levels.policy_for(ArchiveKind::Tar), ScanPolicy::ContentsOnly);
        assert_eq!(settings.depot.depth, 2);
        assert_eq!(settings.remap["old name"], "New Name");
        assert!(settings.fingerprint().quick);
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_CONFIG_FILE);
        let mut settings = Settings::default();
        settings.include_blanks = true;
        settings.depot.root = Some(dir.path().join("depot"));
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "quick = maybe").unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let context = RunContext::new(Settings::default());
        let flag = context.cancel_flag();
        let clone = context.clone();
        clone.cancel();
        assert!(context.is_cancelled());
        assert!(flag.load(Ordering::Relaxed));
    }
}
