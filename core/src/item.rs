use crate::checksums::Checksums;
use crate::manifest::BucketKey;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// What an item describes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Rom,
    Disk,
    /// Placeholder for an empty directory.
    Blank,
}

impl Display for ItemKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rom => write!(f, "rom"),
            Self::Disk => write!(f, "disk"),
            Self::Blank => write!(f, "blank"),
        }
    }
}

/// Duplicate classification assigned by merge and diff. Ordered by severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DupeClass {
    #[default]
    Unique,
    /// Duplicated within the same input.
    InternalDupe,
    /// Duplicated across inputs.
    ExternalDupe,
}

/// Which input manifest contributed an item.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Origin {
    /// Position of the input in the run.
    pub input: usize,
    /// Human readable tag, usually the input manifest's name.
    pub tag: String,
}

impl Origin {
    pub fn new(input: usize, tag: impl Into<String>) -> Self {
        Self {
            input,
            tag: tag.into(),
        }
    }
}

/// One addressable rom, disk or blank placeholder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub kind: ItemKind,
    pub checksums: Checksums,
    pub machine: String,
    pub origin: Origin,
    #[serde(default)]
    pub dupe: DupeClass,
    /// Origins of duplicates folded into this record by merge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<Origin>,
}

impl Item {
    pub fn new(
        kind: ItemKind,
        machine: impl Into<String>,
        name: impl Into<String>,
        checksums: Checksums,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            checksums,
            machine: machine.into(),
            origin: Origin::default(),
            dupe: DupeClass::Unique,
            merged_from: Vec::new(),
        }
    }

    pub fn rom(machine: impl Into<String>, name: impl Into<String>, checksums: Checksums) -> Self {
        Self::new(ItemKind::Rom, machine, name, checksums)
    }

    pub fn disk(machine: impl Into<String>, name: impl Into<String>, checksums: Checksums) -> Self {
        Self::new(ItemKind::Disk, machine, name, checksums)
    }

    pub fn blank(machine: impl Into<String>) -> Self {
        Self::new(ItemKind::Blank, machine, String::new(), Checksums::default())
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn bucket_key(&self) -> BucketKey {
        BucketKey::of(&self.checksums)
    }

    /// The contributing origin followed by every merged-in origin.
    pub fn origins(&self) -> impl Iterator<Item = &Origin> {
        std::iter::once(&self.origin).chain(self.merged_from.iter())
    }

    pub fn has_origin_input(&self, input: usize) -> bool {
        self.origins().any(|origin| origin.input == input)
    }

    /// `machine/name`, as used in logs and flat listings.
    pub fn location(&self) -> String {
        if self.name.is_empty() {
            self.machine.clone()
        } else {
            format!("{}/{}", self.machine, self.name)
        }
    }
}
