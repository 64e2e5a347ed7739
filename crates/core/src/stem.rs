//! Stem kinds and the complete artifact set produced by separation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The kind of a separated stem track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemKind {
    Drums,
    Bass,
    /// Everything that is not drums, bass, or vocals (guitar, keys, ...).
    Other,
    Vocals,
}

impl StemKind {
    /// Every stem kind, in canonical order.
    pub const ALL: [StemKind; 4] = [
        StemKind::Drums,
        StemKind::Bass,
        StemKind::Other,
        StemKind::Vocals,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StemKind::Drums => "drums",
            StemKind::Bass => "bass",
            StemKind::Other => "other",
            StemKind::Vocals => "vocals",
        }
    }

    /// File name of this stem inside a cache entry.
    pub fn file_name(&self) -> &'static str {
        match self {
            StemKind::Drums => "drums.wav",
            StemKind::Bass => "bass.wav",
            StemKind::Other => "other.wav",
            StemKind::Vocals => "vocals.wav",
        }
    }
}

impl fmt::Display for StemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StemKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "drums" => Ok(StemKind::Drums),
            "bass" => Ok(StemKind::Bass),
            "other" => Ok(StemKind::Other),
            "vocals" => Ok(StemKind::Vocals),
            _ => Err(crate::Error::InvalidStemKind(s.to_string())),
        }
    }
}

/// The complete artifact set for one separated input: a reference per stem.
///
/// A `StemSet` can only be constructed with all four stems present, so a
/// partially separated result is unrepresentable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<StemKind, String>", into = "BTreeMap<StemKind, String>")]
pub struct StemSet {
    refs: BTreeMap<StemKind, String>,
}

impl StemSet {
    /// Build a set by producing a reference for every stem kind.
    pub fn build(mut reference: impl FnMut(StemKind) -> String) -> Self {
        let refs = StemKind::ALL
            .iter()
            .map(|&kind| (kind, reference(kind)))
            .collect();
        Self { refs }
    }

    /// Build from an existing map, requiring every stem kind to be present.
    pub fn from_refs(refs: BTreeMap<StemKind, String>) -> crate::Result<Self> {
        for kind in StemKind::ALL {
            if !refs.contains_key(&kind) {
                return Err(crate::Error::IncompleteStemSet {
                    missing: kind.as_str().to_string(),
                });
            }
        }
        Ok(Self { refs })
    }

    /// Get the reference for a stem kind.
    pub fn get(&self, kind: StemKind) -> &str {
        // Complete by construction.
        &self.refs[&kind]
    }

    /// Iterate over (kind, reference) pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (StemKind, &str)> {
        self.refs.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl TryFrom<BTreeMap<StemKind, String>> for StemSet {
    type Error = crate::Error;

    fn try_from(refs: BTreeMap<StemKind, String>) -> crate::Result<Self> {
        Self::from_refs(refs)
    }
}

impl From<StemSet> for BTreeMap<StemKind, String> {
    fn from(set: StemSet) -> Self {
        set.refs
    }
}
