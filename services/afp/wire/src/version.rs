//! AFP protocol versions and version sets.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

/// AFP protocol versions, ordered oldest to newest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AfpVersion {
    /// AFP 1.1
    V11,
    /// AFP 2.0
    V20,
    /// AFP 2.1
    V21,
    /// AFP 2.2
    V22,
    /// AFP 3.0
    V30,
    /// AFP 3.1
    V31,
    /// AFP 3.2
    V32,
    /// AFP 3.3
    V33,
    /// AFP 3.4
    V34,
}

impl AfpVersion {
    /// Every known version, oldest first
    pub const ALL: [AfpVersion; 9] = [
        AfpVersion::V11,
        AfpVersion::V20,
        AfpVersion::V21,
        AfpVersion::V22,
        AfpVersion::V30,
        AfpVersion::V31,
        AfpVersion::V32,
        AfpVersion::V33,
        AfpVersion::V34,
    ];

    /// Version string used in FPGetSrvrInfo and FPLogin
    pub fn wire_name(self) -> &'static str {
        match self {
            AfpVersion::V11 => "AFPVersion 1.1",
            AfpVersion::V20 => "AFPVersion 2.0",
            AfpVersion::V21 => "AFPVersion 2.1",
            AfpVersion::V22 => "AFP2.2",
            AfpVersion::V30 => "AFPX03",
            AfpVersion::V31 => "AFP3.1",
            AfpVersion::V32 => "AFP3.2",
            AfpVersion::V33 => "AFP3.3",
            AfpVersion::V34 => "AFP3.4",
        }
    }

    /// Look up a version by its wire string
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.wire_name() == name)
    }

    /// Numeric form, e.g. 32 for AFP 3.2
    pub fn number(self) -> u8 {
        match self {
            AfpVersion::V11 => 11,
            AfpVersion::V20 => 20,
            AfpVersion::V21 => 21,
            AfpVersion::V22 => 22,
            AfpVersion::V30 => 30,
            AfpVersion::V31 => 31,
            AfpVersion::V32 => 32,
            AfpVersion::V33 => 33,
            AfpVersion::V34 => 34,
        }
    }

    /// Look up a version by its numeric form
    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.number() == number)
    }
}

impl fmt::Display for AfpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.number();
        write!(f, "{}.{}", n / 10, n % 10)
    }
}

impl FromStr for AfpVersion {
    type Err = String;

    /// Accepts "3.2", "32" or a wire string such as "AFP3.2"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(v) = Self::from_wire_name(s) {
            return Ok(v);
        }
        let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
        digits
            .parse::<u8>()
            .ok()
            .and_then(Self::from_number)
            .ok_or_else(|| format!("unknown AFP version: {}", s))
    }
}

/// Set of protocol versions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSet {
    versions: SmallVec<[AfpVersion; 9]>,
}

impl VersionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a version, keeping the set sorted and unique
    pub fn insert(&mut self, version: AfpVersion) {
        if let Err(pos) = self.versions.binary_search(&version) {
            self.versions.insert(pos, version);
        }
    }

    /// Whether the set contains `version`
    pub fn contains(&self, version: AfpVersion) -> bool {
        self.versions.binary_search(&version).is_ok()
    }

    /// Versions present in both sets
    pub fn intersection(&self, other: &VersionSet) -> VersionSet {
        self.versions
            .iter()
            .copied()
            .filter(|v| other.contains(*v))
            .collect()
    }

    /// Highest version, optionally bounded from above
    pub fn highest_at_most(&self, bound: Option<AfpVersion>) -> Option<AfpVersion> {
        self.versions
            .iter()
            .rev()
            .copied()
            .find(|v| bound.map_or(true, |b| *v <= b))
    }

    /// Iterate oldest first
    pub fn iter(&self) -> impl Iterator<Item = AfpVersion> + '_ {
        self.versions.iter().copied()
    }

    /// Number of versions in the set
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl FromIterator<AfpVersion> for VersionSet {
    fn from_iter<I: IntoIterator<Item = AfpVersion>>(iter: I) -> Self {
        let mut set = VersionSet::new();
        for v in iter {
            set.insert(v);
        }
        set
    }
}

impl fmt::Display for VersionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.versions.iter().map(|v| v.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(AfpVersion::from_wire_name("AFPX03"), Some(AfpVersion::V30));
        assert_eq!(AfpVersion::from_wire_name("AFP3.4"), Some(AfpVersion::V34));
        assert_eq!(AfpVersion::from_wire_name("AFP9.9"), None);
        assert_eq!(AfpVersion::V21.wire_name(), "AFPVersion 2.1");
    }

    #[test]
    fn test_parse_user_input() {
        assert_eq!("3.2".parse::<AfpVersion>().unwrap(), AfpVersion::V32);
        assert_eq!("22".parse::<AfpVersion>().unwrap(), AfpVersion::V22);
        assert_eq!("AFP3.1".parse::<AfpVersion>().unwrap(), AfpVersion::V31);
        assert!("4.0".parse::<AfpVersion>().is_err());
    }

    #[test]
    fn test_negotiation_helpers() {
        let client: VersionSet = [AfpVersion::V21, AfpVersion::V22, AfpVersion::V30, AfpVersion::V31, AfpVersion::V32]
            .into_iter()
            .collect();
        let server: VersionSet = [AfpVersion::V22, AfpVersion::V30, AfpVersion::V31, AfpVersion::V33]
            .into_iter()
            .collect();

        let common = client.intersection(&server);
        assert_eq!(common.len(), 3);
        assert_eq!(common.highest_at_most(None), Some(AfpVersion::V31));
        assert_eq!(common.highest_at_most(Some(AfpVersion::V30)), Some(AfpVersion::V30));
        assert_eq!(common.highest_at_most(Some(AfpVersion::V21)), None);
    }

    #[test]
    fn test_insert_is_sorted_and_unique() {
        let mut set = VersionSet::new();
        set.insert(AfpVersion::V32);
        set.insert(AfpVersion::V21);
        set.insert(AfpVersion::V32);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![AfpVersion::V21, AfpVersion::V32]);
    }
}
