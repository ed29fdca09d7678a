//! Logical part identity.
//!
//! Every consumer that groups log rows (balances, allocation, reversal, export)
//! resolves keys through [`normalize_identifier`]; there is no second copy of
//! these rules anywhere in the crate.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

use super::types::PartInfo;

const ZERO_WIDTH: [char; 5] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

const NO_BREAK_SPACES: [char; 3] = ['\u{00A0}', '\u{2007}', '\u{202F}'];

const DASHES: [char; 11] = [
    '\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2015}', '\u{2043}', '\u{2212}',
    '\u{FE58}', '\u{FE63}', '\u{FF0D}',
];

/// Canonical form of a MYOB number or part number.
///
/// Applied in order: trim, NFKC, drop zero-width/BOM characters, fold
/// no-break spaces into spaces, fold dash variants into `-`, drop whitespace,
/// uppercase, then keep only `[0-9A-Z]`.
pub fn normalize_identifier(raw: &str) -> String {
    let folded: String = raw
        .trim()
        .nfkc()
        .filter(|c| !ZERO_WIDTH.contains(c))
        .map(|c| {
            if NO_BREAK_SPACES.contains(&c) {
                ' '
            } else if DASHES.contains(&c) {
                '-'
            } else {
                c
            }
        })
        .filter(|c| !c.is_whitespace())
        .collect();

    folded
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        .collect()
}

/// Normalized `(MYOB number, part number)` pair identifying one logical part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartKey {
    myob: String,
    part: String,
}

impl PartKey {
    pub fn new(myob_number: &str, part_number: &str) -> Self {
        Self {
            myob: normalize_identifier(myob_number),
            part: normalize_identifier(part_number),
        }
    }

    pub fn myob(&self) -> &str {
        &self.myob
    }

    pub fn part(&self) -> &str {
        &self.part
    }

    /// A key is usable only when both halves kept at least one character
    pub fn is_complete(&self) -> bool {
        !self.myob.is_empty() && !self.part.is_empty()
    }
}

impl fmt::Display for PartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.myob, self.part)
    }
}

impl Serialize for PartKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PartKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let (myob, part) = raw
            .split_once('|')
            .ok_or_else(|| de::Error::custom(format!("part key '{raw}' is missing '|'")))?;
        Ok(PartKey::new(myob, part))
    }
}

/// Resolves the grouping key of a record's part fields.
pub fn group_key(part: &PartInfo) -> PartKey {
    PartKey::new(&part.myob_number, &part.part_number)
}
