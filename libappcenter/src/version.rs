//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Lenient dotted version ordering
//!
//! App versions are free-form strings like `4.3`, `1.0-beta` or `12.0.1b3`.
//! A [`LooseVersion`] splits such a string into alternating runs:
//! - numeric runs (`12`, `0`, `1`) compare numerically
//! - non-numeric runs (`-beta`, `b`) compare lexically and sort after any
//!   numeric run at the same position
//! - `.` only separates runs and never becomes a run itself
//!
//! When one version has more runs than the other, the longer one is greater
//! unless every surplus run is a numeric zero, so `1.0` and `1.0.0` are equal.
//!
//! # Examples
//!
//! ```
//! use libappcenter::version::{compare, LooseVersion};
//! use std::cmp::Ordering;
//!
//! assert_eq!(compare("1.0", "1.0.1"), Ordering::Less);
//! assert_eq!(compare("1.10", "1.9"), Ordering::Greater);
//! assert_eq!(compare("2.0", "2.0.0"), Ordering::Equal);
//!
//! let beta: LooseVersion = "2.0-beta".parse().unwrap();
//! assert!(beta > LooseVersion::new("1.1"));
//! ```

use miette::Diagnostic;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing a version string
#[derive(Debug, Error, Diagnostic, PartialEq)]
pub enum VersionError {
    #[error("empty version string")]
    #[diagnostic(
        code(appcenter::version_error::empty),
        help("A version needs at least one character besides dots and whitespace")
    )]
    Empty,
}

/// One run of a version string
#[derive(Debug, Clone, PartialEq, Eq)]
enum Run {
    /// Digits with leading zeros stripped; `"0"` is stored as `""`
    Number(String),
    Text(String),
}

impl Run {
    fn zero() -> Self {
        Run::Number(String::new())
    }

    fn number(digits: &str) -> Self {
        Run::Number(digits.trim_start_matches('0').to_string())
    }

    fn from_buffer(buffer: String, numeric: bool) -> Self {
        if numeric {
            Run::number(&buffer)
        } else {
            Run::Text(buffer)
        }
    }
}

impl Ord for Run {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Leading zeros are gone, so a longer digit run is a larger number.
            // This avoids overflowing on absurd build numbers.
            (Run::Number(a), Run::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Run::Number(_), Run::Text(_)) => Ordering::Less,
            (Run::Text(_), Run::Number(_)) => Ordering::Greater,
            (Run::Text(a), Run::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Run {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn split_runs(version: &str) -> Vec<Run> {
    let mut runs = Vec::new();
    for piece in version.trim().split('.') {
        let mut current = String::new();
        let mut numeric = false;
        for c in piece.chars() {
            let is_digit = c.is_ascii_digit();
            if !current.is_empty() && is_digit != numeric {
                runs.push(Run::from_buffer(std::mem::take(&mut current), numeric));
            }
            numeric = is_digit;
            current.push(c);
        }
        if !current.is_empty() {
            runs.push(Run::from_buffer(current, numeric));
        }
    }
    runs
}

fn compare_runs(a: &[Run], b: &[Run]) -> Ordering {
    let zero = Run::zero();
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).unwrap_or(&zero);
        let right = b.get(i).unwrap_or(&zero);
        match left.cmp(right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Compare two version strings leniently.
///
/// Never fails: strings without any run compare equal to `0`.
pub fn compare(a: &str, b: &str) -> Ordering {
    compare_runs(&split_runs(a), &split_runs(b))
}

/// A parsed lenient version.
///
/// Equality follows the ordering, not the original text: `LooseVersion::new("1.0")`
/// equals `LooseVersion::new("1.0.0")`. Use [`LooseVersion::as_str`] when the exact
/// spelling matters.
#[derive(Debug, Clone)]
pub struct LooseVersion {
    original: String,
    runs: Vec<Run>,
}

impl LooseVersion {
    /// Create a version from any string without validation
    pub fn new(version: &str) -> Self {
        LooseVersion {
            original: version.to_string(),
            runs: split_runs(version),
        }
    }

    /// Parse a version, rejecting strings that contain no runs at all
    pub fn parse(version: &str) -> Result<Self, VersionError> {
        let parsed = LooseVersion::new(version);
        if parsed.runs.is_empty() {
            return Err(VersionError::Empty);
        }
        Ok(parsed)
    }

    /// The version exactly as it was given
    pub fn as_str(&self) -> &str {
        &self.original
    }
}

impl Ord for LooseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_runs(&self.runs, &other.runs)
    }
}

impl PartialOrd for LooseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for LooseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LooseVersion {}

impl fmt::Display for LooseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for LooseVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LooseVersion::parse(s)
    }
}

impl Serialize for LooseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

impl<'de> Deserialize<'de> for LooseVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(LooseVersion::new(&s))
    }
}
