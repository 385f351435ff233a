//! Package versions.

use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::Error;

/// The canonical form of a numeric version component.
///
/// Numeric components are zero-padded to this width so that canonical
/// strings compare identically under byte-lexicographic and numeric
/// ordering.
const CANONICAL_NUMERIC_WIDTH: usize = 16;

/// The canonical release of a final (non-pre-release) version.
///
/// `~` byte-orders after every alphanumeric character, which makes an
/// absent release sort after any specified pre-release string.
const FINAL_RELEASE_SENTINEL: &str = "~";

/// The upstream string of the wildcard version.
const WILDCARD_UPSTREAM: &str = "*";

/// Checks that a version component string is well-formed.
///
/// Components are dot-separated, non-empty runs of ASCII alphanumerics.
fn valid_component_string(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(|c| !c.is_empty() && c.bytes().all(|b| b.is_ascii_alphanumeric()))
}

/// Derives the canonical form of an upstream or release string.
///
/// Splits on `.`, lower-cases alphanumeric components, zero-pads purely
/// numeric components to [`CANONICAL_NUMERIC_WIDTH`] digits and trims
/// trailing zero components, so that `1.0.0`, `1.0` and `1` share one
/// canonical form.
fn canonicalize(s: &str) -> String {
    let zero = "0".repeat(CANONICAL_NUMERIC_WIDTH);
    let mut parts: Vec<String> = s
        .split('.')
        .map(|c| {
            if c.bytes().all(|b| b.is_ascii_digit()) {
                let trimmed = c.trim_start_matches('0');
                if trimmed.is_empty() {
                    zero.clone()
                } else {
                    format!("{trimmed:0>CANONICAL_NUMERIC_WIDTH$}")
                }
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect();
    while parts.len() > 1 && parts.last().map(String::as_str) == Some(zero.as_str()) {
        parts.pop();
    }
    parts.join(".")
}

/// A package version.
///
/// A version consists of five components:
///
/// - `epoch` overrides upstream versioning scheme changes,
/// - `upstream` is the upstream version proper,
/// - `release` is an optional pre-release string; **absent denotes a
///   final version and orders after any specified release**, while an
///   empty release denotes the earliest possible pre-release and orders
///   before everything,
/// - `revision` is the package revision; absent and `0` compare equal
///   but format differently,
/// - `iteration` is a local rebuild counter for external packages.
///
/// The surface syntax is
/// `[+<epoch>-]<upstream>[-<release>][+<revision>][#<iteration>]` and
/// round-trips through [`Display`]/[`FromStr`].
///
/// Comparison uses canonical keys so that, for example, `1.0` and
/// `1.0.0` are equal and `1.0.0-alpha.2` orders before `1.0.0`.
///
/// ## Examples
/// ```
/// use std::str::FromStr;
///
/// use brig_types::Version;
///
/// let a = Version::from_str("1.2.0")?;
/// let b = Version::from_str("1.2.0-b.1")?;
/// assert!(b < a);
/// assert_eq!(a, Version::from_str("1.2")?);
/// # Ok::<(), brig_types::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct Version {
    epoch: u16,
    upstream: String,
    release: Option<String>,
    revision: Option<u32>,
    iteration: u32,
    canonical_upstream: String,
    canonical_release: String,
}

impl Version {
    /// Creates a new [`Version`] from components.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream or release strings are not
    /// well-formed component strings.
    pub fn from_components(
        epoch: u16,
        upstream: &str,
        release: Option<&str>,
        revision: Option<u32>,
        iteration: u32,
    ) -> Result<Self, Error> {
        if !valid_component_string(upstream) {
            return Err(Error::InvalidVersion(upstream.to_string()));
        }
        if let Some(release) = release {
            if !release.is_empty() && !valid_component_string(release) {
                return Err(Error::InvalidVersion(format!("{upstream}-{release}")));
            }
        }
        let canonical_release = match release {
            None => FINAL_RELEASE_SENTINEL.to_string(),
            Some("") => String::new(),
            Some(release) => canonicalize(release),
        };
        Ok(Version {
            epoch,
            canonical_upstream: canonicalize(upstream),
            upstream: upstream.to_string(),
            release: release.map(ToString::to_string),
            canonical_release,
            revision,
            iteration,
        })
    }

    /// Returns the distinguished wildcard version.
    ///
    /// The wildcard version satisfies every constraint and is used to
    /// represent system packages of unknown version.
    pub fn wildcard() -> Self {
        Version {
            epoch: 0,
            upstream: WILDCARD_UPSTREAM.to_string(),
            release: None,
            revision: None,
            iteration: 0,
            canonical_upstream: WILDCARD_UPSTREAM.to_string(),
            canonical_release: FINAL_RELEASE_SENTINEL.to_string(),
        }
    }

    /// Returns `true` if this is the wildcard version.
    pub fn is_wildcard(&self) -> bool {
        self.upstream == WILDCARD_UPSTREAM
    }

    /// Returns the epoch.
    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    /// Returns the upstream version string as entered.
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// Returns the release string, if any.
    ///
    /// `None` denotes a final version.
    pub fn release(&self) -> Option<&str> {
        self.release.as_deref()
    }

    /// Returns `true` if this is a final (non-pre-release) version.
    pub fn is_final(&self) -> bool {
        self.release.is_none()
    }

    /// Returns the revision, if any.
    pub fn revision(&self) -> Option<u32> {
        self.revision
    }

    /// Returns the revision treating absence as `0`.
    pub fn effective_revision(&self) -> u32 {
        self.revision.unwrap_or(0)
    }

    /// Returns the iteration.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Returns a copy of this version with the iteration bumped by one.
    pub fn bump_iteration(&self) -> Self {
        let mut version = self.clone();
        version.iteration += 1;
        version
    }

    /// Returns the canonical comparison key.
    ///
    /// Byte-lexicographic comparison of canonical keys agrees with
    /// semantic version comparison.
    pub fn canonical(&self) -> String {
        format!(
            "{:05}-{}-{}-{:010}-{:010}",
            self.epoch,
            self.canonical_upstream,
            self.canonical_release,
            self.effective_revision(),
            self.iteration,
        )
    }

    /// Compares two versions, optionally ignoring revision and iteration.
    pub fn compare(&self, other: &Self, ignore_revision: bool, ignore_iteration: bool) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.canonical_upstream.cmp(&other.canonical_upstream))
            .then_with(|| self.canonical_release.cmp(&other.canonical_release))
            .then_with(|| {
                if ignore_revision {
                    Ordering::Equal
                } else {
                    self.effective_revision().cmp(&other.effective_revision())
                }
            })
            .then_with(|| {
                if ignore_revision || ignore_iteration {
                    Ordering::Equal
                } else {
                    self.iteration.cmp(&other.iteration)
                }
            })
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input == WILDCARD_UPSTREAM {
            return Ok(Version::wildcard());
        }

        let mut rest = input;
        let mut epoch = 0u16;
        if let Some(stripped) = rest.strip_prefix('+') {
            let Some((epoch_str, tail)) = stripped.split_once('-') else {
                return Err(Error::InvalidVersion(input.to_string()));
            };
            epoch = epoch_str
                .parse()
                .map_err(|_| Error::InvalidEpoch(epoch_str.to_string()))?;
            if epoch == 0 {
                return Err(Error::InvalidEpoch(epoch_str.to_string()));
            }
            rest = tail;
        }

        let iteration = match rest.rsplit_once('#') {
            Some((tail, iteration_str)) => {
                rest = tail;
                iteration_str
                    .parse()
                    .map_err(|_| Error::InvalidVersion(input.to_string()))?
            }
            None => 0,
        };

        let revision = match rest.rsplit_once('+') {
            Some((tail, revision_str)) => {
                rest = tail;
                Some(
                    revision_str
                        .parse()
                        .map_err(|_| Error::InvalidRevision(revision_str.to_string()))?,
                )
            }
            None => None,
        };

        let (upstream, release) = match rest.split_once('-') {
            Some((upstream, release)) => (upstream, Some(release)),
            None => (rest, None),
        };

        Version::from_components(epoch, upstream, release, revision, iteration)
            .map_err(|_| Error::InvalidVersion(input.to_string()))
    }
}

impl Display for Version {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        if self.epoch > 0 {
            write!(fmt, "+{}-", self.epoch)?;
        }
        write!(fmt, "{}", self.upstream)?;
        if let Some(release) = &self.release {
            write!(fmt, "-{release}")?;
        }
        if let Some(revision) = self.revision {
            write!(fmt, "+{revision}")?;
        }
        if self.iteration > 0 {
            write!(fmt, "#{}", self.iteration)?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other, false, false).is_eq()
    }
}

impl Eq for Version {}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other, false, false)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        self.canonical_upstream.hash(state);
        self.canonical_release.hash(state);
        self.effective_revision().hash(state);
        self.iteration.hash(state);
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::from_str(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("1.2.3", 0, "1.2.3", None, None, 0)]
    #[case("+2-1.2.3", 2, "1.2.3", None, None, 0)]
    #[case("1.2.3-a.1", 0, "1.2.3", Some("a.1"), None, 0)]
    #[case("1.2.3-", 0, "1.2.3", Some(""), None, 0)]
    #[case("1.2.3+4", 0, "1.2.3", None, Some(4), 0)]
    #[case("1.2.3+0", 0, "1.2.3", None, Some(0), 0)]
    #[case("1.2.3-b.2+1#3", 0, "1.2.3", Some("b.2"), Some(1), 3)]
    #[case("20240101", 0, "20240101", None, None, 0)]
    fn parse(
        #[case] input: &str,
        #[case] epoch: u16,
        #[case] upstream: &str,
        #[case] release: Option<&str>,
        #[case] revision: Option<u32>,
        #[case] iteration: u32,
    ) {
        let version = Version::from_str(input).unwrap();
        assert_eq!(version.epoch(), epoch);
        assert_eq!(version.upstream(), upstream);
        assert_eq!(version.release(), release);
        assert_eq!(version.revision(), revision);
        assert_eq!(version.iteration(), iteration);
    }

    #[rstest]
    #[case("")]
    #[case("-1")]
    #[case("+0-1.2.3")]
    #[case("+x-1.2.3")]
    #[case("1..2")]
    #[case(".1")]
    #[case("1.")]
    #[case("1.2.3+x")]
    #[case("1.2.3-a,b")]
    fn parse_invalid(#[case] input: &str) {
        assert!(Version::from_str(input).is_err());
    }

    #[rstest]
    #[case("1.2.3")]
    #[case("+2-1.2.3")]
    #[case("1.2.3-a.1")]
    #[case("1.2.3-")]
    #[case("1.2.3+0")]
    #[case("1.2.3-b.2+1#3")]
    fn display_round_trip(#[case] input: &str) {
        let version = Version::from_str(input).unwrap();
        assert_eq!(version.to_string(), input);
        assert_eq!(Version::from_str(&version.to_string()).unwrap(), version);
    }

    #[rstest]
    #[case("1.0", "1.0.0", Ordering::Equal)]
    #[case("1", "1.0.0", Ordering::Equal)]
    #[case("1.2.3+0", "1.2.3", Ordering::Equal)]
    #[case("01.2", "1.2", Ordering::Equal)]
    #[case("1.2.3-A.1", "1.2.3-a.1", Ordering::Equal)]
    #[case("1.2.3-a.1", "1.2.3", Ordering::Less)]
    #[case("1.2.3-", "1.2.3-a", Ordering::Less)]
    #[case("1.2.3-b", "1.2.3-a", Ordering::Greater)]
    #[case("1.2.3-a.2", "1.2.3-a.10", Ordering::Less)]
    #[case("1.2.3", "1.2.4", Ordering::Less)]
    #[case("1.10", "1.9", Ordering::Greater)]
    #[case("+1-0.1", "2.0", Ordering::Greater)]
    #[case("1.2.3+1", "1.2.3+2", Ordering::Less)]
    #[case("1.2.3#1", "1.2.3", Ordering::Greater)]
    fn ordering(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        let a = Version::from_str(a).unwrap();
        let b = Version::from_str(b).unwrap();
        assert_eq!(a.cmp(&b), expected);
        assert_eq!(b.cmp(&a), expected.reverse());
    }

    #[rstest]
    #[case("1.2.3+1", "1.2.3+2", true, false, Ordering::Equal)]
    #[case("1.2.3#1", "1.2.3#2", false, true, Ordering::Equal)]
    #[case("1.2.3#1", "1.2.3#2", false, false, Ordering::Less)]
    fn relaxed_comparison(
        #[case] a: &str,
        #[case] b: &str,
        #[case] ignore_revision: bool,
        #[case] ignore_iteration: bool,
        #[case] expected: Ordering,
    ) {
        let a = Version::from_str(a).unwrap();
        let b = Version::from_str(b).unwrap();
        assert_eq!(a.compare(&b, ignore_revision, ignore_iteration), expected);
    }

    #[test]
    fn canonical_agrees_with_semantic_order() {
        let inputs = [
            "0.1", "1.0-", "1.0-a.1", "1.0-b", "1.0", "1.0+1", "1.0.1", "1.2", "+1-0.1",
        ];
        let versions: Vec<Version> = inputs
            .iter()
            .map(|s| Version::from_str(s).unwrap())
            .collect();
        let mut semantic = versions.clone();
        semantic.sort();
        let mut lexicographic = versions.clone();
        lexicographic.sort_by_key(Version::canonical);
        assert_eq!(semantic, lexicographic);
    }

    #[test]
    fn wildcard() {
        let wildcard = Version::from_str("*").unwrap();
        assert!(wildcard.is_wildcard());
        assert_eq!(wildcard.to_string(), "*");
        assert!(!Version::from_str("1.0").unwrap().is_wildcard());
    }

    #[test]
    fn bump_iteration() {
        let version = Version::from_str("1.0#1").unwrap();
        assert_eq!(version.bump_iteration().to_string(), "1.0#2");
    }

    #[test]
    fn serde_round_trip() {
        let version = Version::from_str("+1-1.2.3-a.1+2#3").unwrap();
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"+1-1.2.3-a.1+2#3\"");
        assert_eq!(serde_json::from_str::<Version>(&json).unwrap(), version);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        prop_compose! {
            fn arbitrary_version()(
                epoch in 0u16..4,
                upstream in r"[0-9]{1,3}(\.[0-9a-z]{1,3}){0,3}",
                release in prop::option::of(r"[0-9a-z]{1,3}(\.[0-9a-z]{1,3}){0,2}"),
                revision in prop::option::of(0u32..10),
                iteration in 0u32..4,
            ) -> Version {
                Version::from_components(epoch, &upstream, release.as_deref(), revision, iteration)
                    .unwrap()
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(1000))]

            #[test]
            fn parse_format_round_trip(version in arbitrary_version()) {
                let reparsed = Version::from_str(&version.to_string()).unwrap();
                prop_assert_eq!(&reparsed, &version);
                prop_assert_eq!(reparsed.to_string(), version.to_string());
            }

            #[test]
            fn comparison_is_a_total_order(
                a in arbitrary_version(),
                b in arbitrary_version(),
                c in arbitrary_version(),
            ) {
                prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
                if a <= b && b <= c {
                    prop_assert!(a <= c);
                }
            }

            #[test]
            fn canonical_matches_semantic(a in arbitrary_version(), b in arbitrary_version()) {
                prop_assert_eq!(a.cmp(&b), a.canonical().cmp(&b.canonical()));
            }
        }
    }
}
