//! Version constraints.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::{Error, Version};

/// One endpoint of a version constraint interval.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Bound {
    /// The endpoint version.
    pub version: Version,
    /// Whether the endpoint itself is excluded from the interval.
    pub open: bool,
}

impl Bound {
    /// Creates a closed (inclusive) bound.
    pub fn closed(version: Version) -> Self {
        Bound {
            version,
            open: false,
        }
    }

    /// Creates an open (exclusive) bound.
    pub fn open(version: Version) -> Self {
        Bound {
            version,
            open: true,
        }
    }
}

/// A version constraint.
///
/// Constraints are intervals `[min, max]` where either endpoint may be
/// absent and either endpoint may be open. The `== v` form is a closed
/// singleton interval and `*` is the unbounded interval; both
/// canonicalise on parse.
///
/// Constraints compose by [intersection][VersionConstraint::intersect];
/// an empty intersection is reported as `None` and treated as a hard
/// failure by callers.
///
/// Surface syntax (round-trips through [`Display`]/[`FromStr`]):
///
/// - `*`
/// - `== <v>`, `>= <v>`, `> <v>`, `<= <v>`, `< <v>`
/// - `[<v1> <v2>]`, `(<v1> <v2>)`, `[<v1> <v2>)`, `(<v1> <v2>]`
/// - `^<v>`: at least `v`, less than the next major version (or the
///   next minor version while the major version is zero)
/// - `~<v>`: at least `v`, less than the next minor version
///
/// The shorthand forms canonicalise to ranges whose upper endpoint is
/// the open earliest pre-release of the bumped version, so pre-releases
/// of the excluded version do not satisfy the constraint.
///
/// ## Examples
/// ```
/// use std::str::FromStr;
///
/// use brig_types::{Version, VersionConstraint};
///
/// let constraint = VersionConstraint::from_str("^1.2.0")?;
/// assert!(constraint.satisfies(&Version::from_str("1.9.3")?));
/// assert!(!constraint.satisfies(&Version::from_str("2.0.0-a.1")?));
/// # Ok::<(), brig_types::Error>(())
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VersionConstraint {
    /// The lower bound, if any.
    pub min: Option<Bound>,
    /// The upper bound, if any.
    pub max: Option<Bound>,
}

impl VersionConstraint {
    /// The unbounded constraint satisfied by every version.
    pub fn any() -> Self {
        VersionConstraint {
            min: None,
            max: None,
        }
    }

    /// The singleton constraint satisfied exactly by `version`.
    pub fn exact(version: Version) -> Self {
        VersionConstraint {
            min: Some(Bound::closed(version.clone())),
            max: Some(Bound::closed(version)),
        }
    }

    /// Returns `true` if this is the unbounded constraint.
    pub fn is_any(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Returns the exact version if this is a singleton constraint.
    pub fn exact_version(&self) -> Option<&Version> {
        match (&self.min, &self.max) {
            (Some(min), Some(max))
                if !min.open && !max.open && min.version == max.version =>
            {
                Some(&min.version)
            }
            _ => None,
        }
    }

    /// Returns `true` if `version` satisfies this constraint.
    ///
    /// The wildcard version satisfies every constraint.
    pub fn satisfies(&self, version: &Version) -> bool {
        if version.is_wildcard() {
            return true;
        }
        if let Some(min) = &self.min {
            let ordering = version.cmp(&min.version);
            if ordering.is_lt() || (min.open && ordering.is_eq()) {
                return false;
            }
        }
        if let Some(max) = &self.max {
            let ordering = version.cmp(&max.version);
            if ordering.is_gt() || (max.open && ordering.is_eq()) {
                return false;
            }
        }
        true
    }

    /// Intersects two constraints.
    ///
    /// Returns `None` if the intersection is empty. Intersection is
    /// commutative and associative and `intersect(c, *) == c`.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let min = tighter_bound(self.min.as_ref(), other.min.as_ref(), true);
        let max = tighter_bound(self.max.as_ref(), other.max.as_ref(), false);
        let constraint = VersionConstraint {
            min: min.cloned(),
            max: max.cloned(),
        };
        if let (Some(min), Some(max)) = (&constraint.min, &constraint.max) {
            match min.version.cmp(&max.version) {
                std::cmp::Ordering::Greater => return None,
                std::cmp::Ordering::Equal if min.open || max.open => return None,
                _ => {}
            }
        }
        Some(constraint)
    }
}

/// Picks the tighter of two optional bounds.
///
/// For lower bounds (`lower == true`) the greater version wins; for
/// upper bounds the lesser wins. At equal versions an open bound is
/// tighter than a closed one.
fn tighter_bound<'a>(
    a: Option<&'a Bound>,
    b: Option<&'a Bound>,
    lower: bool,
) -> Option<&'a Bound> {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(a), Some(b)) => {
            let ordering = a.version.cmp(&b.version);
            let a_wins = if lower {
                ordering.is_gt() || (ordering.is_eq() && a.open)
            } else {
                ordering.is_lt() || (ordering.is_eq() && a.open)
            };
            Some(if a_wins { a } else { b })
        }
    }
}

/// Bumps the numeric component at `index` of `version`'s upstream and
/// zeroes everything after it, producing the open-endpoint version used
/// by the `^`/`~` shorthands.
///
/// The endpoint carries an empty release so that pre-releases of the
/// bumped version fall outside the resulting interval.
fn bump_component(version: &Version, index: usize) -> Result<Version, Error> {
    let components: Vec<&str> = version.upstream().split('.').collect();
    let Some(component) = components.get(index) else {
        return Err(Error::NonNumericShorthand(version.to_string()));
    };
    let number: u64 = component
        .parse()
        .map_err(|_| Error::NonNumericShorthand(version.to_string()))?;
    let mut bumped: Vec<String> = components
        .iter()
        .take(index)
        .map(ToString::to_string)
        .collect();
    bumped.push((number + 1).to_string());
    while bumped.len() < components.len() {
        bumped.push("0".to_string());
    }
    Version::from_components(version.epoch(), &bumped.join("."), Some(""), None, 0)
}

impl FromStr for VersionConstraint {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidConstraint(input.to_string()));
        }
        if input == "*" {
            return Ok(VersionConstraint::any());
        }

        if let Some(rest) = input.strip_prefix("==") {
            let version = Version::from_str(rest.trim())?;
            return Ok(VersionConstraint::exact(version));
        }
        if let Some(rest) = input.strip_prefix(">=") {
            return Ok(VersionConstraint {
                min: Some(Bound::closed(Version::from_str(rest.trim())?)),
                max: None,
            });
        }
        if let Some(rest) = input.strip_prefix("<=") {
            return Ok(VersionConstraint {
                min: None,
                max: Some(Bound::closed(Version::from_str(rest.trim())?)),
            });
        }
        if let Some(rest) = input.strip_prefix('>') {
            return Ok(VersionConstraint {
                min: Some(Bound::open(Version::from_str(rest.trim())?)),
                max: None,
            });
        }
        if let Some(rest) = input.strip_prefix('<') {
            return Ok(VersionConstraint {
                min: None,
                max: Some(Bound::open(Version::from_str(rest.trim())?)),
            });
        }
        if let Some(rest) = input.strip_prefix('^') {
            let version = Version::from_str(rest.trim())?;
            // While the major version is zero the minor version is the
            // compatibility boundary.
            let index = usize::from(version.upstream().split('.').next() == Some("0"));
            let max = bump_component(&version, index)?;
            return Ok(VersionConstraint {
                min: Some(Bound::closed(version)),
                max: Some(Bound::open(max)),
            });
        }
        if let Some(rest) = input.strip_prefix('~') {
            let version = Version::from_str(rest.trim())?;
            let max = bump_component(&version, 1)?;
            return Ok(VersionConstraint {
                min: Some(Bound::closed(version)),
                max: Some(Bound::open(max)),
            });
        }

        let min_open = match input.chars().next() {
            Some('[') => false,
            Some('(') => true,
            _ => return Err(Error::InvalidConstraint(input.to_string())),
        };
        let max_open = match input.chars().last() {
            Some(']') => false,
            Some(')') => true,
            _ => return Err(Error::InvalidConstraint(input.to_string())),
        };
        let inner = &input[1..input.len() - 1];
        let mut parts = inner.split_whitespace();
        let (Some(min_str), Some(max_str), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidConstraint(input.to_string()));
        };
        let constraint = VersionConstraint {
            min: Some(Bound {
                version: Version::from_str(min_str)?,
                open: min_open,
            }),
            max: Some(Bound {
                version: Version::from_str(max_str)?,
                open: max_open,
            }),
        };
        match (&constraint.min, &constraint.max) {
            (Some(min), Some(max)) if min.version > max.version => {
                Err(Error::EmptyConstraint(input.to_string()))
            }
            (Some(min), Some(max))
                if min.version == max.version && (min.open || max.open) =>
            {
                Err(Error::EmptyConstraint(input.to_string()))
            }
            _ => Ok(constraint),
        }
    }
}

impl Display for VersionConstraint {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        if let Some(version) = self.exact_version() {
            return write!(fmt, "== {version}");
        }
        match (&self.min, &self.max) {
            (None, None) => write!(fmt, "*"),
            (Some(min), None) => {
                write!(fmt, "{} {}", if min.open { ">" } else { ">=" }, min.version)
            }
            (None, Some(max)) => {
                write!(fmt, "{} {}", if max.open { "<" } else { "<=" }, max.version)
            }
            (Some(min), Some(max)) => write!(
                fmt,
                "{}{} {}{}",
                if min.open { "(" } else { "[" },
                min.version,
                max.version,
                if max.open { ")" } else { "]" },
            ),
        }
    }
}

impl Serialize for VersionConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        VersionConstraint::from_str(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn version(s: &str) -> Version {
        Version::from_str(s).unwrap()
    }

    fn constraint(s: &str) -> VersionConstraint {
        VersionConstraint::from_str(s).unwrap()
    }

    #[rstest]
    #[case("*", "*")]
    #[case("== 1.2.3", "== 1.2.3")]
    #[case("==1.2.3", "== 1.2.3")]
    #[case(">= 1.0", ">= 1.0")]
    #[case("> 1.0", "> 1.0")]
    #[case("<= 2.0", "<= 2.0")]
    #[case("< 2.0", "< 2.0")]
    #[case("[1.0 2.0]", "[1.0 2.0]")]
    #[case("(1.0 2.0)", "(1.0 2.0)")]
    #[case("^1.2.3", "[1.2.3 2.0.0-)")]
    #[case("^0.2.3", "[0.2.3 0.3.0-)")]
    #[case("~1.2.3", "[1.2.3 1.3.0-)")]
    #[case("~1.2", "[1.2 1.3-)")]
    fn parse_and_canonical_display(#[case] input: &str, #[case] display: &str) {
        assert_eq!(constraint(input).to_string(), display);
    }

    #[rstest]
    #[case("")]
    #[case("=")]
    #[case("1.0")]
    #[case("[1.0]")]
    #[case("[1.0 2.0")]
    #[case("[2.0 1.0]")]
    #[case("(1.0 1.0]")]
    #[case("^x.1")]
    #[case("~2")]
    fn parse_invalid(#[case] input: &str) {
        assert!(VersionConstraint::from_str(input).is_err());
    }

    #[rstest]
    #[case("*")]
    #[case("== 1.2.3")]
    #[case(">= 1.0")]
    #[case("< 2.0")]
    #[case("[1.0 2.0)")]
    #[case("(1.0-a 2.0]")]
    fn display_round_trip(#[case] input: &str) {
        let parsed = constraint(input);
        assert_eq!(VersionConstraint::from_str(&parsed.to_string()).unwrap(), parsed);
    }

    #[rstest]
    #[case("*", "0.0.1", true)]
    #[case("== 1.2.3", "1.2.3", true)]
    #[case("== 1.2.3", "1.2.3+1", false)]
    #[case(">= 1.0", "1.0", true)]
    #[case("> 1.0", "1.0", false)]
    #[case("> 1.0", "1.0+1", true)]
    #[case("^1.0.0", "1.0.1", true)]
    #[case("^1.0.0", "2.0.0-a.1", false)]
    #[case("^1.0.0", "2.0.0", false)]
    #[case("[1.0 2.0]", "2.0", true)]
    #[case("[1.0 2.0)", "2.0", false)]
    #[case("[1.0 2.0)", "2.0-a.1", true)]
    fn satisfaction(#[case] constraint_str: &str, #[case] version_str: &str, #[case] expected: bool) {
        assert_eq!(
            constraint(constraint_str).satisfies(&version(version_str)),
            expected
        );
    }

    #[test]
    fn wildcard_version_satisfies_everything() {
        let wildcard = Version::wildcard();
        for c in ["*", "== 1.2.3", ">= 9", "(1.0 2.0)"] {
            assert!(constraint(c).satisfies(&wildcard), "{c}");
        }
    }

    #[rstest]
    #[case(">= 1.0", "< 2.0", Some("[1.0 2.0)"))]
    #[case(">= 1.0", ">= 1.5", Some(">= 1.5"))]
    #[case("<= 2.0", "< 2.0", Some("< 2.0"))]
    #[case("== 1.5", "[1.0 2.0]", Some("== 1.5"))]
    #[case(">= 2.0", "< 1.0", None)]
    #[case("> 1.0", "< 1.0", None)]
    #[case(">= 1.0", "<= 1.0", Some("== 1.0"))]
    #[case("> 1.0", "<= 1.0", None)]
    fn intersection(
        #[case] a: &str,
        #[case] b: &str,
        #[case] expected: Option<&str>,
    ) {
        let a = constraint(a);
        let b = constraint(b);
        let forward = a.intersect(&b);
        let backward = b.intersect(&a);
        assert_eq!(forward, backward);
        assert_eq!(forward.map(|c| c.to_string()), expected.map(ToString::to_string));
    }

    #[test]
    fn intersection_with_any_is_identity() {
        for c in ["*", "== 1.2.3", ">= 1.0", "[1.0 2.0)"] {
            let parsed = constraint(c);
            assert_eq!(parsed.intersect(&VersionConstraint::any()), Some(parsed.clone()));
        }
    }

    #[test]
    fn intersection_is_associative() {
        let a = constraint(">= 1.0");
        let b = constraint("< 2.0");
        let c = constraint("[1.5 3.0]");
        let left = a.intersect(&b).and_then(|ab| ab.intersect(&c));
        let right = b.intersect(&c).and_then(|bc| a.intersect(&bc));
        assert_eq!(left, right);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn arbitrary_constraint() -> impl Strategy<Value = VersionConstraint> {
            let version = r"[0-9]{1,2}\.[0-9]{1,2}\.[0-9]{1,2}";
            prop_oneof![
                Just("*".to_string()),
                (Just("== "), version).prop_map(|(op, v)| format!("{op}{v}")),
                (Just(">= "), version).prop_map(|(op, v)| format!("{op}{v}")),
                (Just("< "), version).prop_map(|(op, v)| format!("{op}{v}")),
                version.prop_map(|v| format!("^{v}")),
            ]
            .prop_map(|s| VersionConstraint::from_str(&s).unwrap())
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(500))]

            #[test]
            fn parse_format_round_trip(constraint in arbitrary_constraint()) {
                let reparsed = VersionConstraint::from_str(&constraint.to_string()).unwrap();
                prop_assert_eq!(reparsed, constraint);
            }

            #[test]
            fn intersection_commutes(
                a in arbitrary_constraint(),
                b in arbitrary_constraint(),
            ) {
                prop_assert_eq!(a.intersect(&b), b.intersect(&a));
            }

            #[test]
            fn intersection_result_is_subset(
                a in arbitrary_constraint(),
                b in arbitrary_constraint(),
                version in r"[0-9]{1,2}\.[0-9]{1,2}\.[0-9]{1,2}",
            ) {
                let version = Version::from_str(&version).unwrap();
                if let Some(both) = a.intersect(&b) {
                    prop_assert_eq!(
                        both.satisfies(&version),
                        a.satisfies(&version) && b.satisfies(&version)
                    );
                }
            }
        }
    }
}
