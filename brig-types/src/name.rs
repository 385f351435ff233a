//! Package and project names.

use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Checks the shared naming rules for packages and projects.
///
/// A name must be at least two characters long, start with an ASCII
/// letter and only contain ASCII letters, digits, `_`, `+`, `-` or `.`.
fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() >= 2
        && first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '.'))
}

/// A package name.
///
/// Package names compare case-insensitively (ASCII folding) for
/// equality, ordering and hashing, while the case used on creation is
/// preserved for display.
///
/// ## Examples
/// ```
/// use std::str::FromStr;
///
/// use brig_types::PackageName;
///
/// let name = PackageName::from_str("libFoo")?;
/// assert_eq!(name, PackageName::from_str("libfoo")?);
/// assert_eq!(name.to_string(), "libFoo");
/// # Ok::<(), brig_types::Error>(())
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    /// Creates a new [`PackageName`] from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string violates the naming rules.
    pub fn new(name: String) -> Result<Self, Error> {
        if valid_name(&name) {
            Ok(PackageName(name))
        } else {
            Err(Error::InvalidPackageName(name))
        }
    }

    /// Returns the name as entered, with case preserved.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the case-folded form used for comparisons.
    pub fn folded(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl FromStr for PackageName {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        PackageName::new(input.to_string())
    }
}

impl Display for PackageName {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for PackageName {}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        let this = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let that = other.0.bytes().map(|b| b.to_ascii_lowercase());
        this.cmp(that)
    }
}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

/// A project name.
///
/// The same rules as for [`PackageName`] apply, but projects are a
/// distinct namespace (the `config.<project>.*` configuration variable
/// prefix derives from it).
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ProjectName(String);

impl ProjectName {
    /// Creates a new [`ProjectName`] from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string violates the naming rules.
    pub fn new(name: String) -> Result<Self, Error> {
        if valid_name(&name) {
            Ok(ProjectName(name))
        } else {
            Err(Error::InvalidProjectName(name))
        }
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ProjectName {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        ProjectName::new(input.to_string())
    }
}

impl Display for ProjectName {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("libhello")]
    #[case("hello")]
    #[case("lib-hello.2+x_y")]
    #[case("Xz")]
    fn valid_package_names(#[case] name: &str) {
        assert!(PackageName::from_str(name).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("x")]
    #[case("2fast")]
    #[case("-hello")]
    #[case(".hello")]
    #[case("lib hello")]
    #[case("lib/hello")]
    fn invalid_package_names(#[case] name: &str) {
        assert_eq!(
            PackageName::from_str(name),
            Err(Error::InvalidPackageName(name.to_string()))
        );
    }

    #[rstest]
    #[case("libhello", "LibHello", Ordering::Equal)]
    #[case("libA", "libb", Ordering::Less)]
    #[case("libB", "liba", Ordering::Greater)]
    fn package_name_ordering(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        let a = PackageName::from_str(a).unwrap();
        let b = PackageName::from_str(b).unwrap();
        assert_eq!(a.cmp(&b), expected);
    }

    #[test]
    fn package_name_hash_folds_case() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PackageName::from_str("libhello").unwrap());
        assert!(set.contains(&PackageName::from_str("LIBHELLO").unwrap()));
    }

    #[test]
    fn display_preserves_case() {
        let name = PackageName::from_str("LibHello").unwrap();
        assert_eq!(name.to_string(), "LibHello");
        assert_eq!(name.folded(), "libhello");
    }
}
