//! The available-package manifest format.
//!
//! An available-package manifest is the unit a repository's package
//! list consists of: a small header manifest (format `version`, the
//! optional test-dependency routing values) followed by the package
//! manifest proper, the two separated by a `:` line:
//!
//! ```text
//! : 1
//! version: 1
//! :
//! name: libhello
//! version: 1.2.3
//! project: hello
//! type: lib
//! language: cc
//! depends: libfoo >= 1.0.0 | libbar ^1.0 ? (!defined(config.hello.x))
//! sha256sum: ...
//! location: libhello-1.2.3.tar.gz
//! fragment: 6f93...
//! ```
//!
//! Unknown values in either manifest are ignored for forward
//! compatibility; malformed values are fatal.

use std::str::FromStr;

use winnow::{
    ModalResult,
    Parser,
    ascii::{space0, space1},
    combinator::{alt, cut_err, opt, preceded, separated},
    error::{ContextError, ErrMode, StrContext, StrContextValue},
    token::{one_of, take_while},
};

use crate::{
    Dependency, DependencyAlternative, DependencyGroup, Error, Language, PackageName,
    PackageType, Version, VersionConstraint,
};

/// The manifest format version this library understands.
const MANIFEST_VERSION: u32 = 1;

/// The header of an available-package manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManifestHeader {
    /// The manifest format version; must be [`MANIFEST_VERSION`].
    pub version: u32,
    /// The package type test packages of this package run as.
    pub test_dependency_type: Option<PackageType>,
    /// The dependency group index that holds the test dependencies.
    pub test_dependency_index: Option<usize>,
}

/// A cross-reference from a package to a repository fragment.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FragmentLocation {
    /// The path of the package archive relative to the fragment root.
    pub location: String,
    /// The identity of the repository fragment, if the repository is
    /// fragmented.
    pub fragment: Option<String>,
}

/// A parsed package manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageManifest {
    /// The package name.
    pub name: PackageName,
    /// The package version.
    pub version: Version,
    /// The project the package belongs to.
    pub project: Option<crate::ProjectName>,
    /// The package type.
    pub package_type: Option<PackageType>,
    /// The languages the package is written in.
    pub languages: Vec<Language>,
    /// The declared dependency alternative groups, in declaration
    /// order.
    pub dependencies: Vec<DependencyGroup>,
    /// The bootstrap build fragment.
    pub bootstrap_build: Option<String>,
    /// The root build fragment.
    pub root_build: Option<String>,
    /// The source archive checksum.
    pub sha256sum: Option<String>,
    /// Repository fragment cross-references.
    pub locations: Vec<FragmentLocation>,
}

/// A complete available-package manifest: header plus package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AvailablePackageManifest {
    /// The header manifest.
    pub header: ManifestHeader,
    /// The package manifest.
    pub package: PackageManifest,
}

impl FromStr for AvailablePackageManifest {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        parse_available_manifest(input)
    }
}

/// Splits manifest text into `(key, value)` pairs, handling the
/// multi-line value syntax (a value of `\` opens a block terminated by
/// a line holding only `\`).
fn manifest_pairs(
    lines: &mut std::iter::Peekable<std::str::Lines<'_>>,
) -> Result<Vec<(String, String)>, Error> {
    let mut pairs = Vec::new();
    while let Some(line) = lines.peek() {
        let trimmed = line.trim();
        if trimmed == ":" {
            break;
        }
        let line = lines.next().unwrap_or_default();
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            return Err(Error::ManifestParse(format!(
                "expected 'key: value', got '{trimmed}'"
            )));
        };
        let key = key.trim().to_string();
        let value = value.trim();
        if value == "\\" {
            let mut block = Vec::new();
            loop {
                match lines.next() {
                    Some(block_line) if block_line.trim_end() == "\\" => break,
                    Some(block_line) => block.push(block_line),
                    None => {
                        return Err(Error::ManifestParse(format!(
                            "unterminated multi-line value for '{key}'"
                        )));
                    }
                }
            }
            pairs.push((key, block.join("\n")));
        } else {
            pairs.push((key, value.to_string()));
        }
    }
    Ok(pairs)
}

/// Parses a complete available-package manifest.
///
/// # Errors
///
/// Returns an error if the format version is unsupported, a required
/// value is missing, or any value is malformed. Unknown values are
/// ignored.
pub fn parse_available_manifest(input: &str) -> Result<AvailablePackageManifest, Error> {
    let mut lines = input.lines().peekable();

    match lines.next().map(str::trim) {
        Some(": 1") => {}
        Some(other) => {
            return Err(Error::ManifestParse(format!(
                "expected format introducer ': 1', got '{other}'"
            )));
        }
        None => return Err(Error::ManifestParse("empty manifest".to_string())),
    }

    let header_pairs = manifest_pairs(&mut lines)?;
    let mut header = ManifestHeader {
        version: 0,
        test_dependency_type: None,
        test_dependency_index: None,
    };
    let mut have_version = false;
    for (key, value) in header_pairs {
        match key.as_str() {
            "version" => {
                header.version = value
                    .parse()
                    .map_err(|_| Error::UnsupportedManifestVersion(value.clone()))?;
                have_version = true;
            }
            "test-dependency-type" => {
                header.test_dependency_type = Some(PackageType::from_str(&value)?);
            }
            "test-dependency-index" => {
                header.test_dependency_index =
                    Some(value.parse().map_err(|_| Error::InvalidManifestValue {
                        key,
                        reason: value.clone(),
                    })?);
            }
            // Unknown header values are ignored.
            _ => {}
        }
    }
    if !have_version {
        return Err(Error::ManifestParse("missing manifest version".to_string()));
    }
    if header.version != MANIFEST_VERSION {
        return Err(Error::UnsupportedManifestVersion(header.version.to_string()));
    }

    match lines.next().map(str::trim) {
        Some(":") => {}
        _ => {
            return Err(Error::ManifestParse(
                "expected ':' separator before package manifest".to_string(),
            ));
        }
    }

    let package_pairs = manifest_pairs(&mut lines)?;
    if lines.next().is_some() {
        return Err(Error::ManifestParse(
            "unexpected second package manifest".to_string(),
        ));
    }

    let mut name = None;
    let mut version = None;
    let mut project = None;
    let mut package_type = None;
    let mut languages = Vec::new();
    let mut dependencies = Vec::new();
    let mut bootstrap_build = None;
    let mut root_build = None;
    let mut sha256sum = None;
    let mut locations: Vec<FragmentLocation> = Vec::new();

    for (key, value) in package_pairs {
        match key.as_str() {
            "name" => name = Some(PackageName::from_str(&value)?),
            "version" => version = Some(Version::from_str(&value)?),
            "project" => project = Some(crate::ProjectName::from_str(&value)?),
            "type" => package_type = Some(PackageType::from_str(&value)?),
            "language" => languages.push(parse_language(&value)?),
            "depends" => dependencies.push(parse_dependency_group(&value)?),
            "bootstrap-build" => bootstrap_build = Some(value),
            "root-build" => root_build = Some(value),
            "sha256sum" => {
                if value.len() != 64 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(Error::InvalidManifestValue {
                        key,
                        reason: value,
                    });
                }
                sha256sum = Some(value);
            }
            "location" => locations.push(FragmentLocation {
                location: value,
                fragment: None,
            }),
            "fragment" => match locations.last_mut() {
                Some(location) if location.fragment.is_none() => {
                    location.fragment = Some(value);
                }
                _ => {
                    return Err(Error::ManifestParse(
                        "fragment value without a preceding location".to_string(),
                    ));
                }
            },
            // Unknown package values are ignored.
            _ => {}
        }
    }

    let name = name.ok_or_else(|| Error::ManifestParse("missing package name".to_string()))?;
    let version =
        version.ok_or_else(|| Error::ManifestParse("missing package version".to_string()))?;

    Ok(AvailablePackageManifest {
        header,
        package: PackageManifest {
            name,
            version,
            project,
            package_type,
            languages,
            dependencies,
            bootstrap_build,
            root_build,
            sha256sum,
            locations,
        },
    })
}

/// Parses a `language:` value (`cc` or `rust=impl`).
fn parse_language(value: &str) -> Result<Language, Error> {
    let (name, implementation) = match value.split_once('=') {
        Some((name, "impl")) => (name, true),
        Some((_, other)) => {
            return Err(Error::InvalidManifestValue {
                key: "language".to_string(),
                reason: other.to_string(),
            });
        }
        None => (value, false),
    };
    if name.is_empty() {
        return Err(Error::InvalidManifestValue {
            key: "language".to_string(),
            reason: value.to_string(),
        });
    }
    Ok(Language {
        name: name.to_string(),
        implementation,
    })
}

/// Parses a `depends:` value into a [`DependencyGroup`].
///
/// # Errors
///
/// Returns an error with the offending position rendered into the
/// message if the value does not match the dependency grammar.
pub fn parse_dependency_group(value: &str) -> Result<DependencyGroup, Error> {
    dependency_group
        .parse(value.trim())
        .map_err(|error| Error::ManifestParse(format!("depends: {error}")))
}

/// Recognizes a package name token.
///
/// The clause keywords (`reflect`, `prefer`, `accept`, `require`) are
/// excluded so that a dependency list ends where a clause begins.
fn package_name(input: &mut &str) -> ModalResult<PackageName> {
    take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '.')
    })
    .verify(|name: &str| !matches!(name, "reflect" | "prefer" | "accept" | "require"))
    .try_map(PackageName::from_str)
    .context(StrContext::Expected(StrContextValue::Description(
        "package name",
    )))
    .parse_next(input)
}

/// Recognizes a version token (anything up to whitespace or a
/// structural character).
fn version_token<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., |c: char| {
        !c.is_whitespace() && !matches!(c, '|' | ')' | ']' | '}')
    })
    .parse_next(input)
}

/// Recognizes a version constraint.
fn constraint(input: &mut &str) -> ModalResult<VersionConstraint> {
    alt((
        (alt((">=", "<=", "==", ">", "<")), space0, version_token).take(),
        ('^', version_token).take(),
        ('~', version_token).take(),
        // Interval endpoints are open or closed independently.
        (
            one_of(['[', '(']),
            take_while(0.., |c: char| c != ']' && c != ')'),
            one_of([']', ')']),
        )
            .take(),
    ))
    .try_map(VersionConstraint::from_str)
    .context(StrContext::Expected(StrContextValue::Description(
        "version constraint",
    )))
    .parse_next(input)
}

/// Recognizes one dependency (`name [constraint]`).
fn dependency(input: &mut &str) -> ModalResult<Dependency> {
    let name = package_name.parse_next(input)?;
    let constraint = opt(preceded(space1, constraint)).parse_next(input)?;
    Ok(Dependency { name, constraint })
}

/// Consumes a parenthesized expression with balanced parentheses and
/// returns its inner text.
fn balanced_parens(input: &mut &str) -> ModalResult<String> {
    '('.parse_next(input)?;
    let mut depth = 1usize;
    let mut inner = String::new();
    loop {
        let Some(c) = input.chars().next() else {
            return Err(ErrMode::Cut(ContextError::new()));
        };
        *input = &input[c.len_utf8()..];
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(inner.trim().to_string());
                }
            }
            _ => {}
        }
        inner.push(c);
    }
}

/// Consumes a braced fragment and returns its inner text.
fn braced_fragment(input: &mut &str) -> ModalResult<String> {
    ('{', cut_err(take_while(0.., |c: char| c != '}')), cut_err('}'))
        .map(|(_, inner, _): (char, &str, char)| inner.trim().to_string())
        .context(StrContext::Expected(StrContextValue::Description(
            "braced fragment",
        )))
        .parse_next(input)
}

/// Recognizes one dependency alternative: a dependency list followed by
/// optional enable/reflect/prefer+accept/require clauses.
fn alternative(input: &mut &str) -> ModalResult<DependencyAlternative> {
    let dependencies: Vec<Dependency> = separated(1.., dependency, space1).parse_next(input)?;
    let mut result = DependencyAlternative {
        dependencies,
        ..DependencyAlternative::default()
    };

    space0.parse_next(input)?;
    if opt('?').parse_next(input)?.is_some() {
        space0.parse_next(input)?;
        result.enable = Some(cut_err(balanced_parens).parse_next(input)?);
        space0.parse_next(input)?;
    }
    if opt("reflect").parse_next(input)?.is_some() {
        space0.parse_next(input)?;
        result.reflect = Some(cut_err(braced_fragment).parse_next(input)?);
        space0.parse_next(input)?;
    }
    if opt("prefer").parse_next(input)?.is_some() {
        space0.parse_next(input)?;
        result.prefer = Some(cut_err(braced_fragment).parse_next(input)?);
        space0.parse_next(input)?;
        cut_err("accept")
            .context(StrContext::Expected(StrContextValue::Description(
                "accept clause after prefer",
            )))
            .parse_next(input)?;
        space0.parse_next(input)?;
        result.accept = Some(cut_err(balanced_parens).parse_next(input)?);
        space0.parse_next(input)?;
    } else if opt("require").parse_next(input)?.is_some() {
        space0.parse_next(input)?;
        result.require = Some(cut_err(braced_fragment).parse_next(input)?);
        space0.parse_next(input)?;
    }

    Ok(result)
}

/// Recognizes a whole `depends:` value.
fn dependency_group(input: &mut &str) -> ModalResult<DependencyGroup> {
    let buildtime = opt(('*', space1)).parse_next(input)?.is_some();
    let alternatives: Vec<DependencyAlternative> = separated(
        1..,
        alternative,
        (space0, '|', space0),
    )
    .parse_next(input)?;
    space0.parse_next(input)?;
    Ok(DependencyGroup {
        alternatives,
        buildtime,
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;

    const MANIFEST: &str = r#": 1
version: 1
test-dependency-type: tests
test-dependency-index: 2
:
name: libhello
version: +1-1.2.3+2
project: hello
type: lib
language: cc
language: rust=impl
depends: libfoo >= 1.0.0 | libbar ^1.0 ? (!defined(config.hello.x))
depends: * build-tool >= 0.15.0
sha256sum: 6f935099dde8dd8191c322b27cca7b7d41d7db1bcea32920f32a43e6d929c9a1
location: hello/libhello-1.2.3.tar.gz
fragment: 9a2e08e1
"#;

    #[test]
    fn parse_full_manifest() -> TestResult {
        let manifest = parse_available_manifest(MANIFEST)?;
        assert_eq!(manifest.header.version, 1);
        assert_eq!(manifest.header.test_dependency_type, Some(PackageType::Tests));
        assert_eq!(manifest.header.test_dependency_index, Some(2));

        let package = &manifest.package;
        assert_eq!(package.name.as_str(), "libhello");
        assert_eq!(package.version.to_string(), "+1-1.2.3+2");
        assert_eq!(package.project.as_ref().map(|p| p.as_str()), Some("hello"));
        assert_eq!(package.package_type, Some(PackageType::Lib));
        assert_eq!(package.languages.len(), 2);
        assert!(package.languages[1].implementation);
        assert_eq!(package.dependencies.len(), 2);
        assert!(package.dependencies[1].buildtime);
        assert_eq!(
            package.locations,
            vec![FragmentLocation {
                location: "hello/libhello-1.2.3.tar.gz".to_string(),
                fragment: Some("9a2e08e1".to_string()),
            }]
        );
        Ok(())
    }

    #[test]
    fn multi_line_build_fragment() -> TestResult {
        let input = ": 1\nversion: 1\n:\nname: hello\nversion: 1.0.0\nroot-build: \\\nusing cc\nconfig.hello.x = true\n\\\n";
        let manifest = parse_available_manifest(input)?;
        assert_eq!(
            manifest.package.root_build.as_deref(),
            Some("using cc\nconfig.hello.x = true")
        );
        Ok(())
    }

    #[test]
    fn unknown_values_are_ignored() -> TestResult {
        let input = ": 1\nversion: 1\nfuture-header: x\n:\nname: hello\nversion: 1.0.0\nfuture-value: y\n";
        let manifest = parse_available_manifest(input)?;
        assert_eq!(manifest.package.name.as_str(), "hello");
        Ok(())
    }

    #[rstest]
    #[case("")]
    #[case(": 2\nversion: 1\n:\nname: hello\nversion: 1.0.0\n")]
    #[case(": 1\nversion: 9\n:\nname: hello\nversion: 1.0.0\n")]
    #[case(": 1\nversion: 1\n:\nversion: 1.0.0\n")]
    #[case(": 1\nversion: 1\n:\nname: hello\n")]
    #[case(": 1\nversion: 1\n:\nname: hello\nversion: 1.0.0\nfragment: dangling\n")]
    fn rejected_manifests(#[case] input: &str) {
        assert!(parse_available_manifest(input).is_err());
    }

    #[rstest]
    #[case("libfoo", 1, 1, false)]
    #[case("libfoo >= 1.0.0", 1, 1, false)]
    #[case("libfoo ^1.0.0 libbaz", 1, 2, false)]
    #[case("libfoo == 1.0.0 | libbar == 1.0.0", 2, 1, false)]
    #[case("* build-tool >= 0.15.0", 1, 1, true)]
    fn dependency_groups(
        #[case] input: &str,
        #[case] alternatives: usize,
        #[case] first_len: usize,
        #[case] buildtime: bool,
    ) -> TestResult {
        let group = parse_dependency_group(input)?;
        assert_eq!(group.alternatives.len(), alternatives);
        assert_eq!(group.alternatives[0].dependencies.len(), first_len);
        assert_eq!(group.buildtime, buildtime);
        Ok(())
    }

    #[test]
    fn dependency_clauses() -> TestResult {
        let group = parse_dependency_group(
            "libfoo-bar == 1.0.0 ? (!defined(config.foo.api)) reflect { config.foo.api = 'bar' } \
             | libfoo-baz == 1.0.0 ? (!defined(config.foo.api)) reflect { config.foo.api = 'baz' }",
        )?;
        assert_eq!(group.alternatives.len(), 2);
        let first = &group.alternatives[0];
        assert_eq!(first.enable.as_deref(), Some("!defined(config.foo.api)"));
        assert_eq!(first.reflect.as_deref(), Some("config.foo.api = 'bar'"));
        Ok(())
    }

    #[test]
    fn prefer_accept_and_require() -> TestResult {
        let group = parse_dependency_group(
            "libshared prefer { config.libshared.buf = 16 } accept (config.libshared.buf >= 8)",
        )?;
        let alternative = &group.alternatives[0];
        assert_eq!(alternative.prefer.as_deref(), Some("config.libshared.buf = 16"));
        assert_eq!(alternative.accept.as_deref(), Some("config.libshared.buf >= 8"));
        assert!(alternative.has_config_clause());

        let group = parse_dependency_group("libshared require { config.libshared.x = true }")?;
        assert_eq!(
            group.alternatives[0].require.as_deref(),
            Some("config.libshared.x = true")
        );
        Ok(())
    }

    #[test]
    fn prefer_without_accept_is_rejected() {
        assert!(parse_dependency_group("libshared prefer { config.libshared.buf = 16 }").is_err());
    }
}
