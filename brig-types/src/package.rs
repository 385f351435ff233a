//! The package model.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PackageName, Version, VersionConstraint};

/// The state of a selected package.
///
/// `broken` is terminal and only cleared by a forced purge.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PackageState {
    /// The package is being transitioned between states.
    Transient,
    /// A previous state transition failed midway.
    Broken,
    /// The package archive has been fetched.
    Fetched,
    /// The package source has been unpacked.
    Unpacked,
    /// The package has been configured.
    Configured,
}

/// The substate of a selected package.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PackageSubstate {
    /// An ordinary source package.
    #[default]
    None,
    /// The package is provided by the host system package manager.
    System,
}

/// The recorded source of a configuration variable of a selected
/// package.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ConfigOrigin {
    /// Specified by the user on the command line.
    User,
    /// Imposed by a dependent via a prefer/require clause.
    Dependent,
    /// Exposed by one of the package's own reflect clauses.
    Reflect,
}

/// A configuration variable name recorded in a selected package
/// together with where its value came from.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct ConfigVariable {
    /// The variable name (`config.<project>.<name>`).
    pub name: String,
    /// Where the value came from.
    pub origin: ConfigOrigin,
}

impl Display for ConfigVariable {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        write!(fmt, "{} ({})", self.name, self.origin)
    }
}

/// The type of a package.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageType {
    /// An executable.
    Exe,
    /// A library.
    Lib,
    /// A test suite.
    Tests,
    /// An example collection.
    Examples,
    /// A benchmark collection.
    Benchmarks,
    /// A build-system module.
    Module,
    /// A type this library has no special handling for.
    Other(String),
}

impl std::str::FromStr for PackageType {
    type Err = crate::Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(match input {
            "exe" => PackageType::Exe,
            "lib" => PackageType::Lib,
            "tests" => PackageType::Tests,
            "examples" => PackageType::Examples,
            "benchmarks" => PackageType::Benchmarks,
            "module" => PackageType::Module,
            other if !other.is_empty() => PackageType::Other(other.to_string()),
            other => return Err(crate::Error::InvalidPackageType(other.to_string())),
        })
    }
}

impl Display for PackageType {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        match self {
            PackageType::Exe => write!(fmt, "exe"),
            PackageType::Lib => write!(fmt, "lib"),
            PackageType::Tests => write!(fmt, "tests"),
            PackageType::Examples => write!(fmt, "examples"),
            PackageType::Benchmarks => write!(fmt, "benchmarks"),
            PackageType::Module => write!(fmt, "module"),
            PackageType::Other(other) => write!(fmt, "{other}"),
        }
    }
}

/// A language a package is written in.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Language {
    /// The language name (`cc`, `rust`, ...).
    pub name: String,
    /// `true` if the language only appears in the implementation (as
    /// opposed to the interface) of the package.
    pub implementation: bool,
}

/// A single dependency: a package name with an optional version
/// constraint.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Dependency {
    /// The depended-on package.
    pub name: PackageName,
    /// The acceptable version interval, if constrained.
    pub constraint: Option<VersionConstraint>,
}

impl Display for Dependency {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.name)?;
        if let Some(constraint) = &self.constraint {
            write!(fmt, " {constraint}")?;
        }
        Ok(())
    }
}

/// One alternative of a dependency alternative group.
///
/// The fragment fields hold build-system fragment source text evaluated
/// through the package skeleton.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct DependencyAlternative {
    /// The dependencies that are all required when this alternative is
    /// chosen.
    pub dependencies: Vec<Dependency>,
    /// The enable condition; an absent condition means always enabled.
    pub enable: Option<String>,
    /// A fragment exposing configuration of the dependent itself.
    pub reflect: Option<String>,
    /// A fragment proposing dependency configuration, paired with
    /// `accept`.
    pub prefer: Option<String>,
    /// The acceptance condition for the negotiated dependency
    /// configuration.
    pub accept: Option<String>,
    /// A fragment that may only set boolean dependency configuration
    /// variables to `true`.
    pub require: Option<String>,
}

impl DependencyAlternative {
    /// Returns `true` if this alternative carries a prefer/accept or
    /// require configuration clause.
    pub fn has_config_clause(&self) -> bool {
        self.prefer.is_some() || self.require.is_some()
    }
}

/// An ordered group of mutually exclusive dependency alternatives.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct DependencyGroup {
    /// The alternatives, in declaration order.
    pub alternatives: Vec<DependencyAlternative>,
    /// `true` if the group is a build-time dependency and routes to a
    /// `host`/`module` workspace.
    pub buildtime: bool,
}

/// The index of the alternative selected for one declared dependency
/// group of a selected package.
///
/// The index is 1-based; `0` means "not applicable" (the group was
/// disabled, build-time for the toolchain itself, or not reached).
pub type SelectedAlternative = usize;

/// The global identity of a package within a workspace cluster.
///
/// Cross-workspace references are stored as keys resolved through the
/// workspace registry, never as in-memory references.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct PackageKey {
    /// The uuid of the workspace holding the package.
    pub configuration: Uuid,
    /// The package name.
    pub name: PackageName,
}

impl PackageKey {
    /// Creates a new [`PackageKey`].
    pub fn new(configuration: Uuid, name: PackageName) -> Self {
        PackageKey {
            configuration,
            name,
        }
    }
}

impl Display for PackageKey {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        write!(fmt, "{} [{}]", self.name, self.configuration)
    }
}

/// A [`PackageKey`] extended with a version, for diagnostics.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct PackageVersionKey {
    /// The package identity.
    pub key: PackageKey,
    /// The package version.
    pub version: Version,
}

impl Display for PackageVersionKey {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "{} {} [{}]",
            self.key.name, self.version, self.key.configuration
        )
    }
}
