//! The entities persisted in a workspace store.

use std::{collections::BTreeMap, fmt::Display, path::PathBuf};

use brig_types::{
    ConfigVariable, DependencyGroup, FragmentLocation, Language, PackageKey, PackageManifest,
    PackageName, PackageState, PackageSubstate, PackageType, ProjectName, SelectedAlternative,
    Version, VersionConstraint,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A package version known from a repository manifest or from the host
/// system package manager.
///
/// Available packages are immutable once persisted: they are created on
/// repository fetch and deleted when the last repository fragment
/// referring to them is dropped.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AvailablePackage {
    /// The package name.
    pub name: PackageName,
    /// The package version.
    pub version: Version,
    /// `true` if the candidate is provided by the host system package
    /// manager rather than built from source.
    ///
    /// A source and a system candidate may coexist at the same
    /// version; candidate selection orders the system one after the
    /// source one.
    pub system: bool,
    /// The package type.
    pub package_type: Option<PackageType>,
    /// The project the package belongs to.
    pub project: Option<ProjectName>,
    /// The languages the package is written in.
    pub languages: Vec<Language>,
    /// The declared dependency alternative groups.
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

impl AvailablePackage {
    /// Returns the configuration variable project namespace of the
    /// package (`config.<project>.`), defaulting the project to the
    /// package name.
    pub fn config_namespace(&self) -> String {
        match &self.project {
            Some(project) => format!("config.{project}."),
            None => format!("config.{}.", self.name),
        }
    }
}

impl From<PackageManifest> for AvailablePackage {
    fn from(manifest: PackageManifest) -> Self {
        AvailablePackage {
            name: manifest.name,
            version: manifest.version,
            system: false,
            package_type: manifest.package_type,
            project: manifest.project,
            languages: manifest.languages,
            dependencies: manifest.dependencies,
            bootstrap_build: manifest.bootstrap_build,
            root_build: manifest.root_build,
            sha256sum: manifest.sha256sum,
            locations: manifest.locations,
        }
    }
}

impl Display for AvailablePackage {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{} {}", self.name, self.version)
    }
}

/// The recorded state of a package within one workspace.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SelectedPackage {
    /// The package name.
    pub name: PackageName,
    /// The currently selected version.
    pub version: Version,
    /// The package state.
    pub state: PackageState,
    /// The package substate.
    pub substate: PackageSubstate,
    /// Prevents automatic drop of the package.
    pub hold_package: bool,
    /// Prevents automatic upgrade of the package.
    pub hold_version: bool,
    /// The fetched archive path, if any.
    pub archive: Option<PathBuf>,
    /// The unpacked source root, if any.
    pub src_root: Option<PathBuf>,
    /// The configured output root, if any.
    pub out_root: Option<PathBuf>,
    /// The prerequisite set: for every prerequisite the tightest
    /// constraint that caused it, keyed by its location in the
    /// workspace cluster.
    pub prerequisites: BTreeMap<PackageKey, Option<VersionConstraint>>,
    /// Per declared dependency group the 1-based index of the chosen
    /// alternative, or 0 for "not applicable".
    pub alternatives: Vec<SelectedAlternative>,
    /// The recorded configuration variables and their sources.
    pub config_variables: Vec<ConfigVariable>,
    /// A checksum over the configuration variable values.
    pub config_checksum: String,
    /// A checksum over the source tree of an external (directory)
    /// package, recorded at configure time so that a later run can
    /// detect source changes and bump the version iteration.
    pub source_checksum: Option<String>,
}

impl SelectedPackage {
    /// Returns `true` if the package is held by package or by version.
    pub fn held(&self) -> bool {
        self.hold_package || self.hold_version
    }

    /// Returns `true` if the package sources live in an external
    /// directory (no archive, a source root outside the workspace's
    /// control).
    pub fn is_external(&self) -> bool {
        self.archive.is_none() && self.src_root.is_some()
    }

    /// Returns `true` if the package is provided by the host system
    /// package manager.
    pub fn is_system(&self) -> bool {
        self.substate == PackageSubstate::System
    }
}

impl Display for SelectedPackage {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{} {} ({})", self.name, self.version, self.state)
    }
}

/// A repository the workspace fetches packages from.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Repository {
    /// The canonical repository name.
    pub name: String,
    /// The repository location.
    pub location: String,
    /// The abbreviated fingerprint of the authenticated certificate,
    /// if the repository is signed.
    pub certificate: Option<String>,
    /// The names of the fragments the repository consists of.
    pub fragments: Vec<String>,
}

/// An immutable snapshot of a repository at a point in time.
///
/// For a version-control repository the name encodes the commit id;
/// for archive and directory repositories the fragment coincides with
/// the repository. Complements and prerequisites are weak references
/// by repository name.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RepositoryFragment {
    /// The fragment name.
    pub name: String,
    /// The fragment location.
    pub location: String,
    /// Repositories whose packages complement this fragment's.
    pub complements: Vec<String>,
    /// Repositories this fragment's packages depend on.
    pub prerequisites: Vec<String>,
}

/// An authenticated repository certificate persisted in the store.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertificateRecord {
    /// The abbreviated certificate fingerprint (store key).
    pub fingerprint: String,
    /// The repository name prefix from the certificate subject.
    pub name: String,
    /// The organization from the certificate subject.
    pub organization: String,
    /// The contact email, if present.
    pub email: Option<String>,
    /// The start of the validity period (RFC 3339, GMT).
    pub not_before: String,
    /// The end of the validity period (RFC 3339, GMT).
    pub not_after: String,
    /// `true` for the placeholder record of an unsigned repository.
    pub dummy: bool,
}

/// One workspace participating in an open cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigurationInfo {
    /// The workspace uuid.
    pub uuid: Uuid,
    /// The optional human-readable name.
    pub name: Option<String>,
    /// The workspace type.
    pub config_type: crate::ConfigurationType,
    /// The workspace root directory.
    pub path: PathBuf,
}

impl Display for ConfigurationInfo {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(fmt, "{} ({})", self.path.display(), name),
            None => write!(fmt, "{}", self.path.display()),
        }
    }
}

/// A link from one workspace to another.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigurationLink {
    /// The link id; 0 is the self link.
    pub id: i64,
    /// The linked workspace uuid.
    pub uuid: Uuid,
    /// The linked workspace type.
    pub config_type: crate::ConfigurationType,
    /// The linked workspace root.
    pub path: PathBuf,
    /// `true` for an explicit link, `false` for an implicit back-link.
    pub explicit: bool,
}
