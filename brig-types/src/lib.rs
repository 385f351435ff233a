#![doc = include_str!("../README.md")]

mod constraint;
mod error;
pub mod manifest;
mod name;
mod package;
mod version;

pub use constraint::{Bound, VersionConstraint};
pub use error::Error;
pub use manifest::{
    AvailablePackageManifest, FragmentLocation, ManifestHeader, PackageManifest,
    parse_available_manifest, parse_dependency_group,
};
pub use name::{PackageName, ProjectName};
pub use package::{
    ConfigOrigin, ConfigVariable, Dependency, DependencyAlternative, DependencyGroup, Language,
    PackageKey, PackageState, PackageSubstate, PackageType, PackageVersionKey,
    SelectedAlternative,
};
pub use version::Version;
