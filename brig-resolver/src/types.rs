//! Types specific to the resolver core.

use std::collections::{BTreeMap, BTreeSet};

use brig_skeleton::Skeleton;
use brig_store::{AvailablePackage, SelectedPackage};
use brig_types::{
    PackageKey, PackageName, PackageVersionKey, Version, VersionConstraint,
};
use uuid::Uuid;

use crate::error::{Error, UnsatisfiedDependent};

/// The kind of action intended for one package.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildAction {
    /// Build (or upgrade/downgrade) the package.
    Build,
    /// Drop the package.
    Drop,
    /// Adjust the selected state (holds, reconfiguration) without
    /// changing the version.
    Adjust,
}

/// One user-requested package action.
#[derive(Clone, Debug)]
pub struct UserAction {
    /// The action kind.
    pub action: BuildAction,
    /// The package the action applies to.
    pub name: PackageName,
    /// The requested version constraint, if any.
    pub constraint: Option<VersionConstraint>,
    /// The workspace to apply the action in; the cluster's own
    /// workspace if absent.
    pub configuration: Option<Uuid>,
    /// Hold the package against automatic drop.
    pub hold_package: bool,
    /// Hold the package against automatic upgrade.
    pub hold_version: bool,
    /// Clear existing holds.
    pub unhold: bool,
    /// Request the system (host package manager) version.
    pub system: bool,
    /// Configuration variable overrides (`name=value`).
    pub config_vars: Vec<String>,
}

impl UserAction {
    /// Creates a build action for `name` with everything else at its
    /// defaults.
    pub fn build(name: PackageName) -> Self {
        UserAction {
            action: BuildAction::Build,
            name,
            constraint: None,
            configuration: None,
            hold_package: true,
            hold_version: false,
            unhold: false,
            system: false,
            config_vars: Vec::new(),
        }
    }

    /// Creates a drop action for `name`.
    pub fn drop(name: PackageName) -> Self {
        UserAction {
            action: BuildAction::Drop,
            name,
            constraint: None,
            configuration: None,
            hold_package: false,
            hold_version: false,
            unhold: false,
            system: false,
            config_vars: Vec::new(),
        }
    }
}

/// Options applying to a whole resolution.
#[derive(Clone, Debug, Default)]
pub struct ResolveOptions {
    /// Assume yes for confirmation questions (dropping held packages).
    pub yes: bool,
}

/// One constraint imposed on a package, with attribution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AppliedConstraint {
    /// The constraint.
    pub constraint: VersionConstraint,
    /// The dependent that imposed it; `None` for a user action.
    pub dependent: Option<PackageVersionKey>,
    /// `true` if the constraint comes from an existing selected
    /// dependent rather than one collected in this run.
    pub existing: bool,
}

/// Flags accumulated on a collection entry; merges OR them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BuildPackageFlags {
    /// Clear the selected holds.
    pub unhold: bool,
    /// The package only needs reconfiguration.
    pub reconfigure: bool,
    /// The package's prerequisite references must be repointed to
    /// other workspaces.
    pub repoint: bool,
    /// An existing dependent that must be re-evaluated from its first
    /// configuration clause.
    pub reevaluate: bool,
    /// Re-evaluation deviated from the recorded alternatives; the
    /// dependencies must be recollected fully.
    pub recollect: bool,
    /// The entry replaced a previously collected version.
    pub replace: bool,
}

impl BuildPackageFlags {
    /// ORs `other` into `self`.
    pub fn merge(&mut self, other: BuildPackageFlags) {
        self.unhold |= other.unhold;
        self.reconfigure |= other.reconfigure;
        self.repoint |= other.repoint;
        self.reevaluate |= other.reevaluate;
        self.recollect |= other.recollect;
        self.replace |= other.replace;
    }
}

/// A prerequisite repoint: the dependent's reference moves from one
/// workspace's package to another's without upgrading it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Repoint {
    /// The prerequisite reference being replaced.
    pub from: PackageKey,
    /// The replacement reference.
    pub to: PackageKey,
}

/// An intended package action in the collection map.
#[derive(Debug)]
pub struct BuildPackage {
    /// The action kind.
    pub action: BuildAction,
    /// The package identity within the cluster.
    pub key: PackageKey,
    /// The selected package snapshot, if the package is selected.
    pub selected: Option<SelectedPackage>,
    /// The available package being built, for builds.
    pub available: Option<AvailablePackage>,
    /// The constraints imposed so far, with attribution.
    pub constraints: Vec<AppliedConstraint>,
    /// Hold the package against automatic drop.
    pub hold_package: bool,
    /// Hold the package against automatic upgrade.
    pub hold_version: bool,
    /// Build the system version.
    pub system: bool,
    /// Accumulated flags.
    pub flags: BuildPackageFlags,
    /// Whether the dependencies were recursively collected.
    pub recursed: bool,
    /// The chosen alternative per dependency group (1-based; 0 for not
    /// applicable).
    pub selected_alternatives: Vec<usize>,
    /// User-level configuration overrides.
    pub config_vars: Vec<String>,
    /// The current source-tree checksum of an external package,
    /// computed during collection and recorded at configure time.
    pub source_checksum: Option<String>,
    /// The attached skeleton, created on first need.
    pub skeleton: Option<Skeleton>,
    /// The new prerequisite set (filled during recursion).
    pub dependencies: BTreeMap<PackageKey, Option<VersionConstraint>>,
    /// Prerequisite repoints to fold into the reconfigure step.
    pub repoints: Vec<Repoint>,
    /// The dependents that caused this entry, for diagnostics.
    pub required_by: BTreeSet<PackageVersionKey>,
}

impl BuildPackage {
    /// Creates an empty entry for `key` with `action`.
    pub fn new(action: BuildAction, key: PackageKey) -> Self {
        BuildPackage {
            action,
            key,
            selected: None,
            available: None,
            constraints: Vec::new(),
            hold_package: false,
            hold_version: false,
            system: false,
            flags: BuildPackageFlags::default(),
            recursed: false,
            selected_alternatives: Vec::new(),
            config_vars: Vec::new(),
            source_checksum: None,
            skeleton: None,
            dependencies: BTreeMap::new(),
            repoints: Vec::new(),
            required_by: BTreeSet::new(),
        }
    }

    /// Returns the version the action targets: the available version
    /// for builds, the selected version otherwise.
    pub fn target_version(&self) -> Option<&Version> {
        self.available
            .as_ref()
            .map(|a| &a.version)
            .or(self.selected.as_ref().map(|s| &s.version))
    }

    /// Returns the intersection of all applied constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsatisfiableConstraints`] with the full chain
    /// of imposing dependents if the intersection is empty.
    pub fn effective_constraint(&self) -> Result<Option<VersionConstraint>, Error> {
        let mut effective: Option<VersionConstraint> = None;
        for applied in &self.constraints {
            effective = Some(match effective {
                None => applied.constraint.clone(),
                Some(current) => current.intersect(&applied.constraint).ok_or_else(|| {
                    Error::UnsatisfiableConstraints {
                        name: self.key.name.clone(),
                        chain: self.render_constraint_chain(),
                    }
                })?,
            });
        }
        Ok(effective)
    }

    /// Renders the constraint attributions for diagnostics.
    pub fn render_constraint_chain(&self) -> String {
        let mut lines = Vec::new();
        for applied in &self.constraints {
            let source = match &applied.dependent {
                Some(dependent) if applied.existing => format!("existing dependent {dependent}"),
                Some(dependent) => format!("dependent {dependent}"),
                None => "command line".to_string(),
            };
            lines.push(format!("  {} required by {source}", applied.constraint));
        }
        lines.join("\n")
    }

    /// Returns `true` if the entry changes the package on disk (as
    /// opposed to being an unchanged carry-over).
    pub fn changes_package(&self) -> bool {
        match self.action {
            BuildAction::Drop => true,
            BuildAction::Adjust => self.flags.reconfigure || self.flags.repoint,
            BuildAction::Build => match (&self.selected, self.target_version()) {
                (None, _) => true,
                (Some(selected), Some(target)) => {
                    selected.version != *target
                        || selected.state != brig_types::PackageState::Configured
                        || self.flags.reconfigure
                        || self.flags.repoint
                }
                (Some(_), None) => false,
            },
        }
    }

    /// Merges a later entering of the same package into this entry.
    ///
    /// Constraints are unioned, holds strengthened and flags OR'd;
    /// merges never weaken holds and never remove constraints.
    pub fn merge(&mut self, other: BuildPackage) {
        for constraint in other.constraints {
            if !self.constraints.contains(&constraint) {
                self.constraints.push(constraint);
            }
        }
        self.hold_package |= other.hold_package;
        self.hold_version |= other.hold_version;
        self.system |= other.system;
        self.flags.merge(other.flags);
        for var in other.config_vars {
            if !self.config_vars.contains(&var) {
                self.config_vars.push(var);
            }
        }
        self.required_by.extend(other.required_by);
        if self.action == BuildAction::Adjust && other.action == BuildAction::Build {
            self.action = BuildAction::Build;
            if self.available.is_none() {
                self.available = other.available;
            }
        }
    }
}

/// The versions that must replace previously collected ones on the
/// next pass, keyed by package; `None` means the package turned out to
/// be unneeded and is dropped.
pub type ReplacedVersions = BTreeMap<PackageKey, Option<Version>>;

/// An alternative to skip on the next pass.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct UnacceptableAlternative {
    /// The dependent package.
    pub key: PackageKey,
    /// The dependent version (compared textually for ordering).
    pub version: String,
    /// The 1-based dependency group index.
    pub group: usize,
    /// The 1-based alternative index.
    pub alternative: usize,
}

/// The state preserved across restarts.
#[derive(Debug, Default)]
pub struct StickyState {
    /// Versions to replace, from [`crate::Restart::ReplaceVersion`].
    pub replaced_versions: ReplacedVersions,
    /// Alternatives to skip, from
    /// [`crate::Restart::UnacceptableAlternative`].
    pub unacceptable_alternatives: BTreeSet<UnacceptableAlternative>,
    /// Dependencies whose recursion must be deferred because a
    /// dependent with a configuration clause arrives later.
    pub postponed_dependencies: BTreeSet<PackageKey>,
}

/// The result of a completed collection pass.
#[derive(Debug)]
pub struct Collection {
    /// The collection map in deterministic key order.
    pub map: BTreeMap<PackageKey, BuildPackage>,
    /// The recorded soft constraint failures.
    pub unsatisfied: Vec<UnsatisfiedDependent>,
}
