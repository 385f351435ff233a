//! Error handling for brig-resolver.

use brig_types::{PackageKey, PackageName, PackageVersionKey, Version, VersionConstraint};

/// The fatal error that can occur during dependency resolution.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A [`brig_types::Error`].
    #[error(transparent)]
    Types(#[from] brig_types::Error),

    /// A [`brig_store::Error`].
    #[error(transparent)]
    Store(#[from] brig_store::Error),

    /// A [`brig_skeleton::Error`].
    #[error(transparent)]
    Skeleton(#[from] brig_skeleton::Error),

    /// No version of a dependency satisfies the intersection of the
    /// constraints imposed by its dependents.
    #[error("Unable to satisfy constraints on package {name}\n{chain}")]
    UnsatisfiableConstraints {
        /// The dependency name.
        name: PackageName,
        /// The rendered chain of imposing dependents.
        chain: String,
    },

    /// A package has no usable version at all.
    #[error("Unknown package {0}")]
    UnknownPackage(PackageName),

    /// A user action names a package that is not selected.
    #[error("Package {name} is not selected in workspace {configuration}")]
    NotSelected {
        /// The package name.
        name: PackageName,
        /// The workspace uuid.
        configuration: uuid::Uuid,
    },

    /// Dropping a held package requires explicit confirmation.
    #[error("Package {0} is held; dropping it requires explicit confirmation")]
    DropHeld(PackageName),

    /// The new prerequisite graph contains a cycle.
    #[error("Dependency cycle detected: {path}")]
    DependencyCycle {
        /// The rendered cycle path.
        path: String,
    },

    /// Configuration negotiation revisited a previously negotiated
    /// cluster state.
    #[error("Unable to negotiate a configuration cycle between dependents\n{cluster}")]
    ConfigurationCycle {
        /// The rendered cluster state.
        cluster: String,
    },

    /// The restart limit was exceeded; an internal error.
    #[error("Dependency resolution did not converge after {0} restarts")]
    RestartLimit(usize),
}

/// A non-fatal resolution signal: the current collection pass must be
/// abandoned and resolution restarted from scratch with the signal's
/// decision preserved.
///
/// Restarts travel as values through [`Failure`] and are handled by
/// the driver loop rather than unwinding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Restart {
    /// A package version present in the collection must be replaced
    /// with a different version, or dropped (`None`).
    ReplaceVersion {
        /// The package to replace.
        key: PackageKey,
        /// The replacement version, or `None` to drop the package.
        version: Option<Version>,
    },
    /// A dependency alternative turned out to be unacceptable and must
    /// be skipped on the next pass.
    UnacceptableAlternative {
        /// The dependent package.
        key: PackageKey,
        /// The dependent version.
        version: Version,
        /// The 1-based dependency group index.
        group: usize,
        /// The 1-based alternative index.
        alternative: usize,
    },
    /// A dependency was recursively collected before a later-arriving
    /// dependent with a configuration clause could join its cluster.
    PrematureDependency {
        /// The prematurely collected dependency.
        key: PackageKey,
    },
}

/// The outcome of one collection step: fatal, or a restart signal.
#[derive(Debug)]
pub(crate) enum Failure {
    /// A fatal error, reported to the caller.
    Fatal(Box<Error>),
    /// A restart signal, handled by the driver loop.
    Restart(Restart),
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Failure::Fatal(Box::new(error))
    }
}

impl From<brig_types::Error> for Failure {
    fn from(error: brig_types::Error) -> Self {
        Failure::Fatal(Box::new(Error::Types(error)))
    }
}

impl From<brig_store::Error> for Failure {
    fn from(error: brig_store::Error) -> Self {
        Failure::Fatal(Box::new(Error::Store(error)))
    }
}

impl From<brig_skeleton::Error> for Failure {
    fn from(error: brig_skeleton::Error) -> Self {
        Failure::Fatal(Box::new(Error::Skeleton(error)))
    }
}

/// A recorded soft failure: a dependent imposed a constraint on a
/// dependency, but resolution proceeded with a version not satisfying
/// it. Carries enough context to attempt a repair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnsatisfiedDependent {
    /// The imposing dependent.
    pub dependent: PackageVersionKey,
    /// The dependency the constraint applies to.
    pub dependency: PackageKey,
    /// The ignored constraint.
    pub constraint: VersionConstraint,
    /// The version resolution proceeded with.
    pub chosen: Version,
}

impl std::fmt::Display for UnsatisfiedDependent {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "{} requires {} {} but {} was selected",
            self.dependent, self.dependency.name, self.constraint, self.chosen
        )
    }
}
