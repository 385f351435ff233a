//! The driver callbacks the resolver core consumes.

use brig_skeleton::{DefaultEvaluator, Skeleton};
use brig_store::{AvailablePackage, ConfigurationType, Store};
use brig_types::PackageName;
use uuid::Uuid;

use crate::Error;

/// The callbacks the driver provides to the resolver.
///
/// The resolver reads and mutates the workspace cluster through the
/// [`Store`] it is handed separately; this trait covers the four
/// decisions that belong to the driver: creating private workspaces,
/// loading available packages, and building skeletons.
pub trait ResolverContext: std::fmt::Debug {
    /// Creates the private child workspace of `parent` used for
    /// build-time dependencies of the given type.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace cannot be created.
    fn add_private_configuration(
        &mut self,
        store: &mut Store,
        parent: Uuid,
        config_type: ConfigurationType,
    ) -> Result<Uuid, Error>;

    /// Loads the available versions of `name`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    fn load_available(
        &mut self,
        store: &Store,
        name: &PackageName,
    ) -> Result<Vec<AvailablePackage>, Error>;

    /// Creates a skeleton for one available package with the given
    /// configuration overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the skeleton cannot be materialized.
    fn make_skeleton(
        &mut self,
        store: &Store,
        package: &AvailablePackage,
        overrides: &[String],
    ) -> Result<Skeleton, Error>;
}

/// The default [`ResolverContext`]: private workspaces under the
/// parent's store directory, available packages from the cluster's own
/// workspace, skeletons materialized in the workspace scratch
/// directory with the built-in fragment evaluator.
#[derive(Debug, Default)]
pub struct DefaultContext;

impl ResolverContext for DefaultContext {
    fn add_private_configuration(
        &mut self,
        store: &mut Store,
        parent: Uuid,
        config_type: ConfigurationType,
    ) -> Result<Uuid, Error> {
        Ok(store.create_private_configuration(parent, config_type)?)
    }

    fn load_available(
        &mut self,
        store: &Store,
        name: &PackageName,
    ) -> Result<Vec<AvailablePackage>, Error> {
        Ok(store.available_packages(store.self_uuid(), name)?)
    }

    fn make_skeleton(
        &mut self,
        store: &Store,
        package: &AvailablePackage,
        overrides: &[String],
    ) -> Result<Skeleton, Error> {
        let scratch = store.scratch_dir(store.self_uuid())?;
        Ok(Skeleton::new(
            package.name.clone(),
            package.version.clone(),
            package.project.as_ref(),
            package.bootstrap_build.as_deref(),
            package.root_build.as_deref(),
            overrides,
            Box::new(DefaultEvaluator),
            &scratch,
        )?)
    }
}
