//! The build-system-driver boundary.

use std::path::PathBuf;

use brig_resolver::ConfigureData;
use brig_types::{PackageKey, Version};

/// The error type handlers report failures with.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// The operations the executor delegates to the build-system driver.
///
/// The executor owns the *order* of operations, the atomicity of each
/// step and the selected-package state transitions; the handlers do
/// the actual work against the filesystem and build system.
pub trait OperationHandlers: std::fmt::Debug {
    /// Fetches the package archive; returns its path.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails.
    fn fetch(&mut self, key: &PackageKey, version: &Version) -> Result<PathBuf, HandlerError>;

    /// Unpacks the fetched archive; returns the source root.
    ///
    /// # Errors
    ///
    /// Returns an error if unpacking fails.
    fn unpack(&mut self, key: &PackageKey, version: &Version) -> Result<PathBuf, HandlerError>;

    /// Configures the package; returns the output root.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails.
    fn configure(
        &mut self,
        key: &PackageKey,
        version: &Version,
        data: &ConfigureData,
    ) -> Result<PathBuf, HandlerError>;

    /// Disfigures a configured package.
    ///
    /// # Errors
    ///
    /// Returns an error if disfiguring fails.
    fn disfigure(&mut self, key: &PackageKey, version: &Version) -> Result<(), HandlerError>;

    /// Removes the package's files.
    ///
    /// # Errors
    ///
    /// Returns an error if purging fails.
    fn purge(&mut self, key: &PackageKey, version: &Version) -> Result<(), HandlerError>;

    /// Updates (builds) a configured package.
    ///
    /// # Errors
    ///
    /// Returns an error if the build fails.
    fn update(&mut self, key: &PackageKey, version: &Version) -> Result<(), HandlerError>;

    /// Runs the package's tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the tests fail.
    fn test(&mut self, key: &PackageKey, version: &Version) -> Result<(), HandlerError>;

    /// Installs a built package.
    ///
    /// # Errors
    ///
    /// Returns an error if installation fails.
    fn install(&mut self, key: &PackageKey, version: &Version) -> Result<(), HandlerError>;

    /// Uninstalls an installed package.
    ///
    /// # Errors
    ///
    /// Returns an error if uninstallation fails.
    fn uninstall(&mut self, key: &PackageKey, version: &Version) -> Result<(), HandlerError>;
}

/// Handlers that perform no work; used by tests and dry runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandlers;

impl OperationHandlers for NoopHandlers {
    fn fetch(&mut self, key: &PackageKey, version: &Version) -> Result<PathBuf, HandlerError> {
        Ok(PathBuf::from(format!("{}-{version}.tar.gz", key.name)))
    }

    fn unpack(&mut self, key: &PackageKey, version: &Version) -> Result<PathBuf, HandlerError> {
        Ok(PathBuf::from(format!("{}-{version}", key.name)))
    }

    fn configure(
        &mut self,
        key: &PackageKey,
        version: &Version,
        _data: &ConfigureData,
    ) -> Result<PathBuf, HandlerError> {
        Ok(PathBuf::from(format!("{}-{version}-out", key.name)))
    }

    fn disfigure(&mut self, _key: &PackageKey, _version: &Version) -> Result<(), HandlerError> {
        Ok(())
    }

    fn purge(&mut self, _key: &PackageKey, _version: &Version) -> Result<(), HandlerError> {
        Ok(())
    }

    fn update(&mut self, _key: &PackageKey, _version: &Version) -> Result<(), HandlerError> {
        Ok(())
    }

    fn test(&mut self, _key: &PackageKey, _version: &Version) -> Result<(), HandlerError> {
        Ok(())
    }

    fn install(&mut self, _key: &PackageKey, _version: &Version) -> Result<(), HandlerError> {
        Ok(())
    }

    fn uninstall(&mut self, _key: &PackageKey, _version: &Version) -> Result<(), HandlerError> {
        Ok(())
    }
}
