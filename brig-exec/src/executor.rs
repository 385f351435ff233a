//! Plan execution.

use std::collections::BTreeMap;

use brig_resolver::{ConfigureData, Plan, PlanStep};
use brig_store::{SelectedPackage, Store};
use brig_types::{PackageKey, PackageState, PackageSubstate, Version};
use log::{debug, info};

use crate::{
    Error,
    handlers::{HandlerError, OperationHandlers},
};

/// Applies plans to the store and filesystem.
///
/// Each plan step runs inside one store transaction: the handler does
/// its work, the selected-package row is updated, and the transaction
/// commits. A handler failure after mutation began leaves the package
/// in the `broken` state instead of a silently inconsistent one.
#[derive(Debug)]
pub struct Executor<'a> {
    store: &'a mut Store,
    handlers: &'a mut dyn OperationHandlers,
}

impl<'a> Executor<'a> {
    /// Creates an executor over an open workspace cluster.
    pub fn new(store: &'a mut Store, handlers: &'a mut dyn OperationHandlers) -> Self {
        Executor { store, handlers }
    }

    /// Executes every step of `plan`, in order.
    ///
    /// # Errors
    ///
    /// Returns the first step failure; earlier steps stay committed.
    pub fn execute(&mut self, plan: &Plan) -> Result<(), Error> {
        for step in &plan.steps {
            debug!("executing: {step}");
            self.execute_step(step)?;
        }
        Ok(())
    }

    /// Executes one step inside one transaction.
    fn execute_step(&mut self, step: &PlanStep) -> Result<(), Error> {
        match step {
            PlanStep::Fetch { key, version } => self.fetch(key, version),
            PlanStep::Configure { key, version, data } => self.configure(key, version, data),
            PlanStep::Disfigure { key, version } => self.disfigure(key, version),
            PlanStep::Purge { key, version } => self.purge(key, version),
            PlanStep::Drop { key } => self.drop_selected(key),
            PlanStep::Adjust {
                key,
                hold_package,
                hold_version,
            } => self.adjust(key, *hold_package, *hold_version),
        }
    }

    /// Fetches and unpacks one package.
    fn fetch(&mut self, key: &PackageKey, version: &Version) -> Result<(), Error> {
        let tx = self.store.transaction()?;
        let mut package = self
            .store
            .selected_package(key.configuration, &key.name)?
            .unwrap_or_else(|| fresh_selected(key, version));
        package.version = version.clone();
        package.state = PackageState::Transient;
        self.store.save_selected_package(key.configuration, &package)?;

        let archive = match self.handlers.fetch(key, version) {
            Ok(archive) => archive,
            Err(source) => return self.fail(tx, package, key, "fetch", source),
        };
        package.archive = Some(archive);
        package.state = PackageState::Fetched;

        let src_root = match self.handlers.unpack(key, version) {
            Ok(src_root) => src_root,
            Err(source) => return self.fail(tx, package, key, "unpack", source),
        };
        package.src_root = Some(src_root);
        package.state = PackageState::Unpacked;

        self.store.save_selected_package(key.configuration, &package)?;
        tx.commit()?;
        info!("fetched {} {version}", key.name);
        Ok(())
    }

    /// Configures (or reconfigures) one package.
    fn configure(
        &mut self,
        key: &PackageKey,
        version: &Version,
        data: &ConfigureData,
    ) -> Result<(), Error> {
        let tx = self.store.transaction()?;
        let mut package = self
            .store
            .selected_package(key.configuration, &key.name)?
            .unwrap_or_else(|| fresh_selected(key, version));
        package.version = version.clone();
        package.state = PackageState::Transient;
        self.store.save_selected_package(key.configuration, &package)?;

        let out_root = match self.handlers.configure(key, version, data) {
            Ok(out_root) => out_root,
            Err(source) => return self.fail(tx, package, key, "configure", source),
        };

        package.state = PackageState::Configured;
        package.substate = if data.system {
            PackageSubstate::System
        } else {
            PackageSubstate::None
        };
        package.out_root = Some(out_root);
        package.hold_package = data.hold_package;
        package.hold_version = data.hold_version;
        package.prerequisites = data.prerequisites.clone();
        package.alternatives = data.alternatives.clone();
        if !data.variables.is_empty() || !data.config.is_empty() {
            package.config_variables = data.variables.clone();
            package.config_checksum = data.checksum.clone();
        }
        if data.source_checksum.is_some() {
            package.source_checksum = data.source_checksum.clone();
        }
        self.store.save_selected_package(key.configuration, &package)?;
        tx.commit()?;
        info!("configured {} {version}", key.name);
        Ok(())
    }

    /// Disfigures one configured package.
    fn disfigure(&mut self, key: &PackageKey, version: &Version) -> Result<(), Error> {
        let tx = self.store.transaction()?;
        let mut package = self
            .store
            .selected_package(key.configuration, &key.name)?
            .ok_or_else(|| Error::UnknownSelectedPackage(key.clone()))?;
        package.state = PackageState::Transient;
        self.store.save_selected_package(key.configuration, &package)?;

        if let Err(source) = self.handlers.disfigure(key, version) {
            return self.fail(tx, package, key, "disfigure", source);
        }
        package.state = PackageState::Unpacked;
        package.out_root = None;
        self.store.save_selected_package(key.configuration, &package)?;
        tx.commit()?;
        Ok(())
    }

    /// Purges one package's files.
    fn purge(&mut self, key: &PackageKey, version: &Version) -> Result<(), Error> {
        let tx = self.store.transaction()?;
        let mut package = self
            .store
            .selected_package(key.configuration, &key.name)?
            .ok_or_else(|| Error::UnknownSelectedPackage(key.clone()))?;
        package.state = PackageState::Transient;
        self.store.save_selected_package(key.configuration, &package)?;

        if let Err(source) = self.handlers.purge(key, version) {
            return self.fail(tx, package, key, "purge", source);
        }
        package.archive = None;
        package.src_root = None;
        package.out_root = None;
        self.store.save_selected_package(key.configuration, &package)?;
        tx.commit()?;
        Ok(())
    }

    /// Removes the selected package entry.
    fn drop_selected(&mut self, key: &PackageKey) -> Result<(), Error> {
        let tx = self.store.transaction()?;
        self.store
            .delete_selected_package(key.configuration, &key.name)?;
        tx.commit()?;
        info!("dropped {}", key.name);
        Ok(())
    }

    /// Adjusts the hold flags of a selected package.
    fn adjust(
        &mut self,
        key: &PackageKey,
        hold_package: bool,
        hold_version: bool,
    ) -> Result<(), Error> {
        let tx = self.store.transaction()?;
        let mut package = self
            .store
            .selected_package(key.configuration, &key.name)?
            .ok_or_else(|| Error::UnknownSelectedPackage(key.clone()))?;
        package.hold_package = hold_package;
        package.hold_version = hold_version;
        self.store.save_selected_package(key.configuration, &package)?;
        tx.commit()?;
        Ok(())
    }

    /// Records a handler failure: the package is marked broken and the
    /// marking committed, so later runs see a well-defined state.
    fn fail(
        &self,
        tx: brig_store::StoreTransaction<'_>,
        mut package: SelectedPackage,
        key: &PackageKey,
        operation: &'static str,
        source: HandlerError,
    ) -> Result<(), Error> {
        drop(tx);
        package.state = PackageState::Broken;
        let tx = self.store.transaction()?;
        self.store.save_selected_package(key.configuration, &package)?;
        tx.commit()?;
        Err(Error::OperationFailed {
            key: key.clone(),
            operation,
            source,
        })
    }
}

/// Builds a fresh selected-package row for a package entering the
/// store.
fn fresh_selected(key: &PackageKey, version: &Version) -> SelectedPackage {
    SelectedPackage {
        name: key.name.clone(),
        version: version.clone(),
        state: PackageState::Transient,
        substate: PackageSubstate::None,
        hold_package: false,
        hold_version: false,
        archive: None,
        src_root: None,
        out_root: None,
        prerequisites: BTreeMap::new(),
        alternatives: Vec::new(),
        config_variables: Vec::new(),
        config_checksum: String::new(),
        source_checksum: None,
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, str::FromStr};

    use brig_resolver::Plan;
    use brig_store::ConfigurationType;
    use brig_types::PackageName;
    use testresult::TestResult;

    use super::*;
    use crate::handlers::NoopHandlers;

    fn key(store: &Store, name: &str) -> PackageKey {
        PackageKey::new(store.self_uuid(), PackageName::from_str(name).unwrap())
    }

    fn version(text: &str) -> Version {
        Version::from_str(text).unwrap()
    }

    #[test]
    fn fetch_and_configure_round_trip() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
        let libhello = key(&store, "libhello");
        let plan = Plan {
            steps: vec![
                PlanStep::Fetch {
                    key: libhello.clone(),
                    version: version("1.0.1"),
                },
                PlanStep::Configure {
                    key: libhello.clone(),
                    version: version("1.0.1"),
                    data: ConfigureData {
                        hold_package: true,
                        ..ConfigureData::default()
                    },
                },
            ],
        };

        let mut handlers = NoopHandlers;
        Executor::new(&mut store, &mut handlers).execute(&plan)?;

        let selected = store
            .selected_package(libhello.configuration, &libhello.name)?
            .expect("selected package missing");
        assert_eq!(selected.version, version("1.0.1"));
        assert_eq!(selected.state, PackageState::Configured);
        assert!(selected.hold_package);
        assert!(selected.archive.is_some());
        assert!(selected.out_root.is_some());
        Ok(())
    }

    #[test]
    fn drop_sequence_removes_the_row() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
        let tool = key(&store, "tool");

        let build = Plan {
            steps: vec![
                PlanStep::Fetch {
                    key: tool.clone(),
                    version: version("1.0.0"),
                },
                PlanStep::Configure {
                    key: tool.clone(),
                    version: version("1.0.0"),
                    data: ConfigureData::default(),
                },
            ],
        };
        let drop = Plan {
            steps: vec![
                PlanStep::Disfigure {
                    key: tool.clone(),
                    version: version("1.0.0"),
                },
                PlanStep::Purge {
                    key: tool.clone(),
                    version: version("1.0.0"),
                },
                PlanStep::Drop { key: tool.clone() },
            ],
        };

        let mut handlers = NoopHandlers;
        Executor::new(&mut store, &mut handlers).execute(&build)?;
        Executor::new(&mut store, &mut handlers).execute(&drop)?;

        assert!(
            store
                .selected_package(tool.configuration, &tool.name)?
                .is_none()
        );
        Ok(())
    }

    /// Handlers that fail any configure, for broken-state tests.
    #[derive(Debug, Default)]
    struct FailingConfigure;

    impl OperationHandlers for FailingConfigure {
        fn fetch(&mut self, key: &PackageKey, version: &Version) -> Result<PathBuf, HandlerError> {
            NoopHandlers.fetch(key, version)
        }

        fn unpack(&mut self, key: &PackageKey, version: &Version) -> Result<PathBuf, HandlerError> {
            NoopHandlers.unpack(key, version)
        }

        fn configure(
            &mut self,
            _key: &PackageKey,
            _version: &Version,
            _data: &ConfigureData,
        ) -> Result<PathBuf, HandlerError> {
            Err("simulated configure failure".into())
        }

        fn disfigure(&mut self, _: &PackageKey, _: &Version) -> Result<(), HandlerError> {
            Ok(())
        }

        fn purge(&mut self, _: &PackageKey, _: &Version) -> Result<(), HandlerError> {
            Ok(())
        }

        fn update(&mut self, _: &PackageKey, _: &Version) -> Result<(), HandlerError> {
            Ok(())
        }

        fn test(&mut self, _: &PackageKey, _: &Version) -> Result<(), HandlerError> {
            Ok(())
        }

        fn install(&mut self, _: &PackageKey, _: &Version) -> Result<(), HandlerError> {
            Ok(())
        }

        fn uninstall(&mut self, _: &PackageKey, _: &Version) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn handler_failure_marks_the_package_broken() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
        let libhello = key(&store, "libhello");
        let plan = Plan {
            steps: vec![
                PlanStep::Fetch {
                    key: libhello.clone(),
                    version: version("1.0.0"),
                },
                PlanStep::Configure {
                    key: libhello.clone(),
                    version: version("1.0.0"),
                    data: ConfigureData::default(),
                },
            ],
        };

        let mut handlers = FailingConfigure;
        let err = Executor::new(&mut store, &mut handlers)
            .execute(&plan)
            .unwrap_err();
        assert!(matches!(err, Error::OperationFailed { operation: "configure", .. }));

        let selected = store
            .selected_package(libhello.configuration, &libhello.name)?
            .expect("selected package missing");
        assert_eq!(selected.state, PackageState::Broken);
        Ok(())
    }
}
