//! The planner: orders the collected builds into a linear sequence of
//! per-package operations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use brig_types::{
    ConfigVariable, PackageKey, PackageState, Version, VersionConstraint,
};

use crate::{
    error::Error,
    types::{BuildAction, BuildPackage, Collection, Repoint},
};

/// The data a configure step carries into the executor.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigureData {
    /// The merged configuration override command line.
    pub config: Vec<String>,
    /// The configuration variables to record.
    pub variables: Vec<ConfigVariable>,
    /// The checksum over the configuration values.
    pub checksum: String,
    /// The source-tree checksum to record for an external package.
    pub source_checksum: Option<String>,
    /// The new prerequisite set.
    pub prerequisites: BTreeMap<PackageKey, Option<VersionConstraint>>,
    /// The chosen alternative per dependency group.
    pub alternatives: Vec<usize>,
    /// Hold the package against automatic drop.
    pub hold_package: bool,
    /// Hold the package against automatic upgrade.
    pub hold_version: bool,
    /// The package is provided by the system package manager.
    pub system: bool,
    /// Prerequisite repoints folded into this reconfiguration.
    pub repoints: Vec<Repoint>,
}

/// One step of a plan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlanStep {
    /// Disfigure a configured package.
    Disfigure {
        /// The package.
        key: PackageKey,
        /// The configured version.
        version: Version,
    },
    /// Remove a package's files.
    Purge {
        /// The package.
        key: PackageKey,
        /// The purged version.
        version: Version,
    },
    /// Remove the selected package entry.
    Drop {
        /// The package.
        key: PackageKey,
    },
    /// Fetch a package archive.
    Fetch {
        /// The package.
        key: PackageKey,
        /// The version to fetch.
        version: Version,
    },
    /// Configure (or reconfigure) a package.
    Configure {
        /// The package.
        key: PackageKey,
        /// The version to configure.
        version: Version,
        /// The configuration payload.
        data: ConfigureData,
    },
    /// Adjust the selected state (holds) without touching the files.
    Adjust {
        /// The package.
        key: PackageKey,
        /// The new hold-package flag.
        hold_package: bool,
        /// The new hold-version flag.
        hold_version: bool,
    },
}

impl PlanStep {
    /// Returns the package the step applies to.
    pub fn key(&self) -> &PackageKey {
        match self {
            PlanStep::Disfigure { key, .. }
            | PlanStep::Purge { key, .. }
            | PlanStep::Drop { key }
            | PlanStep::Fetch { key, .. }
            | PlanStep::Configure { key, .. }
            | PlanStep::Adjust { key, .. } => key,
        }
    }
}

impl Display for PlanStep {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        match self {
            PlanStep::Disfigure { key, version } => {
                write!(fmt, "disfigure {} {version}", key.name)
            }
            PlanStep::Purge { key, version } => write!(fmt, "purge {} {version}", key.name),
            PlanStep::Drop { key } => write!(fmt, "drop {}", key.name),
            PlanStep::Fetch { key, version } => write!(fmt, "fetch {} {version}", key.name),
            PlanStep::Configure { key, version, data } => {
                if data.system {
                    write!(fmt, "configure sys:{} {version}", key.name)
                } else {
                    write!(fmt, "configure {} {version}", key.name)
                }
            }
            PlanStep::Adjust { key, .. } => write!(fmt, "adjust {}", key.name),
        }
    }
}

/// An ordered, executable sequence of package operations.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Plan {
    /// The steps, in execution order.
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Returns `true` if the plan performs no operations.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Display for Plan {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        for step in &self.steps {
            writeln!(fmt, "{step}")?;
        }
        Ok(())
    }
}

/// Orders a collection into a plan.
///
/// Package P precedes Q iff Q has P in its new prerequisite set; a
/// cycle in that relation is fatal. Drops come first, most dependent
/// first; then builds in dependency order with reconfigurations of
/// dependents following the prerequisite that triggered them.
///
/// # Errors
///
/// Returns [`Error::DependencyCycle`] if the new prerequisite graph is
/// cyclic.
pub(crate) fn order(collection: &Collection) -> Result<Plan, Error> {
    let topological = topological_order(&collection.map)?;
    let mut steps = Vec::new();

    // Drops, most dependent first.
    for key in topological.iter().rev() {
        let entry = &collection.map[key];
        if entry.action != BuildAction::Drop {
            continue;
        }
        if let Some(selected) = &entry.selected {
            if selected.state == PackageState::Configured {
                steps.push(PlanStep::Disfigure {
                    key: key.clone(),
                    version: selected.version.clone(),
                });
            }
            steps.push(PlanStep::Purge {
                key: key.clone(),
                version: selected.version.clone(),
            });
        }
        steps.push(PlanStep::Drop { key: key.clone() });
    }

    // Disfigure everything that changes, most dependent first.
    for key in topological.iter().rev() {
        let entry = &collection.map[key];
        if entry.action == BuildAction::Drop || !entry.changes_package() {
            continue;
        }
        if let Some(selected) = &entry.selected {
            if selected.state == PackageState::Configured {
                steps.push(PlanStep::Disfigure {
                    key: key.clone(),
                    version: selected.version.clone(),
                });
            }
        }
    }

    // Builds and reconfigurations in dependency order.
    for key in &topological {
        let entry = &collection.map[key];
        match entry.action {
            BuildAction::Drop => {}
            BuildAction::Build => {
                if !entry.changes_package() {
                    push_hold_adjustment(&mut steps, entry);
                    continue;
                }
                let Some(version) = entry.target_version().cloned() else {
                    continue;
                };
                let fresh = entry
                    .selected
                    .as_ref()
                    .is_none_or(|s| s.version != version);
                if fresh && !entry.system {
                    steps.push(PlanStep::Fetch {
                        key: key.clone(),
                        version: version.clone(),
                    });
                }
                steps.push(PlanStep::Configure {
                    key: key.clone(),
                    version,
                    data: configure_data(entry),
                });
            }
            BuildAction::Adjust => {
                if entry.flags.reconfigure || entry.flags.repoint {
                    let Some(selected) = &entry.selected else {
                        continue;
                    };
                    steps.push(PlanStep::Configure {
                        key: key.clone(),
                        version: selected.version.clone(),
                        data: reconfigure_data(entry),
                    });
                } else {
                    push_hold_adjustment(&mut steps, entry);
                }
            }
        }
    }

    Ok(Plan { steps })
}

/// Emits an adjust step if the entry only changes holds.
fn push_hold_adjustment(steps: &mut Vec<PlanStep>, entry: &BuildPackage) {
    let Some(selected) = &entry.selected else {
        return;
    };
    let hold_package = (entry.hold_package || selected.hold_package) && !entry.flags.unhold;
    let hold_version = (entry.hold_version || selected.hold_version) && !entry.flags.unhold;
    if hold_package != selected.hold_package || hold_version != selected.hold_version {
        steps.push(PlanStep::Adjust {
            key: entry.key.clone(),
            hold_package,
            hold_version,
        });
    }
}

/// Builds the configure payload of a build entry.
fn configure_data(entry: &BuildPackage) -> ConfigureData {
    let (config, variables, checksum) = match &entry.skeleton {
        Some(skeleton) => {
            let (config, variables) = skeleton.collect_config();
            let checksum = skeleton.config_checksum();
            (config, variables, checksum)
        }
        None => (entry.config_vars.clone(), Vec::new(), String::new()),
    };
    ConfigureData {
        config,
        variables,
        checksum,
        source_checksum: entry.source_checksum.clone(),
        prerequisites: entry.dependencies.clone(),
        alternatives: entry.selected_alternatives.clone(),
        hold_package: entry.hold_package
            || entry
                .selected
                .as_ref()
                .is_some_and(|s| s.hold_package && !entry.flags.unhold),
        hold_version: entry.hold_version
            || entry
                .selected
                .as_ref()
                .is_some_and(|s| s.hold_version && !entry.flags.unhold),
        system: entry.system,
        repoints: entry.repoints.clone(),
    }
}

/// Builds the configure payload of a reconfigure-only entry: the
/// recorded configuration is carried over unchanged (modulo repoints).
fn reconfigure_data(entry: &BuildPackage) -> ConfigureData {
    let selected = entry.selected.as_ref().expect("selected package");
    let mut prerequisites = selected.prerequisites.clone();
    for repoint in &entry.repoints {
        if let Some(constraint) = prerequisites.remove(&repoint.from) {
            prerequisites.insert(repoint.to.clone(), constraint);
        }
    }
    ConfigureData {
        config: Vec::new(),
        variables: selected.config_variables.clone(),
        checksum: selected.config_checksum.clone(),
        source_checksum: selected.source_checksum.clone(),
        prerequisites,
        alternatives: selected.alternatives.clone(),
        hold_package: selected.hold_package,
        hold_version: selected.hold_version,
        system: selected.is_system(),
        repoints: entry.repoints.clone(),
    }
}

/// Orders the map keys so that every package follows its
/// prerequisites.
fn topological_order(
    map: &BTreeMap<PackageKey, BuildPackage>,
) -> Result<Vec<PackageKey>, Error> {
    let mut order = Vec::new();
    let mut done = BTreeSet::new();
    let mut in_progress = Vec::new();

    for key in map.keys() {
        visit(map, key, &mut order, &mut done, &mut in_progress)?;
    }
    Ok(order)
}

/// Depth-first post-order visit.
fn visit(
    map: &BTreeMap<PackageKey, BuildPackage>,
    key: &PackageKey,
    order: &mut Vec<PackageKey>,
    done: &mut BTreeSet<PackageKey>,
    in_progress: &mut Vec<PackageKey>,
) -> Result<(), Error> {
    if done.contains(key) {
        return Ok(());
    }
    if in_progress.contains(key) {
        let start = in_progress.iter().position(|k| k == key).unwrap_or(0);
        let mut path: Vec<String> = in_progress[start..]
            .iter()
            .map(|k| k.name.to_string())
            .collect();
        path.push(key.name.to_string());
        return Err(Error::DependencyCycle {
            path: path.join(" -> "),
        });
    }
    in_progress.push(key.clone());
    if let Some(entry) = map.get(key) {
        for dependency in entry.dependencies.keys() {
            if map.contains_key(dependency) {
                visit(map, dependency, order, done, in_progress)?;
            }
        }
    }
    in_progress.pop();
    done.insert(key.clone());
    order.push(key.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use brig_types::PackageName;
    use testresult::TestResult;
    use uuid::Uuid;

    use super::*;
    use crate::error::UnsatisfiedDependent;

    fn key(name: &str, config: Uuid) -> PackageKey {
        PackageKey::new(config, PackageName::from_str(name).unwrap())
    }

    fn collection(entries: Vec<BuildPackage>) -> Collection {
        let mut map = BTreeMap::new();
        for entry in entries {
            map.insert(entry.key.clone(), entry);
        }
        Collection {
            map,
            unsatisfied: Vec::<UnsatisfiedDependent>::new(),
        }
    }

    #[test]
    fn cycle_is_fatal() {
        let config = Uuid::new_v4();
        let mut a = BuildPackage::new(BuildAction::Build, key("a", config));
        a.dependencies.insert(key("b", config), None);
        let mut b = BuildPackage::new(BuildAction::Build, key("b", config));
        b.dependencies.insert(key("a", config), None);

        let err = order(&collection(vec![a, b])).unwrap_err();
        assert!(matches!(err, Error::DependencyCycle { .. }));
    }

    #[test]
    fn prerequisites_precede_dependents() -> TestResult {
        let config = Uuid::new_v4();
        let mut map = BTreeMap::new();
        let mut a = BuildPackage::new(BuildAction::Build, key("app", config));
        a.dependencies.insert(key("libx", config), None);
        map.insert(a.key.clone(), a);
        let b = BuildPackage::new(BuildAction::Build, key("libx", config));
        map.insert(b.key.clone(), b);

        let order = topological_order(&map)?;
        assert_eq!(
            order,
            vec![key("libx", config), key("app", config)]
        );
        Ok(())
    }

    #[test]
    fn empty_collection_yields_empty_plan() -> TestResult {
        let plan = order(&collection(Vec::new()))?;
        assert!(plan.is_empty());
        assert_eq!(plan.to_string(), "");
        Ok(())
    }
}
