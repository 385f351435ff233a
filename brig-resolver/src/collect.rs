//! The collector: builds the map of intended package actions.
//!
//! Collection enters user actions and then recursively satisfies
//! prerequisites, merging repeated enterings of the same package,
//! selecting among conditional dependency alternatives, grouping
//! configuration-negotiating dependents into clusters and postponing
//! work that needs information from packages collected later. A
//! decision that invalidates work already done surfaces as a
//! [`Restart`] and the driver retries from scratch with the decision
//! preserved.

use std::collections::{BTreeMap, BTreeSet};

use brig_skeleton::{DependencyPosition, VariableMap};
use brig_store::{AvailablePackage, ConfigurationType, Store};
use brig_types::{
    DependencyAlternative, PackageKey, PackageName, PackageType, PackageVersionKey, Version,
    VersionConstraint,
};
use log::debug;

use crate::{
    cluster::{Cluster, ClusterDependent, NegotiationState},
    context::ResolverContext,
    error::{Error, Failure, Restart, UnsatisfiedDependent},
    types::{
        AppliedConstraint, BuildAction, BuildPackage, Collection, ResolveOptions, StickyState,
        UnacceptableAlternative, UserAction,
    },
};

/// An internal bound on collection rounds; exceeding it is a logic
/// error surfaced as [`Error::RestartLimit`].
const MAX_ROUNDS: usize = 10_000;

/// One collection pass.
pub(crate) struct Collector<'a> {
    store: &'a mut Store,
    ctx: &'a mut dyn ResolverContext,
    options: &'a ResolveOptions,
    sticky: &'a StickyState,
    map: BTreeMap<PackageKey, BuildPackage>,
    clusters: Vec<Cluster>,
    /// Dependencies whose recursion waits for their cluster.
    cluster_gated: BTreeSet<PackageKey>,
    /// Packages whose alternative selection is ambiguous so far.
    postponed_packages: BTreeSet<PackageKey>,
    unsatisfied: Vec<UnsatisfiedDependent>,
    /// Packages the user named directly (never pruned).
    requested: BTreeSet<PackageKey>,
}

impl std::fmt::Debug for Collector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("entries", &self.map.len())
            .field("clusters", &self.clusters.len())
            .finish_non_exhaustive()
    }
}

impl<'a> Collector<'a> {
    /// Creates a collector for one pass.
    pub(crate) fn new(
        store: &'a mut Store,
        ctx: &'a mut dyn ResolverContext,
        options: &'a ResolveOptions,
        sticky: &'a StickyState,
    ) -> Self {
        Collector {
            store,
            ctx,
            options,
            sticky,
            map: BTreeMap::new(),
            clusters: Vec::new(),
            cluster_gated: BTreeSet::new(),
            postponed_packages: BTreeSet::new(),
            unsatisfied: Vec::new(),
            requested: BTreeSet::new(),
        }
    }

    /// Runs the pass over the user actions.
    pub(crate) fn collect(mut self, actions: &[UserAction]) -> Result<Collection, Failure> {
        for action in actions {
            self.enter_user_action(action)?;
        }

        self.run_to_fixpoint()?;
        self.collect_existing_dependents()?;
        // Re-evaluated dependents may have entered further
        // dependencies.
        self.run_to_fixpoint()?;

        self.prune_unreachable();
        self.finalize()?;

        Ok(Collection {
            map: self.map,
            unsatisfied: self.unsatisfied,
        })
    }

    /// Drives recursion, cluster negotiation and postponement
    /// resolution until nothing changes.
    fn run_to_fixpoint(&mut self) -> Result<(), Failure> {
        let mut rounds = 0usize;
        loop {
            rounds += 1;
            if rounds > MAX_ROUNDS {
                return Err(Error::RestartLimit(rounds).into());
            }
            if self.recurse_pending(false)? {
                continue;
            }
            if self.negotiate_clusters()? {
                continue;
            }
            // Everything left is postponed: force the first ambiguous
            // selection to make progress.
            if self.recurse_pending(true)? {
                continue;
            }
            return Ok(());
        }
    }

    /// Enters one user action into the map.
    fn enter_user_action(&mut self, action: &UserAction) -> Result<(), Failure> {
        let configuration = action.configuration.unwrap_or(self.store.self_uuid());
        let key = PackageKey::new(configuration, action.name.clone());
        self.requested.insert(key.clone());
        let selected = self.store.selected_package(configuration, &action.name)?;

        match action.action {
            BuildAction::Drop => {
                let Some(selected) = selected else {
                    return Err(Error::NotSelected {
                        name: action.name.clone(),
                        configuration,
                    }
                    .into());
                };
                if selected.held() && !self.options.yes {
                    return Err(Error::DropHeld(action.name.clone()).into());
                }
                let mut entry = BuildPackage::new(BuildAction::Drop, key.clone());
                entry.selected = Some(selected);
                entry.flags.unhold = true;
                self.insert_or_merge(entry)?;
            }
            BuildAction::Build | BuildAction::Adjust => {
                let mut entry = BuildPackage::new(action.action, key.clone());
                entry.selected = selected;
                entry.hold_package = action.hold_package && !action.unhold;
                entry.hold_version =
                    (action.hold_version || action.constraint.is_some()) && !action.unhold;
                entry.flags.unhold = action.unhold;
                entry.system = action.system;
                entry.config_vars = action.config_vars.clone();
                if let Some(constraint) = &action.constraint {
                    entry.constraints.push(AppliedConstraint {
                        constraint: constraint.clone(),
                        dependent: None,
                        existing: false,
                    });
                }
                self.insert_or_merge(entry)?;
            }
        }
        Ok(())
    }

    /// Enters or merges an entry, resolving its version.
    ///
    /// This is the single place later enterings of a package meet the
    /// earlier ones: constraints are unioned, holds strengthened,
    /// flags OR'd. A version replacement surfaces as a
    /// [`Restart::ReplaceVersion`].
    fn insert_or_merge(&mut self, entry: BuildPackage) -> Result<(), Failure> {
        let key = entry.key.clone();
        let is_new = !self.map.contains_key(&key);
        match self.map.remove(&key) {
            None => {
                self.map.insert(key.clone(), entry);
            }
            Some(mut existing) => {
                existing.merge(entry);
                self.map.insert(key.clone(), existing);
            }
        }

        if is_new {
            self.apply_existing_dependent_constraints(&key)?;
        }
        self.resolve_version(&key)?;
        Ok(())
    }

    /// Adds the constraints recorded by existing selected dependents of
    /// `key` as existing attributions.
    fn apply_existing_dependent_constraints(&mut self, key: &PackageKey) -> Result<(), Failure> {
        let dependents = self.store.dependents_of(key)?;
        let mut applied = Vec::new();
        for dependent_key in dependents {
            let Some(dependent) = self
                .store
                .selected_package(dependent_key.configuration, &dependent_key.name)?
            else {
                continue;
            };
            if let Some(Some(constraint)) = dependent.prerequisites.get(key) {
                applied.push(AppliedConstraint {
                    constraint: constraint.clone(),
                    dependent: Some(PackageVersionKey {
                        key: dependent_key,
                        version: dependent.version.clone(),
                    }),
                    existing: true,
                });
            }
        }
        if let Some(entry) = self.map.get_mut(key) {
            for constraint in applied {
                if !entry.constraints.contains(&constraint) {
                    entry.constraints.push(constraint);
                }
            }
        }
        Ok(())
    }

    /// (Re-)resolves the version of an entry after constraints changed.
    fn resolve_version(&mut self, key: &PackageKey) -> Result<(), Failure> {
        let Some(entry) = self.map.get(key) else {
            return Ok(());
        };
        if entry.action == BuildAction::Drop {
            return Ok(());
        }

        // Constraints imposed by this run's dependents and the user
        // must hold; existing dependents' constraints are soft and can
        // be repaired.
        let mut hard: Option<VersionConstraint> = None;
        for applied in &entry.constraints {
            if applied.existing {
                continue;
            }
            hard = Some(match hard {
                None => applied.constraint.clone(),
                Some(current) => current.intersect(&applied.constraint).ok_or_else(|| {
                    Error::UnsatisfiableConstraints {
                        name: key.name.clone(),
                        chain: entry.render_constraint_chain(),
                    }
                })?,
            });
        }

        // A sticky replacement pins the version outright.
        let pinned = self.sticky.replaced_versions.get(key).cloned();
        if let Some(None) = pinned {
            // The package turned out to be unneeded.
            if let Some(entry) = self.map.get_mut(key) {
                entry.action = BuildAction::Drop;
            }
            return Ok(());
        }

        let prefer_system = entry.system;
        let candidates = self.ctx.load_available(self.store, &key.name)?;
        let pinned = pinned.flatten();
        let replaced = pinned.is_some();
        let exact = match pinned {
            Some(version) => Some(version),
            None => entry
                .selected
                .as_ref()
                .filter(|s| {
                    entry.hold_version
                        && hard.as_ref().is_none_or(|c| c.satisfies(&s.version))
                })
                .map(|s| s.version.clone()),
        };
        let chosen = match exact {
            Some(version) => Self::pick_candidate(
                candidates,
                Some(&VersionConstraint::exact(version)),
                prefer_system,
            ),
            None => Self::pick_candidate(candidates, hard.as_ref(), prefer_system),
        };

        let entry = self.map.get_mut(key).expect("entry exists");
        entry.flags.replace |= replaced;
        match chosen {
            Some(available) => {
                let replacing = entry
                    .available
                    .as_ref()
                    .is_some_and(|current| current.version != available.version);
                if replacing {
                    // A later-discovered dependent needs a different
                    // version than the one already collected (and
                    // possibly recursed): restart with the replacement
                    // preserved.
                    debug!(
                        "version of {} replaced by {}",
                        key.name, available.version
                    );
                    return Err(Failure::Restart(Restart::ReplaceVersion {
                        key: key.clone(),
                        version: Some(available.version.clone()),
                    }));
                }
                if entry.available.is_none() {
                    entry.system |= available.system;
                    entry.available = Some(available);
                    entry.recursed = false;
                }
            }
            None => {
                if entry.system {
                    // A system package participates with the wildcard
                    // version and has no source build.
                    entry.recursed = true;
                    return Ok(());
                }
                if entry.selected.is_some() && entry.action == BuildAction::Adjust {
                    return Ok(());
                }
                if entry.constraints.iter().any(|c| !c.existing) || entry.selected.is_none() {
                    if self
                        .ctx
                        .load_available(self.store, &key.name)?
                        .is_empty()
                    {
                        return Err(Error::UnknownPackage(key.name.clone()).into());
                    }
                    return Err(Error::UnsatisfiableConstraints {
                        name: key.name.clone(),
                        chain: entry.render_constraint_chain(),
                    }
                    .into());
                }
            }
        }

        // Record soft failures for violated existing constraints.
        let entry = self.map.get(key).expect("entry exists");
        if let Some(version) = entry.target_version().cloned() {
            let violated: Vec<AppliedConstraint> = entry
                .constraints
                .iter()
                .filter(|c| c.existing && !c.constraint.satisfies(&version))
                .cloned()
                .collect();
            for applied in violated {
                if let Some(dependent) = applied.dependent {
                    let record = UnsatisfiedDependent {
                        dependent,
                        dependency: key.clone(),
                        constraint: applied.constraint,
                        chosen: version.clone(),
                    };
                    if !self.unsatisfied.contains(&record) {
                        debug!("recording unsatisfied dependent: {record}");
                        self.unsatisfied.push(record);
                    }
                }
            }
        }
        Ok(())
    }

    /// Picks the best candidate among `candidates` (ordered newest
    /// first) satisfying `constraint`.
    ///
    /// At equal version a source candidate is preferred over a system
    /// candidate, unless the entry asks for the system version
    /// (`prefer_system`), in which case the system candidate wins.
    fn pick_candidate(
        candidates: Vec<AvailablePackage>,
        constraint: Option<&VersionConstraint>,
        prefer_system: bool,
    ) -> Option<AvailablePackage> {
        let mut best: Option<AvailablePackage> = None;
        for candidate in candidates {
            if !constraint.is_none_or(|c| c.satisfies(&candidate.version)) {
                continue;
            }
            match &best {
                None => best = Some(candidate),
                Some(current)
                    if current.version == candidate.version
                        && current.system != candidate.system
                        && candidate.system == prefer_system =>
                {
                    best = Some(candidate);
                }
                // Candidates arrive newest first; once a lower version
                // appears the choice is final.
                Some(current) if candidate.version < current.version => break,
                _ => {}
            }
        }
        best
    }

    /// Recursively collects the dependencies of entries not yet
    /// recursed. Returns `true` if any progress was made.
    ///
    /// With `force` set, ambiguous alternative selections are resolved
    /// to the first satisfiable alternative instead of being postponed.
    fn recurse_pending(&mut self, force: bool) -> Result<bool, Failure> {
        let pending: Vec<PackageKey> = self
            .map
            .iter()
            .filter(|(key, entry)| {
                entry.action == BuildAction::Build
                    && !entry.recursed
                    && entry.available.is_some()
                    && !self.cluster_gated.contains(key)
                    && (force || !self.postponed_packages.contains(key))
                    && (force
                        || !self.sticky.postponed_dependencies.contains(key)
                        || self.clusters.iter().any(|c| c.dependencies.contains(key)))
            })
            .map(|(key, _)| key.clone())
            .collect();

        let mut progress = false;
        for key in pending {
            // The entry may have been replaced or gated while
            // processing a previous one.
            if self.cluster_gated.contains(&key) {
                continue;
            }
            if self.map.get(&key).is_none_or(|e| e.recursed) {
                continue;
            }
            progress |= self.recurse_one(&key, force)?;
        }
        Ok(progress)
    }

    /// Recursively collects the dependencies of one entry.
    fn recurse_one(&mut self, key: &PackageKey, force: bool) -> Result<bool, Failure> {
        let mut entry = self.map.remove(key).expect("entry exists");
        let result = self.recurse_entry(&mut entry, force);
        let postponed = matches!(result, Ok(false));
        self.map.insert(key.clone(), entry);
        if postponed {
            self.postponed_packages.insert(key.clone());
        } else {
            self.postponed_packages.remove(key);
        }
        result
    }

    /// The body of [`Collector::recurse_one`], operating on the entry
    /// removed from the map. Returns `false` if the entry was
    /// postponed.
    fn recurse_entry(&mut self, entry: &mut BuildPackage, force: bool) -> Result<bool, Failure> {
        let available = entry.available.clone().expect("available package");
        self.ensure_skeleton(entry)?;

        let groups = available.dependencies.clone();
        for (group_index, group) in groups.iter().enumerate() {
            if entry.selected_alternatives.len() > group_index {
                continue;
            }

            let chosen = self.select_alternative(entry, &available, group_index, group, force)?;
            let Some(alternative_index) = chosen else {
                // Ambiguous: postpone the whole package.
                debug!("postponing {} (ambiguous alternative)", entry.key);
                return Ok(false);
            };
            entry.selected_alternatives.push(alternative_index);
            if alternative_index == 0 {
                continue;
            }
            let alternative = &group.alternatives[alternative_index - 1];
            let position = DependencyPosition {
                group: group_index + 1,
                alternative: alternative_index,
            };

            if let Some(reflect) = &alternative.reflect {
                entry
                    .skeleton
                    .as_mut()
                    .expect("skeleton attached")
                    .evaluate_reflect(reflect, position)?;
            }

            // Resolve the dependency keys for this alternative.
            let mut dependency_keys = Vec::new();
            for dependency in &alternative.dependencies {
                let configuration = self.dependency_configuration(
                    &entry.key,
                    &dependency.name,
                    group.buildtime,
                )?;
                let dependency_key = PackageKey::new(configuration, dependency.name.clone());

                // A selected prerequisite reference to another
                // workspace's package of the same name is repointed.
                if let Some(selected) = &entry.selected {
                    let old = selected
                        .prerequisites
                        .keys()
                        .find(|k| k.name == dependency.name && **k != dependency_key)
                        .cloned();
                    if let Some(from) = old {
                        entry.flags.repoint = true;
                        entry.repoints.push(crate::types::Repoint {
                            from,
                            to: dependency_key.clone(),
                        });
                    }
                }

                entry
                    .dependencies
                    .insert(dependency_key.clone(), dependency.constraint.clone());
                dependency_keys.push((dependency_key, dependency.constraint.clone()));
            }

            let has_config_clause = alternative.has_config_clause();
            if has_config_clause {
                // Premature recursion: the dependency was already
                // recursively collected before this dependent could
                // join its cluster.
                for (dependency_key, _) in &dependency_keys {
                    let premature = self
                        .map
                        .get(dependency_key)
                        .is_some_and(|dependency| dependency.recursed)
                        && !self
                            .clusters
                            .iter()
                            .any(|c| c.dependencies.contains(dependency_key));
                    if premature {
                        debug!("premature collection of {dependency_key} detected");
                        return Err(Failure::Restart(Restart::PrematureDependency {
                            key: dependency_key.clone(),
                        }));
                    }
                }
            }

            // Enter the dependencies into the map.
            let dependent = PackageVersionKey {
                key: entry.key.clone(),
                version: available.version.clone(),
            };
            for (dependency_key, constraint) in &dependency_keys {
                let mut dependency_entry =
                    BuildPackage::new(BuildAction::Build, dependency_key.clone());
                dependency_entry.selected = self
                    .store
                    .selected_package(dependency_key.configuration, &dependency_key.name)?;
                if let Some(constraint) = constraint {
                    dependency_entry.constraints.push(AppliedConstraint {
                        constraint: constraint.clone(),
                        dependent: Some(dependent.clone()),
                        existing: false,
                    });
                }
                dependency_entry.required_by.insert(dependent.clone());
                self.insert_or_merge(dependency_entry)?;
            }

            if has_config_clause {
                let enabled_alternatives =
                    self.enabled_alternatives(entry, &available, group_index, group)?;
                let cluster_dependent = ClusterDependent {
                    key: entry.key.clone(),
                    position,
                    prefer: alternative.prefer.clone(),
                    accept: alternative.accept.clone(),
                    require: alternative.require.clone(),
                    has_alt: enabled_alternatives.len() > 1,
                    dependencies: dependency_keys.iter().map(|(k, _)| k.clone()).collect(),
                };
                self.add_to_cluster(cluster_dependent);
                for (dependency_key, _) in &dependency_keys {
                    self.cluster_gated.insert(dependency_key.clone());
                }
            }
        }

        entry.recursed = true;
        Ok(true)
    }

    /// Returns the indices (1-based) of the enabled alternatives of a
    /// group, with sticky-unacceptable ones excluded.
    fn enabled_alternatives(
        &mut self,
        entry: &mut BuildPackage,
        available: &AvailablePackage,
        group_index: usize,
        group: &brig_types::DependencyGroup,
    ) -> Result<Vec<usize>, Failure> {
        let mut enabled = Vec::new();
        for (index, alternative) in group.alternatives.iter().enumerate() {
            let unacceptable = UnacceptableAlternative {
                key: entry.key.clone(),
                version: available.version.to_string(),
                group: group_index + 1,
                alternative: index + 1,
            };
            if self.sticky.unacceptable_alternatives.contains(&unacceptable) {
                continue;
            }
            let position = DependencyPosition {
                group: group_index + 1,
                alternative: index + 1,
            };
            let is_enabled = match &alternative.enable {
                Some(condition) => entry
                    .skeleton
                    .as_ref()
                    .expect("skeleton attached")
                    .evaluate_enable(condition, position)?,
                None => true,
            };
            if is_enabled {
                enabled.push(index + 1);
            }
        }
        Ok(enabled)
    }

    /// Selects the alternative to use for one dependency group.
    ///
    /// Returns `Some(0)` when no alternative is enabled, `None` when
    /// the selection is ambiguous and the package must be postponed.
    fn select_alternative(
        &mut self,
        entry: &mut BuildPackage,
        available: &AvailablePackage,
        group_index: usize,
        group: &brig_types::DependencyGroup,
        force: bool,
    ) -> Result<Option<usize>, Failure> {
        let enabled = self.enabled_alternatives(entry, available, group_index, group)?;
        if enabled.is_empty() {
            return Ok(Some(0));
        }
        if enabled.len() == 1 {
            return Ok(Some(enabled[0]));
        }

        // Prefer the first enabled alternative all of whose direct
        // dependencies are already used.
        for &index in &enabled {
            let alternative = &group.alternatives[index - 1];
            if self.all_dependencies_used(&entry.key, alternative, group.buildtime)? {
                return Ok(Some(index));
            }
        }

        if !force {
            return Ok(None);
        }

        // Forced: the first enabled alternative whose dependencies are
        // all satisfiable, lower index first.
        for &index in &enabled {
            let alternative = &group.alternatives[index - 1];
            if self.all_dependencies_satisfiable(alternative)? {
                return Ok(Some(index));
            }
        }
        Ok(Some(enabled[0]))
    }

    /// Returns `true` if every dependency of `alternative` is already
    /// present in the collection map, selected in a candidate
    /// workspace, or explicitly requested.
    fn all_dependencies_used(
        &mut self,
        dependent: &PackageKey,
        alternative: &DependencyAlternative,
        buildtime: bool,
    ) -> Result<bool, Failure> {
        for dependency in &alternative.dependencies {
            let mut used = self
                .map
                .keys()
                .chain(self.requested.iter())
                .any(|k| k.name == dependency.name);
            if !used {
                let candidates = self.store.find_dependency_configurations(
                    dependent.configuration,
                    buildtime,
                    None,
                )?;
                for candidate in candidates {
                    if self
                        .store
                        .selected_package(candidate, &dependency.name)?
                        .is_some()
                    {
                        used = true;
                        break;
                    }
                }
            }
            if !used {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns `true` if every dependency of `alternative` has an
    /// available version satisfying its constraint.
    fn all_dependencies_satisfiable(
        &mut self,
        alternative: &DependencyAlternative,
    ) -> Result<bool, Failure> {
        for dependency in &alternative.dependencies {
            let candidates = self.ctx.load_available(self.store, &dependency.name)?;
            let satisfiable = candidates.iter().any(|c| {
                dependency
                    .constraint
                    .as_ref()
                    .is_none_or(|constraint| constraint.satisfies(&c.version))
            });
            if !satisfiable {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Determines the workspace a dependency resolves into.
    fn dependency_configuration(
        &mut self,
        dependent: &PackageKey,
        dependency: &PackageName,
        buildtime: bool,
    ) -> Result<uuid::Uuid, Failure> {
        let type_hint = if buildtime {
            let is_module = self
                .ctx
                .load_available(self.store, dependency)?
                .first()
                .is_some_and(|a| a.package_type == Some(PackageType::Module));
            Some(if is_module {
                ConfigurationType::Module
            } else {
                ConfigurationType::Host
            })
        } else {
            None
        };

        let candidates = self.store.find_dependency_configurations(
            dependent.configuration,
            buildtime,
            type_hint,
        )?;

        // Prefer a candidate that already holds the dependency.
        for candidate in &candidates {
            let key = PackageKey::new(*candidate, dependency.clone());
            if self.map.contains_key(&key)
                || self.store.selected_package(*candidate, dependency)?.is_some()
            {
                return Ok(*candidate);
            }
        }
        if let Some(first) = candidates.first() {
            return Ok(*first);
        }

        // No candidate workspace: create the private one.
        let config_type = type_hint.unwrap_or(ConfigurationType::Host);
        debug!(
            "creating private {config_type} workspace for {dependency} (required by {dependent})"
        );
        Ok(self
            .ctx
            .add_private_configuration(self.store, dependent.configuration, config_type)?)
    }

    /// Attaches a skeleton to an entry if it does not have one.
    fn ensure_skeleton(&mut self, entry: &mut BuildPackage) -> Result<(), Failure> {
        if entry.skeleton.is_some() {
            return Ok(());
        }
        let available = entry.available.clone().expect("available package");
        entry.skeleton = Some(
            self.ctx
                .make_skeleton(self.store, &available, &entry.config_vars)?,
        );
        Ok(())
    }

    /// Adds a dependent to the cluster set, creating or merging
    /// clusters as needed.
    fn add_to_cluster(&mut self, dependent: ClusterDependent) {
        let involved: Vec<usize> = self
            .clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.involves_any(&dependent.dependencies))
            .map(|(i, _)| i)
            .collect();

        match involved.split_first() {
            None => {
                debug!(
                    "new configuration cluster for {} ({} dependencies)",
                    dependent.key,
                    dependent.dependencies.len()
                );
                self.clusters.push(Cluster::new(dependent));
            }
            Some((&first, rest)) => {
                // Merge every later cluster the dependent bridges into
                // the first one, then add the dependent.
                for &index in rest.iter().rev() {
                    let other = self.clusters.remove(index);
                    debug!("merging configuration clusters");
                    self.clusters[first].merge(other);
                }
                self.clusters[first].add_dependent(dependent);
            }
        }
    }

    /// Runs negotiation rounds on every cluster that is ready.
    /// Returns `true` if any cluster progressed to
    /// [`NegotiationState::Done`].
    fn negotiate_clusters(&mut self) -> Result<bool, Failure> {
        let mut progress = false;
        for index in 0..self.clusters.len() {
            if self.clusters[index].state == NegotiationState::Done {
                continue;
            }
            self.negotiate_cluster(index)?;
            progress = true;
        }
        Ok(progress)
    }

    /// Negotiates one cluster to a fixed point.
    fn negotiate_cluster(&mut self, index: usize) -> Result<(), Failure> {
        self.clusters[index].state = NegotiationState::InProgress;

        // Seed the shared snapshot with the dependencies' defaults.
        let dependencies: Vec<PackageKey> =
            self.clusters[index].dependencies.iter().cloned().collect();
        let mut deps_cfg = std::mem::take(&mut self.clusters[index].deps_cfg);
        if deps_cfg.is_empty() {
            for dependency_key in &dependencies {
                let Some(mut dependency) = self.map.remove(dependency_key) else {
                    continue;
                };
                if dependency.available.is_some() {
                    self.ensure_skeleton(&mut dependency)?;
                    dependency
                        .skeleton
                        .as_ref()
                        .expect("skeleton attached")
                        .reload_defaults(&mut deps_cfg)?;
                }
                self.map.insert(dependency_key.clone(), dependency);
            }
        }

        // Rounds: process the dependents in introduction order until a
        // full pass changes nothing.
        loop {
            let before = render_values(&deps_cfg);
            let dependent_count = self.clusters[index].dependents.len();
            for position in 0..dependent_count {
                let (key, prefer, accept, require, clause_position, has_alt) = {
                    let dependent = &self.clusters[index].dependents[position];
                    (
                        dependent.key.clone(),
                        dependent.prefer.clone(),
                        dependent.accept.clone(),
                        dependent.require.clone(),
                        dependent.position,
                        dependent.has_alt,
                    )
                };
                let Some(mut entry) = self.map.remove(&key) else {
                    continue;
                };
                self.ensure_skeleton(&mut entry)?;
                let skeleton = entry.skeleton.as_ref().expect("skeleton attached");
                let version = entry
                    .target_version()
                    .cloned()
                    .unwrap_or_else(Version::wildcard);

                let accepted = match (&prefer, &accept, &require) {
                    (Some(prefer), Some(accept), _) => skeleton.evaluate_prefer_accept(
                        &mut deps_cfg,
                        prefer,
                        accept,
                        clause_position,
                        has_alt,
                    )?,
                    (_, _, Some(require)) => skeleton.evaluate_require(
                        &mut deps_cfg,
                        require,
                        clause_position,
                        has_alt,
                    )?,
                    _ => true,
                };
                self.map.insert(key.clone(), entry);

                if !accepted {
                    // The alternative is unacceptable; exclude it and
                    // restart the whole resolve.
                    self.clusters[index].deps_cfg = deps_cfg;
                    return Err(Failure::Restart(Restart::UnacceptableAlternative {
                        key,
                        version,
                        group: clause_position.group,
                        alternative: clause_position.alternative,
                    }));
                }
            }

            if render_values(&deps_cfg) == before {
                break;
            }

            // A later dependent changed what an earlier one saw:
            // re-negotiate, bounded by the shadow history.
            self.clusters[index].deps_cfg = deps_cfg.clone();
            self.clusters[index].depth += 1;
            let snapshot = self.clusters[index].snapshot();
            if self.clusters[index].shadow.contains(&snapshot) {
                return Err(Error::ConfigurationCycle { cluster: snapshot }.into());
            }
            self.clusters[index].shadow.insert(snapshot);
        }

        self.clusters[index].deps_cfg = deps_cfg;
        self.clusters[index].state = NegotiationState::Done;
        debug!(
            "configuration cluster negotiated in {} extra rounds",
            self.clusters[index].depth
        );

        // The negotiated variables become dependent-imposed
        // configuration of the dependencies, which may now be
        // recursively collected.
        for dependency_key in &dependencies {
            let Some(mut dependency) = self.map.remove(dependency_key) else {
                continue;
            };
            if dependency.available.is_some() {
                self.ensure_skeleton(&mut dependency)?;
                let namespace = dependency
                    .available
                    .as_ref()
                    .expect("available package")
                    .config_namespace();
                let skeleton = dependency.skeleton.as_mut().expect("skeleton attached");
                for (name, variable) in &self.clusters[index].deps_cfg {
                    if !name.starts_with(&namespace) {
                        continue;
                    }
                    if let Some(imposer) = &variable.dependent {
                        skeleton.impose_dependent_var(
                            name,
                            variable.value.clone(),
                            imposer.clone(),
                        );
                    }
                }
            }
            self.map.insert(dependency_key.clone(), dependency);
            self.cluster_gated.remove(dependency_key);
        }
        Ok(())
    }

    /// Discovers existing configured dependents of up/downgraded
    /// packages and schedules their reconfiguration or re-evaluation.
    fn collect_existing_dependents(&mut self) -> Result<(), Failure> {
        let changed: Vec<PackageKey> = self
            .map
            .iter()
            .filter(|(_, entry)| {
                match (&entry.action, &entry.selected, entry.target_version()) {
                    (BuildAction::Build, Some(selected), Some(target)) => {
                        selected.version != *target
                    }
                    (BuildAction::Drop, _, _) => true,
                    _ => false,
                }
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in changed {
            let dependents = self.store.dependents_of(&key)?;
            for dependent_key in dependents {
                if self.map.contains_key(&dependent_key) {
                    continue;
                }
                self.pre_reevaluate(&dependent_key, &key)?;
            }
        }
        Ok(())
    }

    /// Pre-reevaluates an existing dependent of an up/downgraded
    /// dependency (a read-only walk) and schedules either a plain
    /// reconfiguration or a full re-evaluation.
    fn pre_reevaluate(
        &mut self,
        dependent_key: &PackageKey,
        dependency_key: &PackageKey,
    ) -> Result<(), Failure> {
        let Some(selected) = self
            .store
            .selected_package(dependent_key.configuration, &dependent_key.name)?
        else {
            return Ok(());
        };
        let available = self
            .ctx
            .load_available(self.store, &dependent_key.name)?
            .into_iter()
            .find(|a| a.version == selected.version);

        let mut reevaluate = false;
        if let Some(available) = &available {
            let namespace = self
                .map
                .get(dependency_key)
                .and_then(|d| d.available.as_ref())
                .map(AvailablePackage::config_namespace);
            for (group_index, group) in available.dependencies.iter().enumerate() {
                let recorded = selected
                    .alternatives
                    .get(group_index)
                    .copied()
                    .unwrap_or(0);
                if recorded == 0 {
                    continue;
                }
                let Some(alternative) = group.alternatives.get(recorded - 1) else {
                    continue;
                };
                let contains_dependency = alternative
                    .dependencies
                    .iter()
                    .any(|d| d.name == dependency_key.name);

                // An earlier group with a configuration clause means
                // the dependent must be re-evaluated from that
                // position.
                if alternative.has_config_clause() {
                    reevaluate = true;
                    break;
                }
                if contains_dependency {
                    // Re-evaluation is optional unless the clauses read
                    // the dependency's configuration.
                    if let Some(namespace) = &namespace {
                        let reads_config = [&alternative.enable, &alternative.reflect]
                            .into_iter()
                            .flatten()
                            .any(|fragment| fragment.contains(namespace.as_str()));
                        if reads_config {
                            reevaluate = true;
                        }
                    }
                    break;
                }
            }
        }

        if reevaluate {
            debug!("re-evaluating existing dependent {dependent_key}");
            let mut entry = BuildPackage::new(BuildAction::Build, dependent_key.clone());
            entry.selected = Some(selected.clone());
            entry.available = available;
            entry.hold_package = selected.hold_package;
            entry.hold_version = true;
            entry.flags.reevaluate = true;
            entry.flags.reconfigure = true;
            self.insert_or_merge(entry)?;

            // Deviation from the recorded alternatives is detected
            // after recursion in `finalize`.
        } else {
            debug!("scheduling plain reconfigure of existing dependent {dependent_key}");
            let mut entry = BuildPackage::new(BuildAction::Adjust, dependent_key.clone());
            entry.selected = Some(selected.clone());
            entry.flags.reconfigure = true;
            entry.required_by.insert(PackageVersionKey {
                key: dependency_key.clone(),
                version: selected.version.clone(),
            });
            entry
                .dependencies
                .extend(selected.prerequisites.clone());
            self.insert_or_merge(entry)?;
        }
        Ok(())
    }

    /// Removes entries that are reachable from neither the user
    /// actions nor an existing selected package.
    fn prune_unreachable(&mut self) {
        loop {
            let doomed: Vec<PackageKey> = self
                .map
                .iter()
                .filter(|(key, entry)| {
                    !self.requested.contains(key)
                        && entry.selected.is_none()
                        && !entry.required_by.iter().any(|dependent| {
                            self.map
                                .get(&dependent.key)
                                .is_some_and(|e| e.action != BuildAction::Drop)
                        })
                })
                .map(|(key, _)| key.clone())
                .collect();
            if doomed.is_empty() {
                return;
            }
            for key in doomed {
                debug!("pruning unreachable collection entry {key}");
                self.map.remove(&key);
            }
        }
    }

    /// Final pass: detects re-evaluation deviation, re-checks external
    /// sources and fills in the final configuration of every build.
    fn finalize(&mut self) -> Result<(), Failure> {
        let keys: Vec<PackageKey> = self.map.keys().cloned().collect();
        for key in keys {
            let mut entry = self.map.remove(&key).expect("entry exists");

            if entry.flags.reevaluate {
                if let Some(selected) = &entry.selected {
                    if selected.alternatives != entry.selected_alternatives {
                        debug!("re-evaluation of {key} deviated; recollecting");
                        entry.flags.recollect = true;
                    }
                }
            }

            if entry.action == BuildAction::Build {
                refresh_external_source(&key, &mut entry)?;
            }
            if entry.action == BuildAction::Build && entry.available.is_some() {
                self.ensure_skeleton(&mut entry)?;
            }
            self.map.insert(key, entry);
        }
        Ok(())
    }
}

/// Re-checks the source tree of an external package collected at its
/// already-selected version: a changed checksum bumps the version
/// iteration so the equal version still reconfigures. The current
/// checksum is carried into the configure step to be recorded.
fn refresh_external_source(key: &PackageKey, entry: &mut BuildPackage) -> Result<(), Failure> {
    let Some(selected) = entry.selected.clone() else {
        return Ok(());
    };
    let Some(available) = entry.available.as_mut() else {
        return Ok(());
    };
    if !selected.is_external()
        || !selected
            .version
            .compare(&available.version, false, true)
            .is_eq()
    {
        return Ok(());
    }
    let Some(src_root) = &selected.src_root else {
        return Ok(());
    };
    if !src_root.is_dir() {
        return Ok(());
    }

    let checksum = brig_store::source_checksum(src_root)?;
    if selected.source_checksum.as_deref() != Some(checksum.as_str()) {
        debug!("source of external package {key} changed; bumping the iteration");
        available.version = selected.version.bump_iteration();
        entry.flags.reconfigure = true;
    }
    entry.source_checksum = Some(checksum);
    Ok(())
}

/// Renders the values of a variable map for change detection.
fn render_values(vars: &VariableMap) -> String {
    let mut lines = Vec::new();
    for (name, variable) in vars {
        lines.push(format!("{name}={}", variable.value));
    }
    lines.join("\n")
}

/// Applies a restart signal to the sticky state.
pub(crate) fn apply_restart(sticky: &mut StickyState, restart: Restart) {
    match restart {
        Restart::ReplaceVersion { key, version } => {
            sticky.replaced_versions.insert(key, version);
        }
        Restart::UnacceptableAlternative {
            key,
            version,
            group,
            alternative,
        } => {
            sticky.unacceptable_alternatives.insert(UnacceptableAlternative {
                key,
                version: version.to_string(),
                group,
                alternative,
            });
        }
        Restart::PrematureDependency { key } => {
            sticky.postponed_dependencies.insert(key);
        }
    }
}
