//! The unsatisfied-dependent repair search.
//!
//! When collection stabilises with recorded soft constraint failures,
//! the resolver attempts a repair: first by finding a dependency
//! version inside the intersection of all imposed constraints, then by
//! replacing one of the imposing dependents with a version that drops
//! or loosens its constraint. Every `(package, version)` adjustment is
//! tried at most once, which bounds the total work.

use std::collections::BTreeSet;

use brig_store::Store;
use brig_types::{PackageName, VersionConstraint};
use log::debug;

use crate::{
    context::ResolverContext,
    error::Error,
    types::{Collection, UserAction},
};

/// The adjustments already tried, preserved across restarts.
#[derive(Debug, Default)]
pub(crate) struct RepairState {
    tried: BTreeSet<(PackageName, String)>,
}

/// Attempts to repair the first recorded unsatisfied dependent.
///
/// Returns a synthesized user action pinning a package to a different
/// version, or `None` when the search is exhausted. Packages the user
/// pinned explicitly (`user_pinned`) are never adjusted.
///
/// # Errors
///
/// Returns an error if the available-package lookups fail.
pub(crate) fn repair(
    store: &mut Store,
    ctx: &mut dyn ResolverContext,
    collection: &Collection,
    state: &mut RepairState,
    user_pinned: &BTreeSet<PackageName>,
) -> Result<Option<UserAction>, Error> {
    let Some(first) = collection.unsatisfied.first() else {
        return Ok(None);
    };

    // Dependency side: a version satisfying the intersection of every
    // constraint imposed on the dependency, highest first.
    if !user_pinned.contains(&first.dependency.name) {
        if let Some(entry) = collection.map.get(&first.dependency) {
            let mut intersection: Option<VersionConstraint> = Some(VersionConstraint::any());
            for applied in &entry.constraints {
                intersection = intersection
                    .as_ref()
                    .and_then(|current| current.intersect(&applied.constraint));
            }
            if let Some(intersection) = intersection {
                for candidate in ctx.load_available(store, &first.dependency.name)? {
                    if !intersection.satisfies(&candidate.version) {
                        continue;
                    }
                    let adjustment =
                        (first.dependency.name.clone(), candidate.version.to_string());
                    if state.tried.contains(&adjustment) {
                        continue;
                    }
                    state.tried.insert(adjustment);
                    debug!(
                        "repair: pinning dependency {} to {}",
                        first.dependency.name, candidate.version
                    );
                    let mut action = UserAction::build(first.dependency.name.clone());
                    action.configuration = Some(first.dependency.configuration);
                    action.constraint =
                        Some(VersionConstraint::exact(candidate.version.clone()));
                    action.hold_package = false;
                    return Ok(Some(action));
                }
            }
        }
    }

    // Dependent side: replace an imposing dependent with a version
    // whose constraint admits the chosen dependency version. Lower
    // replacement versions are tried before higher ones.
    let mut dependents: Vec<_> = collection
        .unsatisfied
        .iter()
        .filter(|u| u.dependency == first.dependency)
        .map(|u| &u.dependent)
        .collect();
    dependents.sort_by(|a, b| a.key.name.cmp(&b.key.name));
    dependents.dedup_by(|a, b| a.key == b.key);

    for dependent in dependents {
        if user_pinned.contains(&dependent.key.name) {
            continue;
        }
        let mut candidates = ctx.load_available(store, &dependent.key.name)?;
        candidates.reverse();
        for candidate in candidates {
            if candidate.version == dependent.version {
                continue;
            }
            let adjustment = (dependent.key.name.clone(), candidate.version.to_string());
            if state.tried.contains(&adjustment) {
                continue;
            }

            let conflicting = candidate
                .dependencies
                .iter()
                .flat_map(|group| &group.alternatives)
                .flat_map(|alternative| &alternative.dependencies)
                .any(|dependency| {
                    dependency.name == first.dependency.name
                        && dependency
                            .constraint
                            .as_ref()
                            .is_some_and(|c| !c.satisfies(&first.chosen))
                });
            if conflicting {
                continue;
            }

            state.tried.insert(adjustment);
            debug!(
                "repair: replacing dependent {} with {}",
                dependent.key.name, candidate.version
            );
            let mut action = UserAction::build(dependent.key.name.clone());
            action.configuration = Some(dependent.key.configuration);
            action.constraint = Some(VersionConstraint::exact(candidate.version.clone()));
            action.hold_package = false;
            return Ok(Some(action));
        }
    }

    Ok(None)
}
