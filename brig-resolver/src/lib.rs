#![doc = include_str!("../README.md")]

mod cluster;
mod collect;
mod context;
mod error;
mod plan;
mod repair;
mod types;

use std::collections::BTreeSet;

use brig_store::Store;
use log::{debug, info};

pub use context::{DefaultContext, ResolverContext};
pub use error::{Error, Restart, UnsatisfiedDependent};
pub use plan::{ConfigureData, Plan, PlanStep};
pub use types::{
    AppliedConstraint, BuildAction, BuildPackage, BuildPackageFlags, Collection, Repoint,
    ResolveOptions, StickyState, UserAction,
};

use crate::{
    collect::{Collector, apply_restart},
    error::Failure,
    repair::RepairState,
};

/// The bound on restart-driven retries; exceeding it is an internal
/// error.
const MAX_RESTARTS: usize = 1_000;

/// The resolver driver.
///
/// Runs collection passes until one completes without a restart
/// signal, preserving the accumulated decisions (replaced versions,
/// unacceptable alternatives, postponed dependencies) across passes,
/// then repairs recorded soft constraint failures and orders the
/// result into a [`Plan`].
#[derive(Debug)]
pub struct Resolver<'a> {
    store: &'a mut Store,
    ctx: &'a mut dyn ResolverContext,
    options: ResolveOptions,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver over an open workspace cluster.
    pub fn new(
        store: &'a mut Store,
        ctx: &'a mut dyn ResolverContext,
        options: ResolveOptions,
    ) -> Self {
        Resolver {
            store,
            ctx,
            options,
        }
    }

    /// Resolves the user actions into a plan.
    ///
    /// # Errors
    ///
    /// Returns the fatal failure kinds described in [`Error`];
    /// restart-class conditions are handled internally.
    pub fn resolve(&mut self, actions: &[UserAction]) -> Result<Plan, Error> {
        let user_pinned: BTreeSet<_> = actions
            .iter()
            .filter(|action| action.constraint.is_some())
            .map(|action| action.name.clone())
            .collect();

        let mut sticky = StickyState::default();
        let mut repair_state = RepairState::default();
        let mut synthesized: Vec<UserAction> = Vec::new();

        for attempt in 1..=MAX_RESTARTS {
            let mut all = actions.to_vec();
            all.extend(synthesized.iter().cloned());

            let collector = Collector::new(self.store, self.ctx, &self.options, &sticky);
            match collector.collect(&all) {
                Ok(collection) => {
                    if collection.unsatisfied.is_empty() {
                        debug!("collection stabilised after {attempt} pass(es)");
                        return plan::order(&collection);
                    }
                    match repair::repair(
                        self.store,
                        self.ctx,
                        &collection,
                        &mut repair_state,
                        &user_pinned,
                    )? {
                        Some(action) => {
                            info!(
                                "retrying with {} pinned to repair an unsatisfied dependent",
                                action.name
                            );
                            // The pin supersedes any replacement
                            // recorded for the same package.
                            sticky
                                .replaced_versions
                                .retain(|key, _| key.name != action.name);
                            synthesized.retain(|existing| existing.name != action.name);
                            synthesized.push(action);
                        }
                        None => {
                            let first = collection
                                .unsatisfied
                                .first()
                                .expect("unsatisfied is non-empty");
                            return Err(Error::UnsatisfiableConstraints {
                                name: first.dependency.name.clone(),
                                chain: first.to_string(),
                            });
                        }
                    }
                }
                Err(Failure::Restart(restart)) => {
                    debug!("restarting collection: {restart:?}");
                    apply_restart(&mut sticky, restart);
                }
                Err(Failure::Fatal(error)) => return Err(*error),
            }
        }
        Err(Error::RestartLimit(MAX_RESTARTS))
    }
}
