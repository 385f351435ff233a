//! The typed graph of linked workspaces.
//!
//! Workspaces link to each other to split a build across build
//! configurations: a `target` workspace holds the packages being
//! built, while build-time dependencies (tools, build-system modules)
//! live in linked `host` and `module` workspaces. Dependency lookup
//! enumerates candidate workspaces over this graph and never lets a
//! build-time dependency escape the `host`/`module` subgraph.

use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Store};

/// The type of a workspace.
#[derive(Clone, Copy, Debug, Display, AsRefStr, EnumString, Eq, Hash, PartialEq)]
pub enum ConfigurationType {
    /// Holds the packages being built.
    #[strum(serialize = "target")]
    Target,
    /// Holds build-time dependencies that run on the build host.
    #[strum(serialize = "host")]
    Host,
    /// Holds build-system modules.
    #[strum(serialize = "module")]
    Module,
}

impl ConfigurationType {
    /// Returns `true` for the types that may satisfy build-time
    /// dependencies.
    pub fn is_buildtime(self) -> bool {
        matches!(self, ConfigurationType::Host | ConfigurationType::Module)
    }
}

impl Store {
    /// Enumerates the workspaces that may satisfy a dependency
    /// originating in `origin`, in lookup order.
    ///
    /// - A run-time dependency is looked up in `origin` itself and in
    ///   the transitively implicitly-linked workspaces of the same
    ///   type.
    /// - A build-time dependency is looked up in `origin` itself when
    ///   its type already matches, and otherwise in `origin`'s explicit
    ///   children of the wanted type (`host` unless `type_hint` says
    ///   `module`). An empty result means the caller has to create a
    ///   private child workspace.
    /// - A `module` workspace additionally reaches the explicit
    ///   `module` children of its implicitly-linked peers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConfiguration`] if `origin` is not part
    /// of the cluster.
    pub fn find_dependency_configurations(
        &self,
        origin: Uuid,
        buildtime: bool,
        type_hint: Option<ConfigurationType>,
    ) -> Result<Vec<Uuid>, Error> {
        let origin_type = self.configuration(origin)?.config_type;
        let mut result = Vec::new();

        if !buildtime {
            let mut queue = vec![origin];
            while let Some(member) = queue.pop() {
                if result.contains(&member) {
                    continue;
                }
                result.push(member);
                for link in self.links(member)? {
                    if link.id == 0 || link.explicit {
                        continue;
                    }
                    // Implicit links may point outside the attached
                    // cluster; those cannot hold our dependencies.
                    if self.configuration(link.uuid).is_err() {
                        continue;
                    }
                    if link.config_type == origin_type {
                        queue.push(link.uuid);
                    }
                }
            }
            return Ok(result);
        }

        let wanted = type_hint.unwrap_or(ConfigurationType::Host);
        if origin_type == wanted {
            result.push(origin);
        }
        for link in self.links(origin)? {
            if link.id == 0 || !link.explicit {
                continue;
            }
            if link.config_type == wanted && !result.contains(&link.uuid) {
                result.push(link.uuid);
            }
        }

        // A module workspace reaches the explicit module children of
        // its implicitly-linked peers.
        if origin_type == ConfigurationType::Module && wanted == ConfigurationType::Module {
            let peers: Vec<Uuid> = self
                .links(origin)?
                .iter()
                .filter(|l| l.id != 0 && !l.explicit)
                .map(|l| l.uuid)
                .collect();
            for peer in peers {
                if self.configuration(peer).is_err() {
                    continue;
                }
                for link in self.links(peer)? {
                    if link.id != 0
                        && link.explicit
                        && link.config_type == ConfigurationType::Module
                        && !result.contains(&link.uuid)
                    {
                        result.push(link.uuid);
                    }
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use testresult::TestResult;

    use super::*;

    #[rstest::rstest]
    #[case(ConfigurationType::Target, "target", false)]
    #[case(ConfigurationType::Host, "host", true)]
    #[case(ConfigurationType::Module, "module", true)]
    fn type_strings(
        #[case] config_type: ConfigurationType,
        #[case] text: &str,
        #[case] buildtime: bool,
    ) {
        assert_eq!(config_type.to_string(), text);
        assert_eq!(ConfigurationType::from_str(text).unwrap(), config_type);
        assert_eq!(config_type.is_buildtime(), buildtime);
    }

    #[test]
    fn buildtime_lookup_uses_host_child() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
        let target = store.self_uuid();

        // No host child yet: the caller has to create one.
        assert!(store
            .find_dependency_configurations(target, true, None)?
            .is_empty());

        let host = store.create_private_configuration(target, ConfigurationType::Host)?;
        assert_eq!(
            store.find_dependency_configurations(target, true, None)?,
            vec![host]
        );

        // A host workspace satisfies its own build-time dependencies.
        assert_eq!(
            store.find_dependency_configurations(host, true, None)?,
            vec![host]
        );
        Ok(())
    }

    #[test]
    fn runtime_lookup_stays_in_type() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
        let target = store.self_uuid();
        let host = store.create_private_configuration(target, ConfigurationType::Host)?;

        // Run-time lookup from the target workspace never reaches the
        // host child (the host link is explicit, not implicit).
        assert_eq!(
            store.find_dependency_configurations(target, false, None)?,
            vec![target]
        );

        // Run-time lookup from the host workspace reaches the target
        // only if it were of the same type; it is not.
        assert_eq!(
            store.find_dependency_configurations(host, false, None)?,
            vec![host]
        );
        Ok(())
    }

    #[test]
    fn module_lookup_reaches_peer_children() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
        let target = store.self_uuid();
        let module = store.create_private_configuration(target, ConfigurationType::Module)?;

        assert_eq!(
            store.find_dependency_configurations(
                target,
                true,
                Some(ConfigurationType::Module)
            )?,
            vec![module]
        );

        // The module workspace itself reaches the target's module
        // children through its implicit back-link, which includes
        // itself.
        let reachable = store.find_dependency_configurations(
            module,
            true,
            Some(ConfigurationType::Module),
        )?;
        assert_eq!(reachable, vec![module]);
        Ok(())
    }
}
