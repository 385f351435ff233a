//! Configuration clusters.
//!
//! When a dependency is subject to prefer/accept or require
//! negotiation, the dependents sharing it form a *cluster* that owns
//! the dependency-configuration snapshot being negotiated. Clusters
//! grow as later dependents touch any of their dependencies and two
//! clusters merge when a dependent bridges them.

use std::collections::BTreeSet;

use brig_skeleton::{DependencyPosition, VariableMap};
use brig_types::PackageKey;

/// The negotiation state of a cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum NegotiationState {
    /// Negotiation has not started.
    NotYet,
    /// Negotiation rounds are running.
    InProgress,
    /// A full pass completed without changes.
    Done,
}

/// One dependent participating in a cluster.
#[derive(Debug)]
pub(crate) struct ClusterDependent {
    /// The dependent package.
    pub key: PackageKey,
    /// The dependency position the clauses were declared at.
    pub position: DependencyPosition,
    /// The prefer fragment, paired with `accept`.
    pub prefer: Option<String>,
    /// The accept condition.
    pub accept: Option<String>,
    /// The require fragment.
    pub require: Option<String>,
    /// Whether the dependent has another enabled alternative to fall
    /// back to if this configuration is rejected.
    pub has_alt: bool,
    /// The dependency keys at this position.
    pub dependencies: Vec<PackageKey>,
}

/// A set of dependents negotiating the configuration of a shared set
/// of dependencies.
#[derive(Debug)]
pub(crate) struct Cluster {
    /// The dependencies under negotiation.
    pub dependencies: BTreeSet<PackageKey>,
    /// The dependents, in order of introduction; merges append.
    pub dependents: Vec<ClusterDependent>,
    /// The shared dependency-configuration snapshot.
    pub deps_cfg: VariableMap,
    /// The negotiation state.
    pub state: NegotiationState,
    /// The number of negotiation rounds run.
    pub depth: usize,
    /// The shadow history: every previously negotiated state of the
    /// cluster. Re-entering a recorded state signals a negotiation
    /// cycle.
    pub shadow: BTreeSet<String>,
}

impl Cluster {
    /// Creates a cluster from its first dependent.
    pub fn new(dependent: ClusterDependent) -> Self {
        Cluster {
            dependencies: dependent.dependencies.iter().cloned().collect(),
            dependents: vec![dependent],
            deps_cfg: VariableMap::new(),
            state: NegotiationState::NotYet,
            depth: 0,
            shadow: BTreeSet::new(),
        }
    }

    /// Returns `true` if the cluster negotiates any of `dependencies`.
    pub fn involves_any(&self, dependencies: &[PackageKey]) -> bool {
        dependencies.iter().any(|d| self.dependencies.contains(d))
    }

    /// Returns `true` if `key` is one of the cluster's dependents.
    pub fn has_dependent(&self, key: &PackageKey) -> bool {
        self.dependents.iter().any(|d| &d.key == key)
    }

    /// Adds a dependent, extending the dependency set.
    ///
    /// A dependent joining an already negotiated cluster resets it to
    /// [`NegotiationState::NotYet`] so that a further round runs.
    pub fn add_dependent(&mut self, dependent: ClusterDependent) {
        self.dependencies.extend(dependent.dependencies.iter().cloned());
        self.dependents.push(dependent);
        if self.state == NegotiationState::Done {
            self.state = NegotiationState::NotYet;
        }
    }

    /// Merges `other` into `self` (the dependent that bridges the two
    /// clusters is added separately).
    pub fn merge(&mut self, other: Cluster) {
        self.dependencies.extend(other.dependencies);
        self.dependents.extend(other.dependents);
        self.shadow.extend(other.shadow);
        if self.state == NegotiationState::Done {
            self.state = NegotiationState::NotYet;
        }
    }

    /// Renders the cluster's current negotiation state for the shadow
    /// history and for diagnostics.
    pub fn snapshot(&self) -> String {
        let mut lines = Vec::new();
        for dependent in &self.dependents {
            lines.push(format!("{} at {}", dependent.key, dependent.position));
        }
        for (name, variable) in &self.deps_cfg {
            lines.push(format!("{name}={}", variable.value));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use brig_types::PackageName;
    use uuid::Uuid;

    use super::*;

    fn key(name: &str, config: Uuid) -> PackageKey {
        PackageKey::new(config, PackageName::from_str(name).unwrap())
    }

    fn dependent(name: &str, config: Uuid, dependencies: &[&str]) -> ClusterDependent {
        ClusterDependent {
            key: key(name, config),
            position: DependencyPosition {
                group: 1,
                alternative: 1,
            },
            prefer: None,
            accept: None,
            require: Some("config.shared.x = true".to_string()),
            has_alt: false,
            dependencies: dependencies.iter().map(|d| key(d, config)).collect(),
        }
    }

    #[test]
    fn clusters_grow_and_merge() {
        let config = Uuid::new_v4();
        let mut first = Cluster::new(dependent("x", config, &["libshared"]));
        assert!(first.involves_any(&[key("libshared", config)]));
        assert!(!first.involves_any(&[key("other", config)]));

        first.add_dependent(dependent("y", config, &["libshared", "libextra"]));
        assert!(first.involves_any(&[key("libextra", config)]));
        assert_eq!(first.dependents.len(), 2);

        let second = Cluster::new(dependent("z", config, &["libother"]));
        first.merge(second);
        assert!(first.involves_any(&[key("libother", config)]));
        // Introduction order is preserved across merges.
        let names: Vec<String> = first
            .dependents
            .iter()
            .map(|d| d.key.name.to_string())
            .collect();
        assert_eq!(names, vec!["x", "y", "z"]);
    }

    #[test]
    fn done_cluster_reopens_on_new_dependent() {
        let config = Uuid::new_v4();
        let mut cluster = Cluster::new(dependent("x", config, &["libshared"]));
        cluster.state = NegotiationState::Done;
        cluster.add_dependent(dependent("y", config, &["libshared"]));
        assert_eq!(cluster.state, NegotiationState::NotYet);
    }

    #[test]
    fn snapshot_is_deterministic() {
        let config = Uuid::new_v4();
        let cluster = Cluster::new(dependent("x", config, &["libshared"]));
        assert_eq!(cluster.snapshot(), cluster.snapshot());
        assert!(cluster.snapshot().contains("x"));
    }
}
