//! The package skeleton.

use std::{
    fmt::{Display, Formatter},
    fs,
    path::{Path, PathBuf},
};

use brig_types::{ConfigOrigin, ConfigVariable, PackageName, ProjectName, Version};
use log::debug;
use sha2::{Digest, Sha256};

use crate::{
    Error,
    eval::evaluate_fragment,
    value::{Origin, Value, VariableMap},
};

/// The result of evaluating a build fragment: the updated variable set
/// and the boolean result of the last expression in the fragment.
#[derive(Clone, Debug)]
pub struct Evaluation {
    /// The variables after the evaluation.
    pub vars: VariableMap,
    /// The boolean result of the fragment.
    pub result: bool,
}

/// The build-system boundary: evaluates a build fragment over a set of
/// variables.
///
/// The skeleton drives everything through this trait so that the real
/// build-system loader can be plugged in by the driver; the
/// [`DefaultEvaluator`] interprets the declarative subset dependency
/// clauses are written in.
pub trait FragmentEvaluator: std::fmt::Debug {
    /// Evaluates `fragment` over `vars`.
    ///
    /// # Errors
    ///
    /// Returns an error if the fragment cannot be parsed or evaluated.
    fn evaluate(&self, fragment: &str, vars: &VariableMap) -> Result<Evaluation, Error>;
}

/// The built-in [`FragmentEvaluator`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultEvaluator;

impl FragmentEvaluator for DefaultEvaluator {
    fn evaluate(&self, fragment: &str, vars: &VariableMap) -> Result<Evaluation, Error> {
        let (vars, result) = evaluate_fragment(fragment, vars)?;
        Ok(Evaluation { vars, result })
    }
}

/// A position inside a package's dependency declarations, for
/// diagnostics. Both indices are 1-based.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DependencyPosition {
    /// The dependency group index.
    pub group: usize,
    /// The alternative index within the group.
    pub alternative: usize,
}

impl Display for DependencyPosition {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "depends clause #{} alternative #{}",
            self.group, self.alternative
        )
    }
}

/// An ephemeral, project-shaped evaluator for one package version.
///
/// A skeleton materializes the package's boot and root build fragments
/// into a minimal on-disk project and evaluates dependency-clause
/// expressions against the package's configuration: its defaults, the
/// user's command-line overrides, variables imposed by dependents and
/// the variables its own reflect clauses accumulated.
///
/// Every operation is idempotent over the same inputs: each call drops
/// and rebuilds the evaluation context from the materialized fragments.
/// Skeletons may be moved but never shared across threads.
#[derive(Debug)]
pub struct Skeleton {
    package: PackageName,
    version: Version,
    /// The `config.<project>.` variable namespace of the package.
    namespace: String,
    root_build_path: Option<PathBuf>,
    user_overrides: Vec<(String, Value)>,
    dependent_vars: VariableMap,
    reflect_vars: VariableMap,
    evaluator: Box<dyn FragmentEvaluator>,
}

impl Skeleton {
    /// Creates a skeleton for one package version.
    ///
    /// The boot and root build fragments are materialized under
    /// `scratch_parent` (normally the workspace scratch directory, so
    /// cleanup is inherited from it). `user_overrides` are the
    /// command-line configuration overrides in `name=value` form.
    ///
    /// # Errors
    ///
    /// Returns an error if an override is malformed or materializing
    /// the project fails.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        package: PackageName,
        version: Version,
        project: Option<&ProjectName>,
        bootstrap_build: Option<&str>,
        root_build: Option<&str>,
        user_overrides: &[String],
        evaluator: Box<dyn FragmentEvaluator>,
        scratch_parent: &Path,
    ) -> Result<Self, Error> {
        let namespace = match project {
            Some(project) => format!("config.{project}."),
            None => format!("config.{package}."),
        };

        let mut overrides = Vec::new();
        for entry in user_overrides {
            let Some((name, value)) = entry.split_once('=') else {
                return Err(Error::Evaluation {
                    context: format!("configuration override '{entry}'"),
                    reason: "expected name=value".to_string(),
                });
            };
            overrides.push((name.trim().to_string(), Value::classify(value.trim())));
        }

        let project_dir = scratch_parent.join(format!("{package}-{version}"));
        let build_dir = project_dir.join("build");
        fs::create_dir_all(&build_dir).map_err(|source| Error::Io {
            context: format!("creating skeleton project {}", project_dir.display()),
            source,
        })?;
        if let Some(bootstrap) = bootstrap_build {
            write_fragment(&build_dir.join("bootstrap.build"), bootstrap)?;
        }
        let root_build_path = match root_build {
            Some(root) => {
                let path = build_dir.join("root.build");
                write_fragment(&path, root)?;
                Some(path)
            }
            None => None,
        };

        debug!("skeleton for {package} {version} at {}", project_dir.display());
        Ok(Skeleton {
            package,
            version,
            namespace,
            root_build_path,
            user_overrides: overrides,
            dependent_vars: VariableMap::new(),
            reflect_vars: VariableMap::new(),
            evaluator,
        })
    }

    /// Returns the package name the skeleton was created for.
    pub fn package(&self) -> &PackageName {
        &self.package
    }

    /// Returns the package version the skeleton was created for.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Imposes a dependent-set variable on this package.
    pub fn impose_dependent_var(&mut self, name: &str, value: Value, dependent: PackageName) {
        self.dependent_vars
            .set_by_dependent(name, value, Origin::Override, dependent);
    }

    /// Builds the evaluation context from scratch: package defaults,
    /// then accumulated reflects, then dependent-imposed variables,
    /// then user overrides (later layers win).
    fn load_context(&self) -> Result<VariableMap, Error> {
        let mut vars = VariableMap::new();
        if let Some(path) = &self.root_build_path {
            let fragment = fs::read_to_string(path).map_err(|source| Error::Io {
                context: format!("reading {}", path.display()),
                source,
            })?;
            let evaluation = self.evaluator.evaluate(&fragment, &vars)?;
            // Everything the root fragment defines is a package
            // default.
            for (name, variable) in &evaluation.vars {
                vars.set(name, variable.value.clone(), Origin::Default);
            }
        }
        for (name, variable) in &self.reflect_vars {
            vars.set(name, variable.value.clone(), Origin::Buildfile);
        }
        for (name, variable) in &self.dependent_vars {
            vars.set(name, variable.value.clone(), Origin::Override);
        }
        for (name, value) in &self.user_overrides {
            vars.set(name, value.clone(), Origin::Override);
        }
        Ok(vars)
    }

    /// Populates `cfg` with every variable of the package's
    /// `config.<project>.*` namespace currently defined, tagging each
    /// with its origin.
    ///
    /// Variables already present in `cfg` but no longer defined are
    /// re-tagged [`Origin::Undefined`] with their previous value
    /// preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the root fragment fails to evaluate.
    pub fn reload_defaults(&self, cfg: &mut VariableMap) -> Result<(), Error> {
        let context = self.load_context()?;
        let stale: Vec<String> = cfg
            .iter()
            .map(|(name, _)| name.clone())
            .filter(|name| !context.is_defined(name))
            .collect();
        for name in stale {
            if let Some(variable) = cfg.get(&name).cloned() {
                cfg.set(&name, variable.value, Origin::Undefined);
            }
        }
        for (name, variable) in &context {
            if name.starts_with(&self.namespace) {
                cfg.set(name, variable.value.clone(), variable.origin);
            }
        }
        Ok(())
    }

    /// Attempts a root load with `cfg` applied and reports whether it
    /// succeeded, without aborting on failure.
    pub fn verify_sensible(&self, cfg: &VariableMap) -> (bool, String) {
        let Some(path) = &self.root_build_path else {
            return (true, String::new());
        };
        let fragment = match fs::read_to_string(path) {
            Ok(fragment) => fragment,
            Err(error) => return (false, error.to_string()),
        };
        let mut vars = cfg.clone();
        for (name, value) in &self.user_overrides {
            vars.set(name, value.clone(), Origin::Override);
        }
        match self.evaluator.evaluate(&fragment, &vars) {
            Ok(_) => (true, String::new()),
            Err(error) => (false, error.to_string()),
        }
    }

    /// Evaluates a dependency alternative's enable condition.
    ///
    /// # Errors
    ///
    /// Returns an error if the condition fails to parse or evaluate.
    pub fn evaluate_enable(&self, condition: &str, pos: DependencyPosition) -> Result<bool, Error> {
        let context = self.load_context()?;
        let evaluation =
            self.evaluator
                .evaluate(condition, &context)
                .map_err(|error| Error::Evaluation {
                    context: format!("enable condition at {pos} of {}", self.package),
                    reason: error.to_string(),
                })?;
        Ok(evaluation.result)
    }

    /// Evaluates a reflect fragment, accumulating the variables it
    /// exposes.
    ///
    /// Re-reflecting a variable with the same value is harmless;
    /// re-reflecting with a different value is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReflectRedefinition`] on a divergent override
    /// of a previously reflected variable or an evaluation failure.
    pub fn evaluate_reflect(
        &mut self,
        fragment: &str,
        pos: DependencyPosition,
    ) -> Result<(), Error> {
        let context = self.load_context()?;
        let evaluation =
            self.evaluator
                .evaluate(fragment, &context)
                .map_err(|error| Error::Evaluation {
                    context: format!("reflect clause at {pos} of {}", self.package),
                    reason: error.to_string(),
                })?;
        for name in evaluation.vars.changed_names(&context) {
            let Some(value) = evaluation.vars.value(&name).cloned() else {
                continue;
            };
            if let Some(previous) = self.reflect_vars.value(&name) {
                if *previous != value {
                    return Err(Error::ReflectRedefinition {
                        package: self.package.to_string(),
                        version: self.version.clone(),
                        name,
                        previous: previous.to_string(),
                        new: value.to_string(),
                    });
                }
            }
            self.reflect_vars.set(&name, value, Origin::Buildfile);
        }
        Ok(())
    }

    /// Applies a prefer fragment to the dependency configuration
    /// snapshot and evaluates the accept condition.
    ///
    /// On acceptance the changed variables are committed back to
    /// `deps_cfg`, tagged with this package as the originating
    /// dependent, and `true` is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationRejected`] if the configuration is
    /// rejected and the dependent has no other enabled alternative
    /// (`has_alt` is `false`), or an evaluation failure.
    pub fn evaluate_prefer_accept(
        &self,
        deps_cfg: &mut VariableMap,
        prefer: &str,
        accept: &str,
        pos: DependencyPosition,
        has_alt: bool,
    ) -> Result<bool, Error> {
        let view = self.dependency_view(deps_cfg)?;
        let evaluation =
            self.evaluator
                .evaluate(prefer, &view)
                .map_err(|error| Error::Evaluation {
                    context: format!("prefer clause at {pos} of {}", self.package),
                    reason: error.to_string(),
                })?;
        let accepted = self
            .evaluator
            .evaluate(accept, &evaluation.vars)
            .map_err(|error| Error::Evaluation {
                context: format!("accept condition at {pos} of {}", self.package),
                reason: error.to_string(),
            })?
            .result;

        if !accepted {
            if !has_alt {
                return Err(Error::ConfigurationRejected {
                    package: self.package.to_string(),
                    version: self.version.clone(),
                    position: pos.to_string(),
                });
            }
            return Ok(false);
        }

        for name in evaluation.vars.changed_names(&view) {
            if !name.starts_with("config.") || name.starts_with(&self.namespace) {
                continue;
            }
            if let Some(value) = evaluation.vars.value(&name).cloned() {
                deps_cfg.set_by_dependent(&name, value, Origin::Override, self.package.clone());
            }
        }
        Ok(true)
    }

    /// Applies a require fragment to the dependency configuration
    /// snapshot.
    ///
    /// A require fragment may only set boolean dependency variables to
    /// `true`. If a variable it sets is already overridden to a falsy
    /// value the configuration is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequireNonTrue`] if the fragment sets anything
    /// other than boolean `true`, [`Error::ConfigurationRejected`] on a
    /// rejection without remaining alternatives, or an evaluation
    /// failure.
    pub fn evaluate_require(
        &self,
        deps_cfg: &mut VariableMap,
        require: &str,
        pos: DependencyPosition,
        has_alt: bool,
    ) -> Result<bool, Error> {
        let view = self.dependency_view(deps_cfg)?;
        let evaluation =
            self.evaluator
                .evaluate(require, &view)
                .map_err(|error| Error::Evaluation {
                    context: format!("require clause at {pos} of {}", self.package),
                    reason: error.to_string(),
                })?;

        let mut committed = Vec::new();
        for name in evaluation.vars.changed_names(&view) {
            if !name.starts_with("config.") || name.starts_with(&self.namespace) {
                continue;
            }
            let Some(value) = evaluation.vars.value(&name).cloned() else {
                continue;
            };
            if value != Value::Bool(true) {
                return Err(Error::RequireNonTrue {
                    name,
                    value: value.to_string(),
                });
            }
            if let Some(existing) = deps_cfg.value(&name) {
                if !existing.truthy() {
                    if !has_alt {
                        return Err(Error::ConfigurationRejected {
                            package: self.package.to_string(),
                            version: self.version.clone(),
                            position: pos.to_string(),
                        });
                    }
                    return Ok(false);
                }
            }
            committed.push(name);
        }
        for name in committed {
            deps_cfg.set_by_dependent(
                &name,
                Value::Bool(true),
                Origin::Override,
                self.package.clone(),
            );
        }
        Ok(true)
    }

    /// Finalizes the skeleton: returns the merged command-line override
    /// list and the configuration variables to record in the selected
    /// package.
    ///
    /// User overrides take precedence over dependent-imposed variables,
    /// which take precedence over reflected ones.
    pub fn collect_config(&self) -> (Vec<String>, Vec<ConfigVariable>) {
        let mut merged: Vec<(String, Value, ConfigOrigin)> = Vec::new();
        let mut push = |name: &str, value: &Value, origin: ConfigOrigin| {
            if !merged.iter().any(|(existing, ..)| existing == name) {
                merged.push((name.to_string(), value.clone(), origin));
            }
        };
        for (name, value) in &self.user_overrides {
            push(name, value, ConfigOrigin::User);
        }
        for (name, variable) in &self.dependent_vars {
            push(name, &variable.value, ConfigOrigin::Dependent);
        }
        for (name, variable) in &self.reflect_vars {
            push(name, &variable.value, ConfigOrigin::Reflect);
        }
        merged.sort_by(|a, b| a.0.cmp(&b.0));

        let cmdline = merged
            .iter()
            .map(|(name, value, _)| format!("{name}={value}"))
            .collect();
        let variables = merged
            .into_iter()
            .map(|(name, _, origin)| ConfigVariable { name, origin })
            .collect();
        (cmdline, variables)
    }

    /// Returns a checksum over the merged configuration, recorded in
    /// the selected package to detect configuration drift.
    pub fn config_checksum(&self) -> String {
        let (cmdline, _) = self.collect_config();
        let mut hasher = Sha256::new();
        for line in cmdline {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Builds the view a dependency-configuration fragment evaluates
    /// in: the dependency snapshot with this package's own context
    /// layered underneath.
    fn dependency_view(&self, deps_cfg: &VariableMap) -> Result<VariableMap, Error> {
        let mut view = self.load_context()?;
        for (name, variable) in deps_cfg {
            view.set(name, variable.value.clone(), variable.origin);
        }
        Ok(view)
    }
}

/// Writes one build fragment file.
fn write_fragment(path: &Path, content: &str) -> Result<(), Error> {
    let mut text = content.to_string();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    fs::write(path, text).map_err(|source| Error::Io {
        context: format!("writing {}", path.display()),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use testresult::TestResult;

    use super::*;

    fn make_skeleton(
        root_build: Option<&str>,
        user_overrides: &[&str],
        scratch: &Path,
    ) -> Result<Skeleton, Error> {
        let overrides: Vec<String> = user_overrides.iter().map(ToString::to_string).collect();
        Skeleton::new(
            PackageName::from_str("foo").unwrap(),
            Version::from_str("1.0.0").unwrap(),
            None,
            None,
            root_build,
            &overrides,
            Box::new(DefaultEvaluator),
            scratch,
        )
    }

    const POS: DependencyPosition = DependencyPosition {
        group: 1,
        alternative: 1,
    };

    #[test]
    fn reload_defaults_classifies_origins() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let skeleton = make_skeleton(
            Some("config.foo.api = bar\nconfig.foo.buf = 8"),
            &["config.foo.buf=16"],
            tmp.path(),
        )?;

        let mut cfg = VariableMap::new();
        cfg.set(
            "config.foo.gone",
            Value::String("old".to_string()),
            Origin::Default,
        );
        skeleton.reload_defaults(&mut cfg)?;

        assert_eq!(
            cfg.value("config.foo.api"),
            Some(&Value::String("bar".to_string()))
        );
        assert_eq!(cfg.get("config.foo.api").unwrap().origin, Origin::Default);
        assert_eq!(cfg.value("config.foo.buf"), Some(&Value::Int(16)));
        assert_eq!(cfg.get("config.foo.buf").unwrap().origin, Origin::Override);
        assert_eq!(cfg.get("config.foo.gone").unwrap().origin, Origin::Undefined);
        Ok(())
    }

    #[test]
    fn verify_sensible_reports_diagnostics() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let skeleton = make_skeleton(Some("config.foo.x = 1"), &[], tmp.path())?;
        let (ok, diagnostics) = skeleton.verify_sensible(&VariableMap::new());
        assert!(ok);
        assert!(diagnostics.is_empty());

        let broken = make_skeleton(Some("config.foo.x = $config.foo.missing"), &[], tmp.path())?;
        let (ok, diagnostics) = broken.verify_sensible(&VariableMap::new());
        assert!(!ok);
        assert!(diagnostics.contains("config.foo.missing"));
        Ok(())
    }

    #[test]
    fn enable_sees_defaults_and_overrides() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let skeleton = make_skeleton(Some("config.foo.fast = true"), &[], tmp.path())?;
        assert!(skeleton.evaluate_enable("config.foo.fast", POS)?);
        assert!(!skeleton.evaluate_enable("defined(config.foo.api)", POS)?);

        let overridden = make_skeleton(
            Some("config.foo.fast = true"),
            &["config.foo.fast=false"],
            tmp.path(),
        )?;
        assert!(!overridden.evaluate_enable("config.foo.fast", POS)?);
        Ok(())
    }

    #[test]
    fn reflect_accumulates_and_detects_divergence() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let mut skeleton = make_skeleton(None, &[], tmp.path())?;

        skeleton.evaluate_reflect("config.foo.api = 'bar'", POS)?;
        // Re-reflecting the same value is fine.
        skeleton.evaluate_reflect("config.foo.api = 'bar'", POS)?;

        let err = skeleton
            .evaluate_reflect("config.foo.api = 'baz'", POS)
            .unwrap_err();
        assert!(matches!(err, Error::ReflectRedefinition { .. }));
        Ok(())
    }

    #[test]
    fn reflected_variables_are_visible_to_enable() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let mut skeleton = make_skeleton(None, &[], tmp.path())?;
        assert!(skeleton.evaluate_enable("!defined(config.foo.api)", POS)?);
        skeleton.evaluate_reflect("config.foo.api = 'bar'", POS)?;
        assert!(!skeleton.evaluate_enable("!defined(config.foo.api)", POS)?);
        Ok(())
    }

    #[test]
    fn prefer_accept_commits_on_acceptance() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let skeleton = make_skeleton(None, &[], tmp.path())?;

        let mut deps_cfg = VariableMap::new();
        deps_cfg.set("config.libshared.buf", Value::Int(8), Origin::Default);

        let accepted = skeleton.evaluate_prefer_accept(
            &mut deps_cfg,
            "config.libshared.buf = max(config.libshared.buf, 16)",
            "config.libshared.buf >= 16",
            POS,
            false,
        )?;
        assert!(accepted);
        assert_eq!(deps_cfg.value("config.libshared.buf"), Some(&Value::Int(16)));
        let variable = deps_cfg.get("config.libshared.buf").unwrap();
        assert_eq!(
            variable.dependent.as_ref().map(ToString::to_string),
            Some("foo".to_string())
        );
        Ok(())
    }

    #[test]
    fn prefer_accept_rejection() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let skeleton = make_skeleton(None, &[], tmp.path())?;

        let mut deps_cfg = VariableMap::new();
        deps_cfg.set("config.libshared.buf", Value::Int(64), Origin::Default);

        // With an alternative left the rejection is soft.
        let accepted = skeleton.evaluate_prefer_accept(
            &mut deps_cfg,
            "config.libshared.buf = min(config.libshared.buf, 16)",
            "config.libshared.buf >= 32",
            POS,
            true,
        )?;
        assert!(!accepted);
        // The snapshot is left untouched.
        assert_eq!(deps_cfg.value("config.libshared.buf"), Some(&Value::Int(64)));

        // Without one it is fatal.
        let err = skeleton
            .evaluate_prefer_accept(
                &mut deps_cfg,
                "config.libshared.buf = min(config.libshared.buf, 16)",
                "config.libshared.buf >= 32",
                POS,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationRejected { .. }));
        Ok(())
    }

    #[test]
    fn require_only_sets_boolean_true() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let skeleton = make_skeleton(None, &[], tmp.path())?;

        let mut deps_cfg = VariableMap::new();
        assert!(skeleton.evaluate_require(
            &mut deps_cfg,
            "config.libshared.extra = true",
            POS,
            false,
        )?);
        assert_eq!(
            deps_cfg.value("config.libshared.extra"),
            Some(&Value::Bool(true))
        );

        let err = skeleton
            .evaluate_require(&mut deps_cfg, "config.libshared.buf = 16", POS, false)
            .unwrap_err();
        assert!(matches!(err, Error::RequireNonTrue { .. }));
        Ok(())
    }

    #[test]
    fn require_rejects_falsy_override() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let skeleton = make_skeleton(None, &[], tmp.path())?;

        let mut deps_cfg = VariableMap::new();
        deps_cfg.set("config.libshared.extra", Value::Bool(false), Origin::Override);

        let rejected = skeleton.evaluate_require(
            &mut deps_cfg,
            "config.libshared.extra = true",
            POS,
            true,
        )?;
        assert!(!rejected);
        Ok(())
    }

    #[test]
    fn collect_config_merges_by_precedence() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let mut skeleton = make_skeleton(None, &["config.foo.x=1"], tmp.path())?;
        skeleton.impose_dependent_var(
            "config.foo.x",
            Value::Int(2),
            PackageName::from_str("dep")?,
        );
        skeleton.impose_dependent_var(
            "config.foo.y",
            Value::Bool(true),
            PackageName::from_str("dep")?,
        );
        skeleton.evaluate_reflect("config.foo.api = 'bar'", POS)?;

        let (cmdline, variables) = skeleton.collect_config();
        assert_eq!(
            cmdline,
            vec![
                "config.foo.api=bar".to_string(),
                "config.foo.x=1".to_string(),
                "config.foo.y=true".to_string(),
            ]
        );
        assert_eq!(
            variables
                .iter()
                .map(|v| (v.name.as_str(), v.origin))
                .collect::<Vec<_>>(),
            vec![
                ("config.foo.api", ConfigOrigin::Reflect),
                ("config.foo.x", ConfigOrigin::User),
                ("config.foo.y", ConfigOrigin::Dependent),
            ]
        );
        Ok(())
    }

    #[test]
    fn operations_are_idempotent() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let skeleton = make_skeleton(Some("config.foo.buf = 8"), &[], tmp.path())?;
        let first = skeleton.evaluate_enable("config.foo.buf == 8", POS)?;
        let second = skeleton.evaluate_enable("config.foo.buf == 8", POS)?;
        assert_eq!(first, second);
        assert_eq!(skeleton.config_checksum(), skeleton.config_checksum());
        Ok(())
    }
}
